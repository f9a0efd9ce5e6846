//! Agent patterns: structured reasoning strategies.
//!
//! 1. **ReAct**: Thought → Action → Observation loop over the step engine
//! 2. **Reflection**: draft, critique, revise
//! 3. **Planning**: decompose into a dependency graph, execute, synthesize

pub mod planning;
pub mod react;
pub mod reflection;

pub use planning::PlanningAgent;
pub use react::ReactAgent;
pub use reflection::{Critique, ReflectionAgent, Verdict};

#[cfg(test)]
pub(crate) mod test_helpers;

/// Pull a JSON value out of model text.
///
/// Accepts bare JSON, JSON inside a Markdown code fence, or JSON embedded
/// in surrounding prose (first `{`/`[` to the matching last `}`/`]`).
pub(crate) fn extract_json(text: &str) -> Option<serde_json::Value> {
    let body = strip_code_fence(text.trim());
    if let Ok(value) = serde_json::from_str(body) {
        return Some(value);
    }
    [('{', '}'), ('[', ']')].into_iter().find_map(|(open, close)| {
        let start = body.find(open)?;
        let end = body.rfind(close)?;
        if end <= start {
            return None;
        }
        serde_json::from_str(&body[start..=end]).ok()
    })
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop the info string ("json") on the opening fence line.
    let rest = rest.split_once('\n').map_or("", |(_, body)| body);
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_fenced_json() {
        let text = "```json\n{\"verdict\": \"accept\"}\n```";
        assert_eq!(extract_json(text), Some(serde_json::json!({"verdict": "accept"})));
    }

    #[test]
    fn extracts_json_from_prose() {
        let text = "Here is the plan: {\"steps\": []} hope it helps";
        assert_eq!(extract_json(text), Some(serde_json::json!({"steps": []})));
    }

    #[test]
    fn prose_without_json_is_none() {
        assert_eq!(extract_json("ACCEPT looks good"), None);
    }
}
