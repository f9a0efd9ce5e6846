//! Collaborator doubles shared by the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use arena_core::error::{ModelError, ToolError};
use arena_core::message::{Message, Role};
use arena_core::model::{Completion, CompletionOptions, ModelClient};
use arena_core::tool::Tool;
use async_trait::async_trait;

type Rule = Box<dyn Fn(&[Message]) -> Option<Completion> + Send + Sync>;

/// A model client that answers with the first matching rule, falling back
/// to a queue of scripted completions.
pub struct RuleModel {
    rules: Vec<Rule>,
    queue: Mutex<VecDeque<Completion>>,
    delay: Duration,
    calls: Mutex<usize>,
}

impl RuleModel {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            queue: Mutex::new(VecDeque::new()),
            delay: Duration::ZERO,
            calls: Mutex::new(0),
        }
    }

    /// Answer any request whose system prompt starts with `prefix`.
    pub fn on_system(mut self, prefix: &'static str, text: &'static str) -> Self {
        self.rules.push(Box::new(move |messages: &[Message]| {
            messages
                .iter()
                .any(|m| m.role == Role::System && m.content.starts_with(prefix))
                .then(|| Completion::text(text))
        }));
        self
    }

    /// Answer any request whose opening user message contains `needle`.
    pub fn on_goal(mut self, needle: &'static str, completion: Completion) -> Self {
        self.rules.push(Box::new(move |messages: &[Message]| {
            let first = messages.first()?;
            (first.role == Role::User && first.content.contains(needle)).then(|| completion.clone())
        }));
        self
    }

    pub fn then(self, completion: Completion) -> Self {
        self.queue.lock().unwrap().push_back(completion);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl ModelClient for RuleModel {
    fn name(&self) -> &str {
        "rule_model"
    }

    async fn complete(
        &self,
        messages: &[Message],
        _options: &CompletionOptions,
    ) -> Result<Completion, ModelError> {
        *self.calls.lock().unwrap() += 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(completion) = self.rules.iter().find_map(|rule| rule(messages)) {
            return Ok(completion);
        }
        self.queue
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ModelError::Malformed("script exhausted".into()))
    }
}

/// The `list_issues` tool from the repository examples.
pub struct ListIssues;

#[async_trait]
impl Tool for ListIssues {
    fn name(&self) -> &str {
        "list_issues"
    }

    fn description(&self) -> &str {
        "List open issues of a repository"
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": { "repo": { "type": "string" } },
            "required": ["repo"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let repo = arguments["repo"].as_str().unwrap_or_default();
        if repo == "missing" {
            return Err(ToolError::ExecutionFailed {
                tool_name: "list_issues".into(),
                reason: "repository not found".into(),
            });
        }
        Ok(serde_json::json!([
            {"number": 1, "title": "Crash on start"},
            {"number": 2, "title": "Docs typo"},
            {"number": 3, "title": "Slow build"}
        ]))
    }
}
