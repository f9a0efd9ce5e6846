//! Reflection pattern: draft → critique → revise.
//!
//! A ReAct pass produces a draft. A critic prompt then judges it; on
//! `revise` a fresh ReAct pass is seeded with the prior draft and the
//! critique notes. The loop ends on `accept`, on a failed revision (the
//! previous draft stands) or when the iteration budget is spent.

use arena_config::ReflectionConfig;
use arena_core::message::Message;
use arena_core::model::CompletionOptions;
use arena_core::result::{AgentResult, RunStatus};
use arena_core::task::Task;
use arena_telemetry::{SpanKind, Trace};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::extract_json;
use super::react::ReactAgent;
use crate::engine::{CallSpec, Interrupted};

const CRITIC_PROMPT: &str = "You are a critic. Judge whether the draft answer fully and \
correctly addresses the task. Reply with JSON: {\"verdict\": \"accept\" | \"revise\", \
\"notes\": \"what to fix\"}.";

const REVISE_INSTRUCTION: &str = "Revise your previous answer to address the critique. \
End with 'Final Answer:' followed by the improved answer.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Accept,
    Revise,
}

/// The critic's judgement of one draft.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Critique {
    pub verdict: Verdict,
    pub notes: String,
}

impl Critique {
    pub fn accept() -> Self {
        Self {
            verdict: Verdict::Accept,
            notes: String::new(),
        }
    }

    /// Parse critic output.
    ///
    /// Understands a JSON object (optionally fenced) or a leading
    /// `ACCEPT` / `REVISE` keyword. Anything else is `None`.
    pub fn parse(text: &str) -> Option<Self> {
        if let Some(value) = extract_json(text)
            && let Some(verdict) = value.get("verdict").and_then(|v| v.as_str())
        {
            let verdict = parse_verdict(verdict)?;
            let notes = value
                .get("notes")
                .and_then(|n| n.as_str())
                .unwrap_or_default()
                .trim()
                .to_string();
            return Some(Self { verdict, notes });
        }

        let trimmed = text.trim_start();
        let keyword: String = trimmed
            .chars()
            .take_while(|c| c.is_ascii_alphabetic())
            .collect();
        let verdict = parse_verdict(&keyword)?;
        let notes = trimmed[keyword.len()..]
            .trim_start_matches([':', '-', '.', ' '])
            .trim()
            .to_string();
        Some(Self { verdict, notes })
    }
}

fn parse_verdict(word: &str) -> Option<Verdict> {
    match word.trim().to_ascii_lowercase().as_str() {
        "accept" => Some(Verdict::Accept),
        "revise" => Some(Verdict::Revise),
        _ => None,
    }
}

/// The Reflection agent.
#[derive(Clone)]
pub struct ReflectionAgent {
    /// Produces drafts and revisions.
    react: ReactAgent,
    /// Total draft generations, including the first.
    max_iterations: u32,
    critic_options: CompletionOptions,
}

impl ReflectionAgent {
    pub fn new(react: ReactAgent) -> Self {
        Self::from_config(react, &ReflectionConfig::default())
    }

    pub fn from_config(react: ReactAgent, config: &ReflectionConfig) -> Self {
        let critic_options = CompletionOptions {
            temperature: 0.0,
            ..CompletionOptions::default()
        };
        Self {
            react,
            max_iterations: config.max_iterations,
            critic_options,
        }
    }

    /// Set max iterations. Zero is treated as one.
    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations.max(1)
    }

    pub async fn run(&self, task: &Task, cancel: &CancellationToken) -> AgentResult {
        let iterations = self.max_iterations();
        info!(run_id = %task.id, strategy = "reflection", iterations, "ReflectionAgent starting");

        let mut draft = self.react.run(task, cancel).await;
        if iterations == 1 || !draft.is_completed() {
            return draft;
        }

        let mut trace = Trace::new(&task.id);
        trace.absorb(draft.trace());
        let mut steps = draft.steps();
        let mut tool_calls = draft.tool_calls_made();

        for iteration in 1..iterations {
            let critique = match self.critique(task, draft.answer(), &mut trace, cancel).await {
                Some(critique) => critique,
                None => return cancelled(draft, trace, steps, tool_calls),
            };
            debug!(run_id = %task.id, iteration, verdict = ?critique.verdict, "Critique received");
            if critique.verdict == Verdict::Accept {
                break;
            }

            let seed = vec![
                Message::assistant(draft.answer()),
                Message::user(format!("Critique:\n{}\n\n{}", critique.notes, REVISE_INSTRUCTION)),
            ];
            let revision = self.react.run_seeded(task, seed, cancel).await;
            trace.absorb(revision.trace());
            steps += revision.steps();
            tool_calls += revision.tool_calls_made();

            match revision.status() {
                RunStatus::Completed => draft = revision,
                RunStatus::Cancelled => return cancelled(revision, trace, steps, tool_calls),
                RunStatus::Failed | RunStatus::BudgetExhausted => {
                    warn!(
                        run_id = %task.id,
                        iteration,
                        status = %revision.status(),
                        "Revision did not complete, keeping previous draft"
                    );
                    break;
                }
            }
        }

        trace.end();
        let confidence = draft.confidence();
        let (answer, transcript, _) = draft.into_parts();
        AgentResult::completed(answer, transcript, trace)
            .with_steps(steps, tool_calls)
            .with_confidence(confidence)
    }

    /// Ask the critic once. `None` means the run was cancelled; any other
    /// failure is an implicit accept.
    async fn critique(
        &self,
        task: &Task,
        draft: &str,
        trace: &mut Trace,
        cancel: &CancellationToken,
    ) -> Option<Critique> {
        let request = [
            Message::system(CRITIC_PROMPT),
            Message::user(format!("Task:\n{}\n\nDraft answer:\n{}", task.prompt(), draft)),
        ];
        let engine = self.react.engine();
        match engine
            .consult(
                task,
                CallSpec::single(SpanKind::Critique),
                &request,
                &self.critic_options,
                trace,
                cancel,
            )
            .await
        {
            Ok(completion) => Some(Critique::parse(&completion.text).unwrap_or_else(|| {
                debug!(run_id = %task.id, "Unparseable critique, accepting draft");
                Critique::accept()
            })),
            Err(Interrupted::Cancelled) => None,
            Err(Interrupted::Failed(e)) => {
                warn!(run_id = %task.id, error = %e, "Critic failed, accepting draft");
                Some(Critique::accept())
            }
        }
    }
}

fn cancelled(last: AgentResult, mut trace: Trace, steps: u32, tool_calls: usize) -> AgentResult {
    trace.end();
    let (_, transcript, _) = last.into_parts();
    AgentResult::cancelled(transcript, trace).with_steps(steps, tool_calls)
}
