//! Planning pattern: decompose → execute → synthesize.
//!
//! The planner asks the model for a dependency graph of subtasks, executes
//! ready steps concurrently (each as its own ReAct run with an isolated
//! transcript), then asks the model once more to synthesize a final answer
//! from the collected subtask answers.
//!
//! # Failure handling
//!
//! - An invalid plan (unparseable, empty, dangling, cyclic) is re-requested
//!   once with the error appended; a second invalid plan fails the run.
//! - A failed subtask never aborts its running siblings. Its dependents are
//!   skipped, and the run fails only if a `required` step did not complete.

use std::collections::BTreeSet;

use arena_config::PlanningConfig;
use arena_core::error::{ErrorKind, PlanError, RunError};
use arena_core::message::{Message, Transcript};
use arena_core::model::CompletionOptions;
use arena_core::plan::Plan;
use arena_core::result::{AgentResult, RunStatus, SubtaskResult, SubtaskStatus};
use arena_core::task::Task;
use arena_telemetry::{SpanKind, Trace};
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::extract_json;
use super::react::ReactAgent;
use crate::engine::{CallSpec, Interrupted};

const PLANNER_PROMPT: &str = "You are a planner. Break the task into a small number of \
subtasks that together accomplish it. Reply with JSON only: {\"steps\": [{\"goal\": \"...\", \
\"depends_on\": [indices of earlier steps], \"required\": true}]}. Mark a step \
\"required\": false if the final answer can do without it.";

const SYNTHESIS_PROMPT: &str = "You are a synthesizer. Combine the subtask results into one \
complete answer to the original task.";

/// Why no usable plan was produced.
enum PlanningFailure {
    Cancelled,
    Model(String),
    Invalid(PlanError),
}

/// The Planning agent.
#[derive(Clone)]
pub struct PlanningAgent {
    /// Executes each plan step.
    worker: ReactAgent,
    /// Maximum steps running at once.
    max_parallel: usize,
    options: CompletionOptions,
}

impl PlanningAgent {
    pub fn new(worker: ReactAgent) -> Self {
        Self::from_config(worker, &PlanningConfig::default())
    }

    pub fn from_config(worker: ReactAgent, config: &PlanningConfig) -> Self {
        Self {
            worker: worker.with_max_steps(config.subtask_max_steps),
            max_parallel: config.max_parallel.max(1),
            options: CompletionOptions {
                temperature: 0.2,
                ..CompletionOptions::default()
            },
        }
    }

    pub fn with_max_parallel(mut self, max: usize) -> Self {
        self.max_parallel = max.max(1);
        self
    }

    pub async fn run(&self, task: &Task, cancel: &CancellationToken) -> AgentResult {
        info!(run_id = %task.id, strategy = "planning", max_parallel = self.max_parallel, "PlanningAgent starting");
        let mut trace = Trace::new(&task.id);
        let mut transcript = Transcript::new();

        // Step 1: decompose
        let (plan, plan_text) = match self.decompose(task, &mut trace, cancel).await {
            Ok(planned) => planned,
            Err(PlanningFailure::Cancelled) => {
                trace.end();
                return AgentResult::cancelled(transcript, trace);
            }
            Err(PlanningFailure::Model(message)) => {
                trace.end();
                return AgentResult::failed(RunError::new(ErrorKind::ModelError, message), transcript, trace);
            }
            Err(PlanningFailure::Invalid(e)) => {
                trace.end();
                return AgentResult::failed(
                    RunError::new(ErrorKind::PlanningError, e.to_string()),
                    transcript,
                    trace,
                );
            }
        };
        info!(run_id = %task.id, steps = plan.len(), "Plan accepted");
        transcript.push(Message::assistant(plan_text));

        // Step 2: execute in dependency order
        let (subtasks, was_cancelled) = self.execute(task, &plan, cancel).await;
        let mut steps = 0;
        let mut tool_calls = 0;
        for sub in &subtasks {
            if let Some(result) = &sub.result {
                trace.absorb(result.trace());
                steps += result.steps();
                tool_calls += result.tool_calls_made();
            }
        }

        if was_cancelled {
            trace.end();
            return AgentResult::cancelled(transcript, trace)
                .with_steps(steps, tool_calls)
                .with_subtasks(subtasks);
        }

        let unmet: Vec<usize> = subtasks
            .iter()
            .filter(|s| plan.steps()[s.index].required && s.status != SubtaskStatus::Completed)
            .map(|s| s.index)
            .collect();
        if !unmet.is_empty() {
            warn!(run_id = %task.id, ?unmet, "Required plan steps did not complete");
            trace.end();
            return AgentResult::failed(
                RunError::new(
                    ErrorKind::PlanningError,
                    format!("required steps {unmet:?} did not complete"),
                ),
                transcript,
                trace,
            )
            .with_steps(steps, tool_calls)
            .with_subtasks(subtasks);
        }

        // Step 3: synthesize
        let request = [
            Message::system(SYNTHESIS_PROMPT),
            Message::user(format!(
                "Task:\n{}\n\nSubtask results:\n{}",
                task.prompt(),
                render_subtasks(&subtasks)
            )),
        ];
        let synthesis = self
            .worker
            .engine()
            .consult(
                task,
                CallSpec::retried(SpanKind::Synthesis),
                &request,
                &self.options,
                &mut trace,
                cancel,
            )
            .await;
        trace.end();

        match synthesis {
            Ok(completion) => {
                let answer = completion.text.trim().to_string();
                let confidence = completion.confidence;
                transcript.push(Message::assistant(completion.text));
                AgentResult::completed(answer, transcript, trace)
                    .with_steps(steps, tool_calls)
                    .with_confidence(confidence)
                    .with_subtasks(subtasks)
            }
            Err(Interrupted::Cancelled) => AgentResult::cancelled(transcript, trace)
                .with_steps(steps, tool_calls)
                .with_subtasks(subtasks),
            Err(Interrupted::Failed(e)) => AgentResult::failed(
                RunError::new(ErrorKind::ModelError, format!("synthesis failed: {e}")),
                transcript,
                trace,
            )
            .with_steps(steps, tool_calls)
            .with_subtasks(subtasks),
        }
    }

    /// Request a plan, re-requesting once if it is invalid.
    async fn decompose(
        &self,
        task: &Task,
        trace: &mut Trace,
        cancel: &CancellationToken,
    ) -> Result<(Plan, String), PlanningFailure> {
        let tools = self.worker.engine().tools().list().await;
        let tool_list = if tools.is_empty() {
            "(none)".to_string()
        } else {
            tools
                .iter()
                .map(|t| format!("- {}: {}", t.name, t.description))
                .collect::<Vec<_>>()
                .join("\n")
        };
        let mut request = vec![
            Message::system(PLANNER_PROMPT),
            Message::user(format!(
                "Task:\n{}\n\nAvailable tools:\n{}",
                task.prompt(),
                tool_list
            )),
        ];

        let mut attempt = 0;
        loop {
            attempt += 1;
            let completion = self
                .worker
                .engine()
                .consult(
                    task,
                    CallSpec::retried(SpanKind::Plan),
                    &request,
                    &self.options,
                    trace,
                    cancel,
                )
                .await
                .map_err(|e| match e {
                    Interrupted::Cancelled => PlanningFailure::Cancelled,
                    Interrupted::Failed(e) => PlanningFailure::Model(format!("planning failed: {e}")),
                })?;

            match parse_plan(&completion.text) {
                Ok(plan) => return Ok((plan, completion.text)),
                Err(e) if attempt < 2 => {
                    warn!(run_id = %task.id, error = %e, "Invalid plan, re-requesting");
                    request.push(Message::assistant(completion.text));
                    request.push(Message::user(format!(
                        "That plan is invalid: {e}. Reply with a corrected plan in the same JSON format."
                    )));
                }
                Err(e) => {
                    warn!(run_id = %task.id, error = %e, "Invalid plan after re-request");
                    return Err(PlanningFailure::Invalid(e));
                }
            }
        }
    }

    /// Run plan steps as their dependencies complete.
    ///
    /// Returns results in plan order and whether cancellation stopped execution.
    async fn execute(
        &self,
        task: &Task,
        plan: &Plan,
        cancel: &CancellationToken,
    ) -> (Vec<SubtaskResult>, bool) {
        let mut slots: Vec<Option<SubtaskResult>> = (0..plan.len()).map(|_| None).collect();
        let mut completed = BTreeSet::new();
        let mut started = BTreeSet::new();
        let mut running = FuturesUnordered::new();
        let mut was_cancelled = false;

        loop {
            // Skips propagate transitively because dependencies come first.
            for &idx in plan.topological_order() {
                if slots[idx].is_some() || started.contains(&idx) {
                    continue;
                }
                let blocked = plan.steps()[idx].depends_on.iter().any(|dep| {
                    slots[*dep]
                        .as_ref()
                        .is_some_and(|s| s.status != SubtaskStatus::Completed)
                });
                if blocked {
                    debug!(run_id = %task.id, step = idx, "Skipping step with unmet dependency");
                    slots[idx] = Some(unfinished(plan, idx, SubtaskStatus::Skipped));
                }
            }

            for &idx in plan.topological_order() {
                if running.len() >= self.max_parallel {
                    break;
                }
                if slots[idx].is_some() || started.contains(&idx) || !plan.is_ready(idx, &completed) {
                    continue;
                }
                started.insert(idx);
                let subtask = task.subtask(idx, plan.steps()[idx].goal.clone());
                debug!(run_id = %task.id, step = idx, subtask_id = %subtask.id, "Starting plan step");
                let worker = &self.worker;
                running.push(async move {
                    let result = worker.run(&subtask, cancel).await;
                    (idx, result)
                });
            }

            if running.is_empty() {
                break;
            }

            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    was_cancelled = true;
                    break;
                }
                next = running.next() => next,
            };
            let Some((idx, result)) = next else {
                break;
            };

            let status = match result.status() {
                RunStatus::Completed => {
                    completed.insert(idx);
                    SubtaskStatus::Completed
                }
                RunStatus::Cancelled => SubtaskStatus::Cancelled,
                RunStatus::Failed | RunStatus::BudgetExhausted => {
                    warn!(run_id = %task.id, step = idx, status = %result.status(), "Plan step did not complete");
                    SubtaskStatus::Failed
                }
            };
            slots[idx] = Some(SubtaskResult {
                index: idx,
                goal: plan.steps()[idx].goal.clone(),
                status,
                result: Some(Box::new(result)),
            });
        }

        let results = slots
            .into_iter()
            .enumerate()
            .map(|(idx, slot)| slot.unwrap_or_else(|| unfinished(plan, idx, SubtaskStatus::Cancelled)))
            .collect();
        (results, was_cancelled)
    }
}

fn unfinished(plan: &Plan, idx: usize, status: SubtaskStatus) -> SubtaskResult {
    SubtaskResult {
        index: idx,
        goal: plan.steps()[idx].goal.clone(),
        status,
        result: None,
    }
}

fn parse_plan(text: &str) -> Result<Plan, PlanError> {
    let value = extract_json(text)
        .ok_or_else(|| PlanError::Unparseable("no JSON plan found in the response".into()))?;
    Plan::from_json(&value)
}

fn render_subtasks(subtasks: &[SubtaskResult]) -> String {
    subtasks
        .iter()
        .map(|s| {
            let status = serde_json::to_value(s.status)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default();
            format!("{}. {} [{}]: {}", s.index, s.goal, status, s.answer().unwrap_or("-"))
        })
        .collect::<Vec<_>>()
        .join("\n")
}
