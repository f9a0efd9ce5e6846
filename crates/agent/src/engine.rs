//! The Step Engine: the control loop every strategy is built on.
//!
//! One run alternates model calls and tool calls until the policy's stop
//! predicate fires, the step budget runs out, or the caller cancels:
//!
//! 1. **Check** cancellation, the step budget and the task deadline
//! 2. **Request** a completion for `[user: task prompt] ++ transcript`
//! 3. **Stop** if the predicate fires, recording the final answer
//! 4. **Validate** each proposed tool call against the registry
//! 5. **Execute** the valid calls concurrently, appending results in
//!    proposal order
//!
//! The engine never returns an error. Every failure ends up in the
//! [`AgentResult`] or, for tool calls, in a synthetic tool message the model
//! sees on its next step.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arena_config::EngineConfig;
use arena_core::error::{ErrorKind, ModelError, RunError, ToolError};
use arena_core::event::{DomainEvent, EventBus};
use arena_core::message::{Message, Transcript};
use arena_core::model::{Completion, CompletionOptions, ModelClient};
use arena_core::result::AgentResult;
use arena_core::task::Task;
use arena_core::tool::{ArgumentValidator, ToolCall, ToolDescriptor, ToolRegistry, ToolResult};
use arena_telemetry::{Span, SpanKind, Trace};
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Timeouts and retry backoff for one engine.
#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    pub model_timeout: Duration,
    pub tool_timeout: Duration,
    pub retry_backoff: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl EngineSettings {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            model_timeout: Duration::from_millis(config.model_timeout_ms),
            tool_timeout: Duration::from_millis(config.tool_timeout_ms),
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }
}

/// Which registry tools a run may use.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ToolFilter {
    #[default]
    All,
    Allow(BTreeSet<String>),
    Deny(BTreeSet<String>),
}

impl ToolFilter {
    pub fn allow<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Allow(names.into_iter().map(Into::into).collect())
    }

    pub fn deny<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Deny(names.into_iter().map(Into::into).collect())
    }

    pub fn permits(&self, name: &str) -> bool {
        match self {
            Self::All => true,
            Self::Allow(names) => names.contains(name),
            Self::Deny(names) => !names.contains(name),
        }
    }
}

/// Decides, from a completion, whether the run is finished.
pub type StopPredicate = Arc<dyn Fn(&Completion) -> bool + Send + Sync>;

/// How a strategy drives the engine for one run.
#[derive(Clone)]
pub struct StepPolicy {
    pub max_steps: u32,
    pub stop: StopPredicate,
    pub tools: ToolFilter,
    pub options: CompletionOptions,
    /// When set, the answer is the text after this marker (if present).
    pub answer_marker: Option<String>,
}

impl std::fmt::Debug for StepPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepPolicy")
            .field("max_steps", &self.max_steps)
            .field("tools", &self.tools)
            .field("options", &self.options)
            .field("answer_marker", &self.answer_marker)
            .finish_non_exhaustive()
    }
}

impl StepPolicy {
    /// A policy that stops as soon as the model proposes no tool calls.
    pub fn new(max_steps: u32) -> Self {
        Self {
            max_steps,
            stop: Arc::new(|c: &Completion| !c.has_tool_calls()),
            tools: ToolFilter::All,
            options: CompletionOptions::default(),
            answer_marker: None,
        }
    }

    pub fn with_stop(mut self, stop: impl Fn(&Completion) -> bool + Send + Sync + 'static) -> Self {
        self.stop = Arc::new(stop);
        self
    }

    pub fn with_tools(mut self, tools: ToolFilter) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_options(mut self, options: CompletionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_answer_marker(mut self, marker: impl Into<String>) -> Self {
        self.answer_marker = Some(marker.into());
        self
    }

    /// The final answer carried by a stopping completion.
    pub fn extract_answer(&self, text: &str) -> String {
        if let Some(marker) = &self.answer_marker
            && let Some((_, after)) = text.split_once(marker.as_str())
        {
            return after.trim().to_string();
        }
        text.trim().to_string()
    }
}

/// Why a model request produced no completion.
#[derive(Debug, Clone)]
pub enum Interrupted {
    Cancelled,
    /// The last attempt's error
    Failed(ModelError),
}

/// How a single model consultation is recorded and retried.
#[derive(Debug, Clone, Copy)]
pub struct CallSpec {
    pub kind: SpanKind,
    pub step: u32,
    pub attempts: u32,
}

impl CallSpec {
    /// A Step Engine step: recorded as a model call, retried once.
    pub fn step(step: u32) -> Self {
        Self {
            kind: SpanKind::ModelCall,
            step,
            attempts: 2,
        }
    }

    /// A call outside the step loop, retried once.
    pub fn retried(kind: SpanKind) -> Self {
        Self {
            kind,
            step: 0,
            attempts: 2,
        }
    }

    /// A call outside the step loop with no retry.
    pub fn single(kind: SpanKind) -> Self {
        Self {
            kind,
            step: 0,
            attempts: 1,
        }
    }
}

/// A proposed call after id assignment and validation.
struct Proposal {
    call: ToolCall,
    rejection: Option<String>,
}

/// The tools one run may call, listed once with their schemas compiled.
struct Catalogue {
    descriptors: Vec<ToolDescriptor>,
    validators: HashMap<String, ArgumentValidator>,
}

impl Catalogue {
    fn new(descriptors: Vec<ToolDescriptor>) -> Self {
        let validators = descriptors
            .iter()
            .map(|d| (d.name.clone(), ArgumentValidator::new(&d.input_schema)))
            .collect();
        Self {
            descriptors,
            validators,
        }
    }
}

/// Mutable state owned by one run.
struct RunState {
    transcript: Transcript,
    trace: Trace,
    steps: u32,
    tool_calls_made: usize,
    seen_ids: HashSet<String>,
}

/// Drives one task through model and tool calls.
///
/// Cheap to clone; strategies keep their own copy.
#[derive(Clone)]
pub struct StepEngine {
    model: Arc<dyn ModelClient>,
    tools: Arc<dyn ToolRegistry>,
    settings: EngineSettings,
    event_bus: Option<Arc<EventBus>>,
}

impl StepEngine {
    pub fn new(model: Arc<dyn ModelClient>, tools: Arc<dyn ToolRegistry>) -> Self {
        Self {
            model,
            tools,
            settings: EngineSettings::default(),
            event_bus: None,
        }
    }

    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Publish domain events for every run of this engine.
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn model(&self) -> &Arc<dyn ModelClient> {
        &self.model
    }

    pub fn tools(&self) -> &Arc<dyn ToolRegistry> {
        &self.tools
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Run a task from an empty transcript.
    pub async fn run(&self, task: &Task, policy: &StepPolicy, cancel: &CancellationToken) -> AgentResult {
        self.run_seeded(task, policy, Vec::new(), cancel).await
    }

    /// Run a task whose transcript starts with `seed`.
    pub async fn run_seeded(
        &self,
        task: &Task,
        policy: &StepPolicy,
        seed: Vec<Message>,
        cancel: &CancellationToken,
    ) -> AgentResult {
        let seen_ids = seed
            .iter()
            .flat_map(|m| m.tool_calls.iter().map(|c| c.id.clone()))
            .collect();
        let mut state = RunState {
            transcript: Transcript::seeded(seed),
            trace: Trace::new(&task.id),
            steps: 0,
            tool_calls_made: 0,
            seen_ids,
        };

        info!(run_id = %task.id, max_steps = policy.max_steps, "Step engine run started");
        self.publish(DomainEvent::RunStarted {
            task_id: task.id.clone(),
            max_steps: policy.max_steps,
            timestamp: Utc::now(),
        });

        let result = self.drive(task, policy, &mut state, cancel).await;

        info!(
            run_id = %task.id,
            status = %result.status(),
            steps = result.steps(),
            tool_calls = result.tool_calls_made(),
            "Step engine run finished"
        );
        self.publish(DomainEvent::RunFinished {
            task_id: task.id.clone(),
            status: result.status(),
            steps: result.steps(),
            timestamp: Utc::now(),
        });
        result
    }

    async fn drive(
        &self,
        task: &Task,
        policy: &StepPolicy,
        state: &mut RunState,
        cancel: &CancellationToken,
    ) -> AgentResult {
        // Listed lazily so a zero-step budget never touches the registry.
        let mut catalogue: Option<Catalogue> = None;

        loop {
            if cancel.is_cancelled() {
                debug!(run_id = %task.id, step = state.steps, "Cancellation observed before step");
                return finish(state, Finish::Cancelled);
            }
            if state.steps >= policy.max_steps {
                warn!(run_id = %task.id, max_steps = policy.max_steps, "Step budget exhausted");
                return finish(state, Finish::BudgetExhausted);
            }
            if task.is_past_deadline() {
                warn!(run_id = %task.id, step = state.steps, "Task deadline passed");
                return finish(state, Finish::BudgetExhausted);
            }

            let available = match catalogue.take() {
                Some(known) => known,
                None => {
                    let listed: Vec<ToolDescriptor> = self
                        .tools
                        .list()
                        .await
                        .into_iter()
                        .filter(|d| policy.tools.permits(&d.name))
                        .collect();
                    Catalogue::new(listed)
                }
            };

            let request: Vec<Message> = std::iter::once(Message::user(task.prompt()))
                .chain(state.transcript.messages().iter().cloned())
                .collect();
            let options = policy.options.with_tools(available.descriptors.clone());

            let completion = match self
                .consult(task, CallSpec::step(state.steps), &request, &options, &mut state.trace, cancel)
                .await
            {
                Ok(completion) => completion,
                Err(Interrupted::Cancelled) => return finish(state, Finish::Cancelled),
                Err(Interrupted::Failed(e)) => {
                    return finish(
                        state,
                        Finish::Failed(RunError::new(ErrorKind::ModelError, e.to_string())),
                    );
                }
            };
            state.steps += 1;
            debug!(
                run_id = %task.id,
                step = state.steps,
                tool_calls = completion.tool_calls.len(),
                "Model responded"
            );

            if (policy.stop)(&completion) {
                let answer = policy.extract_answer(&completion.text);
                let confidence = completion.confidence;
                state.transcript.push(Message::assistant(completion.text));
                return finish(state, Finish::Completed { answer, confidence });
            }

            let proposals = self.prepare(completion.tool_calls, &available, policy, state);
            let calls: Vec<ToolCall> = proposals.iter().map(|p| p.call.clone()).collect();
            state
                .transcript
                .push(Message::assistant_with_calls(completion.text, calls));

            let Some(results) = self.execute(task, proposals, &mut state.trace, cancel).await else {
                debug!(run_id = %task.id, step = state.steps, "Cancelled while tools were in flight");
                return finish(state, Finish::Cancelled);
            };
            for result in results {
                state
                    .transcript
                    .push(Message::tool_result(result.call_id.clone(), result.render()));
                state.tool_calls_made += 1;
            }
            catalogue = Some(available);
        }
    }

    /// Ask the model client for one completion.
    ///
    /// Each attempt runs under the model timeout and is raced against
    /// cancellation; failed attempts are retried after the configured backoff
    /// until `spec.attempts` is used up. Every attempt is recorded in `trace`.
    pub async fn consult(
        &self,
        task: &Task,
        spec: CallSpec,
        request: &[Message],
        options: &CompletionOptions,
        trace: &mut Trace,
        cancel: &CancellationToken,
    ) -> Result<Completion, Interrupted> {
        let timeout_ms = self.settings.model_timeout.as_millis() as u64;
        let attempts = spec.attempts.max(1);
        let mut last_error = ModelError::Malformed("no attempt made".into());

        for attempt in 1..=attempts {
            let started = Instant::now();
            let call = tokio::time::timeout(self.settings.model_timeout, self.model.complete(request, options));
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Interrupted::Cancelled),
                outcome = call => outcome,
            };
            let elapsed = started.elapsed().as_millis() as u64;

            let result = match outcome {
                Ok(Ok(completion)) => completion.check_well_formed().map(|_| completion),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(ModelError::Timeout { timeout_ms }),
            };

            let mut span = Span::new(spec.kind, self.model.name())
                .with_metadata("step", serde_json::json!(spec.step))
                .with_metadata("attempt", serde_json::json!(attempt));
            if let Ok(Completion { usage: Some(usage), .. }) = &result {
                span.record_tokens(usage.prompt_tokens, usage.completion_tokens);
            }
            trace.add_span(span.finish(result.is_ok(), elapsed));
            self.publish(DomainEvent::ModelCalled {
                task_id: task.id.clone(),
                client: self.model.name().to_string(),
                step: spec.step,
                attempt,
                success: result.is_ok(),
                duration_ms: elapsed,
                timestamp: Utc::now(),
            });

            match result {
                Ok(completion) => return Ok(completion),
                Err(e) => {
                    warn!(
                        run_id = %task.id,
                        kind = %spec.kind,
                        step = spec.step,
                        attempt,
                        error = %e,
                        "Model call failed"
                    );
                    last_error = e;
                }
            }

            if attempt < attempts {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(Interrupted::Cancelled),
                    _ = tokio::time::sleep(self.settings.retry_backoff) => {}
                }
            }
        }
        Err(Interrupted::Failed(last_error))
    }

    /// Assign ids and validate every proposed call, in proposal order.
    fn prepare(
        &self,
        calls: Vec<ToolCall>,
        available: &Catalogue,
        policy: &StepPolicy,
        state: &mut RunState,
    ) -> Vec<Proposal> {
        calls
            .into_iter()
            .map(|mut call| {
                let mut rejection = None;
                if call.id.trim().is_empty() {
                    call.id = fresh_call_id();
                } else if state.seen_ids.contains(&call.id) {
                    rejection = Some(format!("duplicate tool call id '{}'", call.id));
                    call.id = fresh_call_id();
                }
                state.seen_ids.insert(call.id.clone());

                if rejection.is_none() {
                    rejection = check_call(&call, available, &policy.tools).err();
                }
                Proposal { call, rejection }
            })
            .collect()
    }

    /// Execute valid proposals concurrently.
    ///
    /// Returns `None` if cancelled while calls are still in flight; those
    /// calls then finish in the background and their results are dropped.
    /// Calls that have all finished are kept even if the token is already
    /// set, so every proposal gets its tool message.
    async fn execute(
        &self,
        task: &Task,
        proposals: Vec<Proposal>,
        trace: &mut Trace,
        cancel: &CancellationToken,
    ) -> Option<Vec<ToolResult>> {
        let mut slots: Vec<Option<ToolResult>> = Vec::with_capacity(proposals.len());
        let mut pending = Vec::new();
        let mut handles = Vec::new();

        for (idx, proposal) in proposals.into_iter().enumerate() {
            if let Some(reason) = proposal.rejection {
                warn!(run_id = %task.id, tool = %proposal.call.name, reason = %reason, "Rejected tool call");
                slots.push(Some(ToolResult::failure(
                    &proposal.call,
                    ErrorKind::ValidationError,
                    reason,
                    0,
                )));
                continue;
            }
            slots.push(None);
            let registry = Arc::clone(&self.tools);
            let timeout = self.settings.tool_timeout;
            let call = proposal.call.clone();
            handles.push(tokio::spawn(invoke_tool(registry, call, timeout)));
            pending.push((idx, proposal.call));
        }

        if !handles.is_empty() {
            let joined = tokio::select! {
                biased;
                joined = futures::future::join_all(handles) => joined,
                _ = cancel.cancelled() => return None,
            };
            for ((idx, call), outcome) in pending.into_iter().zip(joined) {
                let result = outcome.unwrap_or_else(|e| {
                    ToolResult::failure(&call, ErrorKind::ToolError, format!("tool task aborted: {e}"), 0)
                });
                slots[idx] = Some(result);
            }
        }

        let results: Vec<ToolResult> = slots.into_iter().flatten().collect();
        for result in &results {
            self.record_tool(task, result, trace);
        }
        Some(results)
    }

    fn record_tool(&self, task: &Task, result: &ToolResult, trace: &mut Trace) {
        match &result.outcome {
            Ok(_) => debug!(
                run_id = %task.id,
                tool = %result.tool_name,
                latency_ms = result.latency_ms,
                "Tool call succeeded"
            ),
            Err(failure) => warn!(
                run_id = %task.id,
                tool = %result.tool_name,
                kind = %failure.kind,
                error = %failure.message,
                "Tool call failed"
            ),
        }
        let mut span = Span::new(SpanKind::ToolCall, &result.tool_name)
            .with_metadata("call_id", serde_json::json!(result.call_id));
        if let Err(failure) = &result.outcome {
            span = span.with_metadata("error_kind", serde_json::json!(failure.kind));
        }
        trace.add_span(span.finish(result.is_success(), result.latency_ms));
        self.publish(DomainEvent::ToolExecuted {
            task_id: task.id.clone(),
            tool_name: result.tool_name.clone(),
            success: result.is_success(),
            duration_ms: result.latency_ms,
            timestamp: Utc::now(),
        });
    }

    fn publish(&self, event: DomainEvent) {
        if let Some(bus) = &self.event_bus {
            bus.publish(event);
        }
    }
}

async fn invoke_tool(registry: Arc<dyn ToolRegistry>, call: ToolCall, timeout: Duration) -> ToolResult {
    let started = Instant::now();
    let outcome = tokio::time::timeout(timeout, registry.invoke(&call.name, call.arguments.clone())).await;
    let elapsed = started.elapsed().as_millis() as u64;
    match outcome {
        Ok(Ok(payload)) => ToolResult::success(&call, payload, elapsed),
        Ok(Err(e)) => ToolResult::failure(&call, ErrorKind::ToolError, e.to_string(), elapsed),
        Err(_) => {
            let e = ToolError::Timeout {
                tool_name: call.name.clone(),
                timeout_ms: timeout.as_millis() as u64,
            };
            ToolResult::failure(&call, ErrorKind::ToolError, e.to_string(), elapsed)
        }
    }
}

fn check_call(call: &ToolCall, available: &Catalogue, filter: &ToolFilter) -> Result<(), String> {
    if !filter.permits(&call.name) {
        return Err(format!("tool '{}' is not permitted in this run", call.name));
    }
    let Some(validator) = available.validators.get(&call.name) else {
        return Err(format!("unknown tool '{}'", call.name));
    };
    validator
        .validate(&call.arguments)
        .map_err(|errors| format!("invalid arguments for '{}': {}", call.name, errors.join("; ")))
}

fn fresh_call_id() -> String {
    format!("call_{}", uuid::Uuid::new_v4().simple())
}

enum Finish {
    Completed { answer: String, confidence: Option<f32> },
    BudgetExhausted,
    Failed(RunError),
    Cancelled,
}

fn finish(state: &mut RunState, how: Finish) -> AgentResult {
    let transcript = std::mem::take(&mut state.transcript);
    let mut trace = std::mem::replace(&mut state.trace, Trace::new(""));
    trace.end();
    let result = match how {
        Finish::Completed { answer, confidence } => {
            AgentResult::completed(answer, transcript, trace).with_confidence(confidence)
        }
        Finish::BudgetExhausted => AgentResult::budget_exhausted(transcript, trace),
        Finish::Failed(error) => AgentResult::failed(error, transcript, trace),
        Finish::Cancelled => AgentResult::cancelled(transcript, trace),
    };
    result.with_steps(state.steps, state.tool_calls_made)
}
