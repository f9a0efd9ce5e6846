//! ReAct pattern: Thought → Action → Observation loop.
//!
//! The agent reasons step-by-step, choosing tools to gather information,
//! then produces a final answer. It is a thin policy over the
//! [`StepEngine`]: the loop terminates when the model writes the
//! final-answer marker or proposes no tool calls, or when the step budget
//! runs out.

use arena_config::{EngineConfig, ReactConfig};
use arena_core::message::Message;
use arena_core::model::{Completion, CompletionOptions};
use arena_core::result::AgentResult;
use arena_core::task::Task;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::engine::{StepEngine, StepPolicy, ToolFilter};

/// Configuration for the ReAct agent.
#[derive(Clone)]
pub struct ReactAgent {
    /// Shared step engine.
    engine: StepEngine,
    /// Step budget when the task carries none.
    max_steps: u32,
    /// Marker that ends the loop.
    final_answer_marker: String,
    /// Which tools may be used.
    tools: ToolFilter,
    /// Temperature, max tokens, stop markers.
    options: CompletionOptions,
}

impl ReactAgent {
    /// Create a new ReAct agent with default budget and marker.
    pub fn new(engine: StepEngine) -> Self {
        Self::from_config(engine, &ReactConfig::default(), &EngineConfig::default())
    }

    pub fn from_config(engine: StepEngine, react: &ReactConfig, defaults: &EngineConfig) -> Self {
        Self {
            engine,
            max_steps: react.max_steps,
            final_answer_marker: react.final_answer_marker.clone(),
            tools: ToolFilter::All,
            options: CompletionOptions {
                max_tokens: defaults.max_tokens,
                temperature: defaults.temperature,
                ..CompletionOptions::default()
            },
        }
    }

    /// Set max steps.
    pub fn with_max_steps(mut self, max: u32) -> Self {
        self.max_steps = max;
        self
    }

    pub fn with_final_answer_marker(mut self, marker: impl Into<String>) -> Self {
        self.final_answer_marker = marker.into();
        self
    }

    /// Restrict the tools this agent may call.
    pub fn with_tool_filter(mut self, tools: ToolFilter) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_options(mut self, options: CompletionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn engine(&self) -> &StepEngine {
        &self.engine
    }

    pub fn max_steps(&self) -> u32 {
        self.max_steps
    }

    /// The engine policy for one task.
    pub fn policy(&self, task: &Task) -> StepPolicy {
        let marker = self.final_answer_marker.clone();
        StepPolicy::new(task.step_budget.unwrap_or(self.max_steps))
            .with_stop(move |c: &Completion| c.text.contains(&marker) || !c.has_tool_calls())
            .with_tools(self.tools.clone())
            .with_options(self.options.clone())
            .with_answer_marker(self.final_answer_marker.clone())
    }

    /// Run the task from an empty transcript.
    pub async fn run(&self, task: &Task, cancel: &CancellationToken) -> AgentResult {
        self.run_seeded(task, Vec::new(), cancel).await
    }

    /// Run the task with prior context already in the transcript.
    pub async fn run_seeded(
        &self,
        task: &Task,
        seed: Vec<Message>,
        cancel: &CancellationToken,
    ) -> AgentResult {
        let policy = self.policy(task);
        info!(run_id = %task.id, strategy = "react", max_steps = policy.max_steps, "ReactAgent starting");
        self.engine.run_seeded(task, &policy, seed, cancel).await
    }
}
