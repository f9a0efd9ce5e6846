//! Terminal output of a strategy run.

use arena_telemetry::Trace;
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, RunError};
use crate::message::Transcript;

/// How a run ended. Set once, never revised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    BudgetExhausted,
    Failed,
    Cancelled,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Completed => "completed",
            Self::BudgetExhausted => "budget_exhausted",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// How a plan step resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskStatus {
    Completed,
    Failed,
    /// Not executed because a dependency did not complete
    Skipped,
    /// Not executed (or discarded) because the run was cancelled
    Cancelled,
}

/// The recorded outcome of one plan step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtaskResult {
    pub index: usize,
    pub goal: String,
    pub status: SubtaskStatus,
    /// The nested run, absent for skipped and never-started steps
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Box<AgentResult>>,
}

impl SubtaskResult {
    pub fn answer(&self) -> Option<&str> {
        self.result.as_ref().map(|r| r.answer.as_str())
    }
}

/// The final output of a strategy run.
///
/// Fields are read-only from outside the crate; the only post-construction
/// change allowed is the strategy annotation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResult {
    answer: String,
    transcript: Transcript,
    status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<RunError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    strategy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    confidence: Option<f32>,
    steps: u32,
    tool_calls_made: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    subtasks: Vec<SubtaskResult>,
    trace: Trace,
}

impl AgentResult {
    fn new(status: RunStatus, answer: String, transcript: Transcript, trace: Trace) -> Self {
        Self {
            answer,
            transcript,
            status,
            error: None,
            strategy: None,
            confidence: None,
            steps: 0,
            tool_calls_made: 0,
            subtasks: Vec::new(),
            trace,
        }
    }

    pub fn completed(answer: impl Into<String>, transcript: Transcript, trace: Trace) -> Self {
        Self::new(RunStatus::Completed, answer.into(), transcript, trace)
    }

    /// Budget exhausted: carries the best partial answer available.
    pub fn budget_exhausted(transcript: Transcript, trace: Trace) -> Self {
        let answer = transcript.last_assistant_text().unwrap_or_default().to_string();
        let mut result = Self::new(RunStatus::BudgetExhausted, answer, transcript, trace);
        result.error = Some(RunError::new(
            ErrorKind::BudgetExhausted,
            "step limit reached without a final answer",
        ));
        result
    }

    pub fn failed(error: RunError, transcript: Transcript, trace: Trace) -> Self {
        let answer = transcript.last_assistant_text().unwrap_or_default().to_string();
        let mut result = Self::new(RunStatus::Failed, answer, transcript, trace);
        result.error = Some(error);
        result
    }

    pub fn cancelled(transcript: Transcript, trace: Trace) -> Self {
        let answer = transcript.last_assistant_text().unwrap_or_default().to_string();
        let mut result = Self::new(RunStatus::Cancelled, answer, transcript, trace);
        result.error = Some(RunError::new(ErrorKind::Cancelled, "run cancelled"));
        result
    }

    // ── Construction-time builders ──

    pub fn with_steps(mut self, steps: u32, tool_calls_made: usize) -> Self {
        self.steps = steps;
        self.tool_calls_made = tool_calls_made;
        self
    }

    pub fn with_confidence(mut self, confidence: Option<f32>) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_subtasks(mut self, subtasks: Vec<SubtaskResult>) -> Self {
        self.subtasks = subtasks;
        self
    }

    /// Record which strategy produced this result.
    pub fn annotate(mut self, strategy: impl Into<String>) -> Self {
        self.strategy = Some(strategy.into());
        self
    }

    /// Fold spans recorded around this run (routing, sibling runs) into its trace.
    pub fn absorb_trace(mut self, other: &Trace) -> Self {
        self.trace.absorb(other);
        self
    }

    // ── Accessors ──

    pub fn answer(&self) -> &str {
        &self.answer
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }

    pub fn error(&self) -> Option<&RunError> {
        self.error.as_ref()
    }

    pub fn strategy(&self) -> Option<&str> {
        self.strategy.as_deref()
    }

    pub fn confidence(&self) -> Option<f32> {
        self.confidence
    }

    pub fn steps(&self) -> u32 {
        self.steps
    }

    pub fn tool_calls_made(&self) -> usize {
        self.tool_calls_made
    }

    pub fn subtasks(&self) -> &[SubtaskResult] {
        &self.subtasks
    }

    pub fn trace(&self) -> &Trace {
        &self.trace
    }

    /// Split into transcript and trace, e.g. to seed a follow-up run.
    pub fn into_parts(self) -> (String, Transcript, Trace) {
        (self.answer, self.transcript, self.trace)
    }
}
