//! Error types for the orchestration core.
//!
//! Uses `thiserror` for ergonomic error definitions. Collaborator failures
//! (model, tool) and plan construction failures each get their own enum;
//! [`ErrorKind`] is the flat taxonomy recorded on a finished run.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The top-level error type for fallible core operations.
///
/// Runs themselves never return this: every failure that happens inside a
/// run is folded into the run's `AgentResult`.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Plan error: {0}")]
    Plan(#[from] PlanError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failures reported by a Model Client.
#[derive(Debug, Clone, Error)]
pub enum ModelError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Malformed completion: {0}")]
    Malformed(String),

    #[error("Network error: {0}")]
    Network(String),
}

/// Failures reported by a Tool Registry.
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_ms}ms")]
    Timeout { tool_name: String, timeout_ms: u64 },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}

/// Reasons a plan cannot be constructed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("plan has no steps")]
    Empty,

    #[error("step {step} depends on non-existent step {dependency}")]
    DanglingDependency { step: usize, dependency: usize },

    #[error("step {0} depends on itself")]
    SelfDependency(usize),

    #[error("plan dependency graph contains a cycle through steps {0:?}")]
    Cycle(Vec<usize>),

    #[error("plan could not be parsed: {0}")]
    Unparseable(String),
}

/// The failure taxonomy recorded on tool results and finished runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A malformed tool call or plan.
    ValidationError,
    /// A registry invocation failure.
    ToolError,
    /// A Model Client failure after retry.
    ModelError,
    /// A cyclic or unresolvable plan.
    PlanningError,
    /// A step or iteration limit reached without a definitive answer.
    BudgetExhausted,
    /// External cancellation.
    Cancelled,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ValidationError => "validation_error",
            Self::ToolError => "tool_error",
            Self::ModelError => "model_error",
            Self::PlanningError => "planning_error",
            Self::BudgetExhausted => "budget_exhausted",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// The error recorded on a run that did not complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunError {
    pub kind: ErrorKind,
    pub message: String,
}

impl RunError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}
