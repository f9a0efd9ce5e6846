//! # mcp-arena Core
//!
//! Domain types, collaborator traits, and error definitions for the agent
//! orchestration core. Strategies in `arena-agent` are written purely
//! against what this crate defines.
//!
//! ## Design Philosophy
//!
//! The two external collaborators, the Tool Registry and the Model Client,
//! are traits here. Implementations live outside the core. This enables:
//! - Swapping providers and tool hosts without touching strategies
//! - Easy testing with scripted mock implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod error;
pub mod event;
pub mod message;
pub mod model;
pub mod plan;
pub mod result;
pub mod task;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, ErrorKind, ModelError, PlanError, RunError, ToolError};
pub use event::{DomainEvent, EventBus};
pub use message::{Message, Role, Transcript};
pub use model::{Completion, CompletionOptions, ModelClient, Usage};
pub use plan::{Plan, PlanStep};
pub use result::{AgentResult, RunStatus, SubtaskResult, SubtaskStatus};
pub use task::Task;
pub use tool::{
    ArgumentValidator, LocalToolRegistry, Tool, ToolCall, ToolDescriptor, ToolFailure, ToolRegistry,
    ToolResult, validate_arguments,
};
