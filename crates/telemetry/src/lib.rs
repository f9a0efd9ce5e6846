//! Run tracing, metrics summaries and logging setup for mcp-arena.
//!
//! Every strategy run owns one [`Trace`] and records a [`Span`] for each
//! model call, tool call, critique, plan and route decision. Traces are plain
//! values carried on the run result; [`MetricsSummary`] aggregates any number
//! of them after the fact. Nothing here holds shared mutable state.

pub mod logging;
pub mod metrics;
pub mod model;

pub use logging::{LogFormat, init_logging};
pub use metrics::{MetricsSummary, ToolStats};
pub use model::{Span, SpanKind, Trace};
