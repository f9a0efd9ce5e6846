//! Data model for run traces and spans.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Span ──────────────────────────────────────────────────────────────────

/// The kind of work a span represents.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SpanKind {
    /// A Model Client completion call.
    ModelCall,
    /// A Tool Registry invocation (or a refused proposal).
    ToolCall,
    /// A reflection critic call.
    Critique,
    /// A planning decomposition call.
    Plan,
    /// A planning synthesis call.
    Synthesis,
    /// A router selection decision.
    Route,
}

impl std::fmt::Display for SpanKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ModelCall => write!(f, "model_call"),
            Self::ToolCall => write!(f, "tool_call"),
            Self::Critique => write!(f, "critique"),
            Self::Plan => write!(f, "plan"),
            Self::Synthesis => write!(f, "synthesis"),
            Self::Route => write!(f, "route"),
        }
    }
}

/// A single traced execution unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Span {
    /// Unique identifier.
    pub id: String,
    /// What kind of work this represents.
    pub kind: SpanKind,
    /// Human-readable label (e.g. tool name, client name, strategy name).
    pub label: String,
    /// When the span started.
    pub started_at: DateTime<Utc>,
    /// When the span ended (None if still running).
    pub ended_at: Option<DateTime<Utc>>,
    /// Duration in milliseconds.
    pub duration_ms: Option<u64>,
    /// Prompt tokens consumed (model calls).
    pub input_tokens: Option<u32>,
    /// Completion tokens produced (model calls).
    pub output_tokens: Option<u32>,
    /// Whether the operation succeeded.
    pub success: Option<bool>,
    /// Arbitrary metadata (attempt number, error kind, call id...).
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Span {
    /// Create a new span with the given kind and label.
    pub fn new(kind: SpanKind, label: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            label: label.into(),
            started_at: Utc::now(),
            ended_at: None,
            duration_ms: None,
            input_tokens: None,
            output_tokens: None,
            success: None,
            metadata: serde_json::Map::new(),
        }
    }

    /// Mark the span as ended with the given success status.
    ///
    /// Keeps an explicitly measured `duration_ms` if one was already set.
    pub fn end(&mut self, success: bool) {
        let now = Utc::now();
        self.ended_at = Some(now);
        if self.duration_ms.is_none() {
            self.duration_ms = Some(
                now.signed_duration_since(self.started_at)
                    .num_milliseconds()
                    .max(0) as u64,
            );
        }
        self.success = Some(success);
    }

    /// Record a measured duration and end the span.
    pub fn finish(mut self, success: bool, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self.end(success);
        self
    }

    /// Record token usage.
    pub fn record_tokens(&mut self, input: u32, output: u32) {
        self.input_tokens = Some(input);
        self.output_tokens = Some(output);
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Total tokens (input + output), or 0 if not recorded.
    pub fn total_tokens(&self) -> u32 {
        self.input_tokens.unwrap_or(0) + self.output_tokens.unwrap_or(0)
    }

    pub fn failed(&self) -> bool {
        self.success == Some(false)
    }
}

// ── Trace ─────────────────────────────────────────────────────────────────

/// The spans of one run, in the order they were recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trace {
    /// Unique trace id.
    pub id: String,
    /// Task id this trace belongs to.
    pub task_id: String,
    /// All spans in this trace, including those merged from nested runs.
    pub spans: Vec<Span>,
    /// When the trace started.
    pub started_at: DateTime<Utc>,
    /// When the trace ended.
    pub ended_at: Option<DateTime<Utc>>,
}

impl Trace {
    /// Create a new trace for a task.
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            task_id: task_id.into(),
            spans: Vec::new(),
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    /// Add a span to this trace.
    pub fn add_span(&mut self, span: Span) {
        self.spans.push(span);
    }

    /// Fold a nested run's spans into this trace.
    pub fn absorb(&mut self, child: &Trace) {
        self.spans.extend(child.spans.iter().cloned());
    }

    /// Mark the trace as complete.
    pub fn end(&mut self) {
        self.ended_at = Some(Utc::now());
    }

    /// Total tokens across all spans.
    pub fn total_tokens(&self) -> u32 {
        self.spans.iter().map(|s| s.total_tokens()).sum()
    }

    /// Total duration in milliseconds.
    pub fn total_duration_ms(&self) -> u64 {
        self.spans.iter().filter_map(|s| s.duration_ms).sum()
    }

    /// Number of spans of a given kind.
    pub fn count(&self, kind: SpanKind) -> usize {
        self.spans.iter().filter(|s| s.kind == kind).count()
    }

    /// Number of model calls in this trace (including critic/planner calls).
    pub fn model_call_count(&self) -> usize {
        self.spans
            .iter()
            .filter(|s| {
                matches!(
                    s.kind,
                    SpanKind::ModelCall | SpanKind::Critique | SpanKind::Plan | SpanKind::Synthesis
                )
            })
            .count()
    }

    /// Number of tool invocations in this trace.
    pub fn tool_call_count(&self) -> usize {
        self.count(SpanKind::ToolCall)
    }
}
