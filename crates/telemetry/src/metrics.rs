//! Aggregated views over finished traces.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::model::{SpanKind, Trace};

/// Latency and failure figures for one tool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolStats {
    pub calls: u64,
    pub failures: u64,
    pub total_latency_ms: u64,
    pub max_latency_ms: u64,
}

impl ToolStats {
    pub fn avg_latency_ms(&self) -> f64 {
        if self.calls == 0 {
            0.0
        } else {
            self.total_latency_ms as f64 / self.calls as f64
        }
    }

    pub fn error_rate(&self) -> f64 {
        if self.calls == 0 {
            0.0
        } else {
            self.failures as f64 / self.calls as f64
        }
    }
}

/// Counters and per-tool statistics across a set of traces.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSummary {
    /// Number of traces summarised.
    pub runs: u64,
    /// Span count per kind.
    pub counters: BTreeMap<SpanKind, u64>,
    /// Failed span count per kind.
    pub failures: BTreeMap<SpanKind, u64>,
    /// Per-tool statistics keyed by tool name.
    pub tools: BTreeMap<String, ToolStats>,
    /// Prompt + completion tokens.
    pub total_tokens: u64,
}

impl MetricsSummary {
    pub fn from_traces<'a>(traces: impl IntoIterator<Item = &'a Trace>) -> Self {
        let mut summary = Self::default();
        for trace in traces {
            summary.add(trace);
        }
        summary
    }

    /// Fold one more trace into the summary.
    pub fn add(&mut self, trace: &Trace) {
        self.runs += 1;
        for span in &trace.spans {
            *self.counters.entry(span.kind).or_default() += 1;
            if span.failed() {
                *self.failures.entry(span.kind).or_default() += 1;
            }
            self.total_tokens += span.total_tokens() as u64;

            if span.kind == SpanKind::ToolCall {
                let stats = self.tools.entry(span.label.clone()).or_default();
                let latency = span.duration_ms.unwrap_or(0);
                stats.calls += 1;
                stats.total_latency_ms += latency;
                stats.max_latency_ms = stats.max_latency_ms.max(latency);
                if span.failed() {
                    stats.failures += 1;
                }
            }
        }
    }

    pub fn count(&self, kind: SpanKind) -> u64 {
        self.counters.get(&kind).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Span;

    fn trace_with_tools(latencies: &[(&str, u64, bool)]) -> Trace {
        let mut trace = Trace::new("t");
        trace.add_span(Span::new(SpanKind::ModelCall, "mock").finish(true, 1));
        for (name, ms, ok) in latencies {
            trace.add_span(Span::new(SpanKind::ToolCall, *name).finish(*ok, *ms));
        }
        trace
    }

    #[test]
    fn summarises_tool_latency() {
        let a = trace_with_tools(&[("list_issues", 10, true), ("list_issues", 30, false)]);
        let b = trace_with_tools(&[("search", 5, true)]);
        let summary = MetricsSummary::from_traces([&a, &b]);

        assert_eq!(summary.runs, 2);
        assert_eq!(summary.count(SpanKind::ModelCall), 2);
        assert_eq!(summary.count(SpanKind::ToolCall), 3);

        let issues = &summary.tools["list_issues"];
        assert_eq!(issues.calls, 2);
        assert_eq!(issues.failures, 1);
        assert_eq!(issues.max_latency_ms, 30);
        assert!((issues.avg_latency_ms() - 20.0).abs() < f64::EPSILON);
        assert!((issues.error_rate() - 0.5).abs() < f64::EPSILON);
        assert_eq!(summary.failures[&SpanKind::ToolCall], 1);
    }

    #[test]
    fn empty_summary() {
        let summary = MetricsSummary::from_traces(std::iter::empty());
        assert_eq!(summary.runs, 0);
        assert_eq!(summary.count(SpanKind::Route), 0);
        assert_eq!(ToolStats::default().avg_latency_ms(), 0.0);
    }
}
