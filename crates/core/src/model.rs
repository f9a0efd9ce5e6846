//! Model Client contract: the abstraction over completion backends.
//!
//! A Model Client consumes an ordered transcript and returns a structured
//! completion: free text plus zero or more proposed tool calls. The core
//! depends only on this contract, never on a particular provider.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::message::Message;
use crate::tool::{ToolCall, ToolDescriptor};

/// Per-request options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionOptions {
    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Stop sequences
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop_markers: Vec<String>,

    /// Tools the model may propose calls to in this request
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDescriptor>,
}

fn default_temperature() -> f32 {
    0.7
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            max_tokens: None,
            temperature: default_temperature(),
            stop_markers: Vec::new(),
            tools: Vec::new(),
        }
    }
}

impl CompletionOptions {
    /// Same options, but with the given tool set.
    pub fn with_tools(&self, tools: Vec<ToolDescriptor>) -> Self {
        Self {
            tools,
            ..self.clone()
        }
    }
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// A Model Client response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Completion {
    /// Free text (may be empty when only tool calls are proposed)
    #[serde(default)]
    pub text: String,

    /// Proposed tool calls, in the order the model listed them
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// Self-reported confidence in [0, 1]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,

    /// Token usage, if the backend reports it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl Completion {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn tool_calls(text: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            text: text.into(),
            tool_calls,
            ..Self::default()
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Reject completions no strategy can act on.
    pub fn check_well_formed(&self) -> std::result::Result<(), ModelError> {
        if self.text.trim().is_empty() && self.tool_calls.is_empty() {
            return Err(ModelError::Malformed(
                "completion has neither text nor tool calls".into(),
            ));
        }
        if let Some(c) = self.confidence
            && !(0.0..=1.0).contains(&c)
        {
            return Err(ModelError::Malformed(format!(
                "confidence {c} outside [0, 1]"
            )));
        }
        if let Some(call) = self.tool_calls.iter().find(|c| c.name.trim().is_empty()) {
            return Err(ModelError::Malformed(format!(
                "tool call '{}' has no tool name",
                call.id
            )));
        }
        Ok(())
    }
}

/// The external Model Client interface consumed by the core.
///
/// Implementations must be safe for concurrent use by many runs.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// A human-readable name for this client (e.g., "openai", "mock").
    fn name(&self) -> &str;

    /// Submit a transcript and receive a completion.
    async fn complete(
        &self,
        transcript: &[Message],
        options: &CompletionOptions,
    ) -> std::result::Result<Completion, ModelError>;
}
