//! Tool Registry contract: the abstraction over agent capabilities.
//!
//! The core never implements a concrete integration. It consumes a
//! [`ToolRegistry`] through `list`, `describe` and `invoke`, and validates
//! proposed calls against the declared input schema before invoking them.
//!
//! [`LocalToolRegistry`] is an in-process registry of [`Tool`] trait objects
//! for embedders that host their tools alongside the core.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{ErrorKind, ToolError};

/// A proposed tool invocation produced by a Model Client completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Call ID, unique within one run
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Arguments as a JSON value (expected to be an object)
    pub arguments: serde_json::Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// What a tool reports about itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    /// JSON Schema describing the tool's arguments
    pub input_schema: serde_json::Value,
}

/// Why a tool call produced no payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolFailure {
    /// Either `validation_error` or `tool_error`
    pub kind: ErrorKind,
    pub message: String,
}

/// The outcome of executing (or refusing to execute) a tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// The call ID this result is for
    pub call_id: String,

    /// The tool that was called
    pub tool_name: String,

    /// Success payload or error descriptor
    pub outcome: std::result::Result<serde_json::Value, ToolFailure>,

    /// Wall time spent in the registry
    pub latency_ms: u64,
}

impl ToolResult {
    pub fn success(call: &ToolCall, payload: serde_json::Value, latency_ms: u64) -> Self {
        Self {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            outcome: Ok(payload),
            latency_ms,
        }
    }

    pub fn failure(call: &ToolCall, kind: ErrorKind, message: impl Into<String>, latency_ms: u64) -> Self {
        Self {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            outcome: Err(ToolFailure {
                kind,
                message: message.into(),
            }),
            latency_ms,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Text form appended to the transcript as a tool message.
    pub fn render(&self) -> String {
        match &self.outcome {
            Ok(serde_json::Value::String(s)) => s.clone(),
            Ok(value) => value.to_string(),
            Err(failure) => format!("Error ({}): {}", failure.kind, failure.message),
        }
    }
}

/// The external Tool Registry interface consumed by the core.
///
/// Implementations must be safe for concurrent use by many runs.
#[async_trait]
pub trait ToolRegistry: Send + Sync {
    /// Every tool this registry can invoke.
    async fn list(&self) -> Vec<ToolDescriptor>;

    /// Look up a single tool.
    async fn describe(&self, name: &str) -> Option<ToolDescriptor> {
        self.list().await.into_iter().find(|d| d.name == name)
    }

    /// Execute a tool with already-validated arguments.
    async fn invoke(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> std::result::Result<serde_json::Value, ToolError>;
}

/// A tool's input schema, compiled once and checked against every call.
pub struct ArgumentValidator {
    compiled: std::result::Result<jsonschema::JSONSchema, String>,
}

impl ArgumentValidator {
    pub fn new(schema: &serde_json::Value) -> Self {
        let compiled = jsonschema::JSONSchema::compile(schema)
            .map_err(|e| format!("tool declares an invalid schema: {e}"));
        Self { compiled }
    }

    /// Returns every violation as a human-readable string.
    pub fn validate(&self, arguments: &serde_json::Value) -> std::result::Result<(), Vec<String>> {
        if !arguments.is_object() {
            return Err(vec![format!("arguments must be a JSON object, got {arguments}")]);
        }
        let compiled = self.compiled.as_ref().map_err(|e| vec![e.clone()])?;
        let result = match compiled.validate(arguments) {
            Ok(()) => Ok(()),
            Err(errors) => Err(errors.map(|e| e.to_string()).collect()),
        };
        result
    }
}

impl std::fmt::Debug for ArgumentValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArgumentValidator")
            .field("compiled", &self.compiled.is_ok())
            .finish()
    }
}

/// Validate tool-call arguments against a tool's declared input schema.
///
/// Compiles the schema on every call; hold an [`ArgumentValidator`] to
/// check many calls against the same tool.
pub fn validate_arguments(
    schema: &serde_json::Value,
    arguments: &serde_json::Value,
) -> std::result::Result<(), Vec<String>> {
    ArgumentValidator::new(schema).validate(arguments)
}

/// A single in-process tool.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "list_issues").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn input_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given arguments.
    async fn execute(&self, arguments: serde_json::Value) -> std::result::Result<serde_json::Value, ToolError>;

    fn to_descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

/// An in-memory registry of [`Tool`]s.
pub struct LocalToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl LocalToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Builder-style registration.
    pub fn with(mut self, tool: Box<dyn Tool>) -> Self {
        self.register(tool);
        self
    }

    /// List all registered tool names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

impl Default for LocalToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolRegistry for LocalToolRegistry {
    async fn list(&self) -> Vec<ToolDescriptor> {
        let mut descriptors: Vec<ToolDescriptor> =
            self.tools.values().map(|t| t.to_descriptor()).collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }

    async fn describe(&self, name: &str) -> Option<ToolDescriptor> {
        self.tools.get(name).map(|t| t.to_descriptor())
    }

    async fn invoke(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> std::result::Result<serde_json::Value, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        tracing::debug!(tool = name, "invoking local tool");
        tool.execute(arguments).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A simple test tool for unit tests.
    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echoes back the input"
        }
        fn input_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string" }
                },
                "required": ["text"]
            })
        }
        async fn execute(&self, arguments: serde_json::Value) -> std::result::Result<serde_json::Value, ToolError> {
            Ok(arguments["text"].clone())
        }
    }

    #[tokio::test]
    async fn registry_register_and_describe() {
        let registry = LocalToolRegistry::new().with(Box::new(EchoTool));
        assert!(registry.describe("echo").await.is_some());
        assert!(registry.describe("nonexistent").await.is_none());
        assert_eq!(registry.names(), vec!["echo"]);
    }

    #[tokio::test]
    async fn registry_invoke_tool() {
        let registry = LocalToolRegistry::new().with(Box::new(EchoTool));
        let out = registry
            .invoke("echo", serde_json::json!({"text": "hello world"}))
            .await
            .unwrap();
        assert_eq!(out, serde_json::json!("hello world"));
    }

    #[tokio::test]
    async fn registry_invoke_missing_tool() {
        let registry = LocalToolRegistry::new();
        let err = registry
            .invoke("nonexistent", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::NotFound(_)));
    }

    #[test]
    fn arguments_checked_against_schema() {
        let schema = EchoTool.input_schema();
        assert!(validate_arguments(&schema, &serde_json::json!({"text": "hi"})).is_ok());

        let errors = validate_arguments(&schema, &serde_json::json!({"text": 3})).unwrap_err();
        assert!(!errors.is_empty());

        let errors = validate_arguments(&schema, &serde_json::json!({})).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("text")));
    }

    #[test]
    fn validator_reused_across_calls() {
        let validator = ArgumentValidator::new(&EchoTool.input_schema());
        assert!(validator.validate(&serde_json::json!({"text": "a"})).is_ok());
        assert!(validator.validate(&serde_json::json!({"text": false})).is_err());
        assert!(validator.validate(&serde_json::json!({"text": "b"})).is_ok());
    }

    #[test]
    fn invalid_declared_schema_rejects_every_call() {
        let validator = ArgumentValidator::new(&serde_json::json!({"type": 12}));
        let errors = validator.validate(&serde_json::json!({})).unwrap_err();
        assert!(errors[0].contains("invalid schema"));
        assert!(validator.validate(&serde_json::json!({"x": 1})).is_err());
    }

    #[test]
    fn non_object_arguments_rejected() {
        let schema = serde_json::json!({"type": "object"});
        let errors = validate_arguments(&schema, &serde_json::json!("just a string")).unwrap_err();
        assert!(errors[0].contains("JSON object"));
    }

    #[test]
    fn failure_render_names_kind() {
        let call = ToolCall::new("c1", "echo", serde_json::json!({}));
        let result = ToolResult::failure(&call, ErrorKind::ValidationError, "missing text", 0);
        assert!(!result.is_success());
        assert_eq!(result.render(), "Error (validation_error): missing text");
    }
}
