//! Shared test helpers for engine, pattern and router tests.

use arena_core::error::{ModelError, ToolError};
use arena_core::message::Message;
use arena_core::model::{Completion, CompletionOptions, ModelClient, Usage};
use arena_core::tool::{LocalToolRegistry, Tool, ToolDescriptor, ToolRegistry};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::engine::{EngineSettings, StepEngine};

/// A mock model client that returns a sequence of scripted responses.
///
/// Each call to `complete` returns the next response in the queue and
/// records the request. Panics if more calls are made than responses provided.
pub struct ScriptedModel {
    responses: Mutex<Vec<Result<Completion, ModelError>>>,
    requests: Mutex<Vec<Vec<Message>>>,
    options: Mutex<Vec<CompletionOptions>>,
}

impl ScriptedModel {
    pub fn new(responses: Vec<Result<Completion, ModelError>>) -> Self {
        Self {
            responses: Mutex::new(responses),
            requests: Mutex::new(Vec::new()),
            options: Mutex::new(Vec::new()),
        }
    }

    /// A model that answers with each text in turn.
    pub fn texts(texts: &[&str]) -> Self {
        Self::new(texts.iter().map(|t| Ok(make_text_response(t))).collect())
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests.lock().unwrap().clone()
    }

    pub fn options(&self) -> Vec<CompletionOptions> {
        self.options.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ModelClient for ScriptedModel {
    fn name(&self) -> &str {
        "scripted_mock"
    }

    async fn complete(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<Completion, ModelError> {
        let mut requests = self.requests.lock().unwrap();
        let count = requests.len();
        let responses = self.responses.lock().unwrap();
        if count >= responses.len() {
            panic!(
                "ScriptedModel: no more responses (call #{}, have {})",
                count,
                responses.len()
            );
        }
        requests.push(messages.to_vec());
        self.options.lock().unwrap().push(options.clone());
        responses[count].clone()
    }
}

type Responder = dyn Fn(&[Message]) -> Result<Completion, ModelError> + Send + Sync;

/// A mock model client whose answer is computed from the request.
///
/// Used where several runs share one client concurrently and a fixed
/// script order would be nondeterministic.
pub struct FnModel {
    responder: Box<Responder>,
    calls: AtomicUsize,
    delay: Duration,
}

impl FnModel {
    pub fn new(
        responder: impl Fn(&[Message]) -> Result<Completion, ModelError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            responder: Box::new(responder),
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
        }
    }

    /// Sleep before answering each request.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ModelClient for FnModel {
    fn name(&self) -> &str {
        "fn_mock"
    }

    async fn complete(
        &self,
        messages: &[Message],
        _options: &CompletionOptions,
    ) -> Result<Completion, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        (self.responder)(messages)
    }
}

/// Create a simple text response with token usage.
pub fn make_text_response(text: &str) -> Completion {
    Completion {
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
        }),
        ..Completion::text(text)
    }
}

/// A configurable in-process tool.
pub struct StaticTool {
    name: String,
    schema: serde_json::Value,
    response: Result<serde_json::Value, String>,
    delay: Duration,
    cancel: Option<CancellationToken>,
}

impl StaticTool {
    pub fn new(name: &str, schema: serde_json::Value, response: serde_json::Value) -> Self {
        Self {
            name: name.to_string(),
            schema,
            response: Ok(response),
            delay: Duration::ZERO,
            cancel: None,
        }
    }

    /// A tool that always fails.
    pub fn failing(name: &str) -> Self {
        Self {
            response: Err("backend unavailable".into()),
            ..Self::new(name, open_schema(), serde_json::Value::Null)
        }
    }

    /// A tool that cancels the given token when invoked.
    pub fn cancelling(name: &str, cancel: CancellationToken) -> Self {
        Self {
            cancel: Some(cancel),
            ..Self::new(name, open_schema(), serde_json::json!("stopped"))
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait::async_trait]
impl Tool for StaticTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "A scripted test tool"
    }

    fn input_schema(&self) -> serde_json::Value {
        self.schema.clone()
    }

    async fn execute(&self, _arguments: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        if let Some(cancel) = &self.cancel {
            cancel.cancel();
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.response.clone().map_err(|reason| ToolError::ExecutionFailed {
            tool_name: self.name.clone(),
            reason,
        })
    }
}

/// A registry that records how often it was touched and offers nothing.
#[derive(Default)]
pub struct CountingRegistry {
    calls: AtomicUsize,
}

impl CountingRegistry {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ToolRegistry for CountingRegistry {
    async fn list(&self) -> Vec<ToolDescriptor> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Vec::new()
    }

    async fn invoke(
        &self,
        name: &str,
        _arguments: serde_json::Value,
    ) -> Result<serde_json::Value, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ToolError::NotFound(name.to_string()))
    }
}

/// Wraps a local registry and counts listings and invocations.
pub struct RecordingRegistry {
    inner: LocalToolRegistry,
    lists: AtomicUsize,
    invocations: AtomicUsize,
}

impl RecordingRegistry {
    pub fn new(tools: Vec<StaticTool>) -> Self {
        let mut inner = LocalToolRegistry::new();
        for tool in tools {
            inner.register(Box::new(tool));
        }
        Self {
            inner,
            lists: AtomicUsize::new(0),
            invocations: AtomicUsize::new(0),
        }
    }

    pub fn lists(&self) -> usize {
        self.lists.load(Ordering::SeqCst)
    }

    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ToolRegistry for RecordingRegistry {
    async fn list(&self) -> Vec<ToolDescriptor> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        self.inner.list().await
    }

    async fn invoke(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value, ToolError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        self.inner.invoke(name, arguments).await
    }
}

/// A schema accepting any object.
pub fn open_schema() -> serde_json::Value {
    serde_json::json!({ "type": "object" })
}

pub fn registry(tools: Vec<StaticTool>) -> Arc<dyn ToolRegistry> {
    let mut registry = LocalToolRegistry::new();
    for tool in tools {
        registry.register(Box::new(tool));
    }
    Arc::new(registry)
}

pub fn empty_registry() -> Arc<dyn ToolRegistry> {
    Arc::new(LocalToolRegistry::new())
}

/// Short timeouts and a near-zero backoff.
pub fn fast_settings() -> EngineSettings {
    EngineSettings {
        model_timeout: Duration::from_secs(2),
        tool_timeout: Duration::from_secs(2),
        retry_backoff: Duration::from_millis(1),
    }
}

pub fn test_engine(model: Arc<dyn ModelClient>, tools: Arc<dyn ToolRegistry>) -> StepEngine {
    StepEngine::new(model, tools).with_settings(fast_settings())
}
