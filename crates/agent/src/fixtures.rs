//! Deterministic stand-ins for the model and the tool backends.
//!
//! Used by unit tests here and by the engine and server integration tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use callsight_core::domain::tool::{ToolClass, ToolError};

use crate::llm::{CompletionRequest, LlmClient, LlmError};
use crate::tools::{Tool, ToolLimits, ToolRegistry};

#[derive(Clone, Debug)]
pub enum ScriptedReply {
    Text(String),
    TransportError(String),
    /// A completion that carried no content.
    Empty,
    /// Sleeps before answering; used to trip timeouts.
    Hang(Duration),
}

/// Replays queued replies in order. Once the queue is empty every call
/// returns [`LlmError::EmptyResponse`].
#[derive(Default)]
pub struct ScriptedLlm {
    replies: Mutex<VecDeque<ScriptedReply>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedLlm {
    pub fn new<I>(replies: I) -> Self
    where
        I: IntoIterator<Item = ScriptedReply>,
    {
        Self { replies: Mutex::new(replies.into_iter().collect()), requests: Mutex::default() }
    }

    pub fn texts<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(texts.into_iter().map(|text| ScriptedReply::Text(text.into())))
    }

    pub fn push(&self, reply: ScriptedReply) {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push_back(reply);
        }
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().map(|requests| requests.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|requests| requests.len()).unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        let next = self.replies.lock().ok().and_then(|mut replies| replies.pop_front());

        match next {
            Some(ScriptedReply::Text(text)) => Ok(text),
            Some(ScriptedReply::TransportError(message)) => Err(LlmError::Transport(message)),
            Some(ScriptedReply::Empty) | None => Err(LlmError::EmptyResponse),
            Some(ScriptedReply::Hang(delay)) => {
                tokio::time::sleep(delay).await;
                Err(LlmError::Timeout)
            }
        }
    }
}

/// A tool that always answers the same way and counts its invocations.
#[derive(Clone)]
pub struct StaticTool {
    name: &'static str,
    class: ToolClass,
    outcome: Result<Value, ToolError>,
    delay: Duration,
    calls: Arc<AtomicUsize>,
}

impl StaticTool {
    pub fn lookup(name: &'static str, output: Value) -> Self {
        Self::with_outcome(name, ToolClass::Lookup, Ok(output))
    }

    pub fn mutation(name: &'static str, output: Value) -> Self {
        Self::with_outcome(name, ToolClass::Mutation, Ok(output))
    }

    pub fn failing(name: &'static str, class: ToolClass, error: ToolError) -> Self {
        Self::with_outcome(name, class, Err(error))
    }

    fn with_outcome(name: &'static str, class: ToolClass, outcome: Result<Value, ToolError>) -> Self {
        Self { name, class, outcome, delay: Duration::ZERO, calls: Arc::default() }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Shared invocation counter; clone it before registering the tool.
    pub fn counter(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

#[async_trait]
impl Tool for StaticTool {
    fn name(&self) -> &'static str {
        self.name
    }

    fn class(&self) -> ToolClass {
        self.class
    }

    fn description(&self) -> &'static str {
        "fixture tool"
    }

    fn input_hint(&self) -> Value {
        Value::Object(Default::default())
    }

    async fn invoke(&self, _input: Value) -> Result<Value, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.outcome.clone()
    }
}

pub fn static_registry(tools: Vec<StaticTool>) -> ToolRegistry {
    static_registry_with_limits(tools, ToolLimits::default())
}

pub fn static_registry_with_limits(tools: Vec<StaticTool>, limits: ToolLimits) -> ToolRegistry {
    let mut registry = ToolRegistry::new(limits);
    for tool in tools {
        registry.register(tool);
    }
    registry
}
