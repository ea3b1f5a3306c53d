//! Capability tools the decision loop may invoke.
//!
//! Every tool failure comes back as a failed [`ToolInvocation`]; nothing here
//! returns an error to the loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use callsight_core::config::{AppConfig, EngineConfig};
use callsight_core::domain::call::CallId;
use callsight_core::domain::tool::{ToolClass, ToolError, ToolInvocation, ToolStatus};
use callsight_core::fingerprint::Fingerprint;

pub mod crm;
pub mod email;
pub mod knowledge;

pub use crm::{register_crm_tools, HubSpotClient};
pub use email::SendEmailTool;
pub use knowledge::KnowledgeSearchTool;

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn class(&self) -> ToolClass;
    fn description(&self) -> &'static str;
    /// Example input shown to the model.
    fn input_hint(&self) -> Value;
    async fn invoke(&self, input: Value) -> Result<Value, ToolError>;
}

/// A tool call that survived deduplication and is ready to run.
#[derive(Clone, Debug, PartialEq)]
pub struct PlannedToolCall {
    pub name: String,
    pub class: ToolClass,
    pub input: Value,
    pub fingerprint: Fingerprint,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ToolDescriptor {
    pub name: &'static str,
    pub class: ToolClass,
    pub description: &'static str,
    pub input: Value,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ToolLimits {
    pub max_per_window: usize,
    pub concurrency: usize,
    pub timeout: Duration,
}

impl Default for ToolLimits {
    fn default() -> Self {
        Self { max_per_window: 6, concurrency: 4, timeout: Duration::from_secs(8) }
    }
}

impl From<&EngineConfig> for ToolLimits {
    fn from(config: &EngineConfig) -> Self {
        Self {
            max_per_window: config.max_tools_per_window,
            concurrency: config.tool_concurrency.max(1),
            timeout: Duration::from_millis(config.tool_timeout_ms),
        }
    }
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    limits: ToolLimits,
}

impl ToolRegistry {
    pub fn new(limits: ToolLimits) -> Self {
        Self { tools: HashMap::new(), limits }
    }

    /// Registers the tools whose backends are enabled in `config`.
    /// `send_email` needs no backend and is always present.
    pub fn from_config(config: &AppConfig) -> Result<Self, reqwest::Error> {
        let limits = ToolLimits::from(&config.engine);
        let mut registry = Self::new(limits);

        if let Some(client) = HubSpotClient::from_config(&config.crm, limits.timeout)? {
            register_crm_tools(&mut registry, Arc::new(client));
        }
        if let Some(search) = KnowledgeSearchTool::from_config(&config.knowledge, limits.timeout)? {
            registry.register(search);
        }
        registry.register(SendEmailTool);

        info!(
            event_name = "tools.registry_built",
            tools = registry.len(),
            crm_enabled = config.crm.enabled,
            knowledge_enabled = config.knowledge.enabled,
            "tool registry ready"
        );
        Ok(registry)
    }

    pub fn register<T>(&mut self, tool: T)
    where
        T: Tool + 'static,
    {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    pub fn class_of(&self, name: &str) -> Option<ToolClass> {
        self.tools.get(name).map(|tool| tool.class())
    }

    pub fn limits(&self) -> ToolLimits {
        self.limits
    }

    /// Registered tools sorted by name, for prompts and diagnostics.
    pub fn catalog(&self) -> Vec<ToolDescriptor> {
        let mut descriptors: Vec<ToolDescriptor> = self
            .tools
            .values()
            .map(|tool| ToolDescriptor {
                name: tool.name(),
                class: tool.class(),
                description: tool.description(),
                input: tool.input_hint(),
            })
            .collect();
        descriptors.sort_by_key(|descriptor| descriptor.name);
        descriptors
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Runs one window's tool calls with bounded fan-out. Calls past the
    /// per-window cap are dropped. Output order matches input order.
    pub async fn execute_window(
        &self,
        call_id: &CallId,
        window_number: u32,
        mut calls: Vec<PlannedToolCall>,
    ) -> Vec<ToolInvocation> {
        if calls.len() > self.limits.max_per_window {
            let dropped: Vec<String> =
                calls.drain(self.limits.max_per_window..).map(|call| call.name).collect();
            warn!(
                event_name = "tools.cap_exceeded",
                call_id = %call_id,
                window_number,
                cap = self.limits.max_per_window,
                ?dropped,
                "dropping tool calls beyond the per-window cap"
            );
        }

        stream::iter(calls.into_iter().map(|call| self.invoke_one(call_id, window_number, call)))
            .buffered(self.limits.concurrency.max(1))
            .collect()
            .await
    }

    async fn invoke_one(
        &self,
        call_id: &CallId,
        window_number: u32,
        call: PlannedToolCall,
    ) -> ToolInvocation {
        let invoked_at = Utc::now();
        let outcome = match self.tools.get(&call.name) {
            None => Err(ToolError::NotFound(format!("tool `{}` is not registered", call.name))),
            Some(tool) => {
                match tokio::time::timeout(self.limits.timeout, tool.invoke(call.input.clone()))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(ToolError::Timeout(self.limits.timeout.as_millis() as u64)),
                }
            }
        };

        let (output, error, status) = match outcome {
            Ok(output) => {
                info!(
                    event_name = "tools.invoked",
                    call_id = %call_id,
                    window_number,
                    tool = %call.name,
                    "tool call succeeded"
                );
                (Some(output), None, ToolStatus::Success)
            }
            Err(error) => {
                warn!(
                    event_name = "tools.failed",
                    call_id = %call_id,
                    window_number,
                    tool = %call.name,
                    %error,
                    "tool call failed"
                );
                (None, Some(error), ToolStatus::Failed)
            }
        };

        ToolInvocation {
            id: Uuid::new_v4().to_string(),
            window_number,
            name: call.name,
            class: call.class,
            input: call.input,
            output,
            error,
            status,
            fingerprint: call.fingerprint,
            invoked_at,
        }
    }
}

/// Decodes a tool's JSON input into its typed form.
pub fn typed_input<T: DeserializeOwned>(tool: &str, input: Value) -> Result<T, ToolError> {
    serde_json::from_value(input)
        .map_err(|error| ToolError::Validation(format!("invalid input for {tool}: {error}")))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::{json, Value};

    use callsight_core::config::AppConfig;
    use callsight_core::domain::call::CallId;
    use callsight_core::domain::tool::{ToolClass, ToolError, ToolStatus};
    use callsight_core::fingerprint::Fingerprint;

    use super::{PlannedToolCall, Tool, ToolLimits, ToolRegistry};

    struct SleepyTool {
        name: &'static str,
        delay: Duration,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Tool for SleepyTool {
        fn name(&self) -> &'static str {
            self.name
        }

        fn class(&self) -> ToolClass {
            ToolClass::Lookup
        }

        fn description(&self) -> &'static str {
            "sleeps"
        }

        fn input_hint(&self) -> Value {
            json!({})
        }

        async fn invoke(&self, input: Value) -> Result<Value, ToolError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(input)
        }
    }

    fn planned(name: &str, n: u32) -> PlannedToolCall {
        PlannedToolCall {
            name: name.to_string(),
            class: ToolClass::Lookup,
            input: json!({"n": n}),
            fingerprint: Fingerprint(format!("{name}-{n}")),
        }
    }

    fn registry(limits: ToolLimits, calls: Arc<AtomicUsize>) -> ToolRegistry {
        let mut registry = ToolRegistry::new(limits);
        registry.register(SleepyTool { name: "fast", delay: Duration::from_millis(5), calls: calls.clone() });
        registry.register(SleepyTool { name: "slow", delay: Duration::from_secs(5), calls });
        registry
    }

    #[tokio::test]
    async fn slow_tool_times_out_without_blocking_others() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = registry(
            ToolLimits { max_per_window: 4, concurrency: 4, timeout: Duration::from_millis(100) },
            calls,
        );

        let started = std::time::Instant::now();
        let results = registry
            .execute_window(
                &CallId("call-t".to_string()),
                1,
                vec![planned("slow", 1), planned("fast", 2), planned("fast", 3)],
            )
            .await;

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].error, Some(ToolError::Timeout(100)));
        assert_eq!(results[1].status, ToolStatus::Success);
        assert_eq!(results[2].output, Some(json!({"n": 3})));
    }

    #[tokio::test]
    async fn calls_beyond_cap_are_dropped_and_unknown_tools_fail() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = registry(
            ToolLimits { max_per_window: 2, concurrency: 2, timeout: Duration::from_secs(1) },
            calls.clone(),
        );

        let results = registry
            .execute_window(
                &CallId("call-t".to_string()),
                3,
                vec![planned("missing", 1), planned("fast", 2), planned("fast", 3)],
            )
            .await;

        assert_eq!(results.len(), 2);
        assert!(matches!(results[0].error, Some(ToolError::NotFound(_))));
        assert_eq!(results[1].window_number, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn default_config_registers_only_email() {
        let registry = ToolRegistry::from_config(&AppConfig::default()).expect("registry");
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.class_of("send_email"), Some(ToolClass::Mutation));
    }

    #[test]
    fn catalog_is_sorted_by_name() {
        let registry = registry(ToolLimits::default(), Arc::new(AtomicUsize::new(0)));
        let names: Vec<&str> = registry.catalog().iter().map(|tool| tool.name).collect();
        assert_eq!(names, vec!["fast", "slow"]);
        assert_eq!(registry.class_of("slow"), Some(ToolClass::Lookup));
        assert_eq!(registry.class_of("nope"), None);
    }
}
