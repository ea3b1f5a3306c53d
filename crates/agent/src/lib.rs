//! Call engine - incremental conversation analysis with cross-call memory
//!
//! This crate turns transcript windows into live guidance and, once a call
//! ends, into a validated analytics record:
//! - Decides tips and tool calls per window through the model (`decision`)
//! - Suppresses repeated tips and side effects (`guardrails`)
//! - Runs CRM and knowledge tools with bounded fan-out (`tools`)
//! - Threads per-customer memory between calls (`memory`)
//! - Produces schema-checked post-call analytics (`analyzer`)
//!
//! # Key Types
//!
//! - `CallEngine` - entry point for live windows and `final` requests (see `runtime`)
//! - `LlmClient` - pluggable model access, OpenAI-compatible over HTTP
//! - `Tool` / `ToolRegistry` - capability tools keyed by name
//!
//! # Failure Principle
//!
//! A live window always gets an answer, possibly empty. Post-call analytics
//! are either fully valid or not written at all.

pub mod analyzer;
pub mod decision;
pub mod fixtures;
pub mod guardrails;
pub mod llm;
pub mod locks;
pub mod memory;
pub mod prompt;
pub mod runtime;
pub mod tools;

pub use analyzer::{AnalysisOutcome, AnalyzerError, PostCallAnalyzer};
pub use llm::{CompletionRequest, LlmClient, LlmError, OpenAiCompatibleClient};
pub use memory::MemoryManager;
pub use runtime::{
    CallEngine, CallRequest, CallResponse, EngineError, EngineSettings, PostCallResponse,
    WindowResponse,
};
pub use tools::{Tool, ToolLimits, ToolRegistry};
