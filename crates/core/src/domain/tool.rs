use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::fingerprint::Fingerprint;

/// Whether repeating a tool call is harmless.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolClass {
    /// Read-only retrieval; may repeat across windows.
    Lookup,
    /// Side-effecting; at most once per fingerprint per call.
    Mutation,
}

#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ToolError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("timed out after {0} ms")]
    Timeout(u64),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("upstream failure: {0}")]
    Upstream(String),
}

impl ToolError {
    /// True when the backend definitely did not apply the action.
    pub fn is_definite_rejection(&self) -> bool {
        !matches!(self, Self::Timeout(_))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Success,
    Failed,
}

impl ToolStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub id: String,
    pub window_number: u32,
    pub name: String,
    pub class: ToolClass,
    pub input: Value,
    pub output: Option<Value>,
    pub error: Option<ToolError>,
    pub status: ToolStatus,
    pub fingerprint: Fingerprint,
    pub invoked_at: DateTime<Utc>,
}

impl ToolInvocation {
    /// Mutation fingerprints are burned on success, and on timeout because the
    /// backend may have applied the action anyway.
    pub fn blocks_reissue(&self) -> bool {
        if self.class != ToolClass::Mutation {
            return false;
        }
        match &self.error {
            None => true,
            Some(error) => !error.is_definite_rejection(),
        }
    }

    pub fn activity_entry(&self) -> ActivityEntry {
        let output = match (&self.output, &self.error) {
            (Some(output), _) => output.clone(),
            (None, Some(error)) => Value::String(error.to_string()),
            (None, None) => Value::Null,
        };
        ActivityEntry {
            name: self.name.clone(),
            input: self.input.clone(),
            output,
            status: self.status,
        }
    }
}

/// What the agent UI shows for one tool call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub name: String,
    pub input: Value,
    pub output: Value,
    pub status: ToolStatus,
}
