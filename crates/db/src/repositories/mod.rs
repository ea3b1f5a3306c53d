use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use callsight_core::domain::analytics::AnalyticsRecord;
use callsight_core::domain::call::{CallId, ClientEmail, Window};
use callsight_core::domain::memory::MemoryRecord;
use callsight_core::domain::state::EngineState;
use callsight_core::domain::tip::AiTip;
use callsight_core::domain::tool::ActivityEntry;

pub mod analytics;
pub mod call_window;
pub mod memory;
pub mod memory_record;

pub use analytics::SqlAnalyticsRepository;
pub use call_window::SqlWindowStore;
pub use memory::{InMemoryAnalyticsRepository, InMemoryMemoryRepository, InMemoryWindowStore};
pub use memory_record::SqlMemoryRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("window {window_number} of call {call_id} already stored with different content")]
    DuplicateWindow { call_id: String, window_number: u32 },
    #[error("engine state for call {call_id} changed since version {expected_version}")]
    Conflict { call_id: String, expected_version: u64 },
}

impl From<serde_json::Error> for RepositoryError {
    fn from(value: serde_json::Error) -> Self {
        Self::Decode(value.to_string())
    }
}

/// A window as stored, together with the live response produced for it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredWindow {
    pub window: Window,
    pub content_hash: String,
    pub tips: Vec<AiTip>,
    pub activity: Vec<ActivityEntry>,
    pub created_at: DateTime<Utc>,
}

impl StoredWindow {
    /// A window with no live response attached (degraded or final-request turns).
    pub fn bare(window: Window, created_at: DateTime<Utc>) -> Self {
        let content_hash = window.content_hash();
        Self { window, content_hash, tips: Vec::new(), activity: Vec::new(), created_at }
    }

    pub fn with_response(
        window: Window,
        tips: Vec<AiTip>,
        activity: Vec<ActivityEntry>,
        created_at: DateTime<Utc>,
    ) -> Self {
        let content_hash = window.content_hash();
        Self { window, content_hash, tips, activity, created_at }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum AppendOutcome {
    Inserted,
    /// Identical content was already stored; carries the stored copy.
    AlreadyPresent(StoredWindow),
}

/// Per-call window history plus the engine state folded from it.
///
/// State writes are conditional on the `version` the state was loaded at.
/// A state loaded for an unknown call has version 0.
#[async_trait]
pub trait WindowStore: Send + Sync {
    /// Appends a window without touching engine state.
    async fn append_window(&self, window: &StoredWindow)
        -> Result<AppendOutcome, RepositoryError>;

    async fn find_window(
        &self,
        call_id: &CallId,
        window_number: u32,
    ) -> Result<Option<StoredWindow>, RepositoryError>;

    /// All windows of a call, ordered by `window_number`.
    async fn load_windows(&self, call_id: &CallId) -> Result<Vec<StoredWindow>, RepositoryError>;

    async fn load_state(&self, call_id: &CallId) -> Result<EngineState, RepositoryError>;

    /// Returns the new version.
    async fn save_state(&self, state: &EngineState) -> Result<u64, RepositoryError>;

    /// Appends the window and saves the state in one transaction.
    async fn commit_window(
        &self,
        window: &StoredWindow,
        state: &EngineState,
    ) -> Result<u64, RepositoryError>;
}

/// Append-only memory history keyed by customer email.
#[async_trait]
pub trait MemoryRepository: Send + Sync {
    async fn read_current(
        &self,
        client_email: &ClientEmail,
    ) -> Result<Option<MemoryRecord>, RepositoryError>;

    async fn write_new(&self, record: &MemoryRecord) -> Result<(), RepositoryError>;

    /// Newest first.
    async fn history(
        &self,
        client_email: &ClientEmail,
        limit: u32,
    ) -> Result<Vec<MemoryRecord>, RepositoryError>;
}

#[async_trait]
pub trait AnalyticsRepository: Send + Sync {
    /// Inserts, or replaces the row previously written for the same call.
    async fn save(&self, record: &AnalyticsRecord) -> Result<(), RepositoryError>;

    async fn find_by_call(
        &self,
        call_id: &CallId,
    ) -> Result<Option<AnalyticsRecord>, RepositoryError>;

    async fn list_for_customer(
        &self,
        client_email: &ClientEmail,
    ) -> Result<Vec<AnalyticsRecord>, RepositoryError>;
}

pub(crate) fn format_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

pub(crate) fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u32): {value}"
        ))
    })
}

pub(crate) fn parse_u64(column: &str, value: i64) -> Result<u64, RepositoryError> {
    u64::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u64): {value}"
        ))
    })
}
