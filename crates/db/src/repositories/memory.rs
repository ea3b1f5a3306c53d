use std::collections::{BTreeMap, HashMap};

use tokio::sync::RwLock;

use callsight_core::domain::analytics::AnalyticsRecord;
use callsight_core::domain::call::{CallId, ClientEmail};
use callsight_core::domain::memory::MemoryRecord;
use callsight_core::domain::state::EngineState;

use super::{
    AnalyticsRepository, AppendOutcome, MemoryRepository, RepositoryError, StoredWindow,
    WindowStore,
};

#[derive(Default)]
struct CallEntry {
    windows: BTreeMap<u32, StoredWindow>,
    state: Option<EngineState>,
}

impl CallEntry {
    fn check_window(&self, window: &StoredWindow) -> Result<Option<StoredWindow>, RepositoryError> {
        match self.windows.get(&window.window.window_number) {
            None => Ok(None),
            Some(stored) if stored.content_hash == window.content_hash => Ok(Some(stored.clone())),
            Some(_) => Err(RepositoryError::DuplicateWindow {
                call_id: window.window.call_id.0.clone(),
                window_number: window.window.window_number,
            }),
        }
    }

    fn current_version(&self) -> u64 {
        self.state.as_ref().map(|state| state.version).unwrap_or(0)
    }
}

/// Same contract as the SQL store, including conditional state writes.
#[derive(Default)]
pub struct InMemoryWindowStore {
    calls: RwLock<HashMap<String, CallEntry>>,
}

#[async_trait::async_trait]
impl WindowStore for InMemoryWindowStore {
    async fn append_window(
        &self,
        window: &StoredWindow,
    ) -> Result<AppendOutcome, RepositoryError> {
        let mut calls = self.calls.write().await;
        let entry = calls.entry(window.window.call_id.0.clone()).or_default();
        if let Some(stored) = entry.check_window(window)? {
            return Ok(AppendOutcome::AlreadyPresent(stored));
        }
        entry.windows.insert(window.window.window_number, window.clone());
        Ok(AppendOutcome::Inserted)
    }

    async fn find_window(
        &self,
        call_id: &CallId,
        window_number: u32,
    ) -> Result<Option<StoredWindow>, RepositoryError> {
        let calls = self.calls.read().await;
        Ok(calls.get(&call_id.0).and_then(|entry| entry.windows.get(&window_number)).cloned())
    }

    async fn load_windows(&self, call_id: &CallId) -> Result<Vec<StoredWindow>, RepositoryError> {
        let calls = self.calls.read().await;
        Ok(calls
            .get(&call_id.0)
            .map(|entry| entry.windows.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn load_state(&self, call_id: &CallId) -> Result<EngineState, RepositoryError> {
        let calls = self.calls.read().await;
        Ok(calls
            .get(&call_id.0)
            .and_then(|entry| entry.state.clone())
            .unwrap_or_else(|| EngineState::new(call_id.clone())))
    }

    async fn save_state(&self, state: &EngineState) -> Result<u64, RepositoryError> {
        let mut calls = self.calls.write().await;
        let entry = calls.entry(state.call_id.0.clone()).or_default();
        if entry.current_version() != state.version {
            return Err(RepositoryError::Conflict {
                call_id: state.call_id.0.clone(),
                expected_version: state.version,
            });
        }

        let mut saved = state.clone();
        saved.version += 1;
        let version = saved.version;
        entry.state = Some(saved);
        Ok(version)
    }

    async fn commit_window(
        &self,
        window: &StoredWindow,
        state: &EngineState,
    ) -> Result<u64, RepositoryError> {
        let mut calls = self.calls.write().await;
        let entry = calls.entry(state.call_id.0.clone()).or_default();

        let conflict = RepositoryError::Conflict {
            call_id: state.call_id.0.clone(),
            expected_version: state.version,
        };
        if entry.current_version() != state.version {
            return Err(conflict);
        }
        if entry.check_window(window)?.is_some() {
            return Err(conflict);
        }

        let mut saved = state.clone();
        saved.version += 1;
        let version = saved.version;
        entry.windows.insert(window.window.window_number, window.clone());
        entry.state = Some(saved);
        Ok(version)
    }
}

#[derive(Default)]
pub struct InMemoryMemoryRepository {
    records: RwLock<HashMap<String, Vec<MemoryRecord>>>,
}

#[async_trait::async_trait]
impl MemoryRepository for InMemoryMemoryRepository {
    async fn read_current(
        &self,
        client_email: &ClientEmail,
    ) -> Result<Option<MemoryRecord>, RepositoryError> {
        let records = self.records.read().await;
        // max_by_key keeps the last maximum, so equal timestamps resolve to the later append.
        Ok(records
            .get(client_email.as_str())
            .and_then(|history| history.iter().max_by_key(|record| record.created_at))
            .cloned())
    }

    async fn write_new(&self, record: &MemoryRecord) -> Result<(), RepositoryError> {
        let mut records = self.records.write().await;
        records.entry(record.client_email.as_str().to_string()).or_default().push(record.clone());
        Ok(())
    }

    async fn history(
        &self,
        client_email: &ClientEmail,
        limit: u32,
    ) -> Result<Vec<MemoryRecord>, RepositoryError> {
        let records = self.records.read().await;
        let mut history: Vec<MemoryRecord> =
            records.get(client_email.as_str()).cloned().unwrap_or_default();
        history.reverse();
        history.sort_by(|left, right| right.created_at.cmp(&left.created_at));
        history.truncate(limit as usize);
        Ok(history)
    }
}

#[derive(Default)]
pub struct InMemoryAnalyticsRepository {
    records: RwLock<HashMap<String, AnalyticsRecord>>,
}

#[async_trait::async_trait]
impl AnalyticsRepository for InMemoryAnalyticsRepository {
    async fn save(&self, record: &AnalyticsRecord) -> Result<(), RepositoryError> {
        let mut records = self.records.write().await;
        records.insert(record.call_id.0.clone(), record.clone());
        Ok(())
    }

    async fn find_by_call(
        &self,
        call_id: &CallId,
    ) -> Result<Option<AnalyticsRecord>, RepositoryError> {
        let records = self.records.read().await;
        Ok(records.get(&call_id.0).cloned())
    }

    async fn list_for_customer(
        &self,
        client_email: &ClientEmail,
    ) -> Result<Vec<AnalyticsRecord>, RepositoryError> {
        let records = self.records.read().await;
        let mut rows: Vec<AnalyticsRecord> = records
            .values()
            .filter(|record| &record.client_email == client_email)
            .cloned()
            .collect();
        rows.sort_by(|left, right| right.created_at.cmp(&left.created_at));
        Ok(rows)
    }
}
