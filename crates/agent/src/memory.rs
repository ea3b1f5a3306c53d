use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::info;

use callsight_core::domain::call::{CallId, ClientEmail};
use callsight_core::domain::memory::{MemoryBox, MemoryRecord};
use callsight_db::{MemoryRepository, RepositoryError};

/// Cross-call memory: append-only history, current record derived by time.
#[derive(Clone)]
pub struct MemoryManager {
    repository: Arc<dyn MemoryRepository>,
}

impl MemoryManager {
    pub fn new(repository: Arc<dyn MemoryRepository>) -> Self {
        Self { repository }
    }

    /// An empty email never has memory.
    pub async fn read_current(
        &self,
        client_email: &ClientEmail,
    ) -> Result<Option<MemoryRecord>, RepositoryError> {
        if client_email.is_empty() {
            return Ok(None);
        }
        self.repository.read_current(client_email).await
    }

    /// Appends a new record. Its timestamp is forced past the current
    /// record's so the write is always the one `read_current` returns next.
    pub async fn write_new(
        &self,
        client_email: &ClientEmail,
        call_id: Option<&CallId>,
        memory: MemoryBox,
    ) -> Result<MemoryRecord, RepositoryError> {
        let now = Utc::now();
        let created_at = match self.repository.read_current(client_email).await? {
            Some(current) if current.created_at >= now => {
                current.created_at + Duration::microseconds(1)
            }
            _ => now,
        };

        let record = MemoryRecord::from_box(client_email.clone(), call_id.cloned(), memory, created_at);
        self.repository.write_new(&record).await?;
        info!(
            event_name = "memory.written",
            client_email = %client_email,
            call_id = call_id.map(|id| id.as_str()).unwrap_or_default(),
            deliverables = record.deliverables.len(),
            improvement_areas = record.improvement_areas.len(),
            "memory record appended"
        );
        Ok(record)
    }

    pub async fn history(
        &self,
        client_email: &ClientEmail,
        limit: u32,
    ) -> Result<Vec<MemoryRecord>, RepositoryError> {
        self.repository.history(client_email, limit).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use callsight_core::domain::call::{CallId, ClientEmail};
    use callsight_core::domain::memory::MemoryBox;
    use callsight_db::InMemoryMemoryRepository;

    use super::MemoryManager;

    fn memory(deliverable: &str) -> MemoryBox {
        MemoryBox { deliverables: vec![deliverable.to_string()], improvement_areas: Vec::new() }
    }

    #[tokio::test]
    async fn later_write_becomes_current_and_history_is_kept() {
        let manager = MemoryManager::new(Arc::new(InMemoryMemoryRepository::default()));
        let email = ClientEmail::new("sarah@bigco.com");

        let first = manager.write_new(&email, Some(&CallId("c1".to_string())), memory("first")).await.expect("write");
        let second = manager.write_new(&email, None, memory("second")).await.expect("write");
        assert!(second.created_at > first.created_at);

        let current = manager.read_current(&email).await.expect("read").expect("current");
        assert_eq!(current.deliverables, vec!["second".to_string()]);
        assert_eq!(manager.history(&email, 10).await.expect("history").len(), 2);
    }

    #[tokio::test]
    async fn empty_email_reads_nothing() {
        let manager = MemoryManager::new(Arc::new(InMemoryMemoryRepository::default()));
        assert_eq!(manager.read_current(&ClientEmail::new("  ")).await.expect("read"), None);
    }
}
