use sqlx::{sqlite::SqliteRow, Row};

use callsight_core::domain::call::{CallId, ClientEmail};
use callsight_core::domain::memory::MemoryRecord;

use super::{format_timestamp, parse_timestamp, MemoryRepository, RepositoryError};
use crate::DbPool;

pub struct SqlMemoryRepository {
    pool: DbPool,
}

impl SqlMemoryRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl MemoryRepository for SqlMemoryRepository {
    async fn read_current(
        &self,
        client_email: &ClientEmail,
    ) -> Result<Option<MemoryRecord>, RepositoryError> {
        // Timestamps are fixed-width RFC 3339, so text order is time order;
        // rowid breaks ties between writes in the same microsecond.
        let row = sqlx::query(
            "SELECT id, client_email, call_id, deliverables_json, improvement_areas_json, created_at
             FROM memory_record
             WHERE client_email = ?
             ORDER BY created_at DESC, rowid DESC
             LIMIT 1",
        )
        .bind(client_email.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(memory_from_row).transpose()
    }

    async fn write_new(&self, record: &MemoryRecord) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO memory_record (
                id,
                client_email,
                call_id,
                deliverables_json,
                improvement_areas_json,
                created_at
             ) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(record.client_email.as_str())
        .bind(record.call_id.as_ref().map(|call_id| call_id.0.clone()))
        .bind(serde_json::to_string(&record.deliverables)?)
        .bind(serde_json::to_string(&record.improvement_areas)?)
        .bind(format_timestamp(&record.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn history(
        &self,
        client_email: &ClientEmail,
        limit: u32,
    ) -> Result<Vec<MemoryRecord>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, client_email, call_id, deliverables_json, improvement_areas_json, created_at
             FROM memory_record
             WHERE client_email = ?
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?",
        )
        .bind(client_email.as_str())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(memory_from_row).collect()
    }
}

fn memory_from_row(row: SqliteRow) -> Result<MemoryRecord, RepositoryError> {
    Ok(MemoryRecord {
        id: row.try_get("id")?,
        client_email: ClientEmail::new(row.try_get::<String, _>("client_email")?),
        call_id: row.try_get::<Option<String>, _>("call_id")?.map(CallId),
        deliverables: serde_json::from_str(&row.try_get::<String, _>("deliverables_json")?)?,
        improvement_areas: serde_json::from_str(
            &row.try_get::<String, _>("improvement_areas_json")?,
        )?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}
