use sqlx::{sqlite::SqliteRow, Row};

use callsight_core::domain::analytics::AnalyticsRecord;
use callsight_core::domain::call::{CallId, ClientEmail};

use super::{format_timestamp, parse_timestamp, AnalyticsRepository, RepositoryError};
use crate::DbPool;

pub struct SqlAnalyticsRepository {
    pool: DbPool,
}

impl SqlAnalyticsRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl AnalyticsRepository for SqlAnalyticsRepository {
    async fn save(&self, record: &AnalyticsRecord) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO call_analytics (client_email, created_at, call_id, analytics_json)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(call_id) DO UPDATE SET
                client_email = excluded.client_email,
                created_at = excluded.created_at,
                analytics_json = excluded.analytics_json",
        )
        .bind(record.client_email.as_str())
        .bind(format_timestamp(&record.created_at))
        .bind(&record.call_id.0)
        .bind(serde_json::to_string(&record.analytics)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_call(
        &self,
        call_id: &CallId,
    ) -> Result<Option<AnalyticsRecord>, RepositoryError> {
        let row = sqlx::query(
            "SELECT client_email, created_at, call_id, analytics_json
             FROM call_analytics
             WHERE call_id = ?",
        )
        .bind(&call_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(analytics_from_row).transpose()
    }

    async fn list_for_customer(
        &self,
        client_email: &ClientEmail,
    ) -> Result<Vec<AnalyticsRecord>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT client_email, created_at, call_id, analytics_json
             FROM call_analytics
             WHERE client_email = ?
             ORDER BY created_at DESC",
        )
        .bind(client_email.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(analytics_from_row).collect()
    }
}

fn analytics_from_row(row: SqliteRow) -> Result<AnalyticsRecord, RepositoryError> {
    Ok(AnalyticsRecord {
        call_id: CallId(row.try_get("call_id")?),
        client_email: ClientEmail::new(row.try_get::<String, _>("client_email")?),
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        analytics: serde_json::from_str(&row.try_get::<String, _>("analytics_json")?)?,
    })
}
