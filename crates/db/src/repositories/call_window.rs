use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};
use tracing::debug;

use callsight_core::domain::call::{CallId, ClientEmail, Window};
use callsight_core::domain::state::EngineState;

use super::{
    format_timestamp, parse_timestamp, parse_u32, parse_u64, AppendOutcome, RepositoryError,
    StoredWindow, WindowStore,
};
use crate::DbPool;

pub struct SqlWindowStore {
    pool: DbPool,
}

impl SqlWindowStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Decides what an insert that hit an existing `(call_id, window_number)` means.
    async fn existing_outcome(
        &self,
        window: &StoredWindow,
    ) -> Result<StoredWindow, RepositoryError> {
        let stored = self
            .find_window(&window.window.call_id, window.window.window_number)
            .await?
            .ok_or_else(|| {
                RepositoryError::Decode(format!(
                    "window {} of call {} vanished after a key conflict",
                    window.window.window_number, window.window.call_id
                ))
            })?;

        if stored.content_hash == window.content_hash {
            Ok(stored)
        } else {
            Err(RepositoryError::DuplicateWindow {
                call_id: window.window.call_id.0.clone(),
                window_number: window.window.window_number,
            })
        }
    }
}

#[async_trait::async_trait]
impl WindowStore for SqlWindowStore {
    async fn append_window(
        &self,
        window: &StoredWindow,
    ) -> Result<AppendOutcome, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        if insert_window(&mut conn, window).await? {
            return Ok(AppendOutcome::Inserted);
        }
        drop(conn);

        self.existing_outcome(window).await.map(AppendOutcome::AlreadyPresent)
    }

    async fn find_window(
        &self,
        call_id: &CallId,
        window_number: u32,
    ) -> Result<Option<StoredWindow>, RepositoryError> {
        let row = sqlx::query(
            "SELECT
                call_id,
                window_number,
                client_email,
                turns_json,
                content_hash,
                tips_json,
                activity_json,
                created_at
             FROM call_window
             WHERE call_id = ? AND window_number = ?",
        )
        .bind(&call_id.0)
        .bind(i64::from(window_number))
        .fetch_optional(&self.pool)
        .await?;

        row.map(window_from_row).transpose()
    }

    async fn load_windows(&self, call_id: &CallId) -> Result<Vec<StoredWindow>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT
                call_id,
                window_number,
                client_email,
                turns_json,
                content_hash,
                tips_json,
                activity_json,
                created_at
             FROM call_window
             WHERE call_id = ?
             ORDER BY window_number ASC",
        )
        .bind(&call_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(window_from_row).collect()
    }

    async fn load_state(&self, call_id: &CallId) -> Result<EngineState, RepositoryError> {
        let row = sqlx::query("SELECT state_json, version FROM engine_state WHERE call_id = ?")
            .bind(&call_id.0)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(EngineState::new(call_id.clone()));
        };

        let mut state: EngineState = serde_json::from_str(&row.try_get::<String, _>("state_json")?)?;
        state.version = parse_u64("version", row.try_get("version")?)?;
        Ok(state)
    }

    async fn save_state(&self, state: &EngineState) -> Result<u64, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        write_state(&mut conn, state).await
    }

    async fn commit_window(
        &self,
        window: &StoredWindow,
        state: &EngineState,
    ) -> Result<u64, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let version = write_state(&mut tx, state).await?;
        if !insert_window(&mut tx, window).await? {
            tx.rollback().await?;
            // An identical window committed by someone else still means our
            // state snapshot is stale; report it as a conflict so the caller reloads.
            self.existing_outcome(window).await?;
            return Err(RepositoryError::Conflict {
                call_id: state.call_id.0.clone(),
                expected_version: state.version,
            });
        }

        tx.commit().await?;
        debug!(
            event_name = "db.window.committed",
            call_id = %state.call_id,
            window_number = window.window.window_number,
            version,
            "window and engine state committed"
        );
        Ok(version)
    }
}

async fn insert_window(
    conn: &mut SqliteConnection,
    window: &StoredWindow,
) -> Result<bool, RepositoryError> {
    let result = sqlx::query(
        "INSERT INTO call_window (
            call_id,
            window_number,
            client_email,
            turns_json,
            content_hash,
            tips_json,
            activity_json,
            created_at
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(call_id, window_number) DO NOTHING",
    )
    .bind(&window.window.call_id.0)
    .bind(i64::from(window.window.window_number))
    .bind(window.window.client_email.as_str())
    .bind(serde_json::to_string(&window.window.turns)?)
    .bind(&window.content_hash)
    .bind(serde_json::to_string(&window.tips)?)
    .bind(serde_json::to_string(&window.activity)?)
    .bind(format_timestamp(&window.created_at))
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Conditional write: inserts at version 1 for a new call, otherwise bumps
/// the version only if it still matches the one the state was loaded at.
async fn write_state(
    conn: &mut SqliteConnection,
    state: &EngineState,
) -> Result<u64, RepositoryError> {
    let state_json = serde_json::to_string(state)?;
    let now = format_timestamp(&Utc::now());
    let expected = i64::try_from(state.version).map_err(|_| {
        RepositoryError::Decode(format!("state version {} exceeds i64", state.version))
    })?;

    let result = if state.version == 0 {
        sqlx::query(
            "INSERT INTO engine_state (call_id, phase, state_json, version, updated_at)
             VALUES (?, ?, ?, 1, ?)
             ON CONFLICT(call_id) DO NOTHING",
        )
        .bind(&state.call_id.0)
        .bind(state.phase.as_str())
        .bind(&state_json)
        .bind(&now)
        .execute(&mut *conn)
        .await?
    } else {
        sqlx::query(
            "UPDATE engine_state
             SET phase = ?, state_json = ?, version = version + 1, updated_at = ?
             WHERE call_id = ? AND version = ?",
        )
        .bind(state.phase.as_str())
        .bind(&state_json)
        .bind(&now)
        .bind(&state.call_id.0)
        .bind(expected)
        .execute(&mut *conn)
        .await?
    };

    if result.rows_affected() == 0 {
        return Err(RepositoryError::Conflict {
            call_id: state.call_id.0.clone(),
            expected_version: state.version,
        });
    }

    Ok(state.version + 1)
}

fn window_from_row(row: SqliteRow) -> Result<StoredWindow, RepositoryError> {
    Ok(StoredWindow {
        window: Window {
            call_id: CallId(row.try_get("call_id")?),
            window_number: parse_u32("window_number", row.try_get("window_number")?)?,
            client_email: ClientEmail::new(row.try_get::<String, _>("client_email")?),
            turns: serde_json::from_str(&row.try_get::<String, _>("turns_json")?)?,
        },
        content_hash: row.try_get("content_hash")?,
        tips: serde_json::from_str(&row.try_get::<String, _>("tips_json")?)?,
        activity: serde_json::from_str(&row.try_get::<String, _>("activity_json")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use callsight_core::domain::call::{CallId, ClientEmail, Speaker, Turn, Window};
    use callsight_core::domain::tip::{AiTip, TipTag};

    use super::SqlWindowStore;
    use crate::migrations;
    use crate::repositories::{AppendOutcome, RepositoryError, StoredWindow, WindowStore};
    use crate::{connect_with_settings, DbPool};

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect test pool");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    fn window(number: u32, text: &str) -> Window {
        Window {
            call_id: CallId("call-sql-1".to_string()),
            window_number: number,
            client_email: ClientEmail::new("sarah@bigco.com"),
            turns: vec![Turn {
                speaker: Speaker::Customer,
                transcript: text.to_string(),
                timestamp: Some("00:00:05".to_string()),
            }],
        }
    }

    #[tokio::test]
    async fn out_of_order_windows_load_in_window_order() {
        let store = SqlWindowStore::new(setup_pool().await);
        for number in [2, 1, 3] {
            let outcome = store
                .append_window(&StoredWindow::bare(window(number, "hello"), Utc::now()))
                .await
                .expect("append");
            assert_eq!(outcome, AppendOutcome::Inserted);
        }

        let numbers: Vec<u32> = store
            .load_windows(&CallId("call-sql-1".to_string()))
            .await
            .expect("load")
            .iter()
            .map(|stored| stored.window.window_number)
            .collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn identical_resubmission_is_accepted_and_conflicting_content_is_rejected() {
        let store = SqlWindowStore::new(setup_pool().await);
        let first = StoredWindow::with_response(
            window(1, "I forgot my password"),
            vec![AiTip::new(TipTag::Suggestion, "Offer a password reset link.")],
            Vec::new(),
            Utc::now(),
        );
        store.append_window(&first).await.expect("append");

        let again = store
            .append_window(&StoredWindow::bare(window(1, "I forgot my password"), Utc::now()))
            .await
            .expect("identical append");
        match again {
            AppendOutcome::AlreadyPresent(stored) => assert_eq!(stored.tips, first.tips),
            AppendOutcome::Inserted => panic!("identical window must not be inserted twice"),
        }

        let conflicting = store
            .append_window(&StoredWindow::bare(window(1, "Something else"), Utc::now()))
            .await;
        assert!(matches!(
            conflicting,
            Err(RepositoryError::DuplicateWindow { window_number: 1, .. })
        ));
    }

    #[tokio::test]
    async fn state_writes_are_conditional_on_version() {
        let store = SqlWindowStore::new(setup_pool().await);
        let call_id = CallId("call-sql-1".to_string());

        let mut fresh = store.load_state(&call_id).await.expect("load fresh");
        assert_eq!(fresh.version, 0);
        fresh.rolling_summary = "first".to_string();
        let version = store
            .commit_window(&StoredWindow::bare(window(1, "a"), Utc::now()), &fresh)
            .await
            .expect("commit first window");
        assert_eq!(version, 1);

        // A writer still holding the version-0 snapshot must lose.
        let stale = store
            .commit_window(&StoredWindow::bare(window(2, "b"), Utc::now()), &fresh)
            .await;
        assert!(matches!(stale, Err(RepositoryError::Conflict { expected_version: 0, .. })));
        assert!(store.find_window(&call_id, 2).await.expect("find").is_none());

        let mut current = store.load_state(&call_id).await.expect("reload");
        assert_eq!(current.version, 1);
        assert_eq!(current.rolling_summary, "first");
        current.rolling_summary = "second".to_string();
        assert_eq!(store.save_state(&current).await.expect("save"), 2);
    }
}
