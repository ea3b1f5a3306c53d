use std::sync::Arc;

use callsight_agent::{CallEngine, EngineSettings, LlmError, OpenAiCompatibleClient, ToolRegistry};
use callsight_core::config::{AppConfig, ConfigError, LoadOptions};
use callsight_db::{
    connect_from_config, migrations, DbPool, SqlAnalyticsRepository, SqlMemoryRepository,
    SqlWindowStore,
};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub engine: Arc<CallEngine>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("llm client setup failed: {0}")]
    Llm(#[source] LlmError),
    #[error("tool client setup failed: {0}")]
    Tools(#[source] reqwest::Error),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(event_name = "system.bootstrap.start", correlation_id = "bootstrap", "starting application bootstrap");

    let db_pool = connect_from_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let llm = OpenAiCompatibleClient::from_config(&config.llm).map_err(BootstrapError::Llm)?;
    info!(
        event_name = "system.bootstrap.llm_configured",
        correlation_id = "bootstrap",
        provider = ?config.llm.provider,
        model = %config.llm.model,
        endpoint = %llm.endpoint(),
        "llm client configured"
    );

    let registry = ToolRegistry::from_config(&config).map_err(BootstrapError::Tools)?;

    let engine = CallEngine::new(
        Arc::new(llm),
        Arc::new(SqlWindowStore::new(db_pool.clone())),
        Arc::new(SqlMemoryRepository::new(db_pool.clone())),
        Arc::new(SqlAnalyticsRepository::new(db_pool.clone())),
        Arc::new(registry),
        EngineSettings::from_config(&config),
    );

    Ok(Application { config, db_pool, engine: Arc::new(engine) })
}

#[cfg(test)]
mod tests {
    use callsight_core::config::{ConfigOverrides, LoadOptions};

    use crate::bootstrap::bootstrap;

    fn overrides(database_url: &str) -> ConfigOverrides {
        ConfigOverrides {
            database_url: Some(database_url.to_string()),
            llm_base_url: Some("http://127.0.0.1:11434/v1".to_string()),
            ..ConfigOverrides::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_when_crm_has_no_token() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                crm_enabled: Some(true),
                ..overrides("sqlite::memory:")
            },
            ..LoadOptions::default()
        })
        .await;

        let message = result.err().map(|error| error.to_string()).unwrap_or_default();
        assert!(message.contains("crm.access_token"), "unexpected error: {message}");
    }

    #[tokio::test]
    async fn bootstrap_migrates_and_wires_the_engine() {
        let app = bootstrap(LoadOptions { overrides: overrides("sqlite::memory:?cache=shared"), ..LoadOptions::default() })
            .await
            .expect("bootstrap should succeed with local overrides");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('call_window', 'engine_state', 'memory_record', 'call_analytics')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("baseline tables should exist after bootstrap");
        assert_eq!(table_count, 4);
        assert_eq!(app.engine.registry().len(), 1, "only send_email without CRM or knowledge");

        app.db_pool.close().await;
    }
}
