use std::sync::Arc;

use anyhow::Context;
use callsight_agent::MemoryManager;
use callsight_core::config::{AppConfig, LoadOptions};
use callsight_core::domain::call::ClientEmail;
use callsight_core::domain::memory::MemoryRecord;
use callsight_db::{connect_from_config, SqlMemoryRepository};
use serde::Serialize;

use crate::commands::{runtime, CommandResult};

const MAX_HISTORY: u32 = 50;

#[derive(Debug, Serialize)]
struct MemoryOutcome {
    command: &'static str,
    status: &'static str,
    client_email: ClientEmail,
    current: Option<MemoryRecord>,
    history: Vec<MemoryRecord>,
}

pub fn run(email: &str, history: u32) -> CommandResult {
    let client_email = ClientEmail::new(email);
    if client_email.is_empty() {
        return CommandResult::failure("memory", "invalid_input", "--email must not be empty", 2);
    }

    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "memory",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let runtime = match runtime("memory") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let lookup = runtime.block_on(async {
        let pool = connect_from_config(&config.database)
            .await
            .context("failed to connect to database")?;
        let manager = MemoryManager::new(Arc::new(SqlMemoryRepository::new(pool.clone())));

        let current = manager.read_current(&client_email).await.context("memory read failed")?;
        let history = if history > 0 {
            manager
                .history(&client_email, history.min(MAX_HISTORY))
                .await
                .context("memory history read failed")?
        } else {
            Vec::new()
        };

        pool.close().await;
        Ok::<_, anyhow::Error>((current, history))
    });

    match lookup {
        Ok((current, history)) => {
            let outcome =
                MemoryOutcome { command: "memory", status: "ok", client_email, current, history };
            match serde_json::to_string(&outcome) {
                Ok(output) => CommandResult { exit_code: 0, output },
                Err(error) => CommandResult::failure("memory", "serialization", error.to_string(), 1),
            }
        }
        Err(error) => CommandResult::failure("memory", "storage", format!("{error:#}"), 4),
    }
}
