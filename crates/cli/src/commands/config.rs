use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use callsight_core::config::{AppConfig, LoadOptions};
use secrecy::{ExposeSecret, SecretString};
use toml::Value;

struct Entry {
    key: &'static str,
    value: String,
    env_key: Option<&'static str>,
}

impl Entry {
    fn new(key: &'static str, value: impl ToString, env_key: Option<&'static str>) -> Self {
        Self { key, value: value.to_string(), env_key }
    }
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for entry in entries(&config) {
        let source = field_source(
            entry.key,
            entry.env_key,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(format!("- {} = {} (source: {source})", entry.key, entry.value));
    }

    lines.join("\n")
}

fn entries(config: &AppConfig) -> Vec<Entry> {
    let database = &config.database;
    let llm = &config.llm;
    let server = &config.server;
    let crm = &config.crm;
    let knowledge = &config.knowledge;
    let engine = &config.engine;

    vec![
        Entry::new("database.url", &database.url, Some("CALLSIGHT_DATABASE_URL")),
        Entry::new(
            "database.max_connections",
            database.max_connections,
            Some("CALLSIGHT_DATABASE_MAX_CONNECTIONS"),
        ),
        Entry::new("database.timeout_secs", database.timeout_secs, Some("CALLSIGHT_DATABASE_TIMEOUT_SECS")),
        Entry::new("llm.provider", format!("{:?}", llm.provider), Some("CALLSIGHT_LLM_PROVIDER")),
        Entry::new("llm.model", &llm.model, Some("CALLSIGHT_LLM_MODEL")),
        Entry::new(
            "llm.base_url",
            llm.base_url.as_deref().unwrap_or("<unset>"),
            Some("CALLSIGHT_LLM_BASE_URL"),
        ),
        Entry::new("llm.api_key", redact_secret(llm.api_key.as_ref()), Some("CALLSIGHT_LLM_API_KEY")),
        Entry::new("llm.timeout_secs", llm.timeout_secs, Some("CALLSIGHT_LLM_TIMEOUT_SECS")),
        Entry::new(
            "llm.analysis_timeout_secs",
            llm.analysis_timeout_secs,
            Some("CALLSIGHT_LLM_ANALYSIS_TIMEOUT_SECS"),
        ),
        Entry::new("server.bind_address", &server.bind_address, Some("CALLSIGHT_SERVER_BIND_ADDRESS")),
        Entry::new("server.port", server.port, Some("CALLSIGHT_SERVER_PORT")),
        Entry::new(
            "server.graceful_shutdown_secs",
            server.graceful_shutdown_secs,
            Some("CALLSIGHT_SERVER_GRACEFUL_SHUTDOWN_SECS"),
        ),
        Entry::new("crm.enabled", crm.enabled, Some("CALLSIGHT_CRM_ENABLED")),
        Entry::new("crm.api_base_url", &crm.api_base_url, Some("CALLSIGHT_CRM_API_BASE_URL")),
        Entry::new(
            "crm.access_token",
            redact_secret(crm.access_token.as_ref()),
            Some("CALLSIGHT_CRM_ACCESS_TOKEN"),
        ),
        Entry::new("knowledge.enabled", knowledge.enabled, Some("CALLSIGHT_KNOWLEDGE_ENABLED")),
        Entry::new(
            "knowledge.base_url",
            knowledge.base_url.as_deref().unwrap_or("<unset>"),
            Some("CALLSIGHT_KNOWLEDGE_BASE_URL"),
        ),
        Entry::new(
            "knowledge.api_key",
            redact_secret(knowledge.api_key.as_ref()),
            Some("CALLSIGHT_KNOWLEDGE_API_KEY"),
        ),
        Entry::new("knowledge.min_score", knowledge.min_score, Some("CALLSIGHT_KNOWLEDGE_MIN_SCORE")),
        Entry::new("knowledge.max_results", knowledge.max_results, None),
        Entry::new(
            "engine.max_tools_per_window",
            engine.max_tools_per_window,
            Some("CALLSIGHT_ENGINE_MAX_TOOLS_PER_WINDOW"),
        ),
        Entry::new("engine.tool_concurrency", engine.tool_concurrency, Some("CALLSIGHT_ENGINE_TOOL_CONCURRENCY")),
        Entry::new("engine.tool_timeout_ms", engine.tool_timeout_ms, Some("CALLSIGHT_ENGINE_TOOL_TIMEOUT_MS")),
        Entry::new("engine.decision_retries", engine.decision_retries, None),
        Entry::new(
            "engine.analysis_max_retries",
            engine.analysis_max_retries,
            Some("CALLSIGHT_ENGINE_ANALYSIS_MAX_RETRIES"),
        ),
        Entry::new("engine.summary_max_chars", engine.summary_max_chars, None),
        Entry::new(
            "engine.fingerprint_mode",
            format!("{:?}", engine.fingerprint_mode),
            Some("CALLSIGHT_ENGINE_FINGERPRINT_MODE"),
        ),
        Entry::new("engine.state_conflict_retries", engine.state_conflict_retries, None),
        Entry::new("logging.level", &config.logging.level, Some("CALLSIGHT_LOGGING_LEVEL")),
        Entry::new(
            "logging.format",
            format!("{:?}", config.logging.format),
            Some("CALLSIGHT_LOGGING_FORMAT"),
        ),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    ["callsight.toml", "config/callsight.toml"].into_iter().map(PathBuf::from).find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let raw = fs::read_to_string(path?).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: Option<&str>,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_key {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

/// Keeps a short prefix such as `sk-` or `pat-` visible for operators.
fn redact_secret(secret: Option<&SecretString>) -> String {
    let Some(secret) = secret else {
        return "<unset>".to_string();
    };
    let trimmed = secret.expose_secret().trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    match trimmed.split_once('-') {
        Some((prefix, _)) if prefix.len() <= 4 => format!("{prefix}-***"),
        _ => "<redacted>".to_string(),
    }
}
