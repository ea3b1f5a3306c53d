use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fingerprint::FingerprintMode;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub server: ServerConfig,
    pub crm: CrmConfig,
    pub knowledge: KnowledgeConfig,
    pub engine: EngineConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    /// Hard ceiling for one live-window model call.
    pub timeout_secs: u64,
    /// Ceiling for one post-call analysis attempt.
    pub analysis_timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct CrmConfig {
    pub enabled: bool,
    pub api_base_url: String,
    pub access_token: Option<SecretString>,
}

#[derive(Clone, Debug)]
pub struct KnowledgeConfig {
    pub enabled: bool,
    pub base_url: Option<String>,
    pub api_key: Option<SecretString>,
    pub min_score: f64,
    pub max_results: usize,
}

/// Tuning for the live decision loop and the post-call pass.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub max_tools_per_window: usize,
    pub tool_concurrency: usize,
    pub tool_timeout_ms: u64,
    pub decision_retries: u32,
    pub analysis_max_retries: u32,
    pub summary_max_chars: usize,
    pub fingerprint_mode: FingerprintMode,
    pub state_conflict_retries: u32,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    OpenAi,
    Ollama,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub llm_api_key: Option<String>,
    pub llm_base_url: Option<String>,
    pub crm_enabled: Option<bool>,
    pub crm_access_token: Option<String>,
    pub knowledge_enabled: Option<bool>,
    pub knowledge_base_url: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://callsight.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            llm: LlmConfig {
                provider: LlmProvider::Ollama,
                api_key: None,
                base_url: Some("http://localhost:11434/v1".to_string()),
                model: "llama3.1".to_string(),
                timeout_secs: 20,
                analysis_timeout_secs: 120,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            crm: CrmConfig {
                enabled: false,
                api_base_url: "https://api.hubapi.com".to_string(),
                access_token: None,
            },
            knowledge: KnowledgeConfig {
                enabled: false,
                base_url: None,
                api_key: None,
                min_score: 0.5,
                max_results: 3,
            },
            engine: EngineConfig {
                max_tools_per_window: 6,
                tool_concurrency: 4,
                tool_timeout_ms: 8_000,
                decision_retries: 1,
                analysis_max_retries: 2,
                summary_max_chars: 4_000,
                fingerprint_mode: FingerprintMode::Normalized,
                state_conflict_retries: 3,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" | "open_ai" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai|ollama)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl std::str::FromStr for FingerprintMode {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "exact" => Ok(Self::Exact),
            "normalized" => Ok(Self::Normalized),
            other => Err(ConfigError::Validation(format!(
                "unsupported fingerprint mode `{other}` (expected exact|normalized)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from("callsight.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(llm_api_key_value) = llm.api_key {
                self.llm.api_key = Some(secret_value(llm_api_key_value));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(analysis_timeout_secs) = llm.analysis_timeout_secs {
                self.llm.analysis_timeout_secs = analysis_timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(crm) = patch.crm {
            if let Some(enabled) = crm.enabled {
                self.crm.enabled = enabled;
            }
            if let Some(api_base_url) = crm.api_base_url {
                self.crm.api_base_url = api_base_url;
            }
            if let Some(access_token) = crm.access_token {
                self.crm.access_token = Some(secret_value(access_token));
            }
        }

        if let Some(knowledge) = patch.knowledge {
            if let Some(enabled) = knowledge.enabled {
                self.knowledge.enabled = enabled;
            }
            if let Some(base_url) = knowledge.base_url {
                self.knowledge.base_url = Some(base_url);
            }
            if let Some(api_key) = knowledge.api_key {
                self.knowledge.api_key = Some(secret_value(api_key));
            }
            if let Some(min_score) = knowledge.min_score {
                self.knowledge.min_score = min_score;
            }
            if let Some(max_results) = knowledge.max_results {
                self.knowledge.max_results = max_results;
            }
        }

        if let Some(engine) = patch.engine {
            if let Some(value) = engine.max_tools_per_window {
                self.engine.max_tools_per_window = value;
            }
            if let Some(value) = engine.tool_concurrency {
                self.engine.tool_concurrency = value;
            }
            if let Some(value) = engine.tool_timeout_ms {
                self.engine.tool_timeout_ms = value;
            }
            if let Some(value) = engine.decision_retries {
                self.engine.decision_retries = value;
            }
            if let Some(value) = engine.analysis_max_retries {
                self.engine.analysis_max_retries = value;
            }
            if let Some(value) = engine.summary_max_chars {
                self.engine.summary_max_chars = value;
            }
            if let Some(value) = engine.fingerprint_mode {
                self.engine.fingerprint_mode = value;
            }
            if let Some(value) = engine.state_conflict_retries {
                self.engine.state_conflict_retries = value;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("CALLSIGHT_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("CALLSIGHT_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_num("CALLSIGHT_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("CALLSIGHT_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_num("CALLSIGHT_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("CALLSIGHT_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("CALLSIGHT_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("CALLSIGHT_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("CALLSIGHT_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("CALLSIGHT_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_num("CALLSIGHT_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("CALLSIGHT_LLM_ANALYSIS_TIMEOUT_SECS") {
            self.llm.analysis_timeout_secs =
                parse_num("CALLSIGHT_LLM_ANALYSIS_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("CALLSIGHT_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("CALLSIGHT_SERVER_PORT") {
            self.server.port = parse_num("CALLSIGHT_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("CALLSIGHT_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_num("CALLSIGHT_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("CALLSIGHT_CRM_ENABLED") {
            self.crm.enabled = parse_num("CALLSIGHT_CRM_ENABLED", &value)?;
        }
        if let Some(value) = read_env("CALLSIGHT_CRM_API_BASE_URL") {
            self.crm.api_base_url = value;
        }
        // HUBSPOT_API_KEY is accepted for deployments that already export it.
        let crm_token =
            read_env("CALLSIGHT_CRM_ACCESS_TOKEN").or_else(|| read_env("HUBSPOT_API_KEY"));
        if let Some(value) = crm_token {
            self.crm.access_token = Some(secret_value(value));
        }

        if let Some(value) = read_env("CALLSIGHT_KNOWLEDGE_ENABLED") {
            self.knowledge.enabled = parse_num("CALLSIGHT_KNOWLEDGE_ENABLED", &value)?;
        }
        if let Some(value) = read_env("CALLSIGHT_KNOWLEDGE_BASE_URL") {
            self.knowledge.base_url = Some(value);
        }
        if let Some(value) = read_env("CALLSIGHT_KNOWLEDGE_API_KEY") {
            self.knowledge.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("CALLSIGHT_KNOWLEDGE_MIN_SCORE") {
            self.knowledge.min_score = parse_num("CALLSIGHT_KNOWLEDGE_MIN_SCORE", &value)?;
        }

        if let Some(value) = read_env("CALLSIGHT_ENGINE_MAX_TOOLS_PER_WINDOW") {
            self.engine.max_tools_per_window =
                parse_num("CALLSIGHT_ENGINE_MAX_TOOLS_PER_WINDOW", &value)?;
        }
        if let Some(value) = read_env("CALLSIGHT_ENGINE_TOOL_CONCURRENCY") {
            self.engine.tool_concurrency = parse_num("CALLSIGHT_ENGINE_TOOL_CONCURRENCY", &value)?;
        }
        if let Some(value) = read_env("CALLSIGHT_ENGINE_TOOL_TIMEOUT_MS") {
            self.engine.tool_timeout_ms = parse_num("CALLSIGHT_ENGINE_TOOL_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = read_env("CALLSIGHT_ENGINE_ANALYSIS_MAX_RETRIES") {
            self.engine.analysis_max_retries =
                parse_num("CALLSIGHT_ENGINE_ANALYSIS_MAX_RETRIES", &value)?;
        }
        if let Some(value) = read_env("CALLSIGHT_ENGINE_FINGERPRINT_MODE") {
            self.engine.fingerprint_mode = value.parse()?;
        }

        let log_level =
            read_env("CALLSIGHT_LOGGING_LEVEL").or_else(|| read_env("CALLSIGHT_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("CALLSIGHT_LOGGING_FORMAT").or_else(|| read_env("CALLSIGHT_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(llm_api_key) = overrides.llm_api_key {
            self.llm.api_key = Some(secret_value(llm_api_key));
        }
        if let Some(llm_base_url) = overrides.llm_base_url {
            self.llm.base_url = Some(llm_base_url);
        }
        if let Some(enabled) = overrides.crm_enabled {
            self.crm.enabled = enabled;
        }
        if let Some(access_token) = overrides.crm_access_token {
            self.crm.access_token = Some(secret_value(access_token));
        }
        if let Some(enabled) = overrides.knowledge_enabled {
            self.knowledge.enabled = enabled;
        }
        if let Some(base_url) = overrides.knowledge_base_url {
            self.knowledge.base_url = Some(base_url);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_llm(&self.llm)?;
        validate_server(&self.server)?;
        validate_crm(&self.crm)?;
        validate_knowledge(&self.knowledge)?;
        validate_engine(&self.engine)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("callsight.toml"), PathBuf::from("config/callsight.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }
    if llm.analysis_timeout_secs == 0 || llm.analysis_timeout_secs > 900 {
        return Err(ConfigError::Validation(
            "llm.analysis_timeout_secs must be in range 1..=900".to_string(),
        ));
    }
    if llm.model.trim().is_empty() {
        return Err(ConfigError::Validation("llm.model must not be empty".to_string()));
    }

    match llm.provider {
        LlmProvider::OpenAi => {
            let missing = llm
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.api_key is required for the openai provider".to_string(),
                ));
            }
        }
        LlmProvider::Ollama => {
            let missing =
                llm.base_url.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.base_url is required for ollama provider".to_string(),
                ));
            }
        }
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_crm(crm: &CrmConfig) -> Result<(), ConfigError> {
    if !crm.api_base_url.starts_with("http://") && !crm.api_base_url.starts_with("https://") {
        return Err(ConfigError::Validation(
            "crm.api_base_url must start with http:// or https://".to_string(),
        ));
    }

    if crm.enabled {
        let missing = crm
            .access_token
            .as_ref()
            .map(|value| value.expose_secret().trim().is_empty())
            .unwrap_or(true);
        if missing {
            return Err(ConfigError::Validation(
                "crm.enabled is true but crm.access_token is not configured".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_knowledge(knowledge: &KnowledgeConfig) -> Result<(), ConfigError> {
    if knowledge.enabled {
        let base_url = knowledge.base_url.as_deref().unwrap_or_default();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "knowledge.enabled is true but knowledge.base_url is not an http(s) URL"
                    .to_string(),
            ));
        }
    }

    if !(0.0..=1.0).contains(&knowledge.min_score) {
        return Err(ConfigError::Validation(
            "knowledge.min_score must be in range 0.0..=1.0".to_string(),
        ));
    }

    if knowledge.max_results == 0 {
        return Err(ConfigError::Validation(
            "knowledge.max_results must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_engine(engine: &EngineConfig) -> Result<(), ConfigError> {
    if engine.tool_concurrency == 0 {
        return Err(ConfigError::Validation(
            "engine.tool_concurrency must be greater than zero".to_string(),
        ));
    }
    if engine.tool_timeout_ms == 0 || engine.tool_timeout_ms > 120_000 {
        return Err(ConfigError::Validation(
            "engine.tool_timeout_ms must be in range 1..=120000".to_string(),
        ));
    }
    if engine.analysis_max_retries > 10 {
        return Err(ConfigError::Validation(
            "engine.analysis_max_retries must be at most 10".to_string(),
        ));
    }
    if engine.decision_retries > 5 {
        return Err(ConfigError::Validation(
            "engine.decision_retries must be at most 5".to_string(),
        ));
    }
    if engine.state_conflict_retries > 20 {
        return Err(ConfigError::Validation(
            "engine.state_conflict_retries must be at most 20".to_string(),
        ));
    }
    if engine.summary_max_chars < 200 {
        return Err(ConfigError::Validation(
            "engine.summary_max_chars must be at least 200".to_string(),
        ));
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    llm: Option<LlmPatch>,
    server: Option<ServerPatch>,
    crm: Option<CrmPatch>,
    knowledge: Option<KnowledgePatch>,
    engine: Option<EnginePatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    analysis_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct CrmPatch {
    enabled: Option<bool>,
    api_base_url: Option<String>,
    access_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct KnowledgePatch {
    enabled: Option<bool>,
    base_url: Option<String>,
    api_key: Option<String>,
    min_score: Option<f64>,
    max_results: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct EnginePatch {
    max_tools_per_window: Option<usize>,
    tool_concurrency: Option<usize>,
    tool_timeout_ms: Option<u64>,
    decision_retries: Option<u32>,
    analysis_max_retries: Option<u32>,
    summary_max_chars: Option<usize>,
    fingerprint_mode: Option<FingerprintMode>,
    state_conflict_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
