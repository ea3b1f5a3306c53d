//! Company manual search backed by an HTTP vector-search service.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use callsight_core::config::KnowledgeConfig;
use callsight_core::domain::tool::{ToolClass, ToolError};

use super::crm::classify_status;
use super::{typed_input, Tool};

const MAX_SNIPPET_CHARS: usize = 1_000;

pub struct KnowledgeSearchTool {
    http: Client,
    endpoint: String,
    api_key: Option<SecretString>,
    min_score: f64,
    max_results: usize,
    timeout_ms: u64,
}

#[derive(Deserialize)]
struct SearchInput {
    query: String,
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    limit: usize,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct SearchHit {
    pub content: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub score: f64,
}

impl KnowledgeSearchTool {
    pub fn new(
        base_url: &str,
        api_key: Option<SecretString>,
        min_score: f64,
        max_results: usize,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        Ok(Self {
            http: Client::builder().timeout(timeout).build()?,
            endpoint: format!("{}/search", base_url.trim_end_matches('/')),
            api_key,
            min_score,
            max_results: max_results.max(1),
            timeout_ms: timeout.as_millis() as u64,
        })
    }

    pub fn from_config(
        config: &KnowledgeConfig,
        timeout: Duration,
    ) -> Result<Option<Self>, reqwest::Error> {
        match (config.enabled, config.base_url.as_deref()) {
            (true, Some(base_url)) => Self::new(
                base_url,
                config.api_key.clone(),
                config.min_score,
                config.max_results,
                timeout,
            )
            .map(Some),
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl Tool for KnowledgeSearchTool {
    fn name(&self) -> &'static str {
        "search_company_manuals"
    }

    fn class(&self) -> ToolClass {
        ToolClass::Lookup
    }

    fn description(&self) -> &'static str {
        "Search product manuals and policies when the customer asks how something works."
    }

    fn input_hint(&self) -> Value {
        json!({"query": "how to reset a password"})
    }

    async fn invoke(&self, input: Value) -> Result<Value, ToolError> {
        let input: SearchInput = typed_input(self.name(), input)?;
        let query = input.query.trim();
        if query.is_empty() {
            return Err(ToolError::Validation("search_company_manuals: `query` is empty".to_string()));
        }

        let mut request = self
            .http
            .post(&self.endpoint)
            .json(&SearchRequest { query, limit: self.max_results * 2 });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }

        let response = request.send().await.map_err(|error| {
            if error.is_timeout() {
                ToolError::Timeout(self.timeout_ms)
            } else {
                ToolError::Upstream(format!("knowledge search unreachable: {error}"))
            }
        })?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }
        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|error| ToolError::Upstream(format!("invalid search response: {error}")))?;

        Ok(shape_results(query, parsed.results, self.min_score, self.max_results))
    }
}

/// Keeps the best hits above `min_score`, trims their content and reduces
/// URL sources to file stems.
pub fn shape_results(query: &str, mut hits: Vec<SearchHit>, min_score: f64, limit: usize) -> Value {
    hits.retain(|hit| hit.score >= min_score && !hit.content.trim().is_empty());
    hits.sort_by(|left, right| right.score.total_cmp(&left.score));
    hits.truncate(limit);

    if hits.is_empty() {
        return json!({
            "results": [],
            "sources": [],
            "message": format!("No results found for query: '{query}'"),
        });
    }

    let mut sources: Vec<String> = Vec::new();
    let results: Vec<Value> = hits
        .into_iter()
        .map(|hit| {
            let source = source_stem(&hit.source);
            if !source.is_empty() && !sources.contains(&source) {
                sources.push(source.clone());
            }
            json!({
                "content": truncate_chars(hit.content.trim(), MAX_SNIPPET_CHARS),
                "source": source,
                "score": hit.score,
            })
        })
        .collect();

    json!({"results": results, "sources": sources})
}

/// `https://docs.example.com/guides/password-reset.pdf` -> `password-reset`.
pub fn source_stem(source: &str) -> String {
    let trimmed = source.trim();
    if !trimmed.contains("://") {
        return trimmed.to_string();
    }
    let path = trimmed.split(['?', '#']).next().unwrap_or(trimmed).trim_end_matches('/');
    let file = path.rsplit('/').next().unwrap_or(path);
    match file.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
        _ => file.to_string(),
    }
}

fn truncate_chars(value: &str, max_chars: usize) -> String {
    match value.char_indices().nth(max_chars) {
        Some((index, _)) => value[..index].to_string(),
        None => value.to_string(),
    }
}
