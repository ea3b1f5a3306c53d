//! Post-call analysis: one model pass over the whole call, validated
//! against the analytics schema before anything is persisted.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tracing::{error, info, warn};

use callsight_core::domain::analytics::{AnalyticsRecord, AnalyticsResult};
use callsight_core::domain::call::{CallId, ClientEmail};
use callsight_core::domain::memory::MemoryRecord;
use callsight_core::domain::tool::ToolInvocation;
use callsight_db::{AnalyticsRepository, RepositoryError, StoredWindow};

use crate::llm::LlmClient;
use crate::memory::MemoryManager;
use crate::prompt;

#[derive(Debug, Error)]
pub enum AnalyzerError {
    #[error("analysis unavailable after {attempts} attempts: {reason}")]
    Unavailable { attempts: u32, reason: String },
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

pub struct AnalysisInput<'a> {
    pub call_id: &'a CallId,
    pub client_email: &'a ClientEmail,
    /// Ordered by window number.
    pub windows: &'a [StoredWindow],
    pub invocations: &'a [ToolInvocation],
    pub prior_memory: Option<&'a MemoryRecord>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AnalysisOutcome {
    pub record: AnalyticsRecord,
    pub memory: MemoryRecord,
    pub attempts: u32,
}

pub struct PostCallAnalyzer {
    llm: Arc<dyn LlmClient>,
    analytics: Arc<dyn AnalyticsRepository>,
    memory: MemoryManager,
    timeout: Duration,
    max_retries: u32,
}

impl PostCallAnalyzer {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        analytics: Arc<dyn AnalyticsRepository>,
        memory: MemoryManager,
        timeout: Duration,
        max_retries: u32,
    ) -> Self {
        Self { llm, analytics, memory, timeout, max_retries }
    }

    /// Nothing is written unless the model produced a schema-valid result.
    pub async fn analyze(&self, input: AnalysisInput<'_>) -> Result<AnalysisOutcome, AnalyzerError> {
        let base = prompt::post_call_analysis(input.windows, input.invocations, input.prior_memory);
        let mut request = base.clone();
        let attempts = self.max_retries + 1;
        let mut last_failure = String::from("no attempt made");

        for attempt in 1..=attempts {
            let reply = match tokio::time::timeout(self.timeout, self.llm.complete(&request)).await {
                Ok(Ok(reply)) => reply,
                Ok(Err(error)) => {
                    warn!(
                        event_name = "analyzer.llm_failed",
                        call_id = %input.call_id,
                        attempt,
                        %error,
                        "analysis model call failed"
                    );
                    last_failure = error.to_string();
                    continue;
                }
                Err(_) => {
                    warn!(
                        event_name = "analyzer.timeout",
                        call_id = %input.call_id,
                        attempt,
                        timeout_secs = self.timeout.as_secs(),
                        "analysis model call timed out"
                    );
                    last_failure = format!("timed out after {}s", self.timeout.as_secs());
                    continue;
                }
            };

            match AnalyticsResult::parse(&reply) {
                Ok(analytics) => {
                    let outcome = self.persist(&input, analytics, attempt).await?;
                    info!(
                        event_name = "analyzer.completed",
                        call_id = %input.call_id,
                        attempt,
                        category = %outcome.record.analytics.issue_resolution.category,
                        "post-call analysis stored"
                    );
                    return Ok(outcome);
                }
                Err(violations) => {
                    let summary: Vec<String> = violations.iter().map(ToString::to_string).collect();
                    warn!(
                        event_name = "analyzer.validation_failed",
                        call_id = %input.call_id,
                        attempt,
                        violations = ?summary,
                        "analysis output failed schema validation"
                    );
                    last_failure = summary.join("; ");
                    request = prompt::analysis_repair(&base, &reply, &violations);
                }
            }
        }

        Err(AnalyzerError::Unavailable { attempts, reason: last_failure })
    }

    async fn persist(
        &self,
        input: &AnalysisInput<'_>,
        analytics: AnalyticsResult,
        attempts: u32,
    ) -> Result<AnalysisOutcome, AnalyzerError> {
        let memory_box = analytics.memory.clone();
        let record = AnalyticsRecord {
            call_id: input.call_id.clone(),
            client_email: input.client_email.clone(),
            created_at: Utc::now(),
            analytics,
        };
        // The analytics save is an upsert; a retried analysis overwrites this row.
        self.analytics.save(&record).await?;
        let memory = match self.memory.write_new(input.client_email, Some(input.call_id), memory_box).await {
            Ok(memory) => memory,
            Err(error) => {
                error!(
                    event_name = "analyzer.partial_persist",
                    call_id = %input.call_id,
                    client_email = %input.client_email,
                    %error,
                    "analytics stored but memory append failed"
                );
                return Err(error.into());
            }
        };

        Ok(AnalysisOutcome { record, memory, attempts })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;

    use callsight_core::domain::call::{CallId, ClientEmail, Speaker, Turn, Window};
    use callsight_core::domain::memory::MemoryRecord;
    use callsight_db::{
        AnalyticsRepository, InMemoryAnalyticsRepository, InMemoryMemoryRepository, MemoryRepository,
        RepositoryError, StoredWindow,
    };

    use super::{AnalysisInput, AnalyzerError, PostCallAnalyzer};
    use crate::fixtures::{ScriptedLlm, ScriptedReply};
    use crate::memory::MemoryManager;

    fn valid_reply(category: &str) -> String {
        json!({
            "sentiment": {"score": 70, "label": "Positive"},
            "satisfaction": {"score": 75, "prediction": "Satisfied"},
            "emotions": [{"emotion": "relief", "intensity": 60}],
            "callMetrics": {"duration": "04:10", "agentTalkTime": 50, "customerTalkTime": 45, "holdTime": 5},
            "issueResolution": {"resolved": true, "category": category, "resolutionTimeMinutes": 4, "escalationRisk": 5},
            "agentPerformance": {"professionalismScore": 90, "empathyScore": 80, "knowledgeScore": 85, "avgResponseLatencySeconds": 2},
            "keyInsights": ["Customer was locked out"],
            "actionItems": ["Follow up tomorrow"],
            "tags": [category],
            "memory": {"deliverables": ["Sent reset link"], "improvementAreas": ["Confirm identity first"]}
        })
        .to_string()
    }

    struct Harness {
        analyzer: PostCallAnalyzer,
        llm: Arc<ScriptedLlm>,
        analytics: Arc<InMemoryAnalyticsRepository>,
        memory: Arc<InMemoryMemoryRepository>,
    }

    fn harness(replies: Vec<ScriptedReply>, max_retries: u32) -> Harness {
        let llm = Arc::new(ScriptedLlm::new(replies));
        let analytics = Arc::new(InMemoryAnalyticsRepository::default());
        let memory = Arc::new(InMemoryMemoryRepository::default());
        let analyzer = PostCallAnalyzer::new(
            llm.clone(),
            analytics.clone(),
            MemoryManager::new(memory.clone()),
            Duration::from_millis(200),
            max_retries,
        );
        Harness { analyzer, llm, analytics, memory }
    }

    fn windows() -> Vec<StoredWindow> {
        vec![StoredWindow::bare(
            Window {
                call_id: CallId("call-a".to_string()),
                window_number: 1,
                client_email: ClientEmail::new("sarah@bigco.com"),
                turns: vec![Turn {
                    speaker: Speaker::Customer,
                    transcript: "I forgot my password".to_string(),
                    timestamp: None,
                }],
            },
            chrono::Utc::now(),
        )]
    }

    #[tokio::test]
    async fn invalid_then_valid_reply_is_repaired_and_persisted() {
        let harness = harness(
            vec![
                ScriptedReply::Text("{\"sentiment\": {\"score\": 300}}".to_string()),
                ScriptedReply::Text(valid_reply("password-reset")),
            ],
            2,
        );
        let call_id = CallId("call-a".to_string());
        let email = ClientEmail::new("sarah@bigco.com");
        let windows = windows();

        let outcome = harness
            .analyzer
            .analyze(AnalysisInput {
                call_id: &call_id,
                client_email: &email,
                windows: &windows,
                invocations: &[],
                prior_memory: None,
            })
            .await
            .expect("analysis");

        assert_eq!(outcome.attempts, 2);
        let requests = harness.llm.requests();
        assert!(requests[1].system.contains("rejected by the schema validator"));
        assert!(harness.analytics.find_by_call(&call_id).await.expect("find").is_some());
        assert_eq!(outcome.memory.deliverables, vec!["Sent reset link".to_string()]);
    }

    #[tokio::test]
    async fn exhausted_retries_persist_nothing() {
        let harness = harness(
            vec![
                ScriptedReply::Text("not json".to_string()),
                ScriptedReply::Hang(Duration::from_secs(2)),
                ScriptedReply::Text(json!({"tags": []}).to_string()),
            ],
            2,
        );
        let call_id = CallId("call-a".to_string());
        let email = ClientEmail::new("sarah@bigco.com");
        let windows = windows();

        let error = harness
            .analyzer
            .analyze(AnalysisInput {
                call_id: &call_id,
                client_email: &email,
                windows: &windows,
                invocations: &[],
                prior_memory: None,
            })
            .await
            .expect_err("unavailable");

        assert!(matches!(error, AnalyzerError::Unavailable { attempts: 3, .. }));
        assert_eq!(harness.llm.call_count(), 3);
        assert!(harness.analytics.find_by_call(&call_id).await.expect("find").is_none());
        assert!(harness.memory.read_current(&email).await.expect("read").is_none());
    }

    struct UnwritableMemory;

    #[async_trait]
    impl MemoryRepository for UnwritableMemory {
        async fn read_current(
            &self,
            _client_email: &ClientEmail,
        ) -> Result<Option<MemoryRecord>, RepositoryError> {
            Ok(None)
        }

        async fn write_new(&self, _record: &MemoryRecord) -> Result<(), RepositoryError> {
            Err(RepositoryError::Decode("memory store is read-only".to_string()))
        }

        async fn history(
            &self,
            _client_email: &ClientEmail,
            _limit: u32,
        ) -> Result<Vec<MemoryRecord>, RepositoryError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn failed_memory_append_surfaces_and_retry_repairs_analytics() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            ScriptedReply::Text(valid_reply("password-reset")),
            ScriptedReply::Text(valid_reply("account-unlock")),
        ]));
        let analytics = Arc::new(InMemoryAnalyticsRepository::default());
        let call_id = CallId("call-a".to_string());
        let email = ClientEmail::new("sarah@bigco.com");
        let windows = windows();
        let input = || AnalysisInput {
            call_id: &call_id,
            client_email: &email,
            windows: &windows,
            invocations: &[],
            prior_memory: None,
        };

        let failing = PostCallAnalyzer::new(
            llm.clone(),
            analytics.clone(),
            MemoryManager::new(Arc::new(UnwritableMemory)),
            Duration::from_millis(200),
            0,
        );
        let error = failing.analyze(input()).await.expect_err("memory append fails");
        assert!(matches!(error, AnalyzerError::Repository(RepositoryError::Decode(_))));

        let memory = Arc::new(InMemoryMemoryRepository::default());
        let healthy = PostCallAnalyzer::new(
            llm.clone(),
            analytics.clone(),
            MemoryManager::new(memory.clone()),
            Duration::from_millis(200),
            0,
        );
        healthy.analyze(input()).await.expect("retry succeeds");

        let stored = analytics.find_by_call(&call_id).await.expect("find").expect("analytics row");
        assert_eq!(stored.analytics.issue_resolution.category, "account-unlock");
        assert_eq!(memory.history(&email, 10).await.expect("history").len(), 1);
    }
}
