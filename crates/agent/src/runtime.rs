//! The call engine: live windows and the post-call pass for every call.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use callsight_core::config::AppConfig;
use callsight_core::domain::analytics::AnalyticsResult;
use callsight_core::domain::call::{order_windows, CallId, ClientEmail, Turn, Window};
use callsight_core::domain::memory::MemoryRecord;
use callsight_core::domain::state::{CallPhase, EngineState};
use callsight_core::domain::tip::AiTip;
use callsight_core::domain::tool::{ActivityEntry, ToolInvocation};
use callsight_core::errors::{ApplicationError, DomainError};
use callsight_core::fingerprint::{Fingerprint, FingerprintMode};
use callsight_db::{
    AnalyticsRepository, AppendOutcome, MemoryRepository, RepositoryError, StoredWindow, WindowStore,
};

use crate::analyzer::{AnalysisInput, AnalyzerError, PostCallAnalyzer};
use crate::decision::{parse_decision, Decision};
use crate::guardrails::{GuardrailPolicy, WindowPlan};
use crate::llm::{LlmClient, LlmError};
use crate::locks::CallLocks;
use crate::memory::MemoryManager;
use crate::prompt;
use crate::tools::ToolRegistry;

/// One request from the entry point: a live window, or the `final` signal.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct CallRequest {
    pub call_id: String,
    #[serde(default)]
    pub window_number: Option<u32>,
    #[serde(default)]
    pub client_email: Option<String>,
    #[serde(default)]
    pub turns: Vec<Turn>,
    #[serde(default, rename = "final", alias = "is_final")]
    pub is_final: bool,
}

/// Tips and activity produced for one window only.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowResponse {
    pub ai_tips: Vec<AiTip>,
    pub activity_feed: Vec<ActivityEntry>,
    /// The model could not be used; the window was stored without guidance.
    pub degraded: bool,
    /// The window was already stored; this is the stored response.
    pub replayed: bool,
}

impl WindowResponse {
    fn replay(stored: StoredWindow) -> Self {
        Self { ai_tips: stored.tips, activity_feed: stored.activity, degraded: false, replayed: true }
    }

    fn degraded() -> Self {
        Self { degraded: true, ..Self::default() }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowPayload {
    pub window_number: u32,
    pub turns: Vec<Turn>,
    pub ai_tips: Vec<AiTip>,
    pub activity_feed: Vec<ActivityEntry>,
}

impl From<&StoredWindow> for WindowPayload {
    fn from(stored: &StoredWindow) -> Self {
        Self {
            window_number: stored.window.window_number,
            turns: stored.window.turns.clone(),
            ai_tips: stored.tips.clone(),
            activity_feed: stored.activity.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostCallResponse {
    pub call_id: CallId,
    pub client_email: ClientEmail,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub analytics: AnalyticsResult,
    pub windows: Vec<WindowPayload>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CallResponse {
    Window(WindowResponse),
    PostCall(Box<PostCallResponse>),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("call {0} is closed")]
    CallClosed(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("post-call analysis unavailable: {0}")]
    AnalysisUnavailable(String),
    #[error("engine state for call {call_id} kept changing; gave up after {attempts} attempts")]
    StateContention { call_id: String, attempts: u32 },
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl From<AnalyzerError> for EngineError {
    fn from(value: AnalyzerError) -> Self {
        match value {
            error @ AnalyzerError::Unavailable { .. } => Self::AnalysisUnavailable(error.to_string()),
            AnalyzerError::Repository(error) => Self::Repository(error),
        }
    }
}

impl From<EngineError> for ApplicationError {
    fn from(value: EngineError) -> Self {
        match value {
            EngineError::CallClosed(call_id) => Self::CallClosed(call_id),
            EngineError::InvalidRequest(message) => Self::InvalidRequest(message),
            EngineError::AnalysisUnavailable(message) => Self::AnalysisUnavailable(message),
            EngineError::Domain(error) => Self::Domain(error),
            error @ (EngineError::StateContention { .. } | EngineError::Repository(_)) => {
                Self::Persistence(error.to_string())
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineSettings {
    /// Hard ceiling for the whole live decision, re-prompts included.
    pub decision_timeout: Duration,
    pub decision_retries: u32,
    pub analysis_timeout: Duration,
    pub analysis_max_retries: u32,
    pub summary_max_chars: usize,
    pub fingerprint_mode: FingerprintMode,
    pub state_conflict_retries: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl EngineSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            decision_timeout: Duration::from_secs(config.llm.timeout_secs),
            decision_retries: config.engine.decision_retries,
            analysis_timeout: Duration::from_secs(config.llm.analysis_timeout_secs),
            analysis_max_retries: config.engine.analysis_max_retries,
            summary_max_chars: config.engine.summary_max_chars,
            fingerprint_mode: config.engine.fingerprint_mode,
            state_conflict_retries: config.engine.state_conflict_retries,
        }
    }
}

enum DegradeReason {
    Timeout,
    Llm(String),
    Malformed(String),
}

impl DegradeReason {
    fn code(&self) -> &'static str {
        match self {
            Self::Timeout => "llm_timeout",
            Self::Llm(_) => "llm_error",
            Self::Malformed(_) => "malformed_output",
        }
    }

    fn detail(&self) -> &str {
        match self {
            Self::Timeout => "",
            Self::Llm(detail) | Self::Malformed(detail) => detail,
        }
    }
}

pub struct CallEngine {
    llm: Arc<dyn LlmClient>,
    store: Arc<dyn WindowStore>,
    registry: Arc<ToolRegistry>,
    memory: MemoryManager,
    analyzer: PostCallAnalyzer,
    guardrails: GuardrailPolicy,
    locks: CallLocks,
    settings: EngineSettings,
}

impl CallEngine {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        store: Arc<dyn WindowStore>,
        memory: Arc<dyn MemoryRepository>,
        analytics: Arc<dyn AnalyticsRepository>,
        registry: Arc<ToolRegistry>,
        settings: EngineSettings,
    ) -> Self {
        let memory = MemoryManager::new(memory);
        let analyzer = PostCallAnalyzer::new(
            llm.clone(),
            analytics,
            memory.clone(),
            settings.analysis_timeout,
            settings.analysis_max_retries,
        );
        Self {
            llm,
            store,
            registry,
            memory,
            analyzer,
            guardrails: GuardrailPolicy::new(settings.fingerprint_mode),
            locks: CallLocks::default(),
            settings,
        }
    }

    pub fn memory(&self) -> &MemoryManager {
        &self.memory
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub async fn handle(&self, request: CallRequest) -> Result<CallResponse, EngineError> {
        let call_id = request.call_id.trim();
        if call_id.is_empty() {
            return Err(EngineError::InvalidRequest("call_id must not be empty".to_string()));
        }
        let call_id = CallId(call_id.to_string());
        let client_email = request.client_email.as_deref().map(ClientEmail::new);

        if request.is_final {
            let response = self
                .finalize(&call_id, client_email, request.window_number, request.turns)
                .await?;
            return Ok(CallResponse::PostCall(Box::new(response)));
        }

        let Some(window_number) = request.window_number else {
            return Err(EngineError::InvalidRequest(
                "window_number is required for live windows".to_string(),
            ));
        };
        if request.turns.is_empty() {
            return Err(EngineError::InvalidRequest("turns must not be empty".to_string()));
        }

        let window = Window {
            call_id,
            window_number,
            client_email: client_email.unwrap_or_else(|| ClientEmail::new("")),
            turns: request.turns,
        };
        self.process_window(window).await.map(CallResponse::Window)
    }

    /// Runs the live loop for one window. Serialized per call.
    pub async fn process_window(&self, window: Window) -> Result<WindowResponse, EngineError> {
        let _guard = self.locks.acquire(&window.call_id).await;

        if let Some(replay) = self.replay_if_stored(&window).await? {
            return Ok(replay);
        }

        let mut state = self.store.load_state(&window.call_id).await?;
        if state.phase == CallPhase::Closed {
            return Err(EngineError::CallClosed(window.call_id.0.clone()));
        }
        if state.is_first_window() && state.prior_memory.is_none() {
            state.prior_memory = self.prior_memory_for(&window.client_email, &window.call_id).await;
        }

        let decision = match self.decide(&window, &state).await {
            Ok(decision) => decision,
            Err(reason) => return self.degrade(window, reason).await,
        };
        for repair in &decision.repairs {
            debug!(event_name = "engine.decision.repaired", call_id = %window.call_id, %repair, "candidate dropped");
        }

        let plan = self.guardrails.plan(decision, &state, &self.registry);
        for denied in &plan.denied {
            debug!(
                event_name = "engine.candidate.denied",
                call_id = %window.call_id,
                window_number = window.window_number,
                reason_code = denied.reason_code,
                "candidate suppressed"
            );
        }

        let invocations = self
            .registry
            .execute_window(&window.call_id, window.window_number, plan.tool_calls.clone())
            .await;

        self.commit(window, state, plan, invocations).await
    }

    async fn decide(&self, window: &Window, state: &EngineState) -> Result<Decision, DegradeReason> {
        let deadline = tokio::time::Instant::now() + self.settings.decision_timeout;
        let catalog = self.registry.catalog();
        let mut last_error = String::new();

        for attempt in 0..=self.settings.decision_retries {
            let request = prompt::live_decision(
                window,
                state,
                &catalog,
                self.settings.summary_max_chars,
                attempt > 0,
            );
            let raw = match tokio::time::timeout_at(deadline, self.llm.complete(&request)).await {
                Err(_) => return Err(DegradeReason::Timeout),
                Ok(Err(LlmError::EmptyResponse)) => {
                    warn!(
                        event_name = "engine.decision.malformed",
                        call_id = %window.call_id,
                        window_number = window.window_number,
                        attempt,
                        error = %LlmError::EmptyResponse,
                        "model returned an empty decision"
                    );
                    last_error = LlmError::EmptyResponse.to_string();
                    continue;
                }
                Ok(Err(error)) => return Err(DegradeReason::Llm(error.to_string())),
                Ok(Ok(raw)) => raw,
            };

            match parse_decision(&raw, |name| self.registry.class_of(name).is_some()) {
                Ok(decision) => return Ok(decision),
                Err(error) => {
                    warn!(
                        event_name = "engine.decision.malformed",
                        call_id = %window.call_id,
                        window_number = window.window_number,
                        attempt,
                        %error,
                        "model decision could not be parsed"
                    );
                    last_error = error.to_string();
                }
            }
        }

        Err(DegradeReason::Malformed(last_error))
    }

    /// Stores the window without guidance and leaves engine state untouched.
    async fn degrade(&self, window: Window, reason: DegradeReason) -> Result<WindowResponse, EngineError> {
        warn!(
            event_name = "engine.window.degraded",
            call_id = %window.call_id,
            window_number = window.window_number,
            reason = reason.code(),
            detail = reason.detail(),
            "answering window without guidance"
        );

        let stored = StoredWindow::bare(window, Utc::now());
        match self.store.append_window(&stored).await {
            Ok(AppendOutcome::Inserted) => Ok(WindowResponse::degraded()),
            Ok(AppendOutcome::AlreadyPresent(existing)) => Ok(WindowResponse::replay(existing)),
            Err(RepositoryError::DuplicateWindow { .. }) => {
                self.replay_if_stored(&stored.window).await?.ok_or_else(|| {
                    EngineError::InvalidRequest("window vanished while degrading".to_string())
                })
            }
            Err(error) => Err(error.into()),
        }
    }

    async fn commit(
        &self,
        window: Window,
        mut state: EngineState,
        plan: WindowPlan,
        invocations: Vec<ToolInvocation>,
    ) -> Result<WindowResponse, EngineError> {
        let tip_fingerprints: Vec<Fingerprint> = plan.tip_fingerprints().collect();
        let tips: Vec<AiTip> = plan.tips.into_iter().map(|(tip, _)| tip).collect();
        let activity: Vec<ActivityEntry> = invocations.iter().map(ToolInvocation::activity_entry).collect();
        let stored = StoredWindow::with_response(window, tips.clone(), activity.clone(), Utc::now());
        let call_id = stored.window.call_id.clone();
        let attempts = self.settings.state_conflict_retries.saturating_add(1);

        for attempt in 1..=attempts {
            let mut next = state.clone();
            next.record_window(
                &stored.window,
                tip_fingerprints.iter().cloned(),
                &invocations,
                self.settings.summary_max_chars,
            )?;

            match self.store.commit_window(&stored, &next).await {
                Ok(version) => {
                    info!(
                        event_name = "engine.window.committed",
                        call_id = %call_id,
                        window_number = stored.window.window_number,
                        tips = tips.len(),
                        tools = invocations.len(),
                        state_version = version,
                        "window applied"
                    );
                    return Ok(WindowResponse { ai_tips: tips, activity_feed: activity, degraded: false, replayed: false });
                }
                Err(RepositoryError::Conflict { expected_version, .. }) => {
                    if let Some(replay) = self.replay_if_stored(&stored.window).await? {
                        return Ok(replay);
                    }
                    warn!(
                        event_name = "engine.state.conflict",
                        call_id = %call_id,
                        expected_version,
                        attempt,
                        "engine state changed concurrently; reloading"
                    );
                    let prior_memory = state.prior_memory.take();
                    state = self.store.load_state(&call_id).await?;
                    if state.phase == CallPhase::Closed {
                        return Err(EngineError::CallClosed(call_id.0));
                    }
                    if state.prior_memory.is_none() {
                        state.prior_memory = prior_memory;
                    }
                }
                Err(RepositoryError::DuplicateWindow { .. }) => {
                    if let Some(replay) = self.replay_if_stored(&stored.window).await? {
                        return Ok(replay);
                    }
                }
                Err(error) => return Err(error.into()),
            }
        }

        Err(EngineError::StateContention { call_id: call_id.0, attempts })
    }

    async fn replay_if_stored(&self, window: &Window) -> Result<Option<WindowResponse>, EngineError> {
        let Some(stored) = self.store.find_window(&window.call_id, window.window_number).await? else {
            return Ok(None);
        };

        if stored.content_hash == window.content_hash() {
            info!(
                event_name = "engine.window.replayed",
                call_id = %window.call_id,
                window_number = window.window_number,
                "identical window re-submitted; returning stored response"
            );
        } else {
            warn!(
                event_name = "engine.window.duplicate",
                call_id = %window.call_id,
                window_number = window.window_number,
                "window number already stored with different content; treating as applied"
            );
        }
        Ok(Some(WindowResponse::replay(stored)))
    }

    /// Memory from an earlier call. A failed read only loses personalisation.
    async fn prior_memory_for(&self, client_email: &ClientEmail, call_id: &CallId) -> Option<MemoryRecord> {
        if client_email.is_empty() {
            return None;
        }
        match self.memory.history(client_email, 5).await {
            Ok(history) => history
                .into_iter()
                .find(|record| record.call_id.as_ref() != Some(call_id)),
            Err(error) => {
                warn!(
                    event_name = "engine.memory.read_failed",
                    call_id = %call_id,
                    %error,
                    "continuing without prior memory"
                );
                None
            }
        }
    }

    /// Trailing turns without a number go after the last stored window,
    /// unless that window already holds the same turns from an earlier
    /// attempt at this final request.
    async fn store_final_turns(
        &self,
        call_id: &CallId,
        client_email: Option<ClientEmail>,
        window_number: Option<u32>,
        turns: Vec<Turn>,
    ) -> Result<(), EngineError> {
        let mut window = Window {
            call_id: call_id.clone(),
            window_number: window_number.unwrap_or(1),
            client_email: client_email.unwrap_or_else(|| ClientEmail::new("")),
            turns,
        };

        if window_number.is_none() {
            let last = self
                .store
                .load_windows(call_id)
                .await?
                .into_iter()
                .max_by_key(|stored| stored.window.window_number);
            if let Some(last) = last {
                if last.content_hash == window.content_hash() {
                    info!(
                        event_name = "engine.window.replayed",
                        call_id = %call_id,
                        window_number = last.window.window_number,
                        "final turns already stored by an earlier attempt"
                    );
                    return Ok(());
                }
                window.window_number = last.window.window_number + 1;
            }
        }

        match self.store.append_window(&StoredWindow::bare(window, Utc::now())).await {
            Ok(_) => Ok(()),
            Err(RepositoryError::DuplicateWindow { window_number, .. }) => {
                warn!(
                    event_name = "engine.window.duplicate",
                    call_id = %call_id,
                    window_number,
                    "final turns conflict with a stored window; keeping the stored one"
                );
                Ok(())
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Stores trailing turns, runs the post-call analyzer and closes the call.
    pub async fn finalize(
        &self,
        call_id: &CallId,
        client_email: Option<ClientEmail>,
        window_number: Option<u32>,
        turns: Vec<Turn>,
    ) -> Result<PostCallResponse, EngineError> {
        let _guard = self.locks.acquire(call_id).await;
        let mut state = self.store.load_state(call_id).await?;
        let requested_email = client_email.filter(|email| !email.is_empty());

        if !turns.is_empty() {
            self.store_final_turns(call_id, requested_email.clone(), window_number, turns).await?;
        }

        let mut windows = self.store.load_windows(call_id).await?;
        order_windows(&mut windows, |stored| stored.window.window_number);
        if windows.is_empty() {
            return Err(EngineError::InvalidRequest(format!("call {call_id} has no windows to analyse")));
        }

        let client_email = requested_email
            .or_else(|| state.client_email.clone())
            .or_else(|| {
                windows
                    .iter()
                    .map(|stored| stored.window.client_email.clone())
                    .find(|email| !email.is_empty())
            })
            .ok_or_else(|| {
                EngineError::InvalidRequest("client_email is required for post-call analysis".to_string())
            })?;

        let prior_memory = match state.prior_memory.clone() {
            Some(record) => Some(record),
            None => self.prior_memory_for(&client_email, call_id).await,
        };

        let outcome = self
            .analyzer
            .analyze(AnalysisInput {
                call_id,
                client_email: &client_email,
                windows: &windows,
                invocations: &state.invocations,
                prior_memory: prior_memory.as_ref(),
            })
            .await?;

        let attempts = self.settings.state_conflict_retries.saturating_add(1);
        let mut closed = false;
        for attempt in 1..=attempts {
            let mut next = state.clone();
            next.close()?;
            next.client_email.get_or_insert_with(|| client_email.clone());
            match self.store.save_state(&next).await {
                Ok(_) => {
                    closed = true;
                    break;
                }
                Err(RepositoryError::Conflict { .. }) => {
                    warn!(event_name = "engine.state.conflict", call_id = %call_id, attempt, "reloading state before close");
                    state = self.store.load_state(call_id).await?;
                }
                Err(error) => return Err(error.into()),
            }
        }
        if !closed {
            return Err(EngineError::StateContention { call_id: call_id.0.clone(), attempts });
        }

        info!(
            event_name = "engine.call.closed",
            call_id = %call_id,
            windows = windows.len(),
            analysis_attempts = outcome.attempts,
            "call analysed and closed"
        );

        Ok(PostCallResponse {
            call_id: call_id.clone(),
            client_email,
            created_at: outcome.record.created_at,
            analytics: outcome.record.analytics,
            windows: windows.iter().map(WindowPayload::from).collect(),
        })
    }
}
