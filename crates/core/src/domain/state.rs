use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::domain::call::{CallId, ClientEmail, Window};
use crate::domain::memory::MemoryRecord;
use crate::domain::tool::ToolInvocation;
use crate::errors::DomainError;
use crate::fingerprint::Fingerprint;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallPhase {
    #[default]
    AwaitingFirstWindow,
    Active,
    Closed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallEvent {
    WindowAccepted,
    AnalysisCompleted,
}

impl CallPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AwaitingFirstWindow => "awaiting_first_window",
            Self::Active => "active",
            Self::Closed => "closed",
        }
    }

    pub fn apply(self, event: CallEvent) -> Result<CallPhase, DomainError> {
        match (self, event) {
            (Self::AwaitingFirstWindow | Self::Active, CallEvent::WindowAccepted) => {
                Ok(Self::Active)
            }
            (_, CallEvent::AnalysisCompleted) => Ok(Self::Closed),
            (Self::Closed, CallEvent::WindowAccepted) => {
                Err(DomainError::InvalidPhaseTransition { from: self, event })
            }
        }
    }
}

/// Everything the live loop remembers between windows of one call.
///
/// `version` is the storage version the state was loaded at; it is the
/// precondition for the next conditional save and is managed by the store.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineState {
    pub call_id: CallId,
    pub client_email: Option<ClientEmail>,
    pub phase: CallPhase,
    pub issued_tips: BTreeSet<Fingerprint>,
    pub executed_tools: BTreeSet<Fingerprint>,
    pub invocations: Vec<ToolInvocation>,
    pub rolling_summary: String,
    pub prior_memory: Option<MemoryRecord>,
    pub windows_applied: u32,
    #[serde(skip)]
    pub version: u64,
}

impl EngineState {
    pub fn new(call_id: CallId) -> Self {
        Self { call_id, ..Self::default() }
    }

    pub fn is_first_window(&self) -> bool {
        self.phase == CallPhase::AwaitingFirstWindow
    }

    pub fn has_issued_tip(&self, fingerprint: &Fingerprint) -> bool {
        self.issued_tips.contains(fingerprint)
    }

    pub fn has_executed_tool(&self, fingerprint: &Fingerprint) -> bool {
        self.executed_tools.contains(fingerprint)
    }

    /// Folds one window's outcome into the state. The caller persists it.
    pub fn record_window(
        &mut self,
        window: &Window,
        tip_fingerprints: impl IntoIterator<Item = Fingerprint>,
        invocations: &[ToolInvocation],
        summary_max_chars: usize,
    ) -> Result<(), DomainError> {
        self.phase = self.phase.apply(CallEvent::WindowAccepted)?;
        if self.client_email.is_none() && !window.client_email.is_empty() {
            self.client_email = Some(window.client_email.clone());
        }

        self.issued_tips.extend(tip_fingerprints);
        for invocation in invocations {
            if invocation.blocks_reissue() {
                self.executed_tools.insert(invocation.fingerprint.clone());
            }
        }
        self.invocations.extend_from_slice(invocations);
        self.fold_summary(window, summary_max_chars);
        self.windows_applied += 1;
        Ok(())
    }

    pub fn close(&mut self) -> Result<(), DomainError> {
        self.phase = self.phase.apply(CallEvent::AnalysisCompleted)?;
        Ok(())
    }

    /// Appends the window's turns and keeps only the most recent
    /// `max_chars` characters, cut at a line boundary where possible.
    fn fold_summary(&mut self, window: &Window, max_chars: usize) {
        for turn in &window.turns {
            if !self.rolling_summary.is_empty() {
                self.rolling_summary.push('\n');
            }
            self.rolling_summary.push_str(&format!(
                "[w{}] {}: {}",
                window.window_number,
                turn.speaker.as_str(),
                turn.transcript.trim()
            ));
        }

        let total = self.rolling_summary.chars().count();
        if total <= max_chars {
            return;
        }

        let tail: String = self.rolling_summary.chars().skip(total - max_chars).collect();
        self.rolling_summary = match tail.find('\n') {
            Some(index) if index + 1 < tail.len() => tail[index + 1..].to_string(),
            _ => tail,
        };
    }
}
