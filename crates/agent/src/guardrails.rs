use std::collections::BTreeSet;

use callsight_core::domain::state::EngineState;
use callsight_core::domain::tip::AiTip;
use callsight_core::domain::tool::ToolClass;
use callsight_core::fingerprint::{tip_fingerprint, tool_fingerprint, Fingerprint, FingerprintMode};

use crate::decision::{Candidate, Decision};
use crate::tools::{PlannedToolCall, ToolRegistry};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardrailDecision {
    Allow,
    Deny { reason_code: &'static str },
}

#[derive(Clone, Debug, PartialEq)]
pub struct DeniedCandidate {
    pub candidate: Candidate,
    pub reason_code: &'static str,
}

/// What the loop will actually do for one window.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WindowPlan {
    pub tips: Vec<(AiTip, Fingerprint)>,
    pub tool_calls: Vec<PlannedToolCall>,
    pub denied: Vec<DeniedCandidate>,
}

impl WindowPlan {
    pub fn tip_fingerprints(&self) -> impl Iterator<Item = Fingerprint> + '_ {
        self.tips.iter().map(|(_, fingerprint)| fingerprint.clone())
    }
}

/// Duplicate suppression across and within windows.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GuardrailPolicy {
    pub fingerprint_mode: FingerprintMode,
}

impl GuardrailPolicy {
    pub fn new(fingerprint_mode: FingerprintMode) -> Self {
        Self { fingerprint_mode }
    }

    pub fn fingerprint(&self, candidate: &Candidate) -> Fingerprint {
        match candidate {
            Candidate::Tip(tip) => tip_fingerprint(self.fingerprint_mode, tip.tag, &tip.content),
            Candidate::Tool(call) => tool_fingerprint(self.fingerprint_mode, &call.name, &call.input),
        }
    }

    /// `class` is `None` when the tool is not registered.
    pub fn evaluate(
        &self,
        candidate: &Candidate,
        fingerprint: &Fingerprint,
        class: Option<ToolClass>,
        state: &EngineState,
        seen_in_window: &BTreeSet<Fingerprint>,
    ) -> GuardrailDecision {
        match candidate {
            Candidate::Tip(_) if state.has_issued_tip(fingerprint) => {
                GuardrailDecision::Deny { reason_code: "tip_already_issued" }
            }
            Candidate::Tool(_) => match class {
                None => GuardrailDecision::Deny { reason_code: "tool_not_registered" },
                Some(ToolClass::Mutation) if state.has_executed_tool(fingerprint) => {
                    GuardrailDecision::Deny { reason_code: "mutation_already_executed" }
                }
                Some(_) if seen_in_window.contains(fingerprint) => {
                    GuardrailDecision::Deny { reason_code: "duplicate_in_window" }
                }
                Some(_) => GuardrailDecision::Allow,
            },
            Candidate::Tip(_) if seen_in_window.contains(fingerprint) => {
                GuardrailDecision::Deny { reason_code: "duplicate_in_window" }
            }
            Candidate::Tip(_) => GuardrailDecision::Allow,
        }
    }

    pub fn plan(&self, decision: Decision, state: &EngineState, registry: &ToolRegistry) -> WindowPlan {
        let mut plan = WindowPlan::default();
        let mut seen_in_window = BTreeSet::new();

        for candidate in decision.candidates {
            let fingerprint = self.fingerprint(&candidate);
            let class = match &candidate {
                Candidate::Tool(call) => registry.class_of(&call.name),
                Candidate::Tip(_) => None,
            };

            match self.evaluate(&candidate, &fingerprint, class, state, &seen_in_window) {
                GuardrailDecision::Deny { reason_code } => {
                    plan.denied.push(DeniedCandidate { candidate, reason_code });
                }
                GuardrailDecision::Allow => {
                    seen_in_window.insert(fingerprint.clone());
                    match (candidate, class) {
                        (Candidate::Tip(tip), _) => plan.tips.push((tip, fingerprint)),
                        (Candidate::Tool(call), Some(class)) => {
                            plan.tool_calls.push(PlannedToolCall {
                                name: call.name,
                                class,
                                input: call.input,
                                fingerprint,
                            });
                        }
                        (Candidate::Tool(_), None) => {}
                    }
                }
            }
        }

        plan
    }
}
