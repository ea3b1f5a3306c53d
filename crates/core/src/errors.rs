use thiserror::Error;

use crate::domain::state::{CallEvent, CallPhase};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid call phase transition from {from:?} on {event:?}")]
    InvalidPhaseTransition { from: CallPhase, event: CallEvent },
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("call {0} is closed")]
    CallClosed(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("post-call analysis unavailable: {0}")]
    AnalysisUnavailable(String),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("integration failure: {0}")]
    Integration(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::Conflict { .. } => "The request conflicts with the current state of the call.",
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::Conflict { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::Conflict { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let unassigned = "unassigned".to_owned();
        match value {
            ApplicationError::Domain(DomainError::InvalidPhaseTransition { .. }) => Self::Conflict {
                message: "call phase does not allow this request".to_owned(),
                correlation_id: unassigned,
            },
            ApplicationError::Domain(DomainError::InvariantViolation(_)) => Self::BadRequest {
                message: "domain validation failed".to_owned(),
                correlation_id: unassigned,
            },
            ApplicationError::InvalidRequest(message) => {
                Self::BadRequest { message, correlation_id: unassigned }
            }
            error @ ApplicationError::CallClosed(_) => {
                Self::Conflict { message: error.to_string(), correlation_id: unassigned }
            }
            ApplicationError::AnalysisUnavailable(message)
            | ApplicationError::Persistence(message)
            | ApplicationError::Integration(message) => {
                Self::ServiceUnavailable { message, correlation_id: unassigned }
            }
            ApplicationError::Configuration(message) => {
                Self::Internal { message, correlation_id: unassigned }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::state::{CallEvent, CallPhase};
    use crate::errors::{ApplicationError, DomainError, InterfaceError};

    #[test]
    fn invariant_violation_maps_to_bad_request_with_correlation_id() {
        let interface = ApplicationError::from(DomainError::InvariantViolation(
            "turns must not be empty".to_owned(),
        ))
        .into_interface("call-1");

        assert!(matches!(
            interface,
            InterfaceError::BadRequest {
                ref correlation_id,
                ..
            } if correlation_id == "call-1"
        ));
        assert_eq!(
            interface.user_message(),
            "The request could not be processed. Check inputs and try again."
        );
    }

    #[test]
    fn closed_call_and_phase_errors_map_to_conflict() {
        let closed = ApplicationError::CallClosed("call-2".to_owned()).into_interface("call-2");
        assert!(matches!(closed, InterfaceError::Conflict { .. }));
        assert_eq!(closed.correlation_id(), "call-2");

        let phase = ApplicationError::from(DomainError::InvalidPhaseTransition {
            from: CallPhase::Closed,
            event: CallEvent::WindowAccepted,
        })
        .into_interface("call-2");
        assert!(matches!(phase, InterfaceError::Conflict { .. }));
    }

    #[test]
    fn analysis_unavailable_is_retryable_service_unavailable() {
        let interface = ApplicationError::AnalysisUnavailable("schema invalid after 3 attempts".to_owned())
            .into_interface("call-3");

        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
        assert_eq!(
            interface.user_message(),
            "The service is temporarily unavailable. Please retry shortly."
        );
    }

    #[test]
    fn configuration_error_maps_to_internal() {
        let interface =
            ApplicationError::Configuration("missing llm api key".to_owned()).into_interface("call-4");

        assert!(matches!(interface, InterfaceError::Internal { .. }));
        assert_eq!(interface.user_message(), "An unexpected internal error occurred.");
    }
}
