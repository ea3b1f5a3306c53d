pub mod config;
pub mod domain;
pub mod errors;
pub mod fingerprint;

pub use domain::analytics::{AnalyticsRecord, AnalyticsResult, SchemaViolation};
pub use domain::call::{order_windows, CallId, ClientEmail, Speaker, Turn, Window};
pub use domain::memory::{MemoryBox, MemoryRecord};
pub use domain::state::{CallEvent, CallPhase, EngineState};
pub use domain::tip::{AiTip, TipTag};
pub use domain::tool::{ActivityEntry, ToolClass, ToolError, ToolInvocation, ToolStatus};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use fingerprint::{tip_fingerprint, tool_fingerprint, Fingerprint, FingerprintMode};
