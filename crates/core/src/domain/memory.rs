use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::call::{CallId, ClientEmail};

/// Coaching payload the post-call pass hands to the next call.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryBox {
    pub deliverables: Vec<String>,
    pub improvement_areas: Vec<String>,
}

/// One entry of a customer's append-only memory history.
///
/// The authoritative record is whichever entry has the greatest `created_at`;
/// older entries are history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryRecord {
    pub id: String,
    pub client_email: ClientEmail,
    pub call_id: Option<CallId>,
    pub deliverables: Vec<String>,
    pub improvement_areas: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl MemoryRecord {
    pub fn from_box(
        client_email: ClientEmail,
        call_id: Option<CallId>,
        memory: MemoryBox,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            client_email,
            call_id,
            deliverables: memory.deliverables,
            improvement_areas: memory.improvement_areas,
            created_at,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.deliverables.is_empty() && self.improvement_areas.is_empty()
    }
}
