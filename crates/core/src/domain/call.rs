use std::fmt;

use serde::{Deserialize, Serialize};

use crate::fingerprint::sha256_hex;

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CallId(pub String);

impl CallId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Customer identity used to correlate memory across calls.
///
/// Stored trimmed and lower-cased so `Sarah@BigCo.com` and `sarah@bigco.com`
/// share one memory history.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct ClientEmail(String);

impl ClientEmail {
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for ClientEmail {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<ClientEmail> for String {
    fn from(value: ClientEmail) -> Self {
        value.0
    }
}

impl fmt::Display for ClientEmail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    #[serde(alias = "customer support", alias = "customer_support", alias = "Agent")]
    Agent,
    #[serde(alias = "client", alias = "Customer", alias = "Client")]
    Customer,
}

impl Speaker {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Agent => "agent",
            Self::Customer => "customer",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub speaker: Speaker,
    pub transcript: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

/// One batch of turns submitted for incremental analysis. Immutable once stored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub call_id: CallId,
    pub window_number: u32,
    pub client_email: ClientEmail,
    pub turns: Vec<Turn>,
}

impl Window {
    /// Identity of the window's content, used to tell an idempotent
    /// re-submission apart from a conflicting one.
    pub fn content_hash(&self) -> String {
        let encoded = serde_json::to_string(&self.turns).unwrap_or_default();
        sha256_hex(encoded.as_bytes())
    }
}

/// Restores conversational order regardless of arrival order.
pub fn order_windows<T, F>(windows: &mut [T], window_number: F)
where
    F: Fn(&T) -> u32,
{
    windows.sort_by_key(|window| window_number(window));
}
