use serde::{Deserialize, Serialize};

/// Urgency bucket the agent UI renders a tip under.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TipTag {
    Urgent,
    Suggestion,
    Info,
}

impl TipTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Urgent => "Urgent",
            Self::Suggestion => "Suggestion",
            Self::Info => "Info",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "urgent" => Some(Self::Urgent),
            "suggestion" => Some(Self::Suggestion),
            "info" => Some(Self::Info),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AiTip {
    pub tag: TipTag,
    pub content: String,
}

impl AiTip {
    pub fn new(tag: TipTag, content: impl Into<String>) -> Self {
        Self { tag, content: content.into() }
    }
}
