//! Fingerprints identify tips and tool invocations across the windows of a call.
//!
//! Two candidates with the same fingerprint are treated as the same action.
//! How aggressively text is normalised before hashing is a policy choice
//! ([`FingerprintMode`]), not a fixed algorithm.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::domain::tip::TipTag;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Fingerprint(pub String);

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FingerprintMode {
    /// Byte-exact content; only key order of JSON inputs is canonicalised.
    Exact,
    /// Case, surrounding whitespace, repeated whitespace and (for tips)
    /// punctuation are ignored.
    #[default]
    Normalized,
}

pub fn tip_fingerprint(mode: FingerprintMode, tag: TipTag, content: &str) -> Fingerprint {
    let body = match mode {
        FingerprintMode::Exact => content.to_string(),
        FingerprintMode::Normalized => normalize_prose(content),
    };
    Fingerprint(sha256_hex(format!("tip|{}|{body}", tag.as_str()).as_bytes()))
}

pub fn tool_fingerprint(mode: FingerprintMode, tool_name: &str, input: &Value) -> Fingerprint {
    let canonical = canonical_json(mode, input);
    Fingerprint(sha256_hex(format!("tool|{tool_name}|{canonical}").as_bytes()))
}

/// Lower-cases, trims and collapses runs of whitespace.
pub fn normalize_text(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

fn normalize_prose(value: &str) -> String {
    let stripped: String = value
        .chars()
        .map(|ch| if ch.is_alphanumeric() || ch.is_whitespace() { ch } else { ' ' })
        .collect();
    normalize_text(&stripped)
}

fn canonical_json(mode: FingerprintMode, value: &Value) -> String {
    fn canonicalize(mode: FingerprintMode, value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let sorted: BTreeMap<&String, Value> =
                    map.iter().map(|(key, inner)| (key, canonicalize(mode, inner))).collect();
                Value::Object(sorted.into_iter().map(|(key, inner)| (key.clone(), inner)).collect())
            }
            Value::Array(items) => {
                Value::Array(items.iter().map(|item| canonicalize(mode, item)).collect())
            }
            Value::String(text) if mode == FingerprintMode::Normalized => {
                Value::String(normalize_text(text))
            }
            other => other.clone(),
        }
    }

    canonicalize(mode, value).to_string()
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{normalize_text, tip_fingerprint, tool_fingerprint, FingerprintMode};
    use crate::domain::tip::TipTag;

    #[test]
    fn normalized_tips_ignore_case_spacing_and_punctuation() {
        let first = tip_fingerprint(
            FingerprintMode::Normalized,
            TipTag::Suggestion,
            "Offer a password reset link.",
        );
        let second = tip_fingerprint(
            FingerprintMode::Normalized,
            TipTag::Suggestion,
            "  offer a PASSWORD reset   link ",
        );
        assert_eq!(first, second);
    }

    #[test]
    fn tip_tag_is_part_of_identity() {
        let suggestion =
            tip_fingerprint(FingerprintMode::Normalized, TipTag::Suggestion, "Escalate now");
        let urgent = tip_fingerprint(FingerprintMode::Normalized, TipTag::Urgent, "Escalate now");
        assert_ne!(suggestion, urgent);
    }

    #[test]
    fn exact_mode_keeps_case_differences() {
        let lower = tip_fingerprint(FingerprintMode::Exact, TipTag::Info, "refund policy");
        let upper = tip_fingerprint(FingerprintMode::Exact, TipTag::Info, "Refund policy");
        assert_ne!(lower, upper);
    }

    #[test]
    fn tool_inputs_are_key_order_independent() {
        let first = tool_fingerprint(
            FingerprintMode::Exact,
            "create_support_ticket",
            &json!({"subject": "Login", "description": "Cannot log in", "priority": "HIGH"}),
        );
        let second = tool_fingerprint(
            FingerprintMode::Exact,
            "create_support_ticket",
            &json!({"priority": "HIGH", "subject": "Login", "description": "Cannot log in"}),
        );
        assert_eq!(first, second);
    }

    #[test]
    fn normalized_tool_inputs_ignore_string_case() {
        let first = tool_fingerprint(
            FingerprintMode::Normalized,
            "get_contact_by_email",
            &json!({"email": "Sarah@BigCo.com "}),
        );
        let second = tool_fingerprint(
            FingerprintMode::Normalized,
            "get_contact_by_email",
            &json!({"email": "sarah@bigco.com"}),
        );
        assert_eq!(first, second);

        let other_tool = tool_fingerprint(
            FingerprintMode::Normalized,
            "search_contacts_by_company",
            &json!({"email": "sarah@bigco.com"}),
        );
        assert_ne!(first, other_tool);
    }

    #[test]
    fn normalize_text_collapses_whitespace() {
        assert_eq!(normalize_text("  Hello\n\tWORLD  "), "hello world");
    }
}
