//! Typed boundary for the live model's decision.
//!
//! The model answers with `{"tips": [...], "toolCalls": [...]}`. Anything
//! that is not a JSON object of that shape is [`DecisionError::Malformed`];
//! individual bad candidates inside a well-formed answer are dropped and
//! reported in [`Decision::repairs`].

use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

use callsight_core::domain::analytics::extract_json_object;
use callsight_core::domain::tip::{AiTip, TipTag};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DecisionError {
    #[error("malformed model decision: {0}")]
    Malformed(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct ToolCallCandidate {
    pub name: String,
    pub input: Value,
}

/// One thing the model asked for.
#[derive(Clone, Debug, PartialEq)]
pub enum Candidate {
    Tip(AiTip),
    Tool(ToolCallCandidate),
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Decision {
    pub candidates: Vec<Candidate>,
    pub repairs: Vec<String>,
}

impl Decision {
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn tip_count(&self) -> usize {
        self.candidates.iter().filter(|candidate| matches!(candidate, Candidate::Tip(_))).count()
    }

    pub fn tool_count(&self) -> usize {
        self.candidates.len() - self.tip_count()
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireDecision {
    #[serde(default, alias = "aiTips")]
    tips: Vec<WireTip>,
    #[serde(default, alias = "tool_calls", alias = "tools")]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Deserialize)]
struct WireTip {
    #[serde(default)]
    tag: String,
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct WireToolCall {
    #[serde(default, alias = "tool")]
    name: String,
    #[serde(default, alias = "arguments", alias = "args")]
    input: Value,
}

/// Parses and repairs a raw model reply. `is_registered` decides which tool
/// names survive.
pub fn parse_decision<F>(raw: &str, is_registered: F) -> Result<Decision, DecisionError>
where
    F: Fn(&str) -> bool,
{
    let body = extract_json_object(raw)
        .ok_or_else(|| DecisionError::Malformed("reply contains no JSON object".to_string()))?;
    let wire: WireDecision = serde_json::from_str(body)
        .map_err(|error| DecisionError::Malformed(error.to_string()))?;

    let mut decision = Decision::default();

    for tip in wire.tips {
        let Some(tag) = TipTag::parse(&tip.tag) else {
            decision.repairs.push(format!("dropped tip with unknown tag `{}`", tip.tag));
            continue;
        };
        let content = first_sentence(&tip.content);
        if content.is_empty() {
            decision.repairs.push("dropped tip with empty content".to_string());
            continue;
        }
        decision.candidates.push(Candidate::Tip(AiTip::new(tag, content)));
    }

    for call in wire.tool_calls {
        let name = call.name.trim();
        if !is_registered(name) {
            decision.repairs.push(format!("dropped call to unregistered tool `{name}`"));
            continue;
        }
        let input = match call.input {
            Value::Object(map) => Value::Object(map),
            Value::Null => Value::Object(Map::new()),
            // Some models double-encode arguments as a JSON string.
            Value::String(text) => match serde_json::from_str::<Value>(&text) {
                Ok(Value::Object(map)) => Value::Object(map),
                _ => {
                    decision.repairs.push(format!("dropped `{name}` call with non-object input"));
                    continue;
                }
            },
            _ => {
                decision.repairs.push(format!("dropped `{name}` call with non-object input"));
                continue;
            }
        };
        decision
            .candidates
            .push(Candidate::Tool(ToolCallCandidate { name: name.to_string(), input }));
    }

    Ok(decision)
}

/// Tips are single sentences; anything after the first sentence end is cut.
pub fn first_sentence(text: &str) -> String {
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut chars = text.char_indices().peekable();
    while let Some((index, ch)) = chars.next() {
        if matches!(ch, '.' | '!' | '?') {
            if let Some((_, ' ')) = chars.peek() {
                return text[..index + ch.len_utf8()].to_string();
            }
        }
    }
    text
}
