//! Post-call analytics schema.
//!
//! Model output crosses into the system through [`AnalyticsResult::parse`],
//! which decodes and then checks every bounded field. Nothing downstream sees
//! an unvalidated result.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::call::{CallId, ClientEmail};
use crate::domain::memory::MemoryBox;

pub const MAX_KEY_INSIGHTS: usize = 3;
pub const MAX_ACTION_ITEMS: usize = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SentimentLabel {
    Positive,
    Neutral,
    Negative,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SatisfactionPrediction {
    Satisfied,
    Neutral,
    Dissatisfied,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sentiment {
    pub score: i64,
    pub label: SentimentLabel,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Satisfaction {
    pub score: i64,
    pub prediction: SatisfactionPrediction,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Emotion {
    pub emotion: String,
    pub intensity: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallMetrics {
    /// `MM:SS`
    pub duration: String,
    pub agent_talk_time: i64,
    pub customer_talk_time: i64,
    pub hold_time: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueResolution {
    pub resolved: bool,
    pub category: String,
    pub resolution_time_minutes: i64,
    pub escalation_risk: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentPerformance {
    pub professionalism_score: i64,
    pub empathy_score: i64,
    pub knowledge_score: i64,
    pub avg_response_latency_seconds: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsResult {
    pub sentiment: Sentiment,
    pub satisfaction: Satisfaction,
    pub emotions: Vec<Emotion>,
    pub call_metrics: CallMetrics,
    pub issue_resolution: IssueResolution,
    pub agent_performance: AgentPerformance,
    pub key_insights: Vec<String>,
    pub action_items: Vec<String>,
    pub tags: Vec<String>,
    pub memory: MemoryBox,
}

/// A persisted analytics row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsRecord {
    pub call_id: CallId,
    pub client_email: ClientEmail,
    pub created_at: DateTime<Utc>,
    pub analytics: AnalyticsResult,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaViolation {
    pub path: String,
    pub message: String,
}

impl SchemaViolation {
    fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self { path: path.into(), message: message.into() }
    }
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

impl AnalyticsResult {
    /// Decodes a model response and validates it against the schema.
    ///
    /// Accepts a bare JSON object or one wrapped in prose / a fenced block.
    pub fn parse(raw: &str) -> Result<Self, Vec<SchemaViolation>> {
        let Some(body) = extract_json_object(raw) else {
            return Err(vec![SchemaViolation::new("$", "response contains no JSON object")]);
        };

        let decoded: Self = serde_json::from_str(body)
            .map_err(|error| vec![SchemaViolation::new("$", error.to_string())])?;

        let violations = decoded.violations();
        if violations.is_empty() {
            Ok(decoded)
        } else {
            Err(violations)
        }
    }

    pub fn violations(&self) -> Vec<SchemaViolation> {
        let mut out = Vec::new();

        percent(&mut out, "sentiment.score", self.sentiment.score);
        percent(&mut out, "satisfaction.score", self.satisfaction.score);

        for (index, emotion) in self.emotions.iter().enumerate() {
            if emotion.emotion.trim().is_empty() {
                out.push(SchemaViolation::new(format!("emotions[{index}].emotion"), "is empty"));
            }
            percent(&mut out, &format!("emotions[{index}].intensity"), emotion.intensity);
        }

        if !is_mm_ss(&self.call_metrics.duration) {
            out.push(SchemaViolation::new("callMetrics.duration", "must be MM:SS"));
        }
        percent(&mut out, "callMetrics.agentTalkTime", self.call_metrics.agent_talk_time);
        percent(&mut out, "callMetrics.customerTalkTime", self.call_metrics.customer_talk_time);
        percent(&mut out, "callMetrics.holdTime", self.call_metrics.hold_time);
        let talk_total = self
            .call_metrics
            .agent_talk_time
            .checked_add(self.call_metrics.customer_talk_time)
            .and_then(|sum| sum.checked_add(self.call_metrics.hold_time));
        match talk_total {
            Some(total) if total <= 100 => {}
            Some(total) => out.push(SchemaViolation::new(
                "callMetrics",
                format!("talk and hold percentages sum to {total}, above 100"),
            )),
            None => out.push(SchemaViolation::new(
                "callMetrics",
                "talk and hold percentages overflow when summed",
            )),
        }

        if self.issue_resolution.category.trim().is_empty() {
            out.push(SchemaViolation::new("issueResolution.category", "is empty"));
        }
        non_negative(
            &mut out,
            "issueResolution.resolutionTimeMinutes",
            self.issue_resolution.resolution_time_minutes,
        );
        percent(&mut out, "issueResolution.escalationRisk", self.issue_resolution.escalation_risk);

        percent(
            &mut out,
            "agentPerformance.professionalismScore",
            self.agent_performance.professionalism_score,
        );
        percent(&mut out, "agentPerformance.empathyScore", self.agent_performance.empathy_score);
        percent(
            &mut out,
            "agentPerformance.knowledgeScore",
            self.agent_performance.knowledge_score,
        );
        non_negative(
            &mut out,
            "agentPerformance.avgResponseLatencySeconds",
            self.agent_performance.avg_response_latency_seconds,
        );

        if self.key_insights.is_empty() || self.key_insights.len() > MAX_KEY_INSIGHTS {
            out.push(SchemaViolation::new(
                "keyInsights",
                format!("must hold 1..={MAX_KEY_INSIGHTS} entries"),
            ));
        }
        if self.action_items.len() > MAX_ACTION_ITEMS {
            out.push(SchemaViolation::new(
                "actionItems",
                format!("must hold at most {MAX_ACTION_ITEMS} entries"),
            ));
        }
        blank_entries(&mut out, "keyInsights", &self.key_insights);
        blank_entries(&mut out, "actionItems", &self.action_items);
        blank_entries(&mut out, "tags", &self.tags);
        blank_entries(&mut out, "memory.deliverables", &self.memory.deliverables);
        blank_entries(&mut out, "memory.improvementAreas", &self.memory.improvement_areas);

        out
    }
}

/// Slice from the first `{` to the last `}`.
pub fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

fn percent(out: &mut Vec<SchemaViolation>, path: &str, value: i64) {
    if !(0..=100).contains(&value) {
        out.push(SchemaViolation::new(path, format!("{value} is outside 0..=100")));
    }
}

fn non_negative(out: &mut Vec<SchemaViolation>, path: &str, value: i64) {
    if value < 0 {
        out.push(SchemaViolation::new(path, format!("{value} is negative")));
    }
}

fn blank_entries(out: &mut Vec<SchemaViolation>, path: &str, values: &[String]) {
    for (index, value) in values.iter().enumerate() {
        if value.trim().is_empty() {
            out.push(SchemaViolation::new(format!("{path}[{index}]"), "is empty"));
        }
    }
}

fn is_mm_ss(value: &str) -> bool {
    let Some((minutes, seconds)) = value.split_once(':') else {
        return false;
    };
    !minutes.is_empty()
        && minutes.chars().all(|ch| ch.is_ascii_digit())
        && seconds.len() == 2
        && seconds.parse::<u8>().map(|secs| secs < 60).unwrap_or(false)
}

#[cfg(test)]
pub(crate) mod tests {
    use serde_json::{json, Value};

    use super::{AnalyticsResult, SentimentLabel};

    pub(crate) fn sample_payload() -> Value {
        json!({
            "sentiment": {"score": 78, "label": "Positive"},
            "satisfaction": {"score": 82, "prediction": "Satisfied"},
            "emotions": [{"emotion": "relief", "intensity": 70}],
            "callMetrics": {"duration": "06:42", "agentTalkTime": 55, "customerTalkTime": 40, "holdTime": 5},
            "issueResolution": {"resolved": true, "category": "password-reset", "resolutionTimeMinutes": 5, "escalationRisk": 10},
            "agentPerformance": {"professionalismScore": 90, "empathyScore": 85, "knowledgeScore": 88, "avgResponseLatencySeconds": 3},
            "keyInsights": ["Customer was locked out after a password change"],
            "actionItems": ["Confirm the customer can log in tomorrow"],
            "tags": ["password-reset", "login"],
            "memory": {"deliverables": ["Sent password reset link"], "improvementAreas": ["Verify identity earlier"]}
        })
    }

    #[test]
    fn valid_payload_parses_even_inside_a_fenced_block() {
        let raw = format!("Here you go:\n```json\n{}\n```", sample_payload());
        let parsed = AnalyticsResult::parse(&raw).expect("valid analytics");
        assert_eq!(parsed.sentiment.label, SentimentLabel::Positive);
        assert_eq!(parsed.issue_resolution.category, "password-reset");
        assert_eq!(parsed.memory.deliverables, vec!["Sent password reset link".to_string()]);
    }

    #[test]
    fn out_of_range_fields_are_reported_by_path() {
        let mut payload = sample_payload();
        payload["sentiment"]["score"] = json!(140);
        payload["callMetrics"]["duration"] = json!("6 minutes");
        payload["issueResolution"]["escalationRisk"] = json!(-3);

        let violations = AnalyticsResult::parse(&payload.to_string()).expect_err("invalid");
        let paths: Vec<&str> = violations.iter().map(|v| v.path.as_str()).collect();
        assert!(paths.contains(&"sentiment.score"));
        assert!(paths.contains(&"callMetrics.duration"));
        assert!(paths.contains(&"issueResolution.escalationRisk"));
    }

    #[test]
    fn missing_fields_and_unknown_labels_fail_decoding() {
        let mut payload = sample_payload();
        payload.as_object_mut().map(|object| object.remove("memory"));
        assert!(AnalyticsResult::parse(&payload.to_string()).is_err());

        let mut payload = sample_payload();
        payload["sentiment"]["label"] = json!("Ecstatic");
        assert!(AnalyticsResult::parse(&payload.to_string()).is_err());
    }

    #[test]
    fn talk_time_split_cannot_exceed_whole_call() {
        let mut payload = sample_payload();
        payload["callMetrics"]["agentTalkTime"] = json!(70);
        payload["callMetrics"]["customerTalkTime"] = json!(50);
        let violations = AnalyticsResult::parse(&payload.to_string()).expect_err("invalid");
        assert!(violations.iter().any(|v| v.path == "callMetrics"));
    }

    #[test]
    fn extreme_talk_times_are_violations_not_overflow() {
        let mut payload = sample_payload();
        payload["callMetrics"]["agentTalkTime"] = json!(i64::MAX);
        payload["callMetrics"]["customerTalkTime"] = json!(1);
        payload["callMetrics"]["holdTime"] = json!(0);

        let violations = AnalyticsResult::parse(&payload.to_string()).expect_err("invalid");
        assert!(violations.iter().any(|v| v.path == "callMetrics.agentTalkTime"));
        assert!(violations
            .iter()
            .any(|v| v.path == "callMetrics" && v.message.contains("overflow")));
    }

    #[test]
    fn prose_without_json_is_rejected() {
        let violations = AnalyticsResult::parse("I could not analyse this call.").expect_err("no json");
        assert_eq!(violations[0].path, "$");
    }
}
