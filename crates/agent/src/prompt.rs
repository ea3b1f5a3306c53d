//! Prompt assembly for the live loop and the post-call pass.

use serde_json::{json, Value};

use callsight_core::domain::analytics::SchemaViolation;
use callsight_core::domain::call::Window;
use callsight_core::domain::memory::MemoryRecord;
use callsight_core::domain::state::EngineState;
use callsight_core::domain::tool::ToolInvocation;
use callsight_db::StoredWindow;

use crate::llm::CompletionRequest;
use crate::tools::ToolDescriptor;

const LIVE_SYSTEM: &str = "You assist a customer-service agent during a live call. \
Read the newest conversation window and decide what, if anything, the agent needs right now.

Reply with ONE JSON object and nothing else:
{\"tips\": [{\"tag\": \"Urgent\" | \"Suggestion\" | \"Info\", \"content\": \"one sentence\"}],
 \"toolCalls\": [{\"name\": \"<tool name>\", \"input\": {...}}]}

Rules:
- Each tip is exactly one short sentence addressed to the agent.
- Urgent is for compliance, escalation or churn risk; Suggestion for next steps; Info for facts.
- Never repeat a tip with the same tag and content as one already given on this call.
- NEVER call the same tool twice with the same input.
- Only call tools from the catalog, with inputs shaped like the example input.
- Look up a contact when the customer gives or implies an email address.
- Open a support ticket when the customer reports a product issue or service failure.
- Search the manuals when the customer asks how something works.
- Return empty arrays when nothing is needed.";

const STRICT_SUFFIX: &str = "\n\nYour previous reply could not be used. \
Respond with ONLY the JSON object described above: no prose, no markdown fences, \
\"tips\" and \"toolCalls\" must both be arrays.";

const ANALYSIS_SYSTEM: &str = "You analyse a completed customer-service call. \
Return ONE JSON object and nothing else, with exactly these fields:
{
  \"sentiment\": {\"score\": 0-100, \"label\": \"Positive\" | \"Neutral\" | \"Negative\"},
  \"satisfaction\": {\"score\": 0-100, \"prediction\": \"Satisfied\" | \"Neutral\" | \"Dissatisfied\"},
  \"emotions\": [{\"emotion\": \"name\", \"intensity\": 0-100}],
  \"callMetrics\": {\"duration\": \"MM:SS\", \"agentTalkTime\": 0-100, \"customerTalkTime\": 0-100, \"holdTime\": 0-100},
  \"issueResolution\": {\"resolved\": true | false, \"category\": \"short-kebab-case\", \"resolutionTimeMinutes\": integer >= 0, \"escalationRisk\": 0-100},
  \"agentPerformance\": {\"professionalismScore\": 0-100, \"empathyScore\": 0-100, \"knowledgeScore\": 0-100, \"avgResponseLatencySeconds\": integer >= 0},
  \"keyInsights\": [\"1 to 3 items\"],
  \"actionItems\": [\"at most 3 items\"],
  \"tags\": [\"keywords\"],
  \"memory\": {\"deliverables\": [\"concrete outcomes or commitments\"], \"improvementAreas\": [\"coaching points for the agent\"]}
}
Talk-time percentages plus hold time must not exceed 100. All scores are integers. \
The memory is handed to the agent on this customer's next call, so keep it factual.";

/// `history_budget` caps the characters spent on earlier tool calls; the
/// newest calls are kept and the rest are only counted.
pub fn live_decision(
    window: &Window,
    state: &EngineState,
    catalog: &[ToolDescriptor],
    history_budget: usize,
    strict: bool,
) -> CompletionRequest {
    let (previous_tools, omitted_tools) = recent_tool_calls(&state.invocations, history_budget);

    let context = json!({
        "callId": window.call_id,
        "windowNumber": window.window_number,
        "clientEmail": window.client_email,
        "newTurns": window.turns,
        "earlierConversation": state.rolling_summary,
        "priorMemory": state.prior_memory.as_ref().map(memory_context),
        "issuedTipFingerprints": state.issued_tips,
        "executedToolFingerprints": state.executed_tools,
        "previousToolCalls": previous_tools,
        "omittedToolCalls": omitted_tools,
        "toolCatalog": catalog,
    });

    let system = if strict { format!("{LIVE_SYSTEM}{STRICT_SUFFIX}") } else { LIVE_SYSTEM.to_string() };
    CompletionRequest::json(system, context.to_string())
}

fn recent_tool_calls(invocations: &[ToolInvocation], budget: usize) -> (Vec<Value>, usize) {
    let mut kept = Vec::new();
    let mut used = 0;
    for invocation in invocations.iter().rev() {
        let entry = json!({
            "name": invocation.name,
            "input": invocation.input,
            "status": invocation.status.as_str(),
        });
        let size = entry.to_string().len();
        if used + size > budget {
            break;
        }
        used += size;
        kept.push(entry);
    }
    kept.reverse();
    let omitted = invocations.len() - kept.len();
    (kept, omitted)
}

pub fn post_call_analysis(
    windows: &[StoredWindow],
    invocations: &[ToolInvocation],
    prior_memory: Option<&MemoryRecord>,
) -> CompletionRequest {
    let transcript: Vec<Value> = windows
        .iter()
        .map(|stored| {
            json!({
                "windowNumber": stored.window.window_number,
                "turns": stored.window.turns,
                "aiTips": stored.tips,
                "activityFeed": stored.activity,
            })
        })
        .collect();
    let tools: Vec<Value> = invocations
        .iter()
        .map(|invocation| {
            json!({
                "windowNumber": invocation.window_number,
                "name": invocation.name,
                "input": invocation.input,
                "status": invocation.status.as_str(),
                "error": invocation.error.as_ref().map(ToString::to_string),
            })
        })
        .collect();

    let context = json!({
        "windows": transcript,
        "toolInvocations": tools,
        "priorMemory": prior_memory.map(memory_context),
    });

    CompletionRequest::json(ANALYSIS_SYSTEM, context.to_string())
}

/// Re-prompt after a schema failure, quoting the offending reply.
pub fn analysis_repair(
    original: &CompletionRequest,
    previous_reply: &str,
    violations: &[SchemaViolation],
) -> CompletionRequest {
    let listed: Vec<String> = violations.iter().map(|violation| format!("- {violation}")).collect();
    let system = format!(
        "{}\n\nYour previous reply was rejected by the schema validator:\n{}\n\
         Previous reply:\n{}\n\nReturn a corrected JSON object that satisfies every rule.",
        original.system,
        listed.join("\n"),
        previous_reply.trim()
    );
    CompletionRequest::json(system, original.user.clone())
}

fn memory_context(record: &MemoryRecord) -> Value {
    json!({
        "deliverables": record.deliverables,
        "improvementAreas": record.improvement_areas,
        "recordedAt": record.created_at,
    })
}
