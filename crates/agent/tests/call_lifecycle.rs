use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use callsight_agent::fixtures::{static_registry, ScriptedLlm, ScriptedReply, StaticTool};
use callsight_agent::{CallEngine, CallRequest, CallResponse, EngineError, EngineSettings, WindowResponse};
use callsight_core::domain::call::{CallId, ClientEmail, Speaker, Turn, Window};
use callsight_core::domain::state::CallPhase;
use callsight_core::domain::tip::TipTag;
use callsight_core::domain::tool::ToolStatus;
use callsight_db::{
    connect_with_settings, migrations, AnalyticsRepository, InMemoryAnalyticsRepository,
    InMemoryMemoryRepository, InMemoryWindowStore, MemoryRepository, SqlAnalyticsRepository,
    SqlMemoryRepository, SqlWindowStore, WindowStore,
};

struct Harness {
    engine: Arc<CallEngine>,
    llm: Arc<ScriptedLlm>,
    store: Arc<dyn WindowStore>,
    analytics: Arc<dyn AnalyticsRepository>,
    memory: Arc<dyn MemoryRepository>,
    ticket_calls: Arc<AtomicUsize>,
    lookup_calls: Arc<AtomicUsize>,
}

fn settings() -> EngineSettings {
    EngineSettings {
        decision_timeout: Duration::from_millis(300),
        analysis_timeout: Duration::from_millis(300),
        ..EngineSettings::default()
    }
}

fn assemble(
    store: Arc<dyn WindowStore>,
    memory: Arc<dyn MemoryRepository>,
    analytics: Arc<dyn AnalyticsRepository>,
    replies: Vec<ScriptedReply>,
) -> Harness {
    let ticket = StaticTool::mutation("create_support_ticket", json!({"ticket_id": "T-100"}));
    let lookup = StaticTool::lookup("get_contact_by_email", json!({"id": "51", "firstname": "Sarah"}));
    let ticket_calls = ticket.counter();
    let lookup_calls = lookup.counter();
    let llm = Arc::new(ScriptedLlm::new(replies));

    let engine = CallEngine::new(
        llm.clone(),
        store.clone(),
        memory.clone(),
        analytics.clone(),
        Arc::new(static_registry(vec![ticket, lookup])),
        settings(),
    );

    Harness { engine: Arc::new(engine), llm, store, analytics, memory, ticket_calls, lookup_calls }
}

fn in_memory(replies: Vec<ScriptedReply>) -> Harness {
    assemble(
        Arc::new(InMemoryWindowStore::default()),
        Arc::new(InMemoryMemoryRepository::default()),
        Arc::new(InMemoryAnalyticsRepository::default()),
        replies,
    )
}

fn text(value: Value) -> ScriptedReply {
    ScriptedReply::Text(value.to_string())
}

fn empty_decision() -> ScriptedReply {
    text(json!({"tips": [], "toolCalls": []}))
}

fn ticket_and_lookup_decision() -> ScriptedReply {
    text(json!({
        "tips": [{"tag": "Urgent", "content": "Apologise and confirm the outage is being ticketed."}],
        "toolCalls": [
            {"name": "create_support_ticket", "input": {"subject": "Dashboard down", "description": "Dashboard fails to load", "priority": "HIGH"}},
            {"name": "get_contact_by_email", "input": {"email": "sarah@bigco.com"}}
        ]
    }))
}

fn analytics_reply(category: &str, deliverable: &str) -> ScriptedReply {
    text(json!({
        "sentiment": {"score": 72, "label": "Positive"},
        "satisfaction": {"score": 80, "prediction": "Satisfied"},
        "emotions": [{"emotion": "relief", "intensity": 65}],
        "callMetrics": {"duration": "05:30", "agentTalkTime": 50, "customerTalkTime": 45, "holdTime": 5},
        "issueResolution": {"resolved": true, "category": category, "resolutionTimeMinutes": 5, "escalationRisk": 10},
        "agentPerformance": {"professionalismScore": 90, "empathyScore": 85, "knowledgeScore": 88, "avgResponseLatencySeconds": 3},
        "keyInsights": ["Customer could not log in after a password change"],
        "actionItems": ["Confirm login works tomorrow"],
        "tags": [category],
        "memory": {"deliverables": [deliverable], "improvementAreas": ["Verify identity earlier"]}
    }))
}

fn window(call: &str, number: u32, text: &str) -> Window {
    Window {
        call_id: CallId(call.to_string()),
        window_number: number,
        client_email: ClientEmail::new("sarah@bigco.com"),
        turns: vec![
            Turn { speaker: Speaker::Customer, transcript: text.to_string(), timestamp: None },
            Turn { speaker: Speaker::Agent, transcript: "Let me check that.".to_string(), timestamp: None },
        ],
    }
}

fn final_request(call: &str) -> CallRequest {
    CallRequest {
        call_id: call.to_string(),
        client_email: Some("sarah@bigco.com".to_string()),
        is_final: true,
        ..CallRequest::default()
    }
}

#[tokio::test]
async fn windows_are_analysed_in_number_order_regardless_of_arrival() {
    let harness = in_memory(vec![
        empty_decision(),
        empty_decision(),
        empty_decision(),
        analytics_reply("billing", "Explained the invoice"),
    ]);

    for number in [2, 1, 3] {
        harness
            .engine
            .process_window(window("call-order", number, &format!("turn {number}")))
            .await
            .expect("window");
    }

    let response = harness.engine.handle(final_request("call-order")).await.expect("final");
    let CallResponse::PostCall(post_call) = response else {
        panic!("expected a post-call response");
    };
    let numbers: Vec<u32> = post_call.windows.iter().map(|window| window.window_number).collect();
    assert_eq!(numbers, vec![1, 2, 3]);

    let analysis_request = harness.llm.requests().pop().expect("analysis request");
    let context: Value = serde_json::from_str(&analysis_request.user).expect("context");
    let sent: Vec<u64> = context["windows"]
        .as_array()
        .expect("windows")
        .iter()
        .filter_map(|window| window["windowNumber"].as_u64())
        .collect();
    assert_eq!(sent, vec![1, 2, 3]);
}

#[tokio::test]
async fn identical_resubmission_replays_without_side_effects() {
    let harness = in_memory(vec![ticket_and_lookup_decision()]);
    let call_id = CallId("call-replay".to_string());

    let first = harness
        .engine
        .process_window(window("call-replay", 1, "My dashboard will not load"))
        .await
        .expect("first");
    let state_after_first = harness.store.load_state(&call_id).await.expect("state");

    let second = harness
        .engine
        .process_window(window("call-replay", 1, "My dashboard will not load"))
        .await
        .expect("replay");

    assert!(!first.replayed);
    assert!(second.replayed);
    assert_eq!(second.ai_tips, first.ai_tips);
    assert_eq!(second.activity_feed, first.activity_feed);
    assert_eq!(harness.llm.call_count(), 1);
    assert_eq!(harness.ticket_calls.load(Ordering::SeqCst), 1);
    assert_eq!(harness.store.load_state(&call_id).await.expect("state"), state_after_first);
}

#[tokio::test]
async fn mutation_runs_once_per_call_while_lookups_repeat() {
    let harness = in_memory(vec![ticket_and_lookup_decision(), ticket_and_lookup_decision()]);

    let first = harness
        .engine
        .process_window(window("call-dedup", 1, "Dashboard is down"))
        .await
        .expect("window 1");
    let second = harness
        .engine
        .process_window(window("call-dedup", 2, "It is still down"))
        .await
        .expect("window 2");

    assert_eq!(first.ai_tips.len(), 1);
    assert_eq!(first.ai_tips[0].tag, TipTag::Urgent);
    assert_eq!(first.activity_feed.len(), 2);
    assert!(second.ai_tips.is_empty(), "repeated tip must be suppressed");
    assert_eq!(second.activity_feed.len(), 1);
    assert_eq!(second.activity_feed[0].name, "get_contact_by_email");
    assert_eq!(second.activity_feed[0].status, ToolStatus::Success);

    assert_eq!(harness.ticket_calls.load(Ordering::SeqCst), 1);
    assert_eq!(harness.lookup_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn malformed_decision_twice_degrades_and_keeps_state() {
    let harness = in_memory(vec![
        empty_decision(),
        ScriptedReply::Text("Sure, here are some tips!".to_string()),
        ScriptedReply::Text("{\"tips\": \"oops\"}".to_string()),
    ]);
    let call_id = CallId("call-malformed".to_string());

    harness.engine.process_window(window("call-malformed", 1, "Hello")).await.expect("window 1");
    let before = harness.store.load_state(&call_id).await.expect("state");

    let degraded = harness
        .engine
        .process_window(window("call-malformed", 2, "I need a refund"))
        .await
        .expect("window 2");

    assert_eq!(degraded, WindowResponse { degraded: true, ..WindowResponse::default() });
    assert_eq!(harness.llm.call_count(), 3);
    let strict = &harness.llm.requests()[2];
    assert!(strict.system.contains("previous reply could not be used"));
    assert_eq!(harness.store.load_state(&call_id).await.expect("state"), before);
    assert_eq!(harness.store.load_windows(&call_id).await.expect("windows").len(), 2);
}

#[tokio::test]
async fn empty_completion_is_reprompted_strictly() {
    let harness = in_memory(vec![ScriptedReply::Empty, ticket_and_lookup_decision()]);

    let response = harness
        .engine
        .process_window(window("call-empty", 1, "My dashboard will not load"))
        .await
        .expect("window");

    assert!(!response.degraded);
    assert_eq!(response.ai_tips.len(), 1);
    assert_eq!(harness.llm.call_count(), 2);
    let requests = harness.llm.requests();
    assert!(!requests[0].system.contains("previous reply could not be used"));
    assert!(requests[1].system.contains("previous reply could not be used"));
}

#[tokio::test]
async fn slow_model_degrades_within_the_deadline() {
    let harness = in_memory(vec![ScriptedReply::Hang(Duration::from_secs(5))]);

    let started = std::time::Instant::now();
    let response = harness
        .engine
        .process_window(window("call-slow", 1, "Hello?"))
        .await
        .expect("degraded window");

    assert!(response.degraded);
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn failed_analysis_persists_nothing_and_reports_unavailable() {
    let harness = in_memory(vec![
        empty_decision(),
        ScriptedReply::Text("{\"sentiment\": {\"score\": 500}}".to_string()),
        ScriptedReply::Text("no json here".to_string()),
        ScriptedReply::Text("{}".to_string()),
    ]);
    let call_id = CallId("call-invalid".to_string());

    harness.engine.process_window(window("call-invalid", 1, "Hi")).await.expect("window");
    let error = harness.engine.handle(final_request("call-invalid")).await.expect_err("unavailable");

    assert!(matches!(error, EngineError::AnalysisUnavailable(_)));
    assert!(harness.analytics.find_by_call(&call_id).await.expect("find").is_none());
    assert!(harness
        .memory
        .read_current(&ClientEmail::new("sarah@bigco.com"))
        .await
        .expect("read")
        .is_none());
    let state = harness.store.load_state(&call_id).await.expect("state");
    assert_eq!(state.phase, CallPhase::Active);
}

#[tokio::test]
async fn retried_final_request_stores_trailing_turns_once() {
    let harness = in_memory(vec![
        empty_decision(),
        ScriptedReply::Text("not json".to_string()),
        ScriptedReply::Text("still not json".to_string()),
        ScriptedReply::Text("{}".to_string()),
        analytics_reply("password-reset", "Sent password reset link"),
        analytics_reply("password-reset", "Sent password reset link"),
    ]);
    let call_id = CallId("call-retry".to_string());
    let with_goodbye = || CallRequest {
        turns: vec![Turn { speaker: Speaker::Customer, transcript: "Bye".to_string(), timestamp: None }],
        ..final_request("call-retry")
    };

    harness.engine.process_window(window("call-retry", 1, "I forgot my password")).await.expect("window");
    let failed = harness.engine.handle(with_goodbye()).await;
    assert!(matches!(failed, Err(EngineError::AnalysisUnavailable(_))));

    harness.engine.handle(with_goodbye()).await.expect("retried analysis");
    harness.engine.handle(with_goodbye()).await.expect("repeat after success");

    let numbers: Vec<u32> = harness
        .store
        .load_windows(&call_id)
        .await
        .expect("windows")
        .iter()
        .map(|stored| stored.window.window_number)
        .collect();
    assert_eq!(numbers, vec![1, 2]);
}

#[tokio::test]
async fn closed_calls_reject_windows_but_allow_reanalysis() {
    let harness = in_memory(vec![
        empty_decision(),
        analytics_reply("billing", "Refund issued"),
        analytics_reply("billing", "Refund issued"),
    ]);
    let call_id = CallId("call-closed".to_string());

    harness.engine.process_window(window("call-closed", 1, "Refund please")).await.expect("window");
    harness.engine.handle(final_request("call-closed")).await.expect("first analysis");

    let rejected = harness.engine.process_window(window("call-closed", 2, "One more thing")).await;
    assert!(matches!(rejected, Err(EngineError::CallClosed(_))));

    harness.engine.handle(final_request("call-closed")).await.expect("second analysis");
    let rows = harness
        .analytics
        .list_for_customer(&ClientEmail::new("sarah@bigco.com"))
        .await
        .expect("rows");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].call_id, call_id);
}

#[tokio::test]
async fn concurrent_windows_for_one_call_are_serialized() {
    let harness = in_memory(vec![empty_decision(), empty_decision(), empty_decision(), empty_decision()]);
    let call_id = CallId("call-race".to_string());

    let mut handles = Vec::new();
    for number in 1..=4 {
        let engine = harness.engine.clone();
        handles.push(tokio::spawn(async move {
            engine.process_window(window("call-race", number, &format!("turn {number}"))).await
        }));
    }
    for handle in handles {
        let response = handle.await.expect("join").expect("window");
        assert!(!response.degraded);
    }

    let state = harness.store.load_state(&call_id).await.expect("state");
    assert_eq!(state.windows_applied, 4);
    assert_eq!(state.version, 4);
}

#[tokio::test]
async fn malformed_requests_are_rejected() {
    let harness = in_memory(Vec::new());

    let blank = harness.engine.handle(CallRequest { call_id: "  ".to_string(), ..CallRequest::default() }).await;
    assert!(matches!(blank, Err(EngineError::InvalidRequest(_))));

    let no_number = harness
        .engine
        .handle(CallRequest { call_id: "call-x".to_string(), ..CallRequest::default() })
        .await;
    assert!(matches!(no_number, Err(EngineError::InvalidRequest(_))));

    let nothing_to_analyse = harness.engine.handle(final_request("call-x")).await;
    assert!(matches!(nothing_to_analyse, Err(EngineError::InvalidRequest(_))));
}

#[tokio::test]
async fn password_reset_call_feeds_memory_into_the_next_call() {
    let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
    migrations::run_pending(&pool).await.expect("migrate");
    let harness = assemble(
        Arc::new(SqlWindowStore::new(pool.clone())),
        Arc::new(SqlMemoryRepository::new(pool.clone())),
        Arc::new(SqlAnalyticsRepository::new(pool)),
        vec![
            text(json!({"tips": [{"tag": "Suggestion", "content": "Walk the customer through the password reset link."}]})),
            analytics_reply("password-reset", "Sent password reset link"),
            empty_decision(),
        ],
    );

    let live = harness
        .engine
        .process_window(window("call-1", 1, "I forgot my password"))
        .await
        .expect("live window");
    assert_eq!(live.ai_tips.len(), 1);

    let response = harness
        .engine
        .handle(CallRequest {
            call_id: "call-1".to_string(),
            client_email: Some("Sarah@BigCo.com".to_string()),
            turns: vec![Turn {
                speaker: Speaker::Customer,
                transcript: "That worked, thanks!".to_string(),
                timestamp: None,
            }],
            is_final: true,
            ..CallRequest::default()
        })
        .await
        .expect("final");
    let CallResponse::PostCall(post_call) = response else {
        panic!("expected a post-call response");
    };
    assert_eq!(post_call.analytics.issue_resolution.category, "password-reset");
    assert!(!post_call.analytics.memory.deliverables.is_empty());
    assert_eq!(post_call.windows.len(), 2);
    assert_eq!(post_call.windows[0].ai_tips.len(), 1);

    let current = harness
        .memory
        .read_current(&ClientEmail::new("sarah@bigco.com"))
        .await
        .expect("read")
        .expect("current memory");
    assert_eq!(current.deliverables, vec!["Sent password reset link".to_string()]);

    harness.engine.process_window(window("call-2", 1, "Hi again")).await.expect("next call");
    let next_call_prompt = harness.llm.requests().pop().expect("prompt");
    let context: Value = serde_json::from_str(&next_call_prompt.user).expect("context");
    assert_eq!(context["priorMemory"]["deliverables"][0], "Sent password reset link");
}
