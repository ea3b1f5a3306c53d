use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use callsight_agent::{CallEngine, CallRequest, CallResponse};
use callsight_core::domain::call::ClientEmail;
use callsight_core::domain::memory::MemoryRecord;
use callsight_core::errors::{ApplicationError, InterfaceError};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

const MAX_HISTORY: u32 = 50;

#[derive(Clone)]
pub struct ApiState {
    engine: Arc<CallEngine>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    pub error: &'static str,
    pub message: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub correlation_id: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct MemoryQuery {
    pub history: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryResponse {
    pub client_email: ClientEmail,
    pub current: Option<MemoryRecord>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<MemoryRecord>,
}

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ApiError>)>;

pub fn router(engine: Arc<CallEngine>) -> Router {
    Router::new()
        .route("/v1/calls", post(submit_call))
        .route("/v1/customers/{email}/memory", get(customer_memory))
        .with_state(ApiState { engine })
}

/// Live window or, with `"final": true`, the post-call pass.
pub async fn submit_call(
    State(state): State<ApiState>,
    payload: Result<Json<CallRequest>, JsonRejection>,
) -> ApiResult<CallResponse> {
    let Json(request) = payload.map_err(|rejection| {
        error_response(InterfaceError::BadRequest {
            message: rejection.body_text(),
            correlation_id: "unknown".to_string(),
        })
    })?;

    let call_id = request.call_id.trim().to_string();
    info!(
        event_name = "api.call.received",
        call_id = %call_id,
        window_number = request.window_number,
        is_final = request.is_final,
        turns = request.turns.len(),
        "call request received"
    );

    state.engine.handle(request).await.map(Json).map_err(|error| {
        warn!(event_name = "api.call.failed", call_id = %call_id, %error, "call request failed");
        error_response(ApplicationError::from(error).into_interface(call_id))
    })
}

pub async fn customer_memory(
    State(state): State<ApiState>,
    Path(email): Path<String>,
    Query(query): Query<MemoryQuery>,
) -> ApiResult<MemoryResponse> {
    let client_email = ClientEmail::new(&email);
    if client_email.is_empty() {
        return Err(error_response(InterfaceError::BadRequest {
            message: "email must not be empty".to_string(),
            correlation_id: "unknown".to_string(),
        }));
    }

    let persistence = |error: callsight_db::RepositoryError| {
        warn!(event_name = "api.memory.failed", client_email = %client_email, %error, "memory read failed");
        error_response(
            ApplicationError::Persistence(error.to_string()).into_interface(client_email.to_string()),
        )
    };

    let current = state.engine.memory().read_current(&client_email).await.map_err(persistence)?;
    let history = match query.history {
        Some(limit) if limit > 0 => state
            .engine
            .memory()
            .history(&client_email, limit.min(MAX_HISTORY))
            .await
            .map_err(persistence)?,
        _ => Vec::new(),
    };

    Ok(Json(MemoryResponse { client_email, current, history }))
}

fn error_response(error: InterfaceError) -> (StatusCode, Json<ApiError>) {
    let (status, kind, detail) = match &error {
        InterfaceError::BadRequest { message, .. } => {
            (StatusCode::BAD_REQUEST, "bad_request", Some(message.clone()))
        }
        InterfaceError::Conflict { message, .. } => {
            (StatusCode::CONFLICT, "conflict", Some(message.clone()))
        }
        InterfaceError::ServiceUnavailable { .. } => {
            (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable", None)
        }
        InterfaceError::Internal { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "internal", None),
    };

    (
        status,
        Json(ApiError {
            error: kind,
            message: error.user_message(),
            detail,
            correlation_id: error.correlation_id().to_string(),
        }),
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
        Router,
    };
    use callsight_agent::fixtures::{static_registry, ScriptedLlm, ScriptedReply};
    use callsight_agent::{CallEngine, EngineSettings};
    use callsight_core::domain::call::{CallId, ClientEmail};
    use callsight_core::domain::memory::MemoryBox;
    use callsight_db::{InMemoryAnalyticsRepository, InMemoryMemoryRepository, InMemoryWindowStore};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::router;

    fn engine(replies: Vec<ScriptedReply>) -> Arc<CallEngine> {
        Arc::new(CallEngine::new(
            Arc::new(ScriptedLlm::new(replies)),
            Arc::new(InMemoryWindowStore::default()),
            Arc::new(InMemoryMemoryRepository::default()),
            Arc::new(InMemoryAnalyticsRepository::default()),
            Arc::new(static_registry(Vec::new())),
            EngineSettings {
                decision_timeout: Duration::from_millis(300),
                analysis_timeout: Duration::from_millis(300),
                ..EngineSettings::default()
            },
        ))
    }

    async fn send(app: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body.map(|value| Body::from(value.to_string())).unwrap_or_else(Body::empty))
            .expect("request");
        let response = app.oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let payload = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).expect("json") };
        (status, payload)
    }

    fn live_window(call_id: &str, number: u32) -> Value {
        json!({
            "call_id": call_id,
            "window_number": number,
            "client_email": "sarah@bigco.com",
            "turns": [{"speaker": "customer", "transcript": "I forgot my password"}]
        })
    }

    #[tokio::test]
    async fn live_window_returns_tips_and_activity() {
        let app = router(engine(vec![ScriptedReply::Text(
            json!({"tips": [{"tag": "Suggestion", "content": "Send the reset link."}]}).to_string(),
        )]));

        let (status, payload) = send(app, "POST", "/v1/calls", Some(live_window("call-1", 1))).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload["aiTips"][0]["tag"], "Suggestion");
        assert_eq!(payload["activityFeed"], json!([]));
        assert_eq!(payload["degraded"], false);
    }

    #[tokio::test]
    async fn malformed_body_is_bad_request() {
        let app = router(engine(Vec::new()));
        let (status, payload) =
            send(app, "POST", "/v1/calls", Some(json!({"window_number": "one"}))).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(payload["error"], "bad_request");
        assert_eq!(payload["correlationId"], "unknown");
    }

    #[tokio::test]
    async fn unavailable_analysis_maps_to_503_with_call_id() {
        let app = router(engine(vec![
            ScriptedReply::Text("{}".to_string()),
            ScriptedReply::Text("not json".to_string()),
            ScriptedReply::Text("still not json".to_string()),
            ScriptedReply::Text("nope".to_string()),
        ]));

        let (status, _) = send(app.clone(), "POST", "/v1/calls", Some(live_window("call-2", 1))).await;
        assert_eq!(status, StatusCode::OK);

        let (status, payload) = send(
            app,
            "POST",
            "/v1/calls",
            Some(json!({"call_id": "call-2", "client_email": "sarah@bigco.com", "final": true})),
        )
        .await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(payload["correlationId"], "call-2");
        assert!(payload.get("detail").is_none());
    }

    #[tokio::test]
    async fn memory_endpoint_returns_current_record() {
        let engine = engine(Vec::new());
        engine
            .memory()
            .write_new(
                &ClientEmail::new("sarah@bigco.com"),
                Some(&CallId("call-0".to_string())),
                MemoryBox {
                    deliverables: vec!["Sent password reset link".to_string()],
                    improvement_areas: Vec::new(),
                },
            )
            .await
            .expect("seed memory");
        let app = router(engine);

        let (status, payload) =
            send(app.clone(), "GET", "/v1/customers/Sarah@BigCo.com/memory?history=5", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload["clientEmail"], "sarah@bigco.com");
        assert_eq!(payload["current"]["deliverables"][0], "Sent password reset link");
        assert_eq!(payload["history"].as_array().map(Vec::len), Some(1));

        let (status, payload) = send(app, "GET", "/v1/customers/nobody@bigco.com/memory", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload["current"], Value::Null);
    }
}
