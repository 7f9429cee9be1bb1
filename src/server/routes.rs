//! HTTP route handlers for the consultation room API.

use std::path::Path as FsPath;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, warn};

use crate::room::chat::finalize::FinalizeOutcome;
use crate::room::chat::message::{ChatDraft, ChatMessage};
use crate::room::coordinator::{JoinOutcome, JoinRequest, Participant, PresenceStatus};
use crate::room::core::errors::RoomError;
use crate::room::core::ids::{ContractId, RoomId, SessionId};
use crate::room::core::role::Role;
use crate::room::fanout::events::WebRtcSignal;
use crate::room::presence::gate::GateDecision;

use super::state::AppState;
use super::ws::ws_room;

type ApiResult<T> = Result<Json<T>, (StatusCode, String)>;

/// Create the API router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/rooms/join", post(join_room))
        .route("/api/rooms/{room}/entry", get(enter_room))
        .route(
            "/api/rooms/{room}/presence",
            get(presence_status).post(update_presence),
        )
        .route("/api/rooms/{room}/presence/reset", post(reset_presence))
        .route("/api/rooms/{room}/sync/{topic}", post(publish_sync))
        .route("/api/rooms/{room}/rtc", post(relay_signal))
        .route("/api/rooms/{room}/chat", post(send_chat))
        .route("/api/rooms/{room}/end", post(end_consultation))
        .route("/api/chat/history/{contract_id}", get(chat_history))
        .route("/api/chat/export/{contract_id}", get(download_export))
        .route("/ws/rooms/{room}", get(ws_room))
        .with_state(state)
}

/// Map a room error to an HTTP status and message.
pub fn error_response(err: &RoomError) -> (StatusCode, String) {
    let status = if err.is_retryable() {
        StatusCode::SERVICE_UNAVAILABLE
    } else if err.is_client_error() {
        StatusCode::BAD_REQUEST
    } else if matches!(err, RoomError::RecordNotFound(_)) {
        StatusCode::NOT_FOUND
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    if status.is_server_error() {
        error!(error = %err, "request failed");
    }
    (status, err.to_string())
}

/// Health check endpoint.
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "consult-room",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Identity query carried by room requests and WebSocket upgrades.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantQuery {
    /// Declared role.
    pub role: Option<String>,
    /// User identifier.
    pub user: Option<String>,
    /// Transport session.
    pub session_id: Option<String>,
    /// Consultation hint for the waiting room.
    pub contract_id: Option<ContractId>,
}

impl ParticipantQuery {
    /// Resolve the declared identity.
    #[must_use]
    pub fn participant(&self) -> Participant {
        let role = Role::from_declared(self.role.as_deref());
        Participant {
            user: self
                .user
                .clone()
                .filter(|user| !user.trim().is_empty())
                .unwrap_or_else(|| role.as_str().to_string()),
            role,
            session: self
                .session_id
                .as_deref()
                .filter(|session| !session.trim().is_empty())
                .map(SessionId::from),
        }
    }
}

/// Gate a page entry: JSON when admitted, redirect to the waiting room otherwise.
async fn enter_room(
    State(state): State<Arc<AppState>>,
    Path(room): Path<String>,
    Query(query): Query<ParticipantQuery>,
) -> Response {
    let room = state.coordinator.resolve_room(&room).await;
    let role = Role::from_declared(query.role.as_deref());
    match state.coordinator.enter(&room, role, query.contract_id) {
        GateDecision::Redirect { location } => Redirect::to(&location).into_response(),
        admitted @ GateDecision::Admit { .. } => Json(admitted).into_response(),
    }
}

/// Gate a caller and map its session to the consultation.
async fn join_room(
    State(state): State<Arc<AppState>>,
    Json(request): Json<JoinRequest>,
) -> ApiResult<JoinOutcome> {
    state
        .coordinator
        .join(request)
        .await
        .map(Json)
        .map_err(|err| error_response(&err))
}

/// Presence polling.
async fn presence_status(
    State(state): State<Arc<AppState>>,
    Path(room): Path<String>,
) -> Json<PresenceStatus> {
    let room = state.coordinator.resolve_room(&room).await;
    Json(state.coordinator.presence_status(&room))
}

/// Presence push body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceUpdate {
    /// Whether the agent is now present.
    pub present: bool,
    /// Agent session the update is about.
    #[serde(default)]
    pub session_id: Option<SessionId>,
}

/// Presence push. Accepts JSON sent as `text/plain`, as page-unload beacons do.
async fn update_presence(
    State(state): State<Arc<AppState>>,
    Path(room): Path<String>,
    body: String,
) -> ApiResult<PresenceStatus> {
    let update: PresenceUpdate = serde_json::from_str(&body).map_err(|err| {
        warn!(error = %err, "unreadable presence update");
        (StatusCode::BAD_REQUEST, format!("invalid presence update: {err}"))
    })?;
    let room = state.coordinator.resolve_room(&room).await;
    state
        .coordinator
        .update_presence(&room, update.present, update.session_id);
    Ok(Json(state.coordinator.presence_status(&room)))
}

/// Force presence back to absent.
async fn reset_presence(
    State(state): State<Arc<AppState>>,
    Path(room): Path<String>,
) -> Json<PresenceStatus> {
    let room = state.coordinator.resolve_room(&room).await;
    state.coordinator.reset_presence(&room);
    Json(state.coordinator.presence_status(&room))
}

/// Fan-out acknowledgement.
#[derive(Debug, Serialize)]
pub struct Delivery {
    /// Subscribers the event was queued for.
    pub delivered: usize,
}

/// Publish a synchronization event by topic.
async fn publish_sync(
    State(state): State<Arc<AppState>>,
    Path((room, topic)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> ApiResult<Delivery> {
    let room = state.coordinator.resolve_room(&room).await;
    let delivered = state
        .coordinator
        .publish_topic(&room, &topic, body)
        .map_err(|err| error_response(&err))?;
    Ok(Json(Delivery { delivered }))
}

/// Relay a WebRTC signal.
async fn relay_signal(
    State(state): State<Arc<AppState>>,
    Path(room): Path<String>,
    Json(body): Json<Value>,
) -> ApiResult<WebRtcSignal> {
    let signal: WebRtcSignal = serde_json::from_value(body)
        .map_err(|err| error_response(&RoomError::InvalidEvent(err.to_string())))?;
    let room = state.coordinator.resolve_room(&room).await;
    state
        .coordinator
        .relay_signal(&room, signal)
        .map(Json)
        .map_err(|err| error_response(&err))
}

/// Chat send acknowledgement.
#[derive(Debug, Serialize)]
pub struct ChatReceipt {
    /// Whether the line was broadcast.
    pub sent: bool,
    /// The line as broadcast.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<ChatMessage>,
}

/// Send a chat line.
async fn send_chat(
    State(state): State<Arc<AppState>>,
    Path(room): Path<String>,
    Query(query): Query<ParticipantQuery>,
    Json(draft): Json<ChatDraft>,
) -> ApiResult<ChatReceipt> {
    let room = state.coordinator.resolve_room(&room).await;
    let message = state
        .coordinator
        .send_chat(&room, &query.participant(), draft)
        .await
        .map_err(|err| error_response(&err))?;
    Ok(Json(ChatReceipt {
        sent: message.is_some(),
        message,
    }))
}

/// End-of-call request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndRequest {
    /// User ending the call.
    pub terminating_user: String,
    /// Consultation memo.
    #[serde(default)]
    pub memo: Option<String>,
}

/// End a consultation.
async fn end_consultation(
    State(state): State<Arc<AppState>>,
    Path(room): Path<String>,
    Json(request): Json<EndRequest>,
) -> ApiResult<FinalizeOutcome> {
    let room = state.coordinator.resolve_room(&room).await;
    let RoomId::Contract(contract) = room else {
        return Err(error_response(&RoomError::SessionNotMapped(room.to_string())));
    };
    state
        .coordinator
        .end_consultation(contract, &request.terminating_user, request.memo)
        .await
        .map(Json)
        .map_err(|err| error_response(&err))
}

/// Durable chat history.
async fn chat_history(
    State(state): State<Arc<AppState>>,
    Path(contract_id): Path<i64>,
) -> ApiResult<Vec<ChatMessage>> {
    state
        .coordinator
        .chat_history(ContractId(contract_id))
        .await
        .map(Json)
        .map_err(|err| error_response(&err))
}

/// Download the latest chat export of a consultation.
async fn download_export(
    State(state): State<Arc<AppState>>,
    Path(contract_id): Path<i64>,
) -> Result<Response, (StatusCode, String)> {
    let contract = ContractId(contract_id);
    let path = state
        .coordinator
        .export_path(contract)
        .await
        .map_err(|err| error_response(&err))?
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                format!("no chat export for consultation {contract}"),
            )
        })?;

    let body = tokio::fs::read(&path).await.map_err(|err| {
        warn!(%contract, path = %path, error = %err, "recorded chat export is unreadable");
        (
            StatusCode::NOT_FOUND,
            format!("chat export for consultation {contract} is missing"),
        )
    })?;
    let file_name = FsPath::new(&path)
        .file_name()
        .and_then(|name| name.to_str())
        .map_or_else(|| format!("chat_{contract}.txt"), str::to_string);

    Ok((
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{file_name}\""),
            ),
        ],
        body,
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    use crate::room::core::config::RoomConfig;

    struct Harness {
        router: Router,
        _temp: tempfile::TempDir,
    }

    async fn harness() -> Harness {
        let temp = match tempfile::tempdir() {
            Ok(temp) => temp,
            Err(err) => panic!("tempdir: {err}"),
        };
        let mut config = RoomConfig::default();
        config.chat.export_dir = temp.path().join("chat");
        let state = match AppState::in_memory(config).await {
            Ok(state) => state,
            Err(err) => panic!("state: {err}"),
        };
        Harness {
            router: create_router(state),
            _temp: temp,
        }
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = match router.clone().oneshot(request).await {
            Ok(response) => response,
            Err(err) => match err {},
        };
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .map(|bytes| bytes.to_vec())
            .unwrap_or_default();
        (status, body)
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .body(Body::empty())
            .unwrap_or_default()
    }

    fn post_json(uri: &str, body: &Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap_or_default()
    }

    fn json(body: &[u8]) -> Value {
        serde_json::from_slice(body).unwrap_or(Value::Null)
    }

    #[tokio::test]
    async fn test_health() {
        let h = harness().await;
        let (status, body) = send(&h.router, get_request("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json(&body)["status"], "ok");
    }

    #[tokio::test]
    async fn test_client_entry_redirects_to_waiting_room() {
        let h = harness().await;
        let response = match h
            .router
            .clone()
            .oneshot(get_request("/api/rooms/55/entry?role=client"))
            .await
        {
            Ok(response) => response,
            Err(err) => match err {},
        };
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(
            response
                .headers()
                .get(header::LOCATION)
                .and_then(|value| value.to_str().ok()),
            Some("/waiting-room?contractId=55")
        );
    }

    #[tokio::test]
    async fn test_agent_entry_opens_room() {
        let h = harness().await;
        let (status, body) = send(&h.router, get_request("/api/rooms/55/entry?role=agent")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json(&body)["decision"], "admit");

        let (status, _) = send(&h.router, get_request("/api/rooms/55/entry?role=client")).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_beacon_presence_update() {
        let h = harness().await;
        let request = Request::builder()
            .method("POST")
            .uri("/api/rooms/12/presence")
            .header(header::CONTENT_TYPE, "text/plain;charset=UTF-8")
            .body(Body::from(r#"{"present":true,"sessionId":"a-12"}"#))
            .unwrap_or_default();
        let (status, body) = send(&h.router, request).await;
        assert_eq!(status, StatusCode::OK);
        let body = json(&body);
        assert_eq!(body["present"], true);
        assert_eq!(body["activeCount"], 1);
        assert_eq!(body["sessionId"], "a-12");

        let (_, body) = send(
            &h.router,
            post_json("/api/rooms/12/presence/reset", &Value::Null),
        )
        .await;
        assert_eq!(json(&body)["present"], false);
    }

    #[tokio::test]
    async fn test_bad_presence_body_rejected() {
        let h = harness().await;
        let request = Request::builder()
            .method("POST")
            .uri("/api/rooms/12/presence")
            .body(Body::from("present=yes"))
            .unwrap_or_default();
        let (status, _) = send(&h.router, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_sync_topic_is_bad_request() {
        let h = harness().await;
        let (status, _) = send(
            &h.router,
            post_json("/api/rooms/3/sync/teleport", &serde_json::json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(
            &h.router,
            post_json("/api/rooms/3/sync/page", &serde_json::json!({ "page": 2 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json(&body)["delivered"], 0);
    }

    #[tokio::test]
    async fn test_rtc_join_is_stamped() {
        let h = harness().await;
        let (status, body) = send(
            &h.router,
            post_json("/api/rooms/3/rtc", &serde_json::json!({ "type": "join" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json(&body)["participants"], 1);
    }

    #[tokio::test]
    async fn test_chat_end_history_and_export() {
        let h = harness().await;
        let (status, body) = send(
            &h.router,
            post_json(
                "/api/rooms/9/chat?role=client&user=c-9",
                &serde_json::json!({ "content": "hello agent" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json(&body)["sent"], true);

        let (status, body) = send(
            &h.router,
            post_json(
                "/api/rooms/9/end",
                &serde_json::json!({ "terminatingUser": "agent-1", "memo": "done" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let outcome = json(&body);
        assert_eq!(outcome["drainedCount"], 1);
        assert_eq!(outcome["exportPathRecorded"], true);

        let (status, body) = send(&h.router, get_request("/api/chat/history/9")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json(&body)[0]["type"], "END");

        let (status, body) = send(&h.router, get_request("/api/chat/export/9")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(String::from_utf8_lossy(&body).contains("hello agent"));
    }

    #[tokio::test]
    async fn test_missing_export_is_not_found() {
        let h = harness().await;
        let (status, _) = send(&h.router, get_request("/api/chat/export/404")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_end_for_unmapped_session_room_rejected() {
        let h = harness().await;
        let (status, _) = send(
            &h.router,
            post_json(
                "/api/rooms/unknown-session/end",
                &serde_json::json!({ "terminatingUser": "agent-1" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
