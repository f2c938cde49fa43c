// src/server/routes.rs

//! The inbound HTTP API: command submission/status/cancel, robot registry
//! management, audit event queries, a live event stream, and minimal token
//! endpoints.

use crate::core::audit::AuditFilter;
use crate::core::models::{
    CommandResponse, ErrorCode, EventCategory, EventSeverity, Heartbeat, Robot, RobotStatus,
};
use crate::core::state::ServerState;
use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use futures::Stream;
use serde::Deserialize;
use serde_json::{Value, json};
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

/// Builds the full API router over the shared state. Exposed separately from
/// [`super::run`] so tests can drive the app in-process.
pub fn app(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/command", post(submit_command))
        .route(
            "/api/command/{command_id}",
            get(get_command).delete(cancel_command),
        )
        .route("/api/robots/register", post(register_robot))
        .route("/api/robots/heartbeat", post(heartbeat))
        .route("/api/robots", get(list_robots))
        .route(
            "/api/robots/{robot_id}",
            get(get_robot).delete(unregister_robot),
        )
        .route("/api/events", get(query_events))
        .route("/api/events/stream", get(stream_events))
        .route("/api/auth/login", post(login))
        .route("/api/auth/refresh", post(refresh))
        .with_state(state)
}

/// Maps the wire error taxonomy onto HTTP statuses.
fn http_status_for(response: &CommandResponse) -> StatusCode {
    match &response.error {
        None => StatusCode::OK,
        Some(detail) => match detail.code {
            ErrorCode::ErrValidation => StatusCode::BAD_REQUEST,
            ErrorCode::ErrUnauthorized => StatusCode::UNAUTHORIZED,
            ErrorCode::ErrRobotNotFound => StatusCode::NOT_FOUND,
            ErrorCode::ErrRobotBusy => StatusCode::CONFLICT,
            ErrorCode::ErrRobotOffline => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::ErrProtocol => StatusCode::BAD_GATEWAY,
            ErrorCode::ErrTimeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorCode::ErrInternal => StatusCode::INTERNAL_SERVER_ERROR,
        },
    }
}

async fn health(State(state): State<Arc<ServerState>>) -> Response {
    axum::Json(json!({
        "status": "ok",
        "edge_id": state.config.edge_id,
        "robots": state.router.robot_count(),
        "queue": state.sync.queue_statistics(),
    }))
    .into_response()
}

// ==================== commands ====================

async fn submit_command(
    State(state): State<Arc<ServerState>>,
    axum::Json(raw): axum::Json<Value>,
) -> Response {
    let response = state.handler.process(raw).await;
    let status = http_status_for(&response);
    (status, axum::Json(response)).into_response()
}

async fn get_command(
    State(state): State<Arc<ServerState>>,
    Path(command_id): Path<String>,
) -> Response {
    match state.handler.command_status(&command_id) {
        Some(view) => axum::Json(view).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            axum::Json(json!({ "error": "command not found", "command_id": command_id })),
        )
            .into_response(),
    }
}

async fn cancel_command(
    State(state): State<Arc<ServerState>>,
    Path(command_id): Path<String>,
) -> Response {
    let trace_id = Uuid::new_v4().to_string();
    if state.handler.cancel_command(&command_id, &trace_id) {
        axum::Json(json!({
            "message": "cancellation requested",
            "command_id": command_id,
        }))
        .into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            axum::Json(json!({ "error": "command not active", "command_id": command_id })),
        )
            .into_response()
    }
}

// ==================== robots ====================

async fn register_robot(
    State(state): State<Arc<ServerState>>,
    axum::Json(registration): axum::Json<Robot>,
) -> Response {
    let robot_id = registration.robot_id.clone();
    let success = state.router.register_robot(registration);
    axum::Json(json!({ "success": success, "robot_id": robot_id })).into_response()
}

async fn unregister_robot(
    State(state): State<Arc<ServerState>>,
    Path(robot_id): Path<String>,
) -> Response {
    if state.router.unregister_robot(&robot_id) {
        axum::Json(json!({ "message": "robot unregistered", "robot_id": robot_id }))
            .into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            axum::Json(json!({ "error": "robot not found", "robot_id": robot_id })),
        )
            .into_response()
    }
}

async fn heartbeat(
    State(state): State<Arc<ServerState>>,
    axum::Json(heartbeat): axum::Json<Heartbeat>,
) -> Response {
    if state.router.update_heartbeat(&heartbeat) {
        axum::Json(json!({ "success": true, "robot_id": heartbeat.robot_id })).into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            axum::Json(json!({
                "success": false,
                "error": "robot not registered",
                "robot_id": heartbeat.robot_id,
            })),
        )
            .into_response()
    }
}

#[derive(Debug, Deserialize)]
struct RobotsQuery {
    robot_type: Option<String>,
    status: Option<RobotStatus>,
}

async fn list_robots(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<RobotsQuery>,
) -> Response {
    let robots = state
        .router
        .list_robots(query.robot_type.as_deref(), query.status);
    axum::Json(json!({ "count": robots.len(), "robots": robots })).into_response()
}

async fn get_robot(
    State(state): State<Arc<ServerState>>,
    Path(robot_id): Path<String>,
) -> Response {
    match state.router.get_robot(&robot_id) {
        Some(robot) => axum::Json(robot).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            axum::Json(json!({ "error": "robot not found", "robot_id": robot_id })),
        )
            .into_response(),
    }
}

// ==================== events ====================

#[derive(Debug, Deserialize)]
struct EventsQuery {
    trace_id: Option<String>,
    category: Option<EventCategory>,
    severity: Option<EventSeverity>,
    limit: Option<usize>,
}

async fn query_events(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<EventsQuery>,
) -> Response {
    let filter = AuditFilter {
        trace_id: query.trace_id,
        category: query.category,
        severity: query.severity,
        limit: query.limit,
    };
    let events = state.audit.events(&filter);
    axum::Json(json!({ "count": events.len(), "events": events })).into_response()
}

#[derive(Debug, Deserialize)]
struct StreamQuery {
    trace_id: Option<String>,
}

/// Pushes events as they occur over SSE. Per-trace ordering is preserved:
/// events ride a single broadcast channel in publish order.
async fn stream_events(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<StreamQuery>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let rx = state.bus.subscribe_all();
    let trace_filter = query.trace_id;

    let stream = BroadcastStream::new(rx).filter_map(move |received| {
        let published = received.ok()?;
        if trace_filter
            .as_deref()
            .is_some_and(|t| published.event.trace_id != t)
        {
            return None;
        }
        let data = serde_json::to_string(&published.event).ok()?;
        Some(Ok(SseEvent::default()
            .event(published.topic.clone())
            .data(data)))
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

// ==================== auth ====================

#[derive(Debug, Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
    device_id: Option<String>,
}

async fn login(
    State(state): State<Arc<ServerState>>,
    axum::Json(request): axum::Json<LoginRequest>,
) -> Response {
    let Some(user_id) = state
        .auth
        .authenticate_user(&request.username, &request.password)
    else {
        return (
            StatusCode::UNAUTHORIZED,
            axum::Json(json!({ "error": "invalid credentials" })),
        )
            .into_response();
    };

    let device_id = request.device_id.as_deref().unwrap_or("unknown-device");
    match state.auth.issue_token_pair(&user_id, device_id) {
        Ok((access_token, refresh_token)) => axum::Json(json!({
            "user_id": user_id,
            "access_token": access_token,
            "refresh_token": refresh_token,
        }))
        .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            axum::Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct RefreshRequest {
    refresh_token: String,
}

async fn refresh(
    State(state): State<Arc<ServerState>>,
    axum::Json(request): axum::Json<RefreshRequest>,
) -> Response {
    let trace_id = Uuid::new_v4().to_string();
    match state
        .auth
        .refresh_access_token(&request.refresh_token, &trace_id)
    {
        Some(access_token) => {
            axum::Json(json!({ "access_token": access_token })).into_response()
        }
        None => (
            StatusCode::UNAUTHORIZED,
            axum::Json(json!({ "error": "invalid refresh token" })),
        )
            .into_response(),
    }
}
