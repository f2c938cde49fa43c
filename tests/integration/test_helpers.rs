// tests/integration/test_helpers.rs

//! Test helpers and utilities for integration tests.

use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use edgelink::config::Config;
use edgelink::core::auth::TokenKind;
use edgelink::core::state::ServerState;
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, reload};

/// TestContext provides a fully wired platform instance over an in-memory
/// sync queue and a random JWT secret.
pub struct TestContext {
    pub state: Arc<ServerState>,
}

impl TestContext {
    /// Creates a new test context with default configuration.
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Creates a new test context with custom configuration.
    pub fn with_config(config: Config) -> Self {
        // Set up minimal tracing for tests with a reloadable filter
        // (ignore error if already initialized).
        let (filter, reload_handle) = reload::Layer::new(EnvFilter::new("warn"));
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_test_writer())
            .try_init();
        let reload_handle = Arc::new(reload_handle);

        let state = ServerState::initialize(config, reload_handle)
            .expect("Failed to initialize server state");
        Self { state }
    }

    /// Registers a user and returns a fresh access token for it.
    pub fn user_with_token(&self, user_id: &str, role: &str) -> String {
        self.state
            .auth
            .register_user(user_id, &format!("{user_id}-name"), "hunter2-pw", role)
            .expect("user registration failed");
        self.state
            .auth
            .create_token(user_id, role, TokenKind::Access, 900)
            .expect("token issuance failed")
    }

    /// Builds a valid command request envelope against a robot.
    pub fn command_request(
        &self,
        command_id: &str,
        trace_id: &str,
        robot_id: &str,
        command_type: &str,
        token: &str,
        timeout_ms: u64,
    ) -> Value {
        json!({
            "trace_id": trace_id,
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "actor": { "type": "human", "id": "u1" },
            "source": "api",
            "command": {
                "id": command_id,
                "type": command_type,
                "target": { "robot_id": robot_id },
                "params": { "action": "go_forward" },
                "timeout_ms": timeout_ms,
            },
            "auth": { "token": token },
        })
    }

    /// Polls the handler until the command reaches a terminal state.
    pub async fn wait_for_terminal(&self, command_id: &str, deadline: Duration) -> Value {
        let start = std::time::Instant::now();
        loop {
            if let Some(view) = self.state.handler.command_status(command_id) {
                let status = serde_json::to_value(&view).expect("status serializes");
                match status["status"].as_str() {
                    Some("succeeded") | Some("failed") | Some("cancelled") => return status,
                    _ => {}
                }
            }
            if start.elapsed() > deadline {
                panic!("command {command_id} did not reach a terminal state in time");
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

/// A mock robot HTTP endpoint. Counts hits, records bodies, and optionally
/// delays its responses to hold the per-robot lock open.
pub struct MockRobot {
    pub endpoint: String,
    pub hits: Arc<AtomicUsize>,
    pub bodies: Arc<Mutex<Vec<Value>>>,
}

#[derive(Clone)]
struct MockRobotState {
    hits: Arc<AtomicUsize>,
    bodies: Arc<Mutex<Vec<Value>>>,
    delay: Duration,
}

async fn mock_robot_command(
    State(state): State<MockRobotState>,
    axum::Json(body): axum::Json<Value>,
) -> impl IntoResponse {
    state.hits.fetch_add(1, Ordering::SeqCst);
    state.bodies.lock().push(body);
    tokio::time::sleep(state.delay).await;
    axum::Json(json!({ "ok": true }))
}

impl MockRobot {
    /// Spawns the mock robot on an ephemeral port.
    pub async fn spawn(delay: Duration) -> Self {
        let hits = Arc::new(AtomicUsize::new(0));
        let bodies = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new()
            .route("/api/command", post(mock_robot_command))
            .with_state(MockRobotState {
                hits: hits.clone(),
                bodies: bodies.clone(),
                delay,
            });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("mock robot bind failed");
        let addr: SocketAddr = listener.local_addr().expect("mock robot addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            endpoint: format!("http://{addr}"),
            hits,
            bodies,
        }
    }
}

/// A mock Cloud API. While `failing` is set every request answers HTTP 500,
/// which the sync client surfaces as a transport error.
pub struct MockCloud {
    pub base_url: String,
    pub failing: Arc<AtomicBool>,
    /// `(endpoint, body)` pairs in arrival order.
    pub requests: Arc<Mutex<Vec<(String, Value)>>>,
}

#[derive(Clone)]
struct MockCloudState {
    failing: Arc<AtomicBool>,
    requests: Arc<Mutex<Vec<(String, Value)>>>,
}

async fn mock_cloud_settings(
    State(state): State<MockCloudState>,
    Path(user_id): Path<String>,
    axum::Json(body): axum::Json<Value>,
) -> impl IntoResponse {
    if state.failing.load(Ordering::SeqCst) {
        return (StatusCode::INTERNAL_SERVER_ERROR, axum::Json(json!({}))).into_response();
    }
    state.requests.lock().push((format!("settings/{user_id}"), body));
    axum::Json(json!({
        "success": true,
        "updated_at": chrono::Utc::now().to_rfc3339(),
    }))
    .into_response()
}

async fn mock_cloud_settings_download(
    State(state): State<MockCloudState>,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    if state.failing.load(Ordering::SeqCst) {
        return (StatusCode::INTERNAL_SERVER_ERROR, axum::Json(json!({}))).into_response();
    }
    if user_id == "user-without-backup" {
        return (StatusCode::NOT_FOUND, axum::Json(json!({ "success": false }))).into_response();
    }
    axum::Json(json!({
        "success": true,
        "data": { "settings": { "theme": "dark", "language": "en" } },
    }))
    .into_response()
}

async fn mock_cloud_history(
    State(state): State<MockCloudState>,
    Path(user_id): Path<String>,
    axum::Json(body): axum::Json<Value>,
) -> impl IntoResponse {
    if state.failing.load(Ordering::SeqCst) {
        return (StatusCode::INTERNAL_SERVER_ERROR, axum::Json(json!({}))).into_response();
    }
    let count = body["records"].as_array().map(Vec::len).unwrap_or(0);
    state.requests.lock().push((format!("history/{user_id}"), body));
    axum::Json(json!({
        "success": true,
        "synced_count": count,
        "total": count,
    }))
    .into_response()
}

async fn mock_cloud_upload(
    State(state): State<MockCloudState>,
    axum::Json(body): axum::Json<Value>,
) -> impl IntoResponse {
    if state.failing.load(Ordering::SeqCst) {
        return (StatusCode::INTERNAL_SERVER_ERROR, axum::Json(json!({}))).into_response();
    }
    let rejected = body["name"].as_str() == Some("rejected-command");
    state
        .requests
        .lock()
        .push(("shared_commands/upload".to_string(), body));
    axum::Json(json!({
        "success": !rejected,
        "data": { "id": 1 },
    }))
    .into_response()
}

async fn mock_cloud_categories(State(state): State<MockCloudState>) -> impl IntoResponse {
    if state.failing.load(Ordering::SeqCst) {
        return (StatusCode::INTERNAL_SERVER_ERROR, axum::Json(json!({}))).into_response();
    }
    axum::Json(json!({
        "success": true,
        "data": { "categories": ["navigation", "manipulation"] },
    }))
    .into_response()
}

impl MockCloud {
    pub async fn spawn() -> Self {
        let failing = Arc::new(AtomicBool::new(false));
        let requests = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new()
            .route(
                "/api/cloud/settings/{user_id}",
                post(mock_cloud_settings).get(mock_cloud_settings_download),
            )
            .route("/api/cloud/history/{user_id}", post(mock_cloud_history))
            .route("/api/cloud/shared_commands/upload", post(mock_cloud_upload))
            .route(
                "/api/cloud/shared_commands/categories",
                get(mock_cloud_categories),
            )
            .with_state(MockCloudState {
                failing: failing.clone(),
                requests: requests.clone(),
            });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("mock cloud bind failed");
        let addr: SocketAddr = listener.local_addr().expect("mock cloud addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            base_url: format!("http://{addr}/api/cloud"),
            failing,
            requests,
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

/// Spawns the full platform HTTP API on an ephemeral port and returns its
/// base URL.
pub async fn spawn_api(state: Arc<ServerState>) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("api bind failed");
    let addr = listener.local_addr().expect("api addr");
    let app = edgelink::server::app(state);
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}")
}
