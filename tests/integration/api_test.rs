// tests/integration/api_test.rs

//! HTTP API tests: endpoint wiring, status mapping, auth endpoints, and the
//! audit event query.

use super::test_helpers::{MockRobot, TestContext, spawn_api};
use edgelink::server::spawn_background_tasks;
use serde_json::{Value, json};
use std::time::Duration;

async fn poll_until<F>(deadline: Duration, mut check: F)
where
    F: AsyncFnMut() -> bool,
{
    let start = std::time::Instant::now();
    while !check().await {
        if start.elapsed() > deadline {
            panic!("condition not reached in time");
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

#[tokio::test]
async fn test_health_endpoint() {
    let ctx = TestContext::new();
    let base = spawn_api(ctx.state.clone()).await;

    let response = reqwest::get(format!("{base}/api/health")).await.unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"].as_str(), Some("ok"));
    assert_eq!(body["edge_id"].as_str(), Some("edge-local"));
}

#[tokio::test]
async fn test_robot_registry_endpoints() {
    let ctx = TestContext::new();
    let base = spawn_api(ctx.state.clone()).await;
    let http = reqwest::Client::new();

    // Register.
    let response = http
        .post(format!("{base}/api/robots/register"))
        .json(&json!({
            "robot_id": "r1",
            "robot_type": "agv",
            "capabilities": ["move"],
            "endpoint": "http://127.0.0.1:1",
            "protocol": "http",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    // Heartbeat for a known robot.
    let response = http
        .post(format!("{base}/api/robots/heartbeat"))
        .json(&json!({ "robot_id": "r1", "status": "online" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    // Heartbeat for an unknown robot.
    let response = http
        .post(format!("{base}/api/robots/heartbeat"))
        .json(&json!({ "robot_id": "ghost" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    // List and fetch.
    let body: Value = http
        .get(format!("{base}/api/robots"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["count"].as_u64(), Some(1));

    let body: Value = http
        .get(format!("{base}/api/robots?status=offline"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["count"].as_u64(), Some(0));

    let response = http.get(format!("{base}/api/robots/r1")).send().await.unwrap();
    assert_eq!(response.status(), 200);
    let response = http.get(format!("{base}/api/robots/nope")).send().await.unwrap();
    assert_eq!(response.status(), 404);

    // Unregister.
    let response = http
        .delete(format!("{base}/api/robots/r1"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let response = http
        .delete(format!("{base}/api/robots/r1"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn test_command_submission_over_http() {
    let ctx = TestContext::new();
    let robot = MockRobot::spawn(Duration::from_millis(0)).await;
    let base = spawn_api(ctx.state.clone()).await;
    let http = reqwest::Client::new();

    http.post(format!("{base}/api/robots/register"))
        .json(&json!({
            "robot_id": "r1",
            "robot_type": "agv",
            "endpoint": robot.endpoint,
            "protocol": "http",
        }))
        .send()
        .await
        .unwrap();

    let token = ctx.user_with_token("u1", "operator");

    // Unauthenticated request maps to 401.
    let mut request = ctx.command_request("cmd-a", "t-api-a", "r1", "robot.move", "bogus", 5000);
    request["auth"]["token"] = json!("not-a-jwt");
    let response = http
        .post(format!("{base}/api/command"))
        .json(&request)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"].as_str(), Some("ERR_UNAUTHORIZED"));

    // Malformed request maps to 400.
    let response = http
        .post(format!("{base}/api/command"))
        .json(&json!({ "trace_id": "t-bad" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    // A valid request is accepted with 200 and finishes asynchronously.
    let request = ctx.command_request("cmd-ok", "t-api-ok", "r1", "robot.move", &token, 5000);
    let response = http
        .post(format!("{base}/api/command"))
        .json(&request)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["command"]["status"].as_str(), Some("accepted"));

    poll_until(Duration::from_secs(5), async || {
        let body: Value = http
            .get(format!("{base}/api/command/cmd-ok"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        body["status"].as_str() == Some("succeeded")
    })
    .await;

    // Unknown command id is a 404; cancel of a finished command too.
    let response = http
        .get(format!("{base}/api/command/unknown"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
    let response = http
        .delete(format!("{base}/api/command/cmd-ok"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn test_event_query_endpoint() {
    let ctx = TestContext::new();
    spawn_background_tasks(&ctx.state);
    let robot = MockRobot::spawn(Duration::from_millis(0)).await;
    let base = spawn_api(ctx.state.clone()).await;
    let http = reqwest::Client::new();

    http.post(format!("{base}/api/robots/register"))
        .json(&json!({
            "robot_id": "r1",
            "robot_type": "agv",
            "endpoint": robot.endpoint,
            "protocol": "http",
        }))
        .send()
        .await
        .unwrap();

    let token = ctx.user_with_token("u1", "operator");
    let request = ctx.command_request("cmd-ev", "t-events", "r1", "robot.move", &token, 5000);
    http.post(format!("{base}/api/command"))
        .json(&request)
        .send()
        .await
        .unwrap();

    poll_until(Duration::from_secs(5), async || {
        let body: Value = http
            .get(format!("{base}/api/events?trace_id=t-events&category=command"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let events = body["events"].as_array().cloned().unwrap_or_default();
        events
            .iter()
            .any(|e| e["message"].as_str().unwrap_or("").contains("succeeded"))
    })
    .await;

    // Every returned event belongs to the requested trace.
    let body: Value = http
        .get(format!("{base}/api/events?trace_id=t-events"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    for event in body["events"].as_array().unwrap() {
        assert_eq!(event["trace_id"].as_str(), Some("t-events"));
    }
}

#[tokio::test]
async fn test_login_and_refresh_flow() {
    let ctx = TestContext::new();
    let base = spawn_api(ctx.state.clone()).await;
    let http = reqwest::Client::new();

    ctx.state
        .auth
        .register_user("u1", "alice", "correct horse", "operator")
        .unwrap();

    // Bad credentials.
    let response = http
        .post(format!("{base}/api/auth/login"))
        .json(&json!({ "username": "alice", "password": "wrong" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    // Good credentials produce a token pair.
    let response = http
        .post(format!("{base}/api/auth/login"))
        .json(&json!({
            "username": "alice",
            "password": "correct horse",
            "device_id": "laptop-1",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    let refresh_token = body["refresh_token"].as_str().unwrap().to_string();
    assert!(body["access_token"].as_str().is_some());

    // The refresh token mints a new access token.
    let response = http
        .post(format!("{base}/api/auth/refresh"))
        .json(&json!({ "refresh_token": refresh_token }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    // Revocation invalidates it.
    ctx.state.auth.revoke_refresh("u1", Some("laptop-1"));
    let response = http
        .post(format!("{base}/api/auth/refresh"))
        .json(&json!({ "refresh_token": refresh_token }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
}
