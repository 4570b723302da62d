//! Integration tests for the presence agent HTTP server

use apc_agent::server::{run, RunningServer, ServerConfig};
use apc_agent::VirtualCursor;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

const TOKEN: &str = "test-token";

async fn start_server(token: Option<&str>) -> (RunningServer, String, Arc<VirtualCursor>) {
    let mut config = ServerConfig::new(SocketAddr::from(([127, 0, 0, 1], 0)));
    config.engine.tick = Duration::from_millis(50);
    config.status_interval = Duration::from_millis(200);
    if let Some(token) = token {
        config = config.with_token(token);
    }

    let cursor = Arc::new(VirtualCursor::new());
    let server = run(config, Some(cursor.clone()))
        .await
        .expect("Failed to start server");
    let base = format!("http://{}", server.addr);
    (server, base, cursor)
}

async fn get_json(client: &reqwest::Client, url: String) -> Value {
    client
        .get(url)
        .bearer_auth(TOKEN)
        .send()
        .await
        .expect("Failed to send request")
        .json()
        .await
        .expect("Failed to parse JSON")
}

async fn post(client: &reqwest::Client, url: String, body: Value) -> reqwest::Response {
    client
        .post(url)
        .bearer_auth(TOKEN)
        .json(&body)
        .send()
        .await
        .expect("Failed to send request")
}

fn actions(logs: &Value) -> Vec<String> {
    logs["entries"]
        .as_array()
        .expect("entries array")
        .iter()
        .map(|e| e["action"].as_str().unwrap_or_default().to_string())
        .collect()
}

#[tokio::test]
async fn test_health_endpoint_is_open() {
    let (server, base, _) = start_server(Some(TOKEN)).await;

    let response = reqwest::get(format!("{base}/health"))
        .await
        .expect("Failed to send request");
    assert!(response.status().is_success());

    let body: Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["status"], "ok");
    assert!(body["version"].as_str().is_some());

    server.shutdown().await;
}

#[tokio::test]
async fn test_unauthorized_requests_do_not_mutate() {
    let (server, base, _) = start_server(Some(TOKEN)).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{base}/session/start"))
        .bearer_auth("wrong")
        .json(&json!({ "mode": "focus" }))
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);
    let body: Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["error"], "unauthorized");

    let response = client
        .get(format!("{base}/status"))
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);

    let status = get_json(&client, format!("{base}/status")).await;
    assert_eq!(status["state"], "idle");
    let logs = get_json(&client, format!("{base}/logs")).await;
    assert!(actions(&logs).is_empty());

    server.shutdown().await;
}

#[tokio::test]
async fn test_open_api_without_token() {
    let (server, base, _) = start_server(None).await;

    let response = reqwest::get(format!("{base}/status"))
        .await
        .expect("Failed to send request");
    assert!(response.status().is_success());

    server.shutdown().await;
}

#[tokio::test]
async fn test_session_lifecycle() {
    let (server, base, cursor) = start_server(Some(TOKEN)).await;
    let client = reqwest::Client::new();

    let response = post(&client, format!("{base}/session/start"), json!({ "mode": "focus" })).await;
    assert!(response.status().is_success());
    let body: Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["status"], "started");

    let status = get_json(&client, format!("{base}/status")).await;
    assert_eq!(status["state"], "active");
    assert_eq!(status["mode"], "focus");
    assert_eq!(status["policyLocked"], false);
    assert!(status["startedAt"].as_str().is_some());

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(cursor.sleep_prevented());
    let seen = actions(&get_json(&client, format!("{base}/logs")).await);
    assert_eq!(seen[0], "session_start");
    assert_eq!(seen[1], "engine_start");
    assert!(seen.iter().any(|a| a == "micro_move"));

    let response = post(&client, format!("{base}/session/stop"), json!({})).await;
    let body: Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["status"], "stopped");

    tokio::time::sleep(Duration::from_millis(200)).await;
    let status = get_json(&client, format!("{base}/status")).await;
    assert_eq!(status["state"], "idle");
    assert!(status["startedAt"].is_null());
    assert!(!cursor.sleep_prevented());

    let seen = actions(&get_json(&client, format!("{base}/logs")).await);
    let tail = &seen[seen.len() - 2..];
    assert!(tail.contains(&"engine_stop".to_string()));
    assert!(tail.contains(&"session_stop".to_string()));

    server.shutdown().await;
}

#[tokio::test]
async fn test_start_conflicts_and_policy_lock() {
    let (server, base, _) = start_server(Some(TOKEN)).await;
    let client = reqwest::Client::new();

    let response = post(&client, format!("{base}/session/start"), json!({ "mode": "focus" })).await;
    assert!(response.status().is_success());

    let response = post(&client, format!("{base}/session/start"), json!({ "mode": "focus" })).await;
    assert_eq!(response.status(), reqwest::StatusCode::CONFLICT);
    let body: Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["code"], "ALREADY_ACTIVE");

    let response = post(&client, format!("{base}/policy/lock"), json!({ "locked": true })).await;
    let body: Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["status"], "policy_locked");

    let status = get_json(&client, format!("{base}/status")).await;
    assert_eq!(status["state"], "paused");
    assert_eq!(status["policyLocked"], true);

    let response = post(&client, format!("{base}/session/start"), json!({ "mode": "focus" })).await;
    assert_eq!(response.status(), reqwest::StatusCode::FORBIDDEN);
    let body: Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["code"], "POLICY_LOCKED");

    let response = post(&client, format!("{base}/policy/lock"), json!({ "locked": false })).await;
    let body: Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["status"], "policy_unlocked");

    server.shutdown().await;
}

#[tokio::test]
async fn test_malformed_payloads_rejected() {
    let (server, base, _) = start_server(Some(TOKEN)).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{base}/session/start"))
        .bearer_auth(TOKEN)
        .header("Content-Type", "application/json")
        .body("{not json")
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["code"], "INVALID_PAYLOAD");

    let response = post(&client, format!("{base}/policy/lock"), json!({ "locked": "yes" })).await;
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

    let status = get_json(&client, format!("{base}/status")).await;
    assert_eq!(status["state"], "idle");
    assert_eq!(status["policyLocked"], false);

    server.shutdown().await;
}

#[tokio::test]
async fn test_logs_since_filter() {
    let (server, base, _) = start_server(Some(TOKEN)).await;
    let client = reqwest::Client::new();

    post(&client, format!("{base}/session/stop"), json!({})).await;

    let logs = get_json(&client, format!("{base}/logs?since=2000-01-01T00:00:00Z")).await;
    assert_eq!(actions(&logs), ["session_stop"]);

    let logs = get_json(&client, format!("{base}/logs?since=2999-01-01T00:00:00Z")).await;
    assert!(actions(&logs).is_empty());

    let response = client
        .get(format!("{base}/logs?since=yesterday"))
        .bearer_auth(TOKEN)
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

    server.shutdown().await;
}

#[tokio::test]
async fn test_status_stream() {
    let (server, base, _) = start_server(Some(TOKEN)).await;
    let client = reqwest::Client::new();

    let mut response = client
        .get(format!("{base}/stream"))
        .bearer_auth(TOKEN)
        .send()
        .await
        .expect("Failed to send request");
    assert!(response.status().is_success());
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "text/event-stream"
    );

    let chunk = tokio::time::timeout(Duration::from_secs(2), response.chunk())
        .await
        .expect("No snapshot delivered")
        .expect("Stream error")
        .expect("Stream ended");
    let text = String::from_utf8_lossy(&chunk);
    assert!(text.contains("event: status"));
    assert!(text.contains(r#""state":"idle""#));

    drop(response);
    server.shutdown().await;
}

#[tokio::test]
async fn test_cors_headers() {
    let (server, base, _) = start_server(Some(TOKEN)).await;
    let client = reqwest::Client::new();

    // Preflight succeeds without credentials.
    let response = client
        .request(reqwest::Method::OPTIONS, format!("{base}/session/start"))
        .header("Origin", "https://console.example")
        .header("Access-Control-Request-Method", "POST")
        .send()
        .await
        .expect("Failed to send request");
    assert!(
        response.status().is_success() || response.status() == reqwest::StatusCode::NO_CONTENT,
        "CORS preflight failed: {}",
        response.status()
    );
    assert_eq!(
        response.headers()["access-control-allow-origin"],
        "https://console.example"
    );

    let response = client
        .get(format!("{base}/status"))
        .bearer_auth(TOKEN)
        .header("Origin", "https://console.example")
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(
        response.headers()["access-control-allow-origin"],
        "https://console.example"
    );

    server.shutdown().await;
}
