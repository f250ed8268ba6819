//! API integration tests for the streamprize Axum endpoints.
//!
//! These tests exercise the public HTTP routes using `tower::ServiceExt::oneshot`
//! to send synthetic requests directly to the router without starting a TCP
//! listener. Each test builds a fresh router with its own engine task and a
//! fake metric source whose value the test sets.
//!
//! # How to run
//!
//! ```bash
//! cargo test --test api_integration
//! ```

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::json;
use streamprize::engine::ViewerCommand;
use streamprize::reward::{Mode, TargetState};
use tower::ServiceExt;

async fn get(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap_or(serde_json::json!(null));
    (status, json)
}

async fn post_json(
    app: Router,
    uri: &str,
    body: serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    let response = app
        .oneshot(
            Request::builder()
                .uri(uri)
                .method("POST")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap_or(serde_json::json!(null));
    (status, json)
}

async fn start(app: &common::TestApp, tracked_id: &str) {
    let reply = app
        .state
        .engine
        .viewer(ViewerCommand::StartMonitoring {
            tracked_id: tracked_id.to_string(),
        })
        .await;
    let first = serde_json::to_value(&reply[0]).unwrap();
    assert_eq!(first["type"], "command_result");
    assert_eq!(first["ok"], true, "start failed: {:?}", first);
}

// == Health and metrics ========================================================

#[tokio::test]
async fn healthz_returns_ok() {
    let app = common::build_test_app(0);
    let response = app
        .router
        .clone()
        .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"ok");
}

#[tokio::test]
async fn metrics_exposes_registry() {
    let app = common::build_test_app(0);
    let response = app
        .router
        .clone()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8_lossy(&body);
    assert!(text.contains("streamprize_rewards_achieved"));
    assert!(text.contains("streamprize_current_metric"));
}

// == State and events ==========================================================

#[tokio::test]
async fn initial_state_is_idle() {
    let app = common::build_test_app(0);
    let (status, json) = get(app.router.clone(), "/api/state").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["monitoring"], false);
    assert_eq!(json["mode"], "auto");
    assert_eq!(json["reward_system_enabled"], true);
    assert_eq!(json["auto_config"]["interval"], 100);
    assert_eq!(json["title"], "CANLI YAYIN BAŞLADI");
    assert!(json["rewards"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn events_log_records_monitoring_start() {
    let app = common::build_test_app(42);
    start(&app, "vid123").await;
    let (status, json) = get(app.router.clone(), "/api/events?limit=10").await;
    assert_eq!(status, StatusCode::OK);
    let kinds: Vec<&str> = json["events"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|e| e["kind"].as_str())
        .collect();
    assert!(kinds.contains(&"monitoring_started"), "kinds: {:?}", kinds);
}

// == Participant ingest ========================================================

#[tokio::test]
async fn participants_refused_when_not_monitoring() {
    let app = common::build_test_app(0);
    let (status, json) = post_json(
        app.router.clone(),
        "/api/chat-participants",
        json!({"videoId": "vid123", "participants": [{"id": "UC1", "name": "ayse"}]}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], false);
    assert!(json["message"].is_string());
}

#[tokio::test]
async fn participants_without_list_refused() {
    let app = common::build_test_app(0);
    start(&app, "vid123").await;
    let (_, json) = post_json(
        app.router.clone(),
        "/api/chat-participants",
        json!({"videoId": "vid123"}),
    )
    .await;
    assert_eq!(json["success"], false);
}

#[tokio::test]
async fn participants_merge_by_id() {
    let app = common::build_test_app(0);
    start(&app, "vid123").await;
    let (_, json) = post_json(
        app.router.clone(),
        "/api/chat-participants",
        json!({"videoId": "vid123", "participants": [
            {"id": "UC1", "name": "ayse"},
            {"id": "UC2", "name": "mehmet"},
            {"name": "no id"}
        ]}),
    )
    .await;
    assert_eq!(json["success"], true);
    assert_eq!(json["count"], 2);

    let (_, json) = post_json(
        app.router.clone(),
        "/api/chat-participants",
        json!({"videoId": "vid123", "participants": [{"id": "UC1", "name": "ayse k."}]}),
    )
    .await;
    assert_eq!(json["count"], 2, "re-sent id must not duplicate");

    let (_, state) = get(app.router.clone(), "/api/state").await;
    assert_eq!(state["participant_count"], 2);
    assert_eq!(state["participants"][0]["display_name"], "ayse k.");
}

#[tokio::test]
async fn participants_for_other_stream_refused() {
    let app = common::build_test_app(0);
    start(&app, "vid123").await;
    let (_, json) = post_json(
        app.router.clone(),
        "/api/chat-participants",
        json!({"videoId": "other", "participants": [{"id": "UC1", "name": "ayse"}]}),
    )
    .await;
    assert_eq!(json["success"], false);
}

#[tokio::test]
async fn heartbeat_is_recorded() {
    let app = common::build_test_app(0);
    start(&app, "vid123").await;
    let (status, json) = post_json(
        app.router.clone(),
        "/api/chat-heartbeat",
        json!({"videoId": "vid123", "status": "alive", "participants_count": 3}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    let snap = common::wait_for(&app.state, |s| s.last_heartbeat.is_some()).await;
    assert!(snap.monitoring);
}

// == Reward flow ===============================================================

#[tokio::test]
async fn polled_metric_awards_auto_targets() {
    let app = common::build_test_app(0);
    start(&app, "vid123").await;
    post_json(
        app.router.clone(),
        "/api/chat-participants",
        json!({"videoId": "vid123", "participants": [
            {"id": "UC1", "name": "ayse"},
            {"id": "UC2", "name": "mehmet"}
        ]}),
    )
    .await;

    app.source.set(250);
    let snap = common::wait_for(&app.state, |s| s.current_metric == 250).await;
    assert_eq!(snap.rewards.len(), 2);
    assert!(snap
        .rewards
        .iter()
        .all(|t| t.state == TargetState::Achieved));
    assert_eq!(snap.winners.len(), 2);
    assert_eq!(snap.next_target, Some(300));
    assert_eq!(snap.progress, 50.0);
}

#[tokio::test]
async fn start_above_zero_earns_nothing_retroactively() {
    let app = common::build_test_app(150);
    start(&app, "vid123").await;
    app.source.set(199);
    let snap = common::wait_for(&app.state, |s| s.current_metric == 199).await;
    assert!(snap.rewards.is_empty());
    app.source.set(200);
    let snap = common::wait_for(&app.state, |s| s.current_metric == 200).await;
    let values: Vec<u64> = snap.rewards.iter().map(|t| t.target_value).collect();
    assert_eq!(values, vec![200]);
    assert_eq!(snap.rewards[0].state, TargetState::Skipped);
}

#[tokio::test]
async fn failed_polls_keep_last_metric() {
    let app = common::build_test_app(10);
    start(&app, "vid123").await;
    app.source.fail(true);
    app.source.set(500);
    tokio::time::sleep(std::time::Duration::from_millis(1500)).await;
    let snap = app.state.engine.snapshot().await.unwrap();
    assert_eq!(snap.current_metric, 10);
    assert!(snap.monitoring);
}

#[tokio::test]
async fn custom_mode_via_commands() {
    let app = common::build_test_app(0);
    start(&app, "vid123").await;
    let engine = &app.state.engine;
    engine.viewer(ViewerCommand::SetMode { mode: Mode::Custom }).await;
    engine
        .viewer(ViewerCommand::AddReward {
            target_value: 1000,
            prize: "Kupa".into(),
        })
        .await;
    engine
        .viewer(ViewerCommand::AddReward {
            target_value: 500,
            prize: "Tişört".into(),
        })
        .await;
    post_json(
        app.router.clone(),
        "/api/chat-participants",
        json!({"videoId": "vid123", "participants": [{"id": "UC1", "name": "ayse"}]}),
    )
    .await;

    app.source.set(700);
    let snap = common::wait_for(&app.state, |s| s.current_metric == 700).await;
    assert_eq!(snap.rewards[0].target_value, 500);
    assert_eq!(snap.rewards[0].state, TargetState::Achieved);
    assert_eq!(snap.rewards[1].state, TargetState::Pending);
    assert_eq!(snap.next_target, Some(1000));
    assert_eq!(snap.progress, 40.0);
}

#[tokio::test]
async fn stop_returns_to_defaults() {
    let app = common::build_test_app(80);
    start(&app, "vid123").await;
    app.state.engine.viewer(ViewerCommand::StopMonitoring).await;
    let (_, json) = get(app.router.clone(), "/api/state").await;
    assert_eq!(json["monitoring"], false);
    assert_eq!(json["current_metric"], 0);
    assert!(json["tracked_id"].is_null());
}

// == Static assets =============================================================

#[tokio::test]
async fn winner_gifs_listed_from_static_dir() {
    let app = common::build_test_app(0);
    let gifs = app.static_dir.path().join("assets/winner-gifs");
    std::fs::create_dir_all(&gifs).unwrap();
    std::fs::write(gifs.join("party.gif"), b"GIF89a").unwrap();
    std::fs::write(gifs.join(".hidden.gif"), b"GIF89a").unwrap();
    std::fs::write(gifs.join("readme.md"), b"x").unwrap();

    let (status, json) = get(app.router.clone(), "/api/winner-gifs").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json, json!({"gifs": ["party.gif"]}));
}

#[tokio::test]
async fn winner_gifs_empty_without_directory() {
    let app = common::build_test_app(0);
    let (_, json) = get(app.router.clone(), "/api/winner-gifs").await;
    assert_eq!(json, json!({"gifs": []}));
}

#[tokio::test]
async fn static_files_served_from_fallback() {
    let app = common::build_test_app(0);
    std::fs::write(app.static_dir.path().join("index.html"), "<h1>overlay</h1>").unwrap();
    let response = app
        .router
        .clone()
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert!(String::from_utf8_lossy(&body).contains("overlay"));
}

// == Middleware ================================================================

#[tokio::test]
async fn request_id_is_propagated() {
    let app = common::build_test_app(0);
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/healthz")
                .header("x-request-id", "abc-123")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.headers()["x-request-id"], "abc-123");
}

#[tokio::test]
async fn request_id_generated_when_absent() {
    let app = common::build_test_app(0);
    let response = app
        .router
        .clone()
        .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let id = response.headers()["x-request-id"].to_str().unwrap();
    assert_eq!(id.len(), 36);
}

#[tokio::test]
async fn cors_headers_present() {
    let app = common::build_test_app(0);
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/state")
                .header("origin", "http://overlay.local")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.headers()["access-control-allow-origin"], "*");
}

#[tokio::test]
async fn oversized_body_rejected() {
    let app = common::build_test_app(0);
    let big = "x".repeat(2 * 1024 * 1024);
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/chat-participants")
                .method("POST")
                .header("content-type", "application/json")
                .header("content-length", big.len().to_string())
                .body(Body::from(big))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn unknown_route_is_404() {
    let app = common::build_test_app(0);
    let (status, _) = get(app.router.clone(), "/api/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
