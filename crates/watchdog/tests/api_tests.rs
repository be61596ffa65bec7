//! Integration tests for the watchdog API endpoints

#[allow(dead_code)]
#[path = "../src/api.rs"]
mod api;

use api::{create_router, AppState};
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use std::sync::Arc;
use tower::ServiceExt;
use watchdog_core::{
    health::{Component, HealthRegistry},
    observability::WatchdogMetrics,
    scheduler::{KeyView, StatusBoard},
    storage::{BlockCodec, MemoryBackend, PolicySet, RetentionPolicy, RetryPolicy, StorageEngine},
    WatchdogQuery,
};

async fn setup_test_app() -> (Router, Arc<AppState>, Arc<StatusBoard>) {
    let health_registry = HealthRegistry::new();
    health_registry.register_all().await;

    let engine = StorageEngine::new(
        Arc::new(MemoryBackend::new()),
        BlockCodec::default(),
        RetryPolicy::default(),
        PolicySet::new(RetentionPolicy::defaults()),
    );
    let board = Arc::new(StatusBoard::new());
    board.register(KeyView::new("total:s", 1, 20.0, 1_700_000_000));

    let query = WatchdogQuery::new(Arc::new(engine), board.clone());
    let state = Arc::new(AppState::new(health_registry, query));
    let router = create_router(state.clone());

    (router, state, board)
}

async fn get(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

#[tokio::test]
async fn test_healthz_returns_ok_when_healthy() {
    let (app, _state, _board) = setup_test_app().await;

    let (status, body) = get(app, "/healthz").await;
    assert_eq!(status, StatusCode::OK);

    let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "healthy");
}

#[tokio::test]
async fn test_healthz_returns_ok_when_storage_degraded() {
    let (app, state, _board) = setup_test_app().await;

    state
        .health_registry
        .set_degraded(Component::Storage, "writes failing for total:s")
        .await;

    // Degraded still returns 200 (operational)
    let (status, body) = get(app, "/healthz").await;
    assert_eq!(status, StatusCode::OK);

    let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "degraded");
    assert_eq!(
        health["components"]["storage"]["message"],
        "writes failing for total:s"
    );
}

#[tokio::test]
async fn test_healthz_returns_503_when_unhealthy() {
    let (app, state, _board) = setup_test_app().await;

    state
        .health_registry
        .set_unhealthy(Component::Scheduler, "No sampling tasks running")
        .await;

    let (status, body) = get(app, "/healthz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "unhealthy");
}

#[tokio::test]
async fn test_readyz_follows_scheduler_lifecycle() {
    let (app, state, _board) = setup_test_app().await;

    let (status, body) = get(app.clone(), "/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let readiness: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(readiness["ready"], false);

    state.health_registry.set_ready(true).await;
    let (status, body) = get(app, "/readyz").await;
    assert_eq!(status, StatusCode::OK);
    let readiness: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(readiness["ready"], true);
}

#[tokio::test]
async fn test_metrics_endpoint_returns_prometheus_format() {
    let (app, _state, _board) = setup_test_app().await;

    let metrics = WatchdogMetrics::new();
    metrics.observe_tick_latency(0.002);
    metrics.inc_threshold_violations();
    metrics.set_keys_monitored(1);

    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let content_type = response.headers().get("content-type").unwrap();
    assert!(content_type.to_str().unwrap().contains("text/plain"));

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let metrics_text = String::from_utf8(body.to_vec()).unwrap();

    assert!(metrics_text.contains("rate_watchdog_tick_latency_seconds_bucket"));
    assert!(metrics_text.contains("rate_watchdog_threshold_violations_total"));
    assert!(metrics_text.contains("rate_watchdog_keys_monitored"));
}

#[tokio::test]
async fn test_keys_lists_status_and_storage_counters() {
    let (app, _state, board) = setup_test_app().await;
    board.update("total:s", |view| {
        view.consecutive = 31;
        view.in_alarm = true;
        view.alarm_start = Some(1_700_000_029);
    });

    let (status, body) = get(app, "/keys").await;
    assert_eq!(status, StatusCode::OK);

    let response: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(response["keys"][0]["key"], "total:s");
    assert_eq!(response["keys"][0]["in_alarm"], true);
    assert_eq!(response["keys"][0]["alarm_start"], 1_700_000_029);
    assert_eq!(response["storage"]["points_processed"], 0);
}

#[tokio::test]
async fn test_key_status_returns_404_for_unknown_key() {
    let (app, _state, _board) = setup_test_app().await;

    let (status, body) = get(app.clone(), "/keys/total:s").await;
    assert_eq!(status, StatusCode::OK);
    let view: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(view["max_value"], 20.0);

    let (status, _) = get(app, "/keys/udp:m").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
