//! HTTP API for health checks, Prometheus metrics and per-key status

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};
use watchdog_core::{
    health::{ComponentStatus, HealthRegistry},
    scheduler::KeyView,
    storage::StorageStats,
    WatchdogQuery,
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub query: WatchdogQuery,
}

impl AppState {
    pub fn new(health_registry: HealthRegistry, query: WatchdogQuery) -> Self {
        Self {
            health_registry,
            query,
        }
    }
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    keys: Vec<KeyView>,
    storage: StorageStats,
}

/// Health check response - returns 503 only when a component is unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still operational
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            Vec::new(),
        );
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
}

/// Every key's alarm state, anomaly history and the storage counters
async fn keys(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let keys = state
        .query
        .keys()
        .iter()
        .filter_map(|key| state.query.status(key))
        .collect();

    Json(StatusResponse {
        keys,
        storage: state.query.storage_stats(),
    })
}

async fn key_status(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<Json<KeyView>, StatusCode> {
    state.query.status(&key).map(Json).ok_or(StatusCode::NOT_FOUND)
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/keys", get(keys))
        .route("/keys/:key", get(key_status))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
