//! # Health & Metrics Endpoints
//!
//! | Endpoint | Purpose |
//! |----------|---------|
//! | `GET /healthz` | Liveness: process is alive and the engine answers |
//! | `GET /metrics` | Prometheus scraping endpoint |

use super::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use std::sync::Arc;
use std::time::Duration;

/// Liveness probe. Returns 503 when the engine task stops answering.
pub async fn handler_healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match tokio::time::timeout(Duration::from_secs(2), state.engine.snapshot()).await {
        Ok(Some(_)) => (StatusCode::OK, "ok"),
        Ok(None) => (StatusCode::SERVICE_UNAVAILABLE, "engine stopped"),
        Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "engine timeout"),
    }
}

/// Prometheus metrics in text exposition format.
pub async fn handler_metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let body = state.prom_metrics.encode();
    (
        StatusCode::OK,
        [(
            "content-type",
            "application/openmetrics-text; version=1.0.0; charset=utf-8",
        )],
        body,
    )
}
