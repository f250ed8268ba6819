//! # Dashboard — Web Server for Viewers and the Participant Source
//!
//! Runs the Axum HTTP server: the `/ws` viewer channel, the ingest endpoints
//! the participant source posts to, read-only state and diagnostics, health
//! and Prometheus metrics, and (optionally) the static viewer frontend.
//!
//! All session mutations go through the [`EngineHandle`]; handlers never
//! touch session state directly.

mod routes_health;
mod routes_ingest;
mod routes_status;
mod websocket;

use crate::config::AppConfig;
use crate::engine::{Engine, EngineHandle};
use crate::events::EventBus;
use crate::metric_source::{MetricSource, WatchPageSource};
use crate::prom_metrics::{self, Metrics};
use anyhow::Result;
use axum::extract::Request;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::routing::{get, post};
use axum::Router;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::services::ServeDir;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn, Instrument};

pub struct AppState {
    pub engine: EngineHandle,
    pub event_bus: Arc<EventBus>,
    pub prom_metrics: Arc<Metrics>,
    pub static_dir: Option<PathBuf>,
}

impl AppState {
    /// Spawn the engine with `source` and wire shared state around it.
    pub fn start(config: &AppConfig, source: Arc<dyn MetricSource>) -> Arc<Self> {
        let event_bus = Arc::new(EventBus::new(config.server.broadcast_capacity));
        let prom_metrics = Arc::new(Metrics::new());
        let engine = Engine::spawn(
            config.engine_settings(),
            source,
            Arc::clone(&event_bus),
            Arc::clone(&prom_metrics),
        );
        Arc::new(AppState {
            engine,
            event_bus,
            prom_metrics,
            static_dir: config.server.static_dir.clone(),
        })
    }
}

/// Middleware that records HTTP request duration into the Prometheus histogram,
/// generates (or propagates) a request ID for correlation, and wraps the
/// request in a tracing span.
async fn metrics_middleware(
    axum::extract::State(state): axum::extract::State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> axum::response::Response {
    let request_id = req
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let method = req.method().to_string();
    let raw_path = req.uri().path().to_string();
    let norm_path = normalize_path(&raw_path);
    let start = std::time::Instant::now();

    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %method,
        path = %raw_path,
    );
    let mut response = next.run(req).instrument(span).await;

    state
        .prom_metrics
        .http_request_duration
        .get_or_create(&prom_metrics::HttpLabel {
            method,
            path: norm_path,
        })
        .observe(start.elapsed().as_secs_f64());

    if let Ok(value) = request_id.parse() {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

/// Collapse static-asset paths so the histogram does not get one label per file.
fn normalize_path(path: &str) -> String {
    match path {
        "/" | "/ws" | "/metrics" | "/healthz" => path.to_string(),
        p if p.starts_with("/api/") => p.to_string(),
        _ => "/static".to_string(),
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let mut app = Router::new()
        .route("/ws", get(websocket::handler_ws))
        .route("/api/state", get(routes_status::handler_api_state))
        .route("/api/events", get(routes_status::handler_api_events))
        .route(
            "/api/winner-gifs",
            get(routes_status::handler_api_winner_gifs),
        )
        .route(
            "/api/chat-participants",
            post(routes_ingest::handler_chat_participants),
        )
        .route(
            "/api/chat-heartbeat",
            post(routes_ingest::handler_chat_heartbeat),
        )
        .route("/healthz", get(routes_health::handler_healthz))
        .route("/metrics", get(routes_health::handler_metrics));

    if let Some(dir) = &state.static_dir {
        app = app.fallback_service(ServeDir::new(dir).append_index_html_on_directories(true));
    }

    app.layer(
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    )
    .layer(CatchPanicLayer::new())
    .layer(axum::middleware::from_fn_with_state(
        state.clone(),
        metrics_middleware,
    ))
    .layer(TraceLayer::new_for_http())
    .layer(RequestBodyLimitLayer::new(1024 * 1024))
    .layer(TimeoutLayer::with_status_code(
        StatusCode::REQUEST_TIMEOUT,
        Duration::from_secs(30),
    ))
    .with_state(state)
}

pub async fn run(config: AppConfig) -> Result<()> {
    let source = WatchPageSource::new(
        &config.metric.watch_url,
        &config.metric.user_agent,
        Duration::from_secs(config.metric.request_timeout_secs),
    )?;
    let state = AppState::start(&config, Arc::new(source));
    let app = build_router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.server.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(
        port = config.server.port,
        poll_interval_secs = config.metric.poll_interval_secs,
        participant_source = config.participants.enabled,
        "server running"
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("received SIGINT, shutting down"),
                    _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                ctrl_c.await.ok();
                info!("received SIGINT, shutting down");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("received SIGINT, shutting down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_path_preserves_api_routes() {
        assert_eq!(normalize_path("/api/state"), "/api/state");
        assert_eq!(normalize_path("/api/chat-participants"), "/api/chat-participants");
        assert_eq!(normalize_path("/metrics"), "/metrics");
        assert_eq!(normalize_path("/ws"), "/ws");
    }

    #[test]
    fn normalize_path_keeps_api_paths_verbatim() {
        assert_eq!(normalize_path("/api/winner-gifs"), "/api/winner-gifs");
        assert_eq!(normalize_path("/api/events"), "/api/events");
    }

    #[test]
    fn normalize_path_collapses_static_assets() {
        assert_eq!(normalize_path("/assets/winner-gifs/a.gif"), "/static");
        assert_eq!(normalize_path("/index.html"), "/static");
        assert_eq!(normalize_path("/"), "/");
    }
}
