//! Read-only state, event log, and winner animation listing.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use super::AppState;

const WINNER_GIFS_DIR: &str = "assets/winner-gifs";

pub(super) async fn handler_api_state(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.engine.snapshot().await {
        Some(snapshot) => Json(snapshot).into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"error": "engine unavailable"})),
        )
            .into_response(),
    }
}

#[derive(Deserialize)]
pub(super) struct EventsQuery {
    limit: Option<usize>,
}

pub(super) async fn handler_api_events(
    State(state): State<Arc<AppState>>,
    Query(params): Query<EventsQuery>,
) -> impl IntoResponse {
    let limit = params.limit.unwrap_or(50).min(200);
    Json(serde_json::json!({
        "events": state.event_bus.recent_events(limit),
    }))
}

#[derive(Serialize)]
pub(super) struct WinnerGifs {
    gifs: Vec<String>,
}

pub(super) async fn handler_api_winner_gifs(
    State(state): State<Arc<AppState>>,
) -> Json<WinnerGifs> {
    let gifs = match &state.static_dir {
        Some(dir) => list_gifs(&dir.join(WINNER_GIFS_DIR)).await,
        None => Vec::new(),
    };
    Json(WinnerGifs { gifs })
}

/// Non-hidden `.gif` file names in `dir`, sorted. A missing directory is empty.
async fn list_gifs(dir: &Path) -> Vec<String> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(e) => e,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "cannot read winner GIF directory");
            return Vec::new();
        }
    };
    let mut gifs = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.starts_with('.') && name.to_lowercase().ends_with(".gif") {
            gifs.push(name);
        }
    }
    gifs.sort();
    info!(count = gifs.len(), "winner GIFs listed");
    gifs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lists_only_visible_gifs() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.gif", "a.GIF", ".hidden.gif", "notes.txt"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        assert_eq!(list_gifs(dir.path()).await, vec!["a.GIF", "b.gif"]);
    }

    #[tokio::test]
    async fn missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(list_gifs(&dir.path().join("nope")).await.is_empty());
    }
}
