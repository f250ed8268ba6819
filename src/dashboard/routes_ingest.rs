//! Ingest endpoints the participant source posts to.
//!
//! | Endpoint | Body | Reply |
//! |----------|------|-------|
//! | `POST /api/chat-participants` | `{videoId, participants: [...]}` | `{success, count}` or `{success: false, message}` |
//! | `POST /api/chat-heartbeat` | `{videoId, status, stats?, participants_count?}` | `{success: true}` |
//!
//! Both reply 200 even when the batch is refused; the source only reads
//! `success`.

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use super::AppState;
use crate::participants::IncomingParticipant;

#[derive(Deserialize)]
pub(super) struct ParticipantsBody {
    #[serde(default, alias = "videoId")]
    tracked_id: Option<String>,
    #[serde(default)]
    participants: Option<Vec<IncomingParticipant>>,
}

pub(super) async fn handler_chat_participants(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ParticipantsBody>,
) -> Json<Value> {
    let (tracked_id, batch) = match (body.tracked_id, body.participants) {
        (Some(id), Some(batch)) => (id, batch),
        _ => {
            return Json(json!({
                "success": false,
                "message": "Invalid video ID or no participants",
            }))
        }
    };
    match state.engine.submit_participants(tracked_id, batch).await {
        Ok(count) => Json(json!({"success": true, "count": count})),
        Err(message) => Json(json!({"success": false, "message": message})),
    }
}

#[derive(Deserialize)]
pub(super) struct HeartbeatBody {
    #[serde(default, alias = "videoId")]
    tracked_id: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    stats: Option<Value>,
    #[serde(default)]
    participants_count: Option<u64>,
}

pub(super) async fn handler_chat_heartbeat(
    State(state): State<Arc<AppState>>,
    Json(body): Json<HeartbeatBody>,
) -> Json<Value> {
    let delivered = state
        .engine
        .heartbeat(
            body.tracked_id,
            body.status,
            body.participants_count,
            body.stats,
        )
        .await;
    Json(json!({"success": delivered}))
}
