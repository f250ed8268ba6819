//! WebSocket handler: one connection per viewer.
//!
//! On connect the viewer receives a full `state` snapshot. After that the
//! loop multiplexes three streams: broadcast notifications from the
//! [`EventBus`](crate::events::EventBus), commands arriving from the socket,
//! and direct replies to those commands. A per-connection worker applies the
//! viewer's commands in arrival order, so a slow `start_monitoring` never
//! stalls notification delivery.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use super::AppState;
use crate::engine::ViewerCommand;
use crate::events::Notice;

pub(super) async fn handler_ws(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let notif_rx = state.event_bus.subscribe();
    ws.on_upgrade(|socket| ws_loop(socket, state, notif_rx))
}

async fn ws_loop(
    mut socket: WebSocket,
    state: Arc<AppState>,
    mut notif_rx: broadcast::Receiver<String>,
) {
    state.prom_metrics.viewers_connected.inc();
    debug!(viewers = state.event_bus.viewer_count(), "viewer connected");

    if let Some(snapshot) = state.engine.snapshot().await {
        let msg = Notice::State(snapshot).to_json();
        if socket.send(Message::Text(msg.into())).await.is_err() {
            state.prom_metrics.viewers_connected.dec();
            return;
        }
    }

    let (reply_tx, mut reply_rx) = mpsc::channel::<Notice>(64);
    let (cmd_tx, cmd_rx) = mpsc::channel::<ViewerCommand>(32);
    let worker = tokio::spawn(command_worker(state.clone(), cmd_rx, reply_tx.clone()));

    loop {
        tokio::select! {
            result = notif_rx.recv() => {
                match result {
                    Ok(msg) => {
                        if socket.send(Message::Text(msg.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "viewer lagging, notifications dropped");
                    }
                    Err(_) => break,
                }
            }
            Some(notice) = reply_rx.recv() => {
                if socket.send(Message::Text(notice.to_json().into())).await.is_err() {
                    break;
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ViewerCommand>(text.as_str()) {
                            Ok(command) => {
                                debug!(action = command.action(), "viewer command");
                                if cmd_tx.try_send(command).is_err() {
                                    let _ = reply_tx.try_send(Notice::Error {
                                        message: "too many pending commands".to_string(),
                                    });
                                }
                            }
                            Err(e) => {
                                let _ = reply_tx.try_send(Notice::Error {
                                    message: format!("invalid command: {}", e),
                                });
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }

    worker.abort();
    state.prom_metrics.viewers_connected.dec();
    debug!("viewer disconnected");
}

/// Apply one viewer's commands in order and queue the direct replies.
async fn command_worker(
    state: Arc<AppState>,
    mut commands: mpsc::Receiver<ViewerCommand>,
    replies: mpsc::Sender<Notice>,
) {
    while let Some(command) = commands.recv().await {
        for notice in state.engine.viewer(command).await {
            if replies.send(notice).await.is_err() {
                return;
            }
        }
    }
}
