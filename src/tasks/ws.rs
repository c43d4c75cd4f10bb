//! WebSocket stream of task changes.
//!
//! Each observer gets the full current snapshot (`init`) before any
//! incremental event, then every `task_update` the store broadcasts. An
//! observer that falls behind the broadcast ring is re-synced with a
//! fresh `init` instead of being disconnected — dropped intermediate
//! updates are safe to lose because every message carries complete state.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::model::{Scope, TaskStreamMessage};
use super::store::TaskStore;

/// Idle keep-alive interval for long-lived observer connections.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Shared state for the task stream.
#[derive(Clone)]
pub struct StreamState {
    pub store: Arc<TaskStore>,
}

/// Build the Axum router for `/ws/tasks`.
pub fn stream_routes(store: Arc<TaskStore>) -> Router {
    Router::new()
        .route("/ws/tasks", get(ws_handler))
        .with_state(StreamState { store })
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<StreamState>) -> impl IntoResponse {
    info!("Task stream observer connecting");
    ws.on_upgrade(|socket| handle_socket(socket, state.store))
}

/// Send the full current snapshot as an `init` message.
async fn send_init(socket: &mut WebSocket, store: &TaskStore) -> bool {
    let tasks = store.list(Scope::Current).await;
    let msg = TaskStreamMessage::Init { tasks };
    match serde_json::to_string(&msg) {
        Ok(json) => socket.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            warn!(error = %e, "Failed to serialize init snapshot");
            false
        }
    }
}

async fn handle_socket(mut socket: WebSocket, store: Arc<TaskStore>) {
    let observer = Uuid::new_v4();
    info!(observer = %observer, "Task stream observer connected");

    // Subscribe before the initial snapshot so no mutation falls between
    // the two; a duplicate update after the snapshot is harmless.
    let mut rx = store.subscribe();

    if !send_init(&mut socket, &store).await {
        warn!(observer = %observer, "Failed to send initial snapshot, observer disconnected");
        return;
    }

    let mut keepalive = tokio::time::interval(KEEPALIVE_INTERVAL);
    keepalive.tick().await; // first tick completes immediately

    loop {
        tokio::select! {
            // Forward broadcast events to this observer
            result = rx.recv() => {
                match result {
                    Ok(msg) => {
                        if let Ok(json) = serde_json::to_string(&msg) {
                            if socket.send(Message::Text(json.into())).await.is_err() {
                                debug!(observer = %observer, "Observer disconnected during send");
                                break;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(observer = %observer, missed = n, "Observer lagged behind broadcast, re-syncing");
                        if !send_init(&mut socket, &store).await {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("Task broadcast channel closed");
                        break;
                    }
                }
            }

            // The stream is one-way; observers only send control frames
            result = socket.recv() => {
                match result {
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!(observer = %observer, "Task stream observer disconnected");
                        break;
                    }
                    Some(Ok(Message::Text(text))) => {
                        debug!(observer = %observer, text = %text, "Ignoring unexpected stream message");
                    }
                    Some(Err(e)) => {
                        warn!(observer = %observer, error = %e, "Task stream error");
                        break;
                    }
                    _ => {}
                }
            }

            // Idle keep-alive so intermediaries don't reap the connection
            _ = keepalive.tick() => {
                if socket.send(Message::Ping(Vec::new().into())).await.is_err() {
                    debug!(observer = %observer, "Observer gone at keep-alive");
                    break;
                }
            }
        }
    }

    info!(observer = %observer, "Task stream connection closed");
}
