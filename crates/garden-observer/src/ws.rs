//! `WebSocket` handler for the live viewer channel.
//!
//! Clients connect to `GET /ws`. The stream opens with one
//! `boundary_completed` message (grid included) per complete garden and
//! continues with every later [`SyncEvent`](garden_types::SyncEvent), each
//! as a JSON text frame.
//!
//! A viewer that falls more than the configured queue capacity behind is
//! evicted by the hub; its socket is closed and the client is expected to
//! reconnect for a fresh snapshot.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use tracing::{debug, warn};

use crate::state::AppState;

/// Upgrade an HTTP request to a `WebSocket` viewer connection.
///
/// # Route
///
/// `GET /ws`
pub async fn ws_viewer(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_ws(socket, state))
}

/// Handle the `WebSocket` lifecycle: join the hub and forward each event
/// as a text frame until either side goes away.
async fn handle_ws(mut socket: WebSocket, state: Arc<AppState>) {
    let mut session = state.gateway().connect_viewer().await;
    let viewer_id = session.id();
    debug!(viewer_id = %viewer_id, "WebSocket viewer connected");

    loop {
        tokio::select! {
            event = session.recv() => {
                let Some(event) = event else {
                    debug!(viewer_id = %viewer_id, "Viewer evicted, closing socket");
                    let _ = socket.send(Message::Close(None)).await;
                    return;
                };
                let json = match serde_json::to_string(event.as_ref()) {
                    Ok(j) => j,
                    Err(e) => {
                        warn!(viewer_id = %viewer_id, "Failed to serialize sync event: {e}");
                        continue;
                    }
                };
                if socket.send(Message::Text(json.into())).await.is_err() {
                    debug!(viewer_id = %viewer_id, "WebSocket viewer disconnected (send failed)");
                    return;
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(viewer_id = %viewer_id, "WebSocket viewer disconnected");
                        return;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            debug!(viewer_id = %viewer_id, "WebSocket viewer disconnected (pong failed)");
                            return;
                        }
                    }
                    Some(Err(e)) => {
                        debug!(viewer_id = %viewer_id, "WebSocket error: {e}");
                        return;
                    }
                    _ => {
                        // Viewers are read-only; inbound text and binary frames are ignored.
                    }
                }
            }
        }
    }
}
