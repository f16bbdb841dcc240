//! WebSocket feed of execution lifecycle events.
//!
//! Each connected client receives every [`steward_core::ExecutionEvent`] as
//! a JSON text frame. A client that falls behind the broadcast buffer skips
//! the missed events and keeps receiving; the engine never blocks on slow
//! consumers.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use tokio::sync::broadcast::error::RecvError;

use crate::AppState;

/// Handler for GET /ws/events.
pub async fn events_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| forward_events(socket, state))
}

async fn forward_events(socket: WebSocket, state: Arc<AppState>) {
    use futures::{SinkExt, StreamExt};

    let mut events = state.coordinator.events().subscribe();
    let (mut sender, mut receiver) = socket.split();
    log::debug!("websocket client subscribed to execution events");

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    let payload = match serde_json::to_string(&event) {
                        Ok(payload) => payload,
                        Err(e) => {
                            log::warn!("failed to serialize execution event: {e}");
                            continue;
                        }
                    };
                    if sender.send(Message::Text(payload.into())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    log::warn!("websocket client lagged; skipped {missed} event(s)");
                }
                Err(RecvError::Closed) => break,
            },
            // Drain (and ignore) client frames so a disconnect is noticed
            // even when no events are flowing.
            message = receiver.next() => match message {
                Some(Ok(_)) => continue,
                _ => break,
            },
        }
    }

    log::debug!("websocket client disconnected");
}
