//! WebSocket Watch Channel
//!
//! Each connection becomes one hub subscriber. Registry events are pushed as
//! JSON text frames; inbound frames are ignored apart from Close.

use crate::api::rest::AppState;
use crate::registry::{Registry, RegistryEvent, Subscription};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Upgrade the connection and attach it to the event hub
pub(crate) async fn watch(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| serve_watcher(socket, state.registry))
}

fn encode(event: &RegistryEvent) -> Option<Message> {
    match serde_json::to_string(event) {
        Ok(text) => Some(Message::Text(text)),
        Err(e) => {
            warn!(error = %e, action = %event.action, "Failed to encode event");
            None
        }
    }
}

async fn serve_watcher(socket: WebSocket, registry: Arc<Registry>) {
    let Subscription { id, mut receiver } = registry.subscribe();
    let (mut sink, mut inbound) = socket.split();
    info!(subscriber = id, "Watcher connected");

    loop {
        tokio::select! {
            event = receiver.recv() => {
                // None: the hub dropped this subscriber or is shutting down
                let Some(event) = event else { break };
                let Some(message) = encode(&event) else { continue };
                if let Err(e) = sink.send(message).await {
                    debug!(subscriber = id, error = %e, "Watcher send failed");
                    break;
                }
            }
            frame = inbound.next() => match frame {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(subscriber = id, error = %e, "Watcher read failed");
                    break;
                }
            },
        }
    }

    registry.unsubscribe(id);
    let _ = sink.close().await;
    info!(subscriber = id, "Watcher disconnected");
}
