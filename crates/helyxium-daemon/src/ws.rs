//! WebSocket handler for real-time updates

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use helyxium_core::{Diff, Snapshot};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::state::AppState;

/// WebSocket message types
#[derive(Serialize)]
#[serde(tag = "type", content = "data")]
enum WsMessage<'a> {
    /// Sent once on connect
    #[serde(rename = "snapshot")]
    Snapshot(&'a Snapshot),
    /// Every completed cycle, including ones with an empty diff
    #[serde(rename = "cycle")]
    Cycle { diff: &'a Diff, snapshot: &'a Snapshot },
    /// Updates were dropped because this client fell behind
    #[serde(rename = "lagged")]
    Lagged { skipped: u64 },
    #[serde(rename = "pong")]
    Pong,
}

impl WsMessage<'_> {
    fn to_text(&self) -> Option<Message> {
        match serde_json::to_string(self) {
            Ok(json) => Some(Message::Text(json.into())),
            Err(e) => {
                warn!(error = %e, "Failed to encode WebSocket message");
                None
            }
        }
    }
}

/// WebSocket upgrade handler
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut updates = state.monitor.subscribe();

    info!("WebSocket client connected");

    // Send current snapshot on connect
    let current = state.monitor.current_snapshot();
    if let Some(msg) = WsMessage::Snapshot(current.as_ref()).to_text() {
        if sender.send(msg).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => {
                let _ = sender.send(Message::Close(None)).await;
                break;
            }

            // Forward cycle updates to client
            update = updates.recv() => {
                let msg = match &update {
                    Ok(update) => WsMessage::Cycle {
                        diff: update.diff.as_ref(),
                        snapshot: update.snapshot.as_ref(),
                    },
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "WebSocket client lagged");
                        WsMessage::Lagged { skipped: *skipped }
                    }
                    Err(RecvError::Closed) => {
                        debug!("Monitor update channel closed");
                        break;
                    }
                };

                if let Some(msg) = msg.to_text() {
                    if sender.send(msg).await.is_err() {
                        break;
                    }
                }
            }

            // Handle incoming messages from client
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Text(text))) => {
                        if text.as_str() == "ping" {
                            if let Some(pong) = WsMessage::Pong.to_text() {
                                if sender.send(pong).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    info!("WebSocket client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_message_shape() {
        let snapshot = Snapshot::empty();
        let Some(Message::Text(text)) = WsMessage::Snapshot(&snapshot).to_text() else {
            panic!("expected a text frame");
        };
        let value: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
        assert_eq!(value["type"], "snapshot");
        assert_eq!(value["data"]["cycle"], 0);
    }

    #[test]
    fn test_lagged_message_shape() {
        let Some(Message::Text(text)) = (WsMessage::Lagged { skipped: 3 }).to_text() else {
            panic!("expected a text frame");
        };
        assert_eq!(text.as_str(), r#"{"type":"lagged","data":{"skipped":3}}"#);
    }
}
