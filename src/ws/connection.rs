//! WebSocket connection loop.
//!
//! Drives one [`ConnectionSession`]: prepares it for the requested context,
//! then forwards queued updates to the peer and answers inbound commands
//! until either side closes. Cleanup always runs when the loop ends.

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use super::messages::{WsMessage, WsRequest};
use super::permission::SessionContext;
use super::session::{ConnectionSession, Outbound};
use crate::error::GatewayError;

type WsSink = SplitSink<WebSocket, Message>;

/// Runs the read/write loop for a single WebSocket connection.
pub async fn run_connection(
    socket: WebSocket,
    mut session: ConnectionSession,
    mut outbound: mpsc::Receiver<Outbound>,
    context: SessionContext,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    if let Err(err) = session.prepare(context).await {
        let err = GatewayError::from(err);
        let reply = WsMessage::error("", err.status_code().as_u16(), err.to_string());
        if !send(&mut ws_tx, &reply).await {
            tracing::debug!(session = %session.id(), "peer gone before rejection was sent");
        }
        if let Err(e) = ws_tx.send(Message::Close(None)).await {
            tracing::debug!(session = %session.id(), error = %e, "close frame not sent");
        }
        session.cleanup();
        return;
    }

    loop {
        tokio::select! {
            // Incoming message from client
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let replies = handle_text(&session, text.as_str()).await;
                        if !send_all(&mut ws_tx, &replies).await {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => {}
                }
            }
            // Update queued by the bus handler
            item = outbound.recv() => {
                let replies = match item {
                    Some(Outbound::Message(msg)) => vec![msg],
                    Some(Outbound::Refetch(ids)) => match session.refresh(&ids).await {
                        Ok(replies) => replies,
                        Err(err) => {
                            tracing::warn!(session = %session.id(), error = %err, "refetch failed");
                            Vec::new()
                        }
                    },
                    None => break,
                };
                if !send_all(&mut ws_tx, &replies).await {
                    break;
                }
            }
        }
    }

    session.cleanup();
    tracing::debug!(session = %session.id(), "ws connection closed");
}

/// Handles a text frame from the client and returns the replies.
async fn handle_text(session: &ConnectionSession, text: &str) -> Vec<WsMessage> {
    let request = match serde_json::from_str::<WsRequest>(text) {
        Ok(request) => request,
        Err(err) => {
            let id = serde_json::from_str::<serde_json::Value>(text)
                .ok()
                .and_then(|v| v.get("id").and_then(|id| id.as_str()).map(str::to_string))
                .unwrap_or_default();
            return vec![WsMessage::error(id, 400, format!("malformed command: {err}"))];
        }
    };
    match session.message(&request.id, request.command).await {
        Ok(replies) => replies,
        Err(err) => {
            let err = GatewayError::from(err);
            vec![WsMessage::error(request.id, err.status_code().as_u16(), err.to_string())]
        }
    }
}

async fn send_all(ws_tx: &mut WsSink, messages: &[WsMessage]) -> bool {
    for msg in messages {
        if !send(ws_tx, msg).await {
            return false;
        }
    }
    true
}

/// Sends one message; returns `false` once the peer is gone.
async fn send(ws_tx: &mut WsSink, msg: &WsMessage) -> bool {
    let json = match serde_json::to_string(msg) {
        Ok(json) => json,
        Err(err) => {
            tracing::error!(error = %err, "cannot serialize ws message");
            return true;
        }
    };
    ws_tx.send(Message::text(json)).await.is_ok()
}
