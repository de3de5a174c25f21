//! WebSocket message types: envelope and inbound commands.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Top-level WebSocket message envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WsMessage {
    /// Client-provided ID for requests; server-generated for events.
    pub id: String,
    /// Message type discriminator.
    #[serde(rename = "type")]
    pub msg_type: WsMessageType,
    /// ISO-8601 timestamp.
    pub timestamp: DateTime<Utc>,
    /// Variant-specific payload.
    pub payload: Value,
}

impl WsMessage {
    /// Server-initiated event with a fresh id.
    #[must_use]
    pub fn event(payload: Value) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), WsMessageType::Event, payload)
    }

    /// Response to the client request `id`.
    #[must_use]
    pub fn response(id: impl Into<String>, payload: Value) -> Self {
        Self::with_id(id.into(), WsMessageType::Response, payload)
    }

    /// Error reply with a numeric `code`.
    #[must_use]
    pub fn error(id: impl Into<String>, code: u16, message: impl Into<String>) -> Self {
        Self::with_id(
            id.into(),
            WsMessageType::Error,
            serde_json::json!({ "code": code, "message": message.into() }),
        )
    }

    fn with_id(id: String, msg_type: WsMessageType, payload: Value) -> Self {
        Self {
            id,
            msg_type,
            timestamp: Utc::now(),
            payload,
        }
    }
}

/// Discriminator for WebSocket message types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WsMessageType {
    /// Client → Server command.
    Command,
    /// Server → Client response to a command.
    Response,
    /// Server → Client pushed update.
    Event,
    /// Server → Client error.
    Error,
}

/// Commands that a client can send over a session.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum WsCommand {
    /// Re-send the current state of the given entities.
    Refresh {
        /// Entity ids to refresh.
        ids: Vec<String>,
    },
    /// Liveness probe; answered with `{"pong": true}`.
    Ping,
}

/// Inbound frame: a command plus an optional request id echoed back in the
/// response.
#[derive(Debug, Clone, Deserialize)]
pub struct WsRequest {
    /// Request id.
    #[serde(default)]
    pub id: String,
    /// The command.
    #[serde(flatten)]
    pub command: WsCommand,
}
