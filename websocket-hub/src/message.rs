use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::registry::ConnectionId;

/// Wire tag for a raw text broadcast.
pub const TEXT_MESSAGE: i64 = 1;
/// Wire tag for a structured (JSON) broadcast.
pub const JSON_MESSAGE: i64 = 2;

/// What a peer sends to the hub.
///
/// `message_type` stays an integer here because that is what arrives on the
/// wire; it is narrowed to [`MessageKind`] when the event is dispatched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientPayload {
    pub message_type: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ClientPayload {
    pub fn text(message: impl Into<String>) -> Self {
        Self {
            message_type: TEXT_MESSAGE,
            message: message.into(),
            data: None,
        }
    }

    pub fn structured(message: impl Into<String>) -> Self {
        Self {
            message_type: JSON_MESSAGE,
            message: message.into(),
            data: None,
        }
    }
}

/// The JSON body broadcast for structured messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonResponse {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    Structured,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid message type {0}")]
pub struct InvalidMessageType(pub i64);

impl TryFrom<i64> for MessageKind {
    type Error = InvalidMessageType;

    fn try_from(tag: i64) -> Result<Self, Self::Error> {
        match tag {
            TEXT_MESSAGE => Ok(MessageKind::Text),
            JSON_MESSAGE => Ok(MessageKind::Structured),
            other => Err(InvalidMessageType(other)),
        }
    }
}

/// A payload read from one peer, tagged with where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    pub origin: ConnectionId,
    pub payload: ClientPayload,
}

/// What actually gets written to every peer.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    Text(String),
    Structured(JsonResponse),
}

impl TryFrom<ClientPayload> for OutboundMessage {
    type Error = InvalidMessageType;

    fn try_from(payload: ClientPayload) -> Result<Self, Self::Error> {
        let ClientPayload {
            message_type,
            message,
            data,
        } = payload;

        Ok(match MessageKind::try_from(message_type)? {
            MessageKind::Text => OutboundMessage::Text(message),
            MessageKind::Structured => OutboundMessage::Structured(JsonResponse { message, data }),
        })
    }
}
