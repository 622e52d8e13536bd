use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::{registry::ConnectionId, transport::TransportError};

/// Everything that can go wrong inside the hub. None of these are fatal; each
/// is resolved locally and then reported through an [`ErrorSink`].
#[derive(Debug, Error)]
pub enum HubError {
    #[error("websocket upgrade failed: {0}")]
    Upgrade(#[source] TransportError),

    #[error("read from {origin} failed: {source}")]
    Read {
        origin: ConnectionId,
        #[source]
        source: TransportError,
    },

    #[error("write to {peer} failed: {source}")]
    Write {
        peer: ConnectionId,
        #[source]
        source: TransportError,
    },

    #[error("write to {peer} timed out after {timeout:?}")]
    WriteTimeout { peer: ConnectionId, timeout: Duration },

    #[error("malformed message from {origin}: {source}")]
    Decode {
        origin: ConnectionId,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid message type {message_type} received from {origin}")]
    InvalidMessageType {
        origin: ConnectionId,
        message_type: i64,
    },

    #[error("failed to encode broadcast: {0}")]
    Encode(#[source] serde_json::Error),
}

pub type ErrorReceiver = mpsc::UnboundedReceiver<HubError>;

/// Out-of-band channel for failures that have no caller to return to.
#[derive(Debug, Clone)]
pub struct ErrorSink {
    tx: mpsc::UnboundedSender<HubError>,
}

impl ErrorSink {
    pub fn channel() -> (Self, ErrorReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Hands the error to whoever drains the sink. Nobody listening is fine.
    pub fn report(&self, error: HubError) {
        let _ = self.tx.send(error);
    }
}
