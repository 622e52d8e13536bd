//! Transport boundary between the hub and a peer's duplex channel.
//!
//! The hub never talks to a socket type directly. A connection is handed over
//! as a write half implementing `Sink<Frame>` and a read half implementing
//! `Stream<Item = Result<Frame, TransportError>>`, so the WebSocket adapter
//! below and the in-memory channels used by tests are interchangeable.

use std::{error::Error as StdError, future};

use axum::extract::ws::{Message, WebSocket};
use futures::{Sink, SinkExt, Stream, StreamExt};
use thiserror::Error;

type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// One message read from or written to a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close,
}

/// Failure of the underlying transport while reading, writing or closing.
#[derive(Debug, Error)]
#[error("transport error: {0}")]
pub struct TransportError(#[source] BoxError);

impl TransportError {
    pub fn new<E>(error: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self(error.into())
    }
}

impl From<Message> for Frame {
    fn from(message: Message) -> Self {
        match message {
            Message::Text(text) => Frame::Text(text),
            Message::Binary(bytes) => Frame::Binary(bytes),
            Message::Ping(bytes) => Frame::Ping(bytes),
            Message::Pong(bytes) => Frame::Pong(bytes),
            Message::Close(_) => Frame::Close,
        }
    }
}

impl From<Frame> for Message {
    fn from(frame: Frame) -> Self {
        match frame {
            Frame::Text(text) => Message::Text(text),
            Frame::Binary(bytes) => Message::Binary(bytes),
            Frame::Ping(bytes) => Message::Ping(bytes),
            Frame::Pong(bytes) => Message::Pong(bytes),
            Frame::Close => Message::Close(None),
        }
    }
}

/// Splits an upgraded WebSocket into the write and read halves the hub consumes.
pub fn split_socket(
    socket: WebSocket,
) -> (
    impl Sink<Frame, Error = TransportError> + Send + 'static,
    impl Stream<Item = Result<Frame, TransportError>> + Send + Unpin + 'static,
) {
    let (sink, stream) = socket.split();
    let sink = sink
        .sink_map_err(TransportError::new)
        .with(|frame: Frame| future::ready(Ok::<_, TransportError>(Message::from(frame))));
    let stream = stream.map(|message| message.map(Frame::from).map_err(TransportError::new));
    (sink, stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_frame_maps_to_bare_close_message() {
        assert!(matches!(Message::from(Frame::Close), Message::Close(None)));
        assert_eq!(Frame::from(Message::Close(None)), Frame::Close);
    }

    #[test]
    fn text_survives_conversion() {
        let message = Message::from(Frame::Text("hello".into()));
        assert_eq!(Frame::from(message), Frame::Text("hello".into()));
    }

    #[test]
    fn transport_error_keeps_its_source() {
        let err = TransportError::new(std::io::Error::other("peer went away"));
        assert!(err.to_string().contains("peer went away"));
        assert!(err.source().is_some());
    }
}
