use std::sync::Arc;

use futures::{Stream, StreamExt};
use tokio::{runtime::Handle, select, sync::mpsc};
use tracing::{debug, info};

use crate::{
    error::{ErrorSink, HubError},
    message::{ClientPayload, InboundEvent},
    registry::{ConnectionId, Registry},
    transport::{Frame, TransportError},
};

/// Reads one peer's messages and forwards them to the dispatch loop.
///
/// The listener only ever touches the event channel and the error sink; it
/// never writes to other peers itself. It stops as soon as its peer leaves the
/// registry, even when the removal happened elsewhere (a failed broadcast write
/// or shutdown) and the stream is still open.
pub struct IngressListener {
    id: ConnectionId,
    registry: Arc<Registry>,
    events: mpsc::UnboundedSender<InboundEvent>,
    errors: ErrorSink,
}

impl IngressListener {
    pub fn new(
        id: ConnectionId,
        registry: Arc<Registry>,
        events: mpsc::UnboundedSender<InboundEvent>,
        errors: ErrorSink,
    ) -> Self {
        Self {
            id,
            registry,
            events,
            errors,
        }
    }

    pub async fn run<S>(self, mut stream: S)
    where
        S: Stream<Item = Result<Frame, TransportError>> + Unpin,
    {
        let Some(departed) = self.registry.departure(self.id) else {
            debug!(peer = %self.id, "peer removed before its listener started");
            return;
        };
        let guard = Deregistration::new(self.id, Arc::clone(&self.registry));

        loop {
            let frame = select! {
                biased;
                _ = departed.cancelled() => {
                    debug!(peer = %self.id, "peer removed from the registry; stopping listener");
                    break;
                }
                frame = stream.next() => frame,
            };
            let Some(frame) = frame else {
                break;
            };
            let keep_reading = match frame {
                Ok(frame) => self.handle_frame(frame),
                Err(source) => {
                    self.errors.report(HubError::Read {
                        origin: self.id,
                        source,
                    });
                    false
                }
            };
            if !keep_reading {
                break;
            }
        }

        guard.complete().await;
        info!(peer = %self.id, "client disconnected");
    }

    fn handle_frame(&self, frame: Frame) -> bool {
        let decoded = match frame {
            Frame::Text(text) => serde_json::from_str::<ClientPayload>(&text),
            Frame::Binary(bytes) => serde_json::from_slice::<ClientPayload>(&bytes),
            Frame::Ping(_) | Frame::Pong(_) => return true,
            Frame::Close => {
                debug!(peer = %self.id, "peer sent close");
                return false;
            }
        };

        match decoded {
            Ok(payload) => self.forward(payload),
            Err(source) => {
                // A bad message is not a bad connection.
                self.errors.report(HubError::Decode {
                    origin: self.id,
                    source,
                });
                true
            }
        }
    }

    fn forward(&self, payload: ClientPayload) -> bool {
        let event = InboundEvent {
            origin: self.id,
            payload,
        };
        if self.events.send(event).is_err() {
            debug!(peer = %self.id, "event channel closed; stopping listener");
            return false;
        }
        true
    }
}

/// Removes the peer from the registry on every exit path, panics included.
struct Deregistration {
    id: ConnectionId,
    registry: Arc<Registry>,
    armed: bool,
}

impl Deregistration {
    fn new(id: ConnectionId, registry: Arc<Registry>) -> Self {
        Self {
            id,
            registry,
            armed: true,
        }
    }

    async fn complete(mut self) {
        self.armed = false;
        if let Some(peer) = self.registry.unregister(self.id) {
            peer.close().await;
        }
    }
}

impl Drop for Deregistration {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Some(peer) = self.registry.unregister(self.id) else {
            return;
        };
        if let Ok(runtime) = Handle::try_current() {
            runtime.spawn(async move { peer.close().await });
        }
    }
}
