use std::sync::Arc;

use futures::{Sink, Stream};
use tokio::sync::mpsc;
use tracing::info;

use crate::{
    broadcast::Broadcaster,
    config::HubConfig,
    dispatch::Dispatcher,
    error::{ErrorReceiver, ErrorSink},
    listener::IngressListener,
    message::InboundEvent,
    registry::{ConnectionId, PeerInfo, Registry},
    transport::{Frame, TransportError},
};

/// Handle to one hub instance. Cloning is cheap and every clone talks to the
/// same registry and dispatch loop.
#[derive(Clone)]
pub struct Hub {
    registry: Arc<Registry>,
    events: mpsc::UnboundedSender<InboundEvent>,
    errors: ErrorSink,
    broadcaster: Broadcaster,
}

impl Hub {
    /// Builds a hub together with its dispatch loop (which the caller must run)
    /// and the receiving end of its error sink.
    pub fn new(config: &HubConfig) -> (Self, Dispatcher, ErrorReceiver) {
        let registry = Arc::new(Registry::new());
        let (errors, error_rx) = ErrorSink::channel();
        let (events, event_rx) = mpsc::unbounded_channel();
        let broadcaster =
            Broadcaster::new(Arc::clone(&registry), errors.clone(), config.write_timeout);
        let dispatcher = Dispatcher::new(event_rx, broadcaster.clone(), errors.clone());

        let hub = Self {
            registry,
            events,
            errors,
            broadcaster,
        };
        (hub, dispatcher, error_rx)
    }

    /// Registers a connection and starts its ingress listener.
    pub fn connect<Si, St>(&self, sink: Si, stream: St, info: PeerInfo) -> ConnectionId
    where
        Si: Sink<Frame, Error = TransportError> + Send + 'static,
        St: Stream<Item = Result<Frame, TransportError>> + Send + Unpin + 'static,
    {
        let remote_addr = info.remote_addr;
        let id = self.registry.register(Box::pin(sink), info);
        info!(peer = %id, ?remote_addr, "client connected");

        let listener = IngressListener::new(
            id,
            Arc::clone(&self.registry),
            self.events.clone(),
            self.errors.clone(),
        );
        tokio::spawn(listener.run(stream));
        id
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    /// Sender side of the event channel, for feeding events in directly.
    pub fn events(&self) -> mpsc::UnboundedSender<InboundEvent> {
        self.events.clone()
    }

    /// Another handle on the hub's error sink.
    pub fn errors(&self) -> ErrorSink {
        self.errors.clone()
    }

    /// Unregisters and closes every peer.
    pub async fn close_all(&self) {
        let peers = self.registry.drain();
        info!(count = peers.len(), "closing all clients");
        for peer in peers {
            peer.close().await;
        }
    }
}
