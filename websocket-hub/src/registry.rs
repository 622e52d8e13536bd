//! The set of currently connected peers.
//!
//! The map sits behind a synchronous mutex: every operation is a short,
//! non-blocking critical section, and the listener's drop guard must be able
//! to deregister a peer without awaiting. Writes never happen under this lock;
//! broadcasts work from a [`Registry::snapshot`].
//!
//! Removing a peer cancels its departure token, which is how its ingress
//! listener learns to stop reading, whoever did the removing.

use std::{
    collections::HashMap,
    fmt,
    net::SocketAddr,
    pin::Pin,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use futures::{Sink, SinkExt};
use tokio::{sync::Mutex as AsyncMutex, time::timeout};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::transport::{Frame, TransportError};

const CLOSE_GRACE: Duration = Duration::from_secs(1);

pub type PeerSink = Pin<Box<dyn Sink<Frame, Error = TransportError> + Send>>;

/// Identity of one registered connection. Never reused within a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Per-peer annotation kept alongside the connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerInfo {
    pub remote_addr: Option<SocketAddr>,
}

impl PeerInfo {
    pub fn new(remote_addr: SocketAddr) -> Self {
        Self {
            remote_addr: Some(remote_addr),
        }
    }
}

/// Cloneable handle to a peer's write half.
#[derive(Clone)]
pub struct PeerHandle {
    id: ConnectionId,
    info: PeerInfo,
    sink: Arc<AsyncMutex<PeerSink>>,
    departed: CancellationToken,
}

impl PeerHandle {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn info(&self) -> &PeerInfo {
        &self.info
    }

    /// Cancelled once the peer has been removed from its registry.
    pub fn departed(&self) -> CancellationToken {
        self.departed.clone()
    }

    pub async fn send(&self, frame: Frame) -> Result<(), TransportError> {
        self.sink.lock().await.send(frame).await
    }

    /// Closes the write half. Failures only get logged: the peer is gone either way.
    pub async fn close(&self) {
        let closing = async { self.sink.lock().await.close().await };
        match timeout(CLOSE_GRACE, closing).await {
            Ok(Ok(())) => debug!(peer = %self.id, "transport closed"),
            Ok(Err(error)) => debug!(peer = %self.id, %error, "transport close failed"),
            Err(_) => debug!(peer = %self.id, "transport close timed out"),
        }
    }
}

impl fmt::Debug for PeerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerHandle")
            .field("id", &self.id)
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
pub struct Registry {
    peers: Mutex<HashMap<ConnectionId, PeerHandle>>,
    next_id: AtomicU64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a peer and returns the identity it is known by from now on.
    pub fn register(&self, sink: PeerSink, info: PeerInfo) -> ConnectionId {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let handle = PeerHandle {
            id,
            info,
            sink: Arc::new(AsyncMutex::new(sink)),
            departed: CancellationToken::new(),
        };
        self.lock().insert(id, handle);
        id
    }

    /// Removes a peer. Only the caller that gets `Some` back may close it, which
    /// keeps close to exactly once when a read and a write fail together.
    pub fn unregister(&self, id: ConnectionId) -> Option<PeerHandle> {
        let removed = self.lock().remove(&id);
        if let Some(peer) = &removed {
            peer.departed.cancel();
        }
        removed
    }

    /// Departure token of a registered peer, `None` once it is gone.
    pub fn departure(&self, id: ConnectionId) -> Option<CancellationToken> {
        self.lock().get(&id).map(PeerHandle::departed)
    }

    /// Visits every registered peer while holding the registry lock.
    pub fn for_each<F>(&self, mut visit: F)
    where
        F: FnMut(&PeerHandle),
    {
        for peer in self.lock().values() {
            visit(peer);
        }
    }

    /// Copies out the current peers so writes can happen without the lock.
    pub fn snapshot(&self) -> Vec<PeerHandle> {
        let mut peers = Vec::new();
        self.for_each(|peer| peers.push(peer.clone()));
        peers
    }

    /// Removes every peer, for shutdown.
    pub fn drain(&self) -> Vec<PeerHandle> {
        let peers: Vec<PeerHandle> = self.lock().drain().map(|(_, peer)| peer).collect();
        for peer in &peers {
            peer.departed.cancel();
        }
        peers
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ConnectionId, PeerHandle>> {
        // A panic while holding the lock cannot leave the map half-updated.
        self.peers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
