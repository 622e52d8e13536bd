use std::{sync::Arc, time::Duration};

use tokio::time::timeout;
use tracing::{debug, warn};

use crate::{
    error::{ErrorSink, HubError},
    message::JsonResponse,
    registry::{ConnectionId, PeerHandle, Registry},
    transport::Frame,
};

/// Outcome of one broadcast pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub attempted: usize,
    pub delivered: usize,
    pub pruned: Vec<ConnectionId>,
}

/// Writes one message to every registered peer.
///
/// Delivery is best effort: a peer whose write fails or takes longer than the
/// write timeout is dropped from the registry and the pass carries on with the
/// rest.
#[derive(Clone)]
pub struct Broadcaster {
    registry: Arc<Registry>,
    errors: ErrorSink,
    write_timeout: Duration,
}

impl Broadcaster {
    pub fn new(registry: Arc<Registry>, errors: ErrorSink, write_timeout: Duration) -> Self {
        Self {
            registry,
            errors,
            write_timeout,
        }
    }

    pub async fn broadcast_text(&self, payload: &str) -> BroadcastReport {
        self.broadcast(Frame::Text(payload.to_owned())).await
    }

    pub async fn broadcast_structured(&self, response: &JsonResponse) -> BroadcastReport {
        match serde_json::to_string(response) {
            Ok(json) => self.broadcast(Frame::Text(json)).await,
            Err(err) => {
                self.errors.report(HubError::Encode(err));
                BroadcastReport::default()
            }
        }
    }

    pub async fn broadcast(&self, frame: Frame) -> BroadcastReport {
        let peers = self.registry.snapshot();
        let mut report = BroadcastReport {
            attempted: peers.len(),
            ..BroadcastReport::default()
        };

        for peer in peers {
            let failure = match timeout(self.write_timeout, peer.send(frame.clone())).await {
                Ok(Ok(())) => {
                    report.delivered += 1;
                    continue;
                }
                Ok(Err(source)) => HubError::Write {
                    peer: peer.id(),
                    source,
                },
                Err(_) => HubError::WriteTimeout {
                    peer: peer.id(),
                    timeout: self.write_timeout,
                },
            };
            self.prune(&peer, failure);
            report.pruned.push(peer.id());
        }

        debug!(
            attempted = report.attempted,
            delivered = report.delivered,
            pruned = report.pruned.len(),
            "broadcast complete"
        );
        report
    }

    fn prune(&self, peer: &PeerHandle, failure: HubError) {
        warn!(peer = %peer.id(), error = %failure, "dropping client after failed write");
        self.errors.report(failure);

        // The listener may have beaten us to it; only the remover closes.
        if let Some(removed) = self.registry.unregister(peer.id()) {
            tokio::spawn(async move { removed.close().await });
        }
    }
}

#[cfg(test)]
mod tests {
    use futures::{SinkExt, StreamExt, channel::mpsc};

    use super::*;
    use crate::{error::ErrorReceiver, registry::PeerInfo, transport::TransportError};

    fn setup() -> (Arc<Registry>, Broadcaster, ErrorReceiver) {
        let registry = Arc::new(Registry::new());
        let (errors, rx) = ErrorSink::channel();
        let broadcaster =
            Broadcaster::new(Arc::clone(&registry), errors, Duration::from_millis(100));
        (registry, broadcaster, rx)
    }

    fn add_peer(registry: &Registry) -> (ConnectionId, mpsc::UnboundedReceiver<Frame>) {
        let (tx, rx) = mpsc::unbounded();
        let id = registry.register(
            Box::pin(tx.sink_map_err(TransportError::new)),
            PeerInfo::default(),
        );
        (id, rx)
    }

    #[tokio::test]
    async fn structured_broadcast_is_a_json_text_frame() {
        let (registry, broadcaster, _errors) = setup();
        let (_, mut rx) = add_peer(&registry);

        let report = broadcaster
            .broadcast_structured(&JsonResponse {
                message: "hi".into(),
                data: None,
            })
            .await;

        assert_eq!(report.delivered, 1);
        let Some(Frame::Text(body)) = rx.next().await else {
            panic!("expected a text frame");
        };
        assert!(body.contains(r#""message":"hi""#), "got {body}");
    }

    #[tokio::test]
    async fn empty_registry_is_not_an_error() {
        let (_registry, broadcaster, mut errors) = setup();
        let report = broadcaster.broadcast_text("anyone?").await;
        assert_eq!(report, BroadcastReport::default());
        assert!(errors.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_peer_is_pruned_without_affecting_others() {
        let (registry, broadcaster, mut errors) = setup();
        let (healthy, mut healthy_rx) = add_peer(&registry);
        let (gone, gone_rx) = add_peer(&registry);
        drop(gone_rx);

        let report = broadcaster.broadcast_text("still here").await;

        assert_eq!(report.attempted, 2);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.pruned, vec![gone]);
        assert_eq!(healthy_rx.next().await, Some(Frame::Text("still here".into())));
        assert!(registry.contains(healthy));
        assert!(!registry.contains(gone));
        assert!(matches!(
            errors.recv().await,
            Some(HubError::Write { peer, .. }) if peer == gone
        ));
    }

    #[tokio::test]
    async fn stalled_peer_times_out_and_is_disconnected() {
        let (registry, broadcaster, mut errors) = setup();
        let (healthy, mut healthy_rx) = add_peer(&registry);

        // A peer whose writes never complete.
        let stalled_sink = futures::sink::unfold((), |(), _frame: Frame| {
            futures::future::pending::<Result<(), TransportError>>()
        });
        let stalled = registry.register(Box::pin(stalled_sink), PeerInfo::default());

        let report = broadcaster.broadcast_text("one").await;

        assert_eq!(report.pruned, vec![stalled]);
        assert!(registry.contains(healthy));
        assert_eq!(report.delivered, 1);
        assert_eq!(healthy_rx.next().await, Some(Frame::Text("one".into())));
        assert!(matches!(
            errors.recv().await,
            Some(HubError::WriteTimeout { peer, .. }) if peer == stalled
        ));
    }
}
