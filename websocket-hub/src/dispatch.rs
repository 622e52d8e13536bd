use std::future::Future;

use tokio::{select, sync::mpsc};
use tracing::{debug, info};

use crate::{
    broadcast::Broadcaster,
    error::{ErrorSink, HubError},
    message::{InboundEvent, InvalidMessageType, OutboundMessage},
};

/// The single consumer of inbound events.
///
/// Events are handled strictly one at a time: the broadcast for one event
/// finishes before the next event is taken off the channel, so every peer sees
/// broadcasts in the same order.
pub struct Dispatcher {
    events: mpsc::UnboundedReceiver<InboundEvent>,
    broadcaster: Broadcaster,
    errors: ErrorSink,
}

impl Dispatcher {
    pub fn new(
        events: mpsc::UnboundedReceiver<InboundEvent>,
        broadcaster: Broadcaster,
        errors: ErrorSink,
    ) -> Self {
        Self {
            events,
            broadcaster,
            errors,
        }
    }

    /// Runs until every event sender is gone.
    pub async fn run(mut self) {
        while let Some(event) = self.events.recv().await {
            self.dispatch(event).await;
        }
        info!("event channel closed; dispatch loop exiting");
    }

    /// Runs until the channel closes or `shutdown` resolves, whichever is first.
    pub async fn run_until<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()> + Send,
    {
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    info!("dispatch loop shutting down");
                    self.events.close();
                    break;
                }
                event = self.events.recv() => {
                    match event {
                        Some(event) => self.dispatch(event).await,
                        None => {
                            info!("event channel closed; dispatch loop exiting");
                            break;
                        }
                    }
                }
            }
        }
    }

    async fn dispatch(&self, event: InboundEvent) {
        let InboundEvent { origin, payload } = event;
        match OutboundMessage::try_from(payload) {
            Ok(OutboundMessage::Text(text)) => {
                debug!(%origin, "broadcasting text message");
                self.broadcaster.broadcast_text(&text).await;
            }
            Ok(OutboundMessage::Structured(response)) => {
                debug!(%origin, "broadcasting structured message");
                self.broadcaster.broadcast_structured(&response).await;
            }
            Err(InvalidMessageType(message_type)) => {
                self.errors.report(HubError::InvalidMessageType {
                    origin,
                    message_type,
                });
            }
        }
    }
}
