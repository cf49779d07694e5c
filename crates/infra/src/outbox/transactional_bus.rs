//! Event bus decorator that makes integration events durable.

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use relaykit_core::MessageId;
use relaykit_events::{Event, EventBus, EventMessage, PublishError};

use crate::config::RelayOptions;

use super::enqueuer::{EnqueueError, OutboxEnqueuer};
use super::store::OutboxStore;
use super::types::NewOutboxMessage;

/// Failure to publish through the transactional bus.
#[derive(Debug, Error)]
pub enum TransactionalPublishError {
    /// The durable outbox write failed; the caller's transaction should roll
    /// back (or at least knows the event was not captured).
    #[error(transparent)]
    Enqueue(#[from] EnqueueError),

    /// Immediate in-process delivery of a non-durable event failed.
    #[error(transparent)]
    Delivery(#[from] PublishError),
}

/// Adapter that routes events by their durability needs.
///
/// Domain events go straight to the in-process bus: they live and die with
/// the current process and a handler failure should be visible to the
/// publisher. Integration events are first written to the outbox inside the
/// caller's transaction, then optimistically delivered in-process; if that
/// immediate delivery fails the durable row still exists, so the dispatcher
/// redelivers after commit and the failure is only logged.
///
/// This ensures the ordering invariant: **the durable write happens before
/// any delivery attempt**, and both share one message id, so inbox-guarded
/// consumers treat the immediate copy and the redelivered copy as the same
/// message.
pub struct TransactionalEventBus<S, B> {
    enqueuer: OutboxEnqueuer<S>,
    bus: B,
    auto_enqueue: bool,
}

impl<S: OutboxStore, B: EventBus> TransactionalEventBus<S, B> {
    /// Decorate `bus` with outbox capture through `store`.
    pub fn new(store: S, bus: B) -> Self {
        Self {
            enqueuer: OutboxEnqueuer::new(store),
            bus,
            auto_enqueue: true,
        }
    }

    /// Like [`new`], honoring `auto_enqueue_integration_events` from the
    /// options.
    ///
    /// [`new`]: TransactionalEventBus::new
    pub fn with_options(store: S, bus: B, options: &RelayOptions) -> Self {
        Self {
            enqueuer: OutboxEnqueuer::new(store),
            bus,
            auto_enqueue: options.auto_enqueue_integration_events,
        }
    }

    pub fn into_parts(self) -> (S, B) {
        (self.enqueuer.into_inner(), self.bus)
    }

    /// Publish `event`, capturing it durably first when it is an integration
    /// event (and auto-enqueue is on).
    ///
    /// Returns the outbox message id when a durable row was written, `None`
    /// for direct in-process delivery.
    pub async fn publish<E: Event + Serialize>(
        &self,
        tx: &mut S::Tx,
        event: &E,
    ) -> Result<Option<MessageId>, TransactionalPublishError> {
        if !event.is_integration() || !self.auto_enqueue {
            let message = EventMessage::from_event(event).map_err(EnqueueError::from)?;
            self.bus.publish(&message).await?;
            return Ok(None);
        }

        let message = NewOutboxMessage::from_event(event).map_err(EnqueueError::from)?;
        let envelope = message.to_event_message();
        let message_id = self.enqueuer.enqueue_message(tx, message).await?;

        // Optimistic immediate delivery. The row is already durable, so a
        // failure here costs latency, not the message.
        match self.bus.publish(&envelope).await {
            Ok(()) => {
                debug!(message_id = %message_id, "integration event delivered in-process");
            }
            Err(e) => {
                warn!(
                    message_id = %message_id,
                    error = %e,
                    "immediate delivery failed; leaving redelivery to the dispatcher"
                );
            }
        }

        Ok(Some(message_id))
    }
}
