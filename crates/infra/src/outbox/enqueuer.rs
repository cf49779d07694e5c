//! Application-facing enqueue facade.

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use relaykit_core::MessageId;
use relaykit_events::{Event, SerializationError};

use super::store::{OutboxStore, OutboxStoreError};
use super::types::NewOutboxMessage;

/// Errors from enqueueing an event into the outbox.
#[derive(Debug, Error)]
pub enum EnqueueError {
    /// The event could not be serialized to a payload.
    #[error(transparent)]
    Serialization(#[from] SerializationError),

    /// The outbox store rejected the write.
    #[error(transparent)]
    Storage(#[from] OutboxStoreError),
}

/// Serialize-and-insert front door for application code.
///
/// Callers hand over their open transaction handle together with a typed
/// event; the enqueuer serializes it into the durable message shape and
/// writes the row through the store. Nothing is delivered here: delivery is
/// the dispatcher's job, after the caller commits.
#[derive(Debug, Clone)]
pub struct OutboxEnqueuer<S> {
    store: S,
}

impl<S: OutboxStore> OutboxEnqueuer<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Consume the enqueuer, returning the wrapped store.
    pub fn into_inner(self) -> S {
        self.store
    }

    /// Serialize `event` and append it to the outbox inside `tx`.
    ///
    /// Returns the message id assigned to the durable row; the row becomes
    /// visible to the dispatcher only once the caller commits.
    pub async fn enqueue<E: Event + Serialize>(
        &self,
        tx: &mut S::Tx,
        event: &E,
    ) -> Result<MessageId, EnqueueError> {
        let message = NewOutboxMessage::from_event(event)?;
        self.enqueue_message(tx, message).await
    }

    /// Append an already-serialized message to the outbox inside `tx`.
    pub async fn enqueue_message(
        &self,
        tx: &mut S::Tx,
        message: NewOutboxMessage,
    ) -> Result<MessageId, EnqueueError> {
        debug!(
            message_id = %message.message_id,
            event_type = %message.event_type,
            "enqueueing outbox message"
        );
        let id = self.store.enqueue(tx, message).await?;
        Ok(id)
    }
}
