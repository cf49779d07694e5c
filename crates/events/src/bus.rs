//! Event publishing/subscription abstraction (mechanics only).
//!
//! This module provides the **event bus pattern** - a pub/sub mechanism for
//! routing event messages to the handlers registered for their type.
//!
//! ## Design Philosophy
//!
//! The event bus is intentionally **lightweight** and makes minimal
//! assumptions:
//!
//! - **Routing by type**: handlers subscribe to an event type string; a
//!   published message reaches every handler registered for its type.
//! - **At-least-once delivery**: the same message may be published again
//!   (outbox redelivery, lease expiry); handlers must be idempotent.
//! - **No ordering guarantees**: messages may arrive out of order across
//!   retries and concurrent dispatchers.
//! - **No persistence**: the bus is for distribution, not storage (the outbox
//!   is the durable source of truth).
//!
//! ## Why At-Least-Once?
//!
//! At-least-once delivery is acceptable because:
//! - **Outbox first**: integration events are durably stored before delivery,
//!   so redelivery is always possible and sometimes necessary.
//! - **Idempotent consumers**: handlers are designed (or inbox-guarded) to
//!   handle duplicates.
//! - **Simplicity**: at-least-once is far easier to provide than exactly-once.
//!
//! ## Completion Semantics
//!
//! Unlike a fire-and-forget broadcast, `publish` resolves only after every
//! matching handler has run, and reports the first failure. The dispatcher
//! relies on this to decide between marking a message succeeded or scheduling
//! a retry.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::handler::{EventHandler, HandlerError};
use crate::message::EventMessage;

/// Failure to deliver a message through the bus.
#[derive(Debug, Error)]
pub enum PublishError {
    /// A subscribed handler rejected the message.
    #[error("handler '{handler}' failed: {source}")]
    Handler {
        handler: String,
        #[source]
        source: HandlerError,
    },

    /// Internal subscriber registry lock poisoning.
    #[error("subscriber registry poisoned")]
    Poisoned,
}

/// Domain-agnostic event bus (pub/sub abstraction).
///
/// The bus sits between the outbox dispatcher (or a direct publisher) and the
/// event consumers:
///
/// ```text
/// Publisher / Dispatcher → Event Bus (route by type) → Handlers
///                                                        ├─ projections
///                                                        ├─ integrations
///                                                        └─ workflows
/// ```
///
/// ## Delivery Guarantees
///
/// - **At-least-once**: a message may be delivered again after a crash or a
///   redelivery from the outbox; handlers must be idempotent.
/// - **Per-type fan-out**: every handler subscribed to the message's type is
///   invoked; a type with no subscribers is a vacuous success.
/// - **Error propagation**: the first handler failure aborts the fan-out and
///   is returned to the publisher, which decides whether to retry. Handlers
///   that already ran are not rolled back - their idempotency guard absorbs
///   the duplicate on the next attempt.
///
/// ## Thread Safety
///
/// The trait requires `Send + Sync`; implementations must be safe to share
/// across tasks. Multiple tasks can publish concurrently.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Deliver `message` to every handler registered for its event type.
    async fn publish(&self, message: &EventMessage) -> Result<(), PublishError>;

    /// Register `handler` for messages of type `event_type`.
    fn subscribe(&self, event_type: &str, handler: Arc<dyn EventHandler>);
}

#[async_trait]
impl<B> EventBus for Arc<B>
where
    B: EventBus + ?Sized,
{
    async fn publish(&self, message: &EventMessage) -> Result<(), PublishError> {
        (**self).publish(message).await
    }

    fn subscribe(&self, event_type: &str, handler: Arc<dyn EventHandler>) {
        (**self).subscribe(event_type, handler)
    }
}
