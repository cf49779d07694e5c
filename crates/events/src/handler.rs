use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::message::EventMessage;

/// Error raised by an event handler.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// The payload could not be decoded into the type the handler expects.
    #[error("payload decode failed: {0}")]
    Decode(String),

    /// The handler's business logic failed.
    #[error("{0}")]
    Failed(String),
}

impl HandlerError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

/// A consumer of delivered event messages.
///
/// ## Delivery Contract
///
/// Handlers run under **at-least-once delivery**: the same message can arrive
/// again after a crash, a lease expiry, or an outbox redelivery. A handler
/// either tolerates duplicates on its own or is wrapped in the inbox guard,
/// which claims `(message_id, name)` before the first execution.
///
/// ## Naming
///
/// `name()` must be stable across deployments - it is the second half of the
/// deduplication key. Renaming a handler changes its dedup identity and the
/// next redelivery of an old message will execute it again.
///
/// ## Failure
///
/// Returning an error tells the dispatcher the attempt failed; the message is
/// rescheduled with backoff. Failures should be returned, not panicked.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Stable logical name of this consumer.
    fn name(&self) -> &str;

    async fn handle(&self, message: &EventMessage) -> Result<(), HandlerError>;
}

#[async_trait]
impl<H> EventHandler for Arc<H>
where
    H: EventHandler + ?Sized,
{
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn handle(&self, message: &EventMessage) -> Result<(), HandlerError> {
        (**self).handle(message).await
    }
}
