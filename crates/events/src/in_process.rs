//! In-process event bus (handler registry).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::bus::{EventBus, PublishError};
use crate::handler::EventHandler;
use crate::message::EventMessage;

/// In-process pub/sub bus routing by event type.
///
/// - No IO of its own (handlers may do IO)
/// - Sequential fan-out, first failure wins
/// - At-least-once acceptable (handlers must be idempotent)
#[derive(Default)]
pub struct InProcessEventBus {
    handlers: RwLock<HashMap<String, Vec<Arc<dyn EventHandler>>>>,
}

impl InProcessEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handlers currently registered for `event_type`, snapshotted so the
    /// registry lock is not held while handlers run.
    fn handlers_for(&self, event_type: &str) -> Result<Vec<Arc<dyn EventHandler>>, PublishError> {
        let handlers = self.handlers.read().map_err(|_| PublishError::Poisoned)?;
        Ok(handlers.get(event_type).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl EventBus for InProcessEventBus {
    async fn publish(&self, message: &EventMessage) -> Result<(), PublishError> {
        // A type nobody subscribed to fans out to zero handlers.
        for handler in self.handlers_for(message.event_type())? {
            handler
                .handle(message)
                .await
                .map_err(|source| PublishError::Handler {
                    handler: handler.name().to_string(),
                    source,
                })?;
        }

        Ok(())
    }

    fn subscribe(&self, event_type: &str, handler: Arc<dyn EventHandler>) {
        // If the lock is poisoned, registration is dropped; publishes will
        // keep reporting the poisoning until the process restarts.
        if let Ok(mut handlers) = self.handlers.write() {
            handlers
                .entry(event_type.to_string())
                .or_default()
                .push(handler);
        }
    }
}
