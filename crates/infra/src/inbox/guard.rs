//! Idempotency decorator for event handlers.

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use relaykit_events::{EventHandler, EventMessage, HandlerError};

use super::store::InboxStore;

/// Wraps an event handler with an inbox claim, collapsing at-least-once
/// delivery into exactly-once handler execution.
///
/// Before running the inner handler the decorator claims the pair
/// `(message_id, inner.name())` in the inbox store. Losing the claim means
/// the message was already handled (or is being handled elsewhere), so the
/// duplicate is acknowledged without side effects.
///
/// The claim is written before the side effects run. If the inner handler
/// fails after a won claim, the failure propagates and a redelivery will be
/// skipped by the guard; handlers that need retry-after-partial-failure
/// should keep their own state transactional rather than rely on redelivery.
pub struct InboxedHandler<I, H> {
    inbox: I,
    inner: H,
}

impl<I, H> InboxedHandler<I, H> {
    pub fn new(inbox: I, inner: H) -> Self {
        Self { inbox, inner }
    }

    pub fn into_parts(self) -> (I, H) {
        (self.inbox, self.inner)
    }
}

#[async_trait]
impl<I, H> EventHandler for InboxedHandler<I, H>
where
    I: InboxStore,
    H: EventHandler,
{
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn handle(&self, message: &EventMessage) -> Result<(), HandlerError> {
        let first = self
            .inbox
            .try_begin_handle(message.message_id(), self.inner.name(), Utc::now())
            .await
            // No claim was written, so failing here is safe: the next
            // delivery attempt runs the full guard again.
            .map_err(|e| HandlerError::failed(format!("inbox claim failed: {}", e)))?;

        if !first {
            debug!(
                message_id = %message.message_id(),
                handler = self.inner.name(),
                "skipping already-handled message"
            );
            return Ok(());
        }

        self.inner.handle(message).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use relaykit_core::MessageId;

    use crate::inbox::store::InMemoryInboxStore;

    use super::*;

    struct SideEffect {
        name: &'static str,
        runs: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl EventHandler for SideEffect {
        fn name(&self) -> &str {
            self.name
        }

        async fn handle(&self, _message: &EventMessage) -> Result<(), HandlerError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(HandlerError::failed("side effect exploded"))
            } else {
                Ok(())
            }
        }
    }

    fn message() -> EventMessage {
        EventMessage::new(
            MessageId::new(),
            "orders.placed",
            json!({"order_id": "O1"}),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn duplicate_delivery_runs_the_side_effect_once() {
        let runs = Arc::new(AtomicUsize::new(0));
        let guard = InboxedHandler::new(
            InMemoryInboxStore::arc(),
            SideEffect {
                name: "send-email",
                runs: runs.clone(),
                fail: false,
            },
        );
        let message = message();

        guard.handle(&message).await.unwrap();
        guard.handle(&message).await.unwrap();
        guard.handle(&message).await.unwrap();

        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn distinct_messages_each_run() {
        let runs = Arc::new(AtomicUsize::new(0));
        let guard = InboxedHandler::new(
            InMemoryInboxStore::arc(),
            SideEffect {
                name: "send-email",
                runs: runs.clone(),
                fail: false,
            },
        );

        guard.handle(&message()).await.unwrap();
        guard.handle(&message()).await.unwrap();

        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn guards_with_different_names_share_an_inbox() {
        let inbox = InMemoryInboxStore::arc();
        let email_runs = Arc::new(AtomicUsize::new(0));
        let ledger_runs = Arc::new(AtomicUsize::new(0));
        let email = InboxedHandler::new(
            inbox.clone(),
            SideEffect {
                name: "send-email",
                runs: email_runs.clone(),
                fail: false,
            },
        );
        let ledger = InboxedHandler::new(
            inbox.clone(),
            SideEffect {
                name: "update-ledger",
                runs: ledger_runs.clone(),
                fail: false,
            },
        );
        let message = message();

        email.handle(&message).await.unwrap();
        ledger.handle(&message).await.unwrap();
        email.handle(&message).await.unwrap();

        assert_eq!(email_runs.load(Ordering::SeqCst), 1);
        assert_eq!(ledger_runs.load(Ordering::SeqCst), 1);
        assert_eq!(inbox.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn failure_after_a_won_claim_propagates_and_redelivery_is_skipped() {
        let runs = Arc::new(AtomicUsize::new(0));
        let guard = InboxedHandler::new(
            InMemoryInboxStore::arc(),
            SideEffect {
                name: "send-email",
                runs: runs.clone(),
                fail: true,
            },
        );
        let message = message();

        let err = guard.handle(&message).await.unwrap_err();
        assert!(matches!(err, HandlerError::Failed(_)));

        // The claim is already recorded, so the redelivery acks silently.
        guard.handle(&message).await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}
