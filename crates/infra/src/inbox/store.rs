//! Inbox storage abstraction and the in-memory reference implementation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use relaykit_core::MessageId;

/// Errors from inbox store operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InboxStoreError {
    /// The backing store failed.
    #[error("storage error: {0}")]
    Storage(String),
}

/// Persistence boundary for the inbox deduplication guard.
///
/// The inbox records which `(message_id, handler)` pairs have been handled.
/// Keying on the pair rather than the message id alone lets independent
/// handlers of one message each run exactly once.
#[async_trait]
pub trait InboxStore: Send + Sync {
    /// Claim the pair `(message_id, handler)`.
    ///
    /// Exactly one caller per pair gets `true` and proceeds to run handler
    /// side effects; every later caller gets `false` (already handled). The
    /// claim must be a unique-constraint-backed insert, not a read followed
    /// by a write, so concurrent deliveries of the same message race safely.
    async fn try_begin_handle(
        &self,
        message_id: MessageId,
        handler: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, InboxStoreError>;

    /// Delete entries processed before `older_than`; returns the count.
    ///
    /// Storage hygiene only. Entries old enough to be swept are past any
    /// realistic redelivery window, so dropping them does not reopen the
    /// dedup guarantee in practice.
    async fn cleanup(&self, older_than: DateTime<Utc>) -> Result<u64, InboxStoreError>;

    /// Number of recorded `(message_id, handler)` pairs.
    async fn count(&self) -> Result<u64, InboxStoreError>;
}

#[async_trait]
impl<I> InboxStore for Arc<I>
where
    I: InboxStore + ?Sized,
{
    async fn try_begin_handle(
        &self,
        message_id: MessageId,
        handler: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, InboxStoreError> {
        (**self).try_begin_handle(message_id, handler, now).await
    }

    async fn cleanup(&self, older_than: DateTime<Utc>) -> Result<u64, InboxStoreError> {
        (**self).cleanup(older_than).await
    }

    async fn count(&self) -> Result<u64, InboxStoreError> {
        (**self).count().await
    }
}

/// In-memory inbox store for tests and single-process embedding.
#[derive(Debug, Default)]
pub struct InMemoryInboxStore {
    handled: RwLock<HashMap<(MessageId, String), DateTime<Utc>>>,
}

impl InMemoryInboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience constructor returning the store pre-wrapped in an `Arc`.
    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn read(
        &self,
    ) -> Result<RwLockReadGuard<'_, HashMap<(MessageId, String), DateTime<Utc>>>, InboxStoreError>
    {
        self.handled
            .read()
            .map_err(|_| InboxStoreError::Storage("inbox lock poisoned".to_string()))
    }

    fn write(
        &self,
    ) -> Result<RwLockWriteGuard<'_, HashMap<(MessageId, String), DateTime<Utc>>>, InboxStoreError>
    {
        self.handled
            .write()
            .map_err(|_| InboxStoreError::Storage("inbox lock poisoned".to_string()))
    }
}

#[async_trait]
impl InboxStore for InMemoryInboxStore {
    async fn try_begin_handle(
        &self,
        message_id: MessageId,
        handler: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, InboxStoreError> {
        let mut handled = self.write()?;
        let key = (message_id, handler.to_string());
        if handled.contains_key(&key) {
            return Ok(false);
        }
        handled.insert(key, now);
        Ok(true)
    }

    async fn cleanup(&self, older_than: DateTime<Utc>) -> Result<u64, InboxStoreError> {
        let mut handled = self.write()?;
        let before = handled.len();
        handled.retain(|_, processed_at| *processed_at >= older_than);
        Ok((before - handled.len()) as u64)
    }

    async fn count(&self) -> Result<u64, InboxStoreError> {
        Ok(self.read()?.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_claim_wins_and_the_rest_lose() {
        let store = InMemoryInboxStore::new();
        let id = MessageId::new();
        let now = Utc::now();

        assert!(store.try_begin_handle(id, "send-email", now).await.unwrap());
        assert!(!store.try_begin_handle(id, "send-email", now).await.unwrap());
        assert!(!store.try_begin_handle(id, "send-email", now).await.unwrap());
    }

    #[tokio::test]
    async fn different_handlers_claim_the_same_message_independently() {
        let store = InMemoryInboxStore::new();
        let id = MessageId::new();
        let now = Utc::now();

        assert!(store.try_begin_handle(id, "send-email", now).await.unwrap());
        assert!(store.try_begin_handle(id, "update-ledger", now).await.unwrap());
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn different_messages_do_not_collide() {
        let store = InMemoryInboxStore::new();
        let now = Utc::now();

        assert!(store.try_begin_handle(MessageId::new(), "h", now).await.unwrap());
        assert!(store.try_begin_handle(MessageId::new(), "h", now).await.unwrap());
    }

    #[tokio::test]
    async fn cleanup_removes_only_entries_before_the_cutoff() {
        let store = InMemoryInboxStore::new();
        let cutoff = Utc::now();
        let old = cutoff - chrono::Duration::days(31);
        store.try_begin_handle(MessageId::new(), "h", old).await.unwrap();
        store.try_begin_handle(MessageId::new(), "h", cutoff).await.unwrap();
        store
            .try_begin_handle(MessageId::new(), "h", cutoff + chrono::Duration::seconds(1))
            .await
            .unwrap();

        let deleted = store.cleanup(cutoff).await.unwrap();

        // Strictly before the cutoff goes; at or after stays.
        assert_eq!(deleted, 1);
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn arc_wrapped_store_still_implements_the_trait() {
        let store = InMemoryInboxStore::arc();
        let id = MessageId::new();

        assert!(store.try_begin_handle(id, "h", Utc::now()).await.unwrap());
        assert_eq!(store.count().await.unwrap(), 1);
    }
}
