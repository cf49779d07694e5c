//! Outbox storage abstraction and the in-memory reference implementation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::debug;

use relaykit_core::MessageId;

use super::types::{NewOutboxMessage, OutboxRecord, OutboxStats, OutboxStatus};

/// Errors from outbox store operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OutboxStoreError {
    /// No record exists for the given message id.
    #[error("outbox message not found: {0}")]
    NotFound(MessageId),

    /// The record exists but its status does not permit the operation.
    #[error("outbox message {message_id} is {status}, not valid for {operation}")]
    InvalidState {
        message_id: MessageId,
        status: OutboxStatus,
        operation: &'static str,
    },

    /// The backing store failed.
    #[error("storage error: {0}")]
    Storage(String),
}

/// Persistence boundary for the transactional outbox.
///
/// The store never talks to the event bus and never interprets payloads; it
/// owns durability and the record lifecycle. Claim contention between
/// concurrent dispatchers is resolved here, via conditional state
/// transitions, so callers on separate processes can share one table safely.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Handle to the caller's ambient storage transaction.
    ///
    /// `enqueue` participates in the transaction the caller opened for its
    /// business mutation rather than opening its own, which is what makes
    /// the outbox write atomic with that mutation. The concrete type is
    /// whatever the backing store transacts with (`sqlx::Transaction` for
    /// Postgres, `()` for the in-memory store).
    type Tx: Send;

    /// Append a message as `Pending` inside the caller's transaction.
    ///
    /// Fails with [`OutboxStoreError::InvalidState`] or a storage error when
    /// a record with the same message id already exists.
    async fn enqueue(
        &self,
        tx: &mut Self::Tx,
        message: NewOutboxMessage,
    ) -> Result<MessageId, OutboxStoreError>;

    /// Up to `batch_size` dispatch-eligible records at `now`, oldest first.
    ///
    /// Eligible records are pending ones, failed ones whose retry is due and
    /// whose attempts are below `max_attempts`, and processing ones whose
    /// lease has expired (crashed or stalled dispatcher).
    async fn get_pending(
        &self,
        batch_size: usize,
        now: DateTime<Utc>,
        max_attempts: u32,
    ) -> Result<Vec<OutboxRecord>, OutboxStoreError>;

    /// Atomically claim a record for dispatch.
    ///
    /// Re-evaluates the same eligibility predicate as [`get_pending`] and,
    /// in a single conditional transition, moves the record to `Processing`
    /// under a lease expiring at `locked_until`, counting the attempt.
    /// Returns `false` when another worker won the race or the record no
    /// longer qualifies; that is the normal concurrency outcome, not an
    /// error.
    ///
    /// [`get_pending`]: OutboxStore::get_pending
    async fn try_mark_processing(
        &self,
        message_id: MessageId,
        now: DateTime<Utc>,
        locked_until: DateTime<Utc>,
        max_attempts: u32,
    ) -> Result<bool, OutboxStoreError>;

    /// Record a delivered message; clears the lease and retry diagnostics.
    ///
    /// Guarded on `Processing`: a stale marker arriving after a lease
    /// takeover degrades to a no-op instead of clobbering the new owner's
    /// state.
    async fn mark_succeeded(
        &self,
        message_id: MessageId,
        now: DateTime<Utc>,
    ) -> Result<(), OutboxStoreError>;

    /// Record a failed attempt and schedule the retry at `now + retry_in`.
    ///
    /// Guarded on `Processing` like [`mark_succeeded`]. The attempt counter
    /// was already advanced by the claim, so this only flips status, stores
    /// the error text and sets the retry time.
    ///
    /// [`mark_succeeded`]: OutboxStore::mark_succeeded
    async fn mark_failed(
        &self,
        message_id: MessageId,
        now: DateTime<Utc>,
        error: &str,
        retry_in: Duration,
    ) -> Result<(), OutboxStoreError>;

    /// Read-only diagnostic listing, newest first, optionally filtered by
    /// status.
    async fn query(
        &self,
        take: usize,
        status: Option<OutboxStatus>,
    ) -> Result<Vec<OutboxRecord>, OutboxStoreError>;

    /// Return a failed record to `Pending` with a fresh attempt budget.
    ///
    /// Operator recovery path for messages parked at the attempt ceiling.
    /// Errors if the record is missing or not currently `Failed`.
    async fn requeue(
        &self,
        message_id: MessageId,
        now: DateTime<Utc>,
    ) -> Result<OutboxRecord, OutboxStoreError>;

    /// Per-status record counts.
    async fn stats(&self) -> Result<OutboxStats, OutboxStoreError>;
}

#[async_trait]
impl<S> OutboxStore for Arc<S>
where
    S: OutboxStore + ?Sized,
{
    type Tx = S::Tx;

    async fn enqueue(
        &self,
        tx: &mut Self::Tx,
        message: NewOutboxMessage,
    ) -> Result<MessageId, OutboxStoreError> {
        (**self).enqueue(tx, message).await
    }

    async fn get_pending(
        &self,
        batch_size: usize,
        now: DateTime<Utc>,
        max_attempts: u32,
    ) -> Result<Vec<OutboxRecord>, OutboxStoreError> {
        (**self).get_pending(batch_size, now, max_attempts).await
    }

    async fn try_mark_processing(
        &self,
        message_id: MessageId,
        now: DateTime<Utc>,
        locked_until: DateTime<Utc>,
        max_attempts: u32,
    ) -> Result<bool, OutboxStoreError> {
        (**self)
            .try_mark_processing(message_id, now, locked_until, max_attempts)
            .await
    }

    async fn mark_succeeded(
        &self,
        message_id: MessageId,
        now: DateTime<Utc>,
    ) -> Result<(), OutboxStoreError> {
        (**self).mark_succeeded(message_id, now).await
    }

    async fn mark_failed(
        &self,
        message_id: MessageId,
        now: DateTime<Utc>,
        error: &str,
        retry_in: Duration,
    ) -> Result<(), OutboxStoreError> {
        (**self).mark_failed(message_id, now, error, retry_in).await
    }

    async fn query(
        &self,
        take: usize,
        status: Option<OutboxStatus>,
    ) -> Result<Vec<OutboxRecord>, OutboxStoreError> {
        (**self).query(take, status).await
    }

    async fn requeue(
        &self,
        message_id: MessageId,
        now: DateTime<Utc>,
    ) -> Result<OutboxRecord, OutboxStoreError> {
        (**self).requeue(message_id, now).await
    }

    async fn stats(&self) -> Result<OutboxStats, OutboxStoreError> {
        (**self).stats().await
    }
}

/// In-memory outbox store for tests and single-process embedding.
///
/// All records live in one `RwLock`-protected map, so every transition is
/// atomic from the dispatcher's point of view just like the conditional
/// updates of the Postgres store. The `Tx` handle is `()`: there is no
/// transaction to join, enqueue applies immediately.
#[derive(Debug, Default)]
pub struct InMemoryOutboxStore {
    records: RwLock<HashMap<MessageId, OutboxRecord>>,
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience constructor returning the store pre-wrapped in an `Arc`.
    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn read(
        &self,
    ) -> Result<RwLockReadGuard<'_, HashMap<MessageId, OutboxRecord>>, OutboxStoreError> {
        self.records
            .read()
            .map_err(|_| OutboxStoreError::Storage("outbox lock poisoned".to_string()))
    }

    fn write(
        &self,
    ) -> Result<RwLockWriteGuard<'_, HashMap<MessageId, OutboxRecord>>, OutboxStoreError> {
        self.records
            .write()
            .map_err(|_| OutboxStoreError::Storage("outbox lock poisoned".to_string()))
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    type Tx = ();

    async fn enqueue(
        &self,
        _tx: &mut Self::Tx,
        message: NewOutboxMessage,
    ) -> Result<MessageId, OutboxStoreError> {
        let mut records = self.write()?;
        let message_id = message.message_id;
        if let Some(existing) = records.get(&message_id) {
            return Err(OutboxStoreError::InvalidState {
                message_id,
                status: existing.status,
                operation: "enqueue",
            });
        }
        records.insert(message_id, OutboxRecord::from_new(message, Utc::now()));
        Ok(message_id)
    }

    async fn get_pending(
        &self,
        batch_size: usize,
        now: DateTime<Utc>,
        max_attempts: u32,
    ) -> Result<Vec<OutboxRecord>, OutboxStoreError> {
        let records = self.read()?;
        let mut eligible: Vec<OutboxRecord> = records
            .values()
            .filter(|record| record.is_dispatch_eligible(now, max_attempts))
            .cloned()
            .collect();
        // Oldest first, with the id as a stable tiebreak for equal timestamps.
        eligible.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.message_id.cmp(&b.message_id))
        });
        eligible.truncate(batch_size);
        Ok(eligible)
    }

    async fn try_mark_processing(
        &self,
        message_id: MessageId,
        now: DateTime<Utc>,
        locked_until: DateTime<Utc>,
        max_attempts: u32,
    ) -> Result<bool, OutboxStoreError> {
        let mut records = self.write()?;
        match records.get_mut(&message_id) {
            Some(record) if record.is_dispatch_eligible(now, max_attempts) => {
                record.begin_attempt(now, locked_until);
                Ok(true)
            }
            // Claimed by someone else, completed, or deleted since the poll.
            _ => Ok(false),
        }
    }

    async fn mark_succeeded(
        &self,
        message_id: MessageId,
        now: DateTime<Utc>,
    ) -> Result<(), OutboxStoreError> {
        let mut records = self.write()?;
        match records.get_mut(&message_id) {
            Some(record) if record.status == OutboxStatus::Processing => {
                record.record_success(now);
            }
            Some(record) => {
                debug!(
                    message_id = %message_id,
                    status = %record.status,
                    "ignoring stale success marker"
                );
            }
            None => {}
        }
        Ok(())
    }

    async fn mark_failed(
        &self,
        message_id: MessageId,
        now: DateTime<Utc>,
        error: &str,
        retry_in: Duration,
    ) -> Result<(), OutboxStoreError> {
        let mut records = self.write()?;
        match records.get_mut(&message_id) {
            Some(record) if record.status == OutboxStatus::Processing => {
                record.record_failure(now, error, retry_in);
            }
            Some(record) => {
                debug!(
                    message_id = %message_id,
                    status = %record.status,
                    "ignoring stale failure marker"
                );
            }
            None => {}
        }
        Ok(())
    }

    async fn query(
        &self,
        take: usize,
        status: Option<OutboxStatus>,
    ) -> Result<Vec<OutboxRecord>, OutboxStoreError> {
        let records = self.read()?;
        let mut matching: Vec<OutboxRecord> = records
            .values()
            .filter(|record| status.is_none_or(|wanted| record.status == wanted))
            .cloned()
            .collect();
        matching.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.message_id.cmp(&a.message_id))
        });
        matching.truncate(take);
        Ok(matching)
    }

    async fn requeue(
        &self,
        message_id: MessageId,
        now: DateTime<Utc>,
    ) -> Result<OutboxRecord, OutboxStoreError> {
        let mut records = self.write()?;
        let record = records
            .get_mut(&message_id)
            .ok_or(OutboxStoreError::NotFound(message_id))?;
        if record.status != OutboxStatus::Failed {
            return Err(OutboxStoreError::InvalidState {
                message_id,
                status: record.status,
                operation: "requeue",
            });
        }
        record.reset_for_requeue(now);
        Ok(record.clone())
    }

    async fn stats(&self) -> Result<OutboxStats, OutboxStoreError> {
        let records = self.read()?;
        let mut stats = OutboxStats::default();
        for record in records.values() {
            match record.status {
                OutboxStatus::Pending => stats.pending += 1,
                OutboxStatus::Processing => stats.processing += 1,
                OutboxStatus::Succeeded => stats.succeeded += 1,
                OutboxStatus::Failed => stats.failed += 1,
            }
        }
        Ok(stats)
    }
}
