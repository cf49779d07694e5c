//! Postgres-backed outbox store implementation.
//!
//! This module persists outbox records in PostgreSQL and resolves dispatcher
//! contention at the database level: every lifecycle transition is a single
//! conditional `UPDATE`, so concurrent dispatchers on separate processes can
//! share one table without coordination.
//!
//! ## Expected Schema
//!
//! The crate ships no migration tooling; embedders own their schema. The
//! store expects a table shaped like:
//!
//! ```sql
//! CREATE TABLE outbox_messages (
//!     message_id    UUID PRIMARY KEY,
//!     event_type    TEXT NOT NULL,
//!     payload       JSONB NOT NULL,
//!     occurred_at   TIMESTAMPTZ NOT NULL,
//!     status        TEXT NOT NULL,
//!     try_count     INTEGER NOT NULL DEFAULT 0,
//!     locked_until  TIMESTAMPTZ,
//!     next_retry_at TIMESTAMPTZ,
//!     last_error    TEXT,
//!     created_at    TIMESTAMPTZ NOT NULL,
//!     updated_at    TIMESTAMPTZ NOT NULL
//! );
//!
//! CREATE INDEX outbox_messages_dispatch_idx
//!     ON outbox_messages (status, created_at);
//! ```
//!
//! ## Error Mapping
//!
//! SQLx failures funnel through a shared mapper and surface as
//! `OutboxStoreError::Storage`; unique violations (SQLSTATE `23505`) and pool
//! shutdown are called out distinctly in the message so a duplicate enqueue
//! reads differently from an outage.
//!
//! ## Thread Safety
//!
//! `PgOutboxStore` is `Send + Sync` and can be shared across tasks. All
//! operations use the SQLx connection pool which handles thread-safe
//! connection management.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tracing::{debug, instrument};

use relaykit_core::MessageId;

use crate::pg::map_sqlx_error;

use super::store::{OutboxStore, OutboxStoreError};
use super::types::{NewOutboxMessage, OutboxRecord, OutboxStats, OutboxStatus};

/// Dispatch-eligibility predicate shared by the poll and the claim, so a
/// record can never be claimed under a condition the poll would not have
/// selected. `$1` is the current time, `$2` the attempt ceiling.
const DISPATCH_ELIGIBLE: &str = "(
    status = 'pending'
    OR (
        status = 'failed'
        AND (next_retry_at IS NULL OR next_retry_at <= $1)
        AND try_count < $2
    )
    OR (status = 'processing' AND locked_until <= $1)
)";

const RECORD_COLUMNS: &str = "message_id, event_type, payload, occurred_at, status, try_count, \
     locked_until, next_retry_at, last_error, created_at, updated_at";

/// Postgres-backed outbox store.
///
/// Enqueue rides the caller's open transaction; everything else goes through
/// the pool. The claim (`try_mark_processing`) re-checks eligibility inside
/// the `UPDATE` itself, which is what makes it safe for any number of
/// dispatcher processes: the row version each one saw in the poll may be
/// stale, but only one conditional update can win.
#[derive(Debug, Clone)]
pub struct PgOutboxStore {
    pool: Arc<PgPool>,
}

impl PgOutboxStore {
    /// Create a new PgOutboxStore with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl OutboxStore for PgOutboxStore {
    type Tx = Transaction<'static, Postgres>;

    #[instrument(
        skip(self, tx, message),
        fields(
            message_id = %message.message_id,
            event_type = %message.event_type
        ),
        err
    )]
    async fn enqueue(
        &self,
        tx: &mut Self::Tx,
        message: NewOutboxMessage,
    ) -> Result<MessageId, OutboxStoreError> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO outbox_messages
                (message_id, event_type, payload, occurred_at, status, try_count, created_at, updated_at)
            VALUES ($1, $2, $3, $4, 'pending', 0, $5, $5)
            "#,
        )
        .bind(message.message_id.as_uuid())
        .bind(&message.event_type)
        .bind(&message.payload)
        .bind(message.occurred_at)
        .bind(now)
        .execute(&mut **tx)
        .await
        .map_err(|e| OutboxStoreError::Storage(map_sqlx_error("enqueue", e)))?;

        Ok(message.message_id)
    }

    #[instrument(skip(self), err)]
    async fn get_pending(
        &self,
        batch_size: usize,
        now: DateTime<Utc>,
        max_attempts: u32,
    ) -> Result<Vec<OutboxRecord>, OutboxStoreError> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS}
             FROM outbox_messages
             WHERE {DISPATCH_ELIGIBLE}
             ORDER BY created_at ASC
             LIMIT $3"
        );
        let rows = sqlx::query(&sql)
            .bind(now)
            .bind(max_attempts as i32)
            .bind(batch_size as i64)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| OutboxStoreError::Storage(map_sqlx_error("get_pending", e)))?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let row = OutboxRow::from_row(&row).map_err(|e| {
                OutboxStoreError::Storage(format!("failed to decode outbox row: {}", e))
            })?;
            records.push(row.try_into()?);
        }
        Ok(records)
    }

    #[instrument(skip(self), fields(message_id = %message_id), err)]
    async fn try_mark_processing(
        &self,
        message_id: MessageId,
        now: DateTime<Utc>,
        locked_until: DateTime<Utc>,
        max_attempts: u32,
    ) -> Result<bool, OutboxStoreError> {
        let sql = format!(
            "UPDATE outbox_messages
             SET status = 'processing',
                 try_count = try_count + 1,
                 locked_until = $3,
                 next_retry_at = NULL,
                 updated_at = $1
             WHERE message_id = $4 AND {DISPATCH_ELIGIBLE}"
        );
        let result = sqlx::query(&sql)
            .bind(now)
            .bind(max_attempts as i32)
            .bind(locked_until)
            .bind(message_id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| OutboxStoreError::Storage(map_sqlx_error("try_mark_processing", e)))?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self), fields(message_id = %message_id), err)]
    async fn mark_succeeded(
        &self,
        message_id: MessageId,
        now: DateTime<Utc>,
    ) -> Result<(), OutboxStoreError> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_messages
            SET status = 'succeeded',
                locked_until = NULL,
                next_retry_at = NULL,
                last_error = NULL,
                updated_at = $1
            WHERE message_id = $2 AND status = 'processing'
            "#,
        )
        .bind(now)
        .bind(message_id.as_uuid())
        .execute(&*self.pool)
        .await
        .map_err(|e| OutboxStoreError::Storage(map_sqlx_error("mark_succeeded", e)))?;

        if result.rows_affected() == 0 {
            // Lease takeover in the meantime; the new owner's state stands.
            debug!(message_id = %message_id, "ignoring stale success marker");
        }
        Ok(())
    }

    #[instrument(skip(self, error), fields(message_id = %message_id), err)]
    async fn mark_failed(
        &self,
        message_id: MessageId,
        now: DateTime<Utc>,
        error: &str,
        retry_in: Duration,
    ) -> Result<(), OutboxStoreError> {
        let next_retry_at = now + chrono::Duration::milliseconds(retry_in.as_millis() as i64);
        let result = sqlx::query(
            r#"
            UPDATE outbox_messages
            SET status = 'failed',
                last_error = $3,
                next_retry_at = $4,
                locked_until = NULL,
                updated_at = $1
            WHERE message_id = $2 AND status = 'processing'
            "#,
        )
        .bind(now)
        .bind(message_id.as_uuid())
        .bind(error)
        .bind(next_retry_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| OutboxStoreError::Storage(map_sqlx_error("mark_failed", e)))?;

        if result.rows_affected() == 0 {
            debug!(message_id = %message_id, "ignoring stale failure marker");
        }
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn query(
        &self,
        take: usize,
        status: Option<OutboxStatus>,
    ) -> Result<Vec<OutboxRecord>, OutboxStoreError> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS}
             FROM outbox_messages
             WHERE ($2::text IS NULL OR status = $2)
             ORDER BY created_at DESC
             LIMIT $1"
        );
        let rows = sqlx::query(&sql)
            .bind(take as i64)
            .bind(status.map(|s| s.as_str()))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| OutboxStoreError::Storage(map_sqlx_error("query", e)))?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let row = OutboxRow::from_row(&row).map_err(|e| {
                OutboxStoreError::Storage(format!("failed to decode outbox row: {}", e))
            })?;
            records.push(row.try_into()?);
        }
        Ok(records)
    }

    #[instrument(skip(self), fields(message_id = %message_id), err)]
    async fn requeue(
        &self,
        message_id: MessageId,
        now: DateTime<Utc>,
    ) -> Result<OutboxRecord, OutboxStoreError> {
        let sql = format!(
            "UPDATE outbox_messages
             SET status = 'pending',
                 try_count = 0,
                 locked_until = NULL,
                 next_retry_at = NULL,
                 last_error = NULL,
                 updated_at = $1
             WHERE message_id = $2 AND status = 'failed'
             RETURNING {RECORD_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(now)
            .bind(message_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| OutboxStoreError::Storage(map_sqlx_error("requeue", e)))?;

        match row {
            Some(row) => {
                let row = OutboxRow::from_row(&row).map_err(|e| {
                    OutboxStoreError::Storage(format!("failed to decode outbox row: {}", e))
                })?;
                row.try_into()
            }
            // Zero rows: tell the operator whether the record is missing or
            // merely not failed.
            None => {
                let current = sqlx::query("SELECT status FROM outbox_messages WHERE message_id = $1")
                    .bind(message_id.as_uuid())
                    .fetch_optional(&*self.pool)
                    .await
                    .map_err(|e| OutboxStoreError::Storage(map_sqlx_error("requeue", e)))?;
                match current {
                    None => Err(OutboxStoreError::NotFound(message_id)),
                    Some(row) => {
                        let status: String = row.try_get("status").map_err(|e| {
                            OutboxStoreError::Storage(format!("failed to decode status: {}", e))
                        })?;
                        let status = status
                            .parse::<OutboxStatus>()
                            .map_err(|e| OutboxStoreError::Storage(e.to_string()))?;
                        Err(OutboxStoreError::InvalidState {
                            message_id,
                            status,
                            operation: "requeue",
                        })
                    }
                }
            }
        }
    }

    #[instrument(skip(self), err)]
    async fn stats(&self) -> Result<OutboxStats, OutboxStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT status, COUNT(*) AS total
            FROM outbox_messages
            GROUP BY status
            "#,
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| OutboxStoreError::Storage(map_sqlx_error("stats", e)))?;

        let mut stats = OutboxStats::default();
        for row in rows {
            let status: String = row
                .try_get("status")
                .map_err(|e| OutboxStoreError::Storage(format!("failed to decode status: {}", e)))?;
            let total: i64 = row
                .try_get("total")
                .map_err(|e| OutboxStoreError::Storage(format!("failed to decode count: {}", e)))?;
            let total = total.max(0) as u64;
            match status.parse::<OutboxStatus>() {
                Ok(OutboxStatus::Pending) => stats.pending = total,
                Ok(OutboxStatus::Processing) => stats.processing = total,
                Ok(OutboxStatus::Succeeded) => stats.succeeded = total,
                Ok(OutboxStatus::Failed) => stats.failed = total,
                Err(e) => return Err(OutboxStoreError::Storage(e.to_string())),
            }
        }
        Ok(stats)
    }
}

/// Internal row representation matching the `outbox_messages` table.
#[derive(Debug)]
struct OutboxRow {
    message_id: uuid::Uuid,
    event_type: String,
    payload: serde_json::Value,
    occurred_at: DateTime<Utc>,
    status: String,
    try_count: i32,
    locked_until: Option<DateTime<Utc>>,
    next_retry_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, sqlx::postgres::PgRow> for OutboxRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            message_id: row.try_get("message_id")?,
            event_type: row.try_get("event_type")?,
            payload: row.try_get("payload")?,
            occurred_at: row.try_get("occurred_at")?,
            status: row.try_get("status")?,
            try_count: row.try_get("try_count")?,
            locked_until: row.try_get("locked_until")?,
            next_retry_at: row.try_get("next_retry_at")?,
            last_error: row.try_get("last_error")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl TryFrom<OutboxRow> for OutboxRecord {
    type Error = OutboxStoreError;

    fn try_from(row: OutboxRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<OutboxStatus>()
            .map_err(|e| OutboxStoreError::Storage(e.to_string()))?;
        Ok(OutboxRecord {
            message_id: MessageId::from_uuid(row.message_id),
            event_type: row.event_type,
            payload: row.payload,
            occurred_at: row.occurred_at,
            status,
            try_count: row.try_count.max(0) as u32,
            locked_until: row.locked_until,
            next_retry_at: row.next_retry_at,
            last_error: row.last_error,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
