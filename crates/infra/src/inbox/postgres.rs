//! Postgres-backed inbox store implementation.
//!
//! Deduplication rests on the composite primary key: the claim is a single
//! `INSERT ... ON CONFLICT DO NOTHING`, so concurrent claimers for the same
//! `(message_id, handler)` pair race in the database and exactly one insert
//! wins. No read-then-write, no advisory locks.
//!
//! ## Expected Schema
//!
//! The crate ships no migration tooling; embedders own their schema. The
//! store expects a table shaped like:
//!
//! ```sql
//! CREATE TABLE inbox_messages (
//!     message_id   UUID        NOT NULL,
//!     handler      TEXT        NOT NULL,
//!     processed_at TIMESTAMPTZ NOT NULL,
//!     PRIMARY KEY (message_id, handler)
//! );
//! ```
//!
//! A supporting index on `processed_at` keeps the retention sweep cheap once
//! the table grows.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::instrument;

use relaykit_core::MessageId;

use crate::pg::map_sqlx_error;

use super::store::{InboxStore, InboxStoreError};

/// Postgres-backed inbox store.
#[derive(Debug, Clone)]
pub struct PgInboxStore {
    pool: Arc<PgPool>,
}

impl PgInboxStore {
    /// Create a new PgInboxStore with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl InboxStore for PgInboxStore {
    #[instrument(skip(self), fields(message_id = %message_id), err)]
    async fn try_begin_handle(
        &self,
        message_id: MessageId,
        handler: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, InboxStoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO inbox_messages (message_id, handler, processed_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (message_id, handler) DO NOTHING
            "#,
        )
        .bind(message_id.as_uuid())
        .bind(handler)
        .bind(now)
        .execute(&*self.pool)
        .await
        .map_err(|e| InboxStoreError::Storage(map_sqlx_error("try_begin_handle", e)))?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self), err)]
    async fn cleanup(&self, older_than: DateTime<Utc>) -> Result<u64, InboxStoreError> {
        let result = sqlx::query("DELETE FROM inbox_messages WHERE processed_at < $1")
            .bind(older_than)
            .execute(&*self.pool)
            .await
            .map_err(|e| InboxStoreError::Storage(map_sqlx_error("cleanup", e)))?;

        Ok(result.rows_affected())
    }

    #[instrument(skip(self), err)]
    async fn count(&self) -> Result<u64, InboxStoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM inbox_messages")
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| InboxStoreError::Storage(map_sqlx_error("count", e)))?;

        let total: i64 = row
            .try_get("total")
            .map_err(|e| InboxStoreError::Storage(format!("failed to decode count: {}", e)))?;
        Ok(total.max(0) as u64)
    }
}
