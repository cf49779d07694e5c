//! Transactional outbox: durable outbound messages with leased dispatch.
//!
//! ## Design
//!
//! - Enqueue rides the caller's storage transaction, so the outbox row and
//!   the business mutation commit or roll back together
//! - A background dispatcher claims due records under a time-bounded lease
//!   and replays them through the event bus
//! - Claims are conditional state transitions in the store, safe across
//!   processes; a crashed claimant's lease expires and the record circulates
//!   again
//! - Failed deliveries are rescheduled with backoff until the attempt
//!   ceiling, then parked for operator requeue
//!
//! ## Components
//!
//! - `OutboxRecord` / `OutboxStatus`: the durable message and its lifecycle
//! - `OutboxStore`: persistence boundary (in-memory or Postgres)
//! - `OutboxEnqueuer`: serialize-and-insert front door for application code
//! - `TransactionalEventBus`: bus decorator auto-enqueueing integration
//!   events
//! - `OutboxDispatcher`: periodic claim/publish/mark loop

pub mod dispatcher;
pub mod enqueuer;
pub mod postgres;
pub mod store;
pub mod transactional_bus;
pub mod types;

pub use dispatcher::{DispatcherHandle, DispatcherStats, OutboxDispatcher, TickSummary};
pub use enqueuer::{EnqueueError, OutboxEnqueuer};
pub use postgres::PgOutboxStore;
pub use store::{InMemoryOutboxStore, OutboxStore, OutboxStoreError};
pub use transactional_bus::{TransactionalEventBus, TransactionalPublishError};
pub use types::{
    BackoffStrategy, NewOutboxMessage, OutboxRecord, OutboxStats, OutboxStatus, RetryPolicy,
};
