//! Inbox deduplication: exactly-once handler execution over an
//! at-least-once bus.
//!
//! ## Design
//!
//! - Consumers record `(message_id, handler)` pairs they have handled
//! - The claim is a unique-constraint-backed insert, so concurrent
//!   deliveries of the same message resolve to one execution
//! - Entries past the retention window are swept by a background cleaner
//!
//! ## Components
//!
//! - `InboxStore`: persistence boundary (in-memory or Postgres)
//! - `InboxedHandler`: decorator that guards any `EventHandler`
//! - `InboxCleaner`: periodic retention sweep

pub mod cleaner;
pub mod guard;
pub mod postgres;
pub mod store;

pub use cleaner::{CleanerHandle, InboxCleaner};
pub use guard::InboxedHandler;
pub use postgres::PgInboxStore;
pub use store::{InMemoryInboxStore, InboxStore, InboxStoreError};
