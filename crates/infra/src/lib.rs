//! Infrastructure layer: durable outbox/inbox stores, dispatch loops, config.

pub mod config;
pub mod inbox;
pub mod outbox;

mod pg;
