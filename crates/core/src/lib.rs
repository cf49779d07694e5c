//! `relaykit-core` — messaging foundation building blocks.
//!
//! This crate contains **pure messaging** primitives (no storage or transport
//! concerns).

pub mod error;
pub mod id;

pub use error::{CoreError, CoreResult};
pub use id::MessageId;
