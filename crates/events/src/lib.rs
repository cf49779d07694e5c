//! `relaykit-events` — event contracts and the in-process bus.
//!
//! Everything a producing or consuming side needs to talk about events
//! without touching storage: the [`Event`] trait (with its integration-event
//! marker), the [`EventMessage`] envelope, the [`EventHandler`] consumer
//! trait, and the [`EventBus`] abstraction with its in-process
//! implementation.

pub mod bus;
pub mod event;
pub mod handler;
pub mod in_process;
pub mod message;

pub use bus::{EventBus, PublishError};
pub use event::Event;
pub use handler::{EventHandler, HandlerError};
pub use in_process::InProcessEventBus;
pub use message::{EventMessage, SerializationError};
