use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use relaykit_core::MessageId;

use crate::event::Event;

/// Failure to encode a typed event into a message payload.
#[derive(Debug, Error)]
#[error("failed to serialize event '{event_type}': {source}")]
pub struct SerializationError {
    pub event_type: String,
    #[source]
    pub source: serde_json::Error,
}

/// Envelope for a single event in flight.
///
/// This is the unit the bus delivers to handlers and the dispatcher replays
/// from the outbox.
///
/// Notes:
/// - `message_id` is the identity consumers deduplicate on; a redelivered
///   message carries the same id as the original delivery.
/// - `payload` stays opaque JSON here; handlers deserialize the types they
///   know.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMessage {
    message_id: MessageId,
    event_type: String,
    payload: JsonValue,
    occurred_at: DateTime<Utc>,
}

impl EventMessage {
    pub fn new(
        message_id: MessageId,
        event_type: impl Into<String>,
        payload: JsonValue,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            message_id,
            event_type: event_type.into(),
            payload,
            occurred_at,
        }
    }

    /// Serialize a typed event into a message, minting a fresh `message_id`.
    pub fn from_event<E: Event + Serialize>(event: &E) -> Result<Self, SerializationError> {
        Self::from_event_with_id(MessageId::new(), event)
    }

    /// Serialize a typed event into a message under a caller-chosen id.
    ///
    /// Used when the id already exists elsewhere (an outbox row) and the
    /// in-flight copy must share it.
    pub fn from_event_with_id<E: Event + Serialize>(
        message_id: MessageId,
        event: &E,
    ) -> Result<Self, SerializationError> {
        let payload = serde_json::to_value(event).map_err(|e| SerializationError {
            event_type: event.event_type().to_string(),
            source: e,
        })?;

        Ok(Self {
            message_id,
            event_type: event.event_type().to_string(),
            payload,
            occurred_at: event.occurred_at(),
        })
    }

    pub fn message_id(&self) -> MessageId {
        self.message_id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn payload(&self) -> &JsonValue {
        &self.payload
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn into_payload(self) -> JsonValue {
        self.payload
    }
}
