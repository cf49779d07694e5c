//! Outbox record types and retry policies.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use relaykit_core::MessageId;
use relaykit_events::{Event, EventMessage, SerializationError};

/// Delivery status of an outbox record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    /// Enqueued, never claimed
    Pending,
    /// Claimed by a dispatcher under a live lease
    Processing,
    /// Delivered to every subscribed handler
    Succeeded,
    /// Last attempt failed; retried until the attempt ceiling
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Processing => "processing",
            OutboxStatus::Succeeded => "succeeded",
            OutboxStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error parsing a status column value.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown outbox status '{0}'")]
pub struct ParseOutboxStatusError(pub String);

impl FromStr for OutboxStatus {
    type Err = ParseOutboxStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OutboxStatus::Pending),
            "processing" => Ok(OutboxStatus::Processing),
            "succeeded" => Ok(OutboxStatus::Succeeded),
            "failed" => Ok(OutboxStatus::Failed),
            other => Err(ParseOutboxStatusError(other.to_string())),
        }
    }
}

/// Backoff strategy for retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed,
    /// Exponential backoff: base * 2^attempt
    Exponential,
    /// Linear backoff: base * attempt
    Linear,
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        Self::Exponential
    }
}

/// Retry policy configuration.
///
/// `max_attempts` doubles as the terminal-failure ceiling: a failed record
/// whose `try_count` has reached it is no longer dispatch-eligible and stays
/// visibly failed until an operator requeues it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of dispatch attempts (must be >= 1)
    pub max_attempts: u32,
    /// Base delay between retries
    pub base_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
    /// Backoff strategy
    pub strategy: BackoffStrategy,
    /// Jitter factor (0.0-1.0) to spread retry storms
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(900),
            strategy: BackoffStrategy::Exponential,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with fixed delays.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
            jitter: 0.0,
        }
    }

    /// Create a policy with exponential backoff.
    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Exponential,
            jitter: 0.1,
        }
    }

    /// Calculate delay before the next attempt, given the attempt number that
    /// just failed (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_ms = self.base_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;

        let delay_ms = match self.strategy {
            BackoffStrategy::Fixed => base_ms,
            BackoffStrategy::Exponential => {
                let exp = 2_f64.powi((attempt - 1) as i32);
                (base_ms * exp).min(max_ms)
            }
            BackoffStrategy::Linear => {
                let linear = base_ms * (attempt as f64);
                linear.min(max_ms)
            }
        };

        // Deterministic spread keyed on the attempt number.
        let jitter_range = delay_ms * self.jitter;
        let jitter = if jitter_range > 0.0 {
            let pseudo_random = ((attempt as f64 * 17.0) % 100.0) / 100.0;
            jitter_range * (pseudo_random - 0.5) * 2.0
        } else {
            0.0
        };

        Duration::from_millis((delay_ms + jitter).max(0.0) as u64)
    }

    /// Check if more attempts are allowed after `attempt` tries.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Input shape for enqueueing: the message before it has a durable row.
///
/// The id is minted here, before the insert, so the caller can hand the same
/// identity to the in-process bus while the row rides the caller's
/// transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOutboxMessage {
    pub message_id: MessageId,
    pub event_type: String,
    pub payload: JsonValue,
    pub occurred_at: DateTime<Utc>,
}

impl NewOutboxMessage {
    pub fn new(
        event_type: impl Into<String>,
        payload: JsonValue,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            message_id: MessageId::new(),
            event_type: event_type.into(),
            payload,
            occurred_at,
        }
    }

    /// Serialize a typed event into the enqueue shape.
    pub fn from_event<E: Event + Serialize>(event: &E) -> Result<Self, SerializationError> {
        let message = EventMessage::from_event(event)?;
        Ok(Self {
            message_id: message.message_id(),
            event_type: message.event_type().to_string(),
            occurred_at: message.occurred_at(),
            payload: message.into_payload(),
        })
    }

    /// The in-flight envelope carrying the same identity as the future row.
    pub fn to_event_message(&self) -> EventMessage {
        EventMessage::new(
            self.message_id,
            self.event_type.clone(),
            self.payload.clone(),
            self.occurred_at,
        )
    }
}

/// A durable outbound message with delivery state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxRecord {
    /// Identity assigned at enqueue time, immutable afterwards
    pub message_id: MessageId,
    /// Payload schema discriminator used for bus routing
    pub event_type: String,
    /// Serialized event body, opaque to the pipeline
    pub payload: JsonValue,
    /// Business time of the originating event
    pub occurred_at: DateTime<Utc>,
    /// Current delivery status
    pub status: OutboxStatus,
    /// Dispatch attempts started so far
    pub try_count: u32,
    /// Lease expiry; set iff `status == Processing`
    pub locked_until: Option<DateTime<Utc>>,
    /// Earliest next dispatch for a failed record
    pub next_retry_at: Option<DateTime<Utc>>,
    /// Diagnostic from the most recent failed attempt
    pub last_error: Option<String>,
    /// When the row was created
    pub created_at: DateTime<Utc>,
    /// When the row was last updated
    pub updated_at: DateTime<Utc>,
}

impl OutboxRecord {
    /// Build the pending row for a new message.
    pub fn from_new(message: NewOutboxMessage, now: DateTime<Utc>) -> Self {
        Self {
            message_id: message.message_id,
            event_type: message.event_type,
            payload: message.payload,
            occurred_at: message.occurred_at,
            status: OutboxStatus::Pending,
            try_count: 0,
            locked_until: None,
            next_retry_at: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether a dispatcher may claim this record at `now`.
    ///
    /// Eligible records are pending ones, failed ones whose retry is due and
    /// whose attempts are below `max_attempts`, and processing ones whose
    /// lease has expired (the crashed-worker recovery path).
    pub fn is_dispatch_eligible(&self, now: DateTime<Utc>, max_attempts: u32) -> bool {
        match self.status {
            OutboxStatus::Pending => true,
            OutboxStatus::Failed => {
                let due = match self.next_retry_at {
                    Some(at) => at <= now,
                    None => true,
                };
                due && self.try_count < max_attempts
            }
            OutboxStatus::Processing => self.has_expired_lease(now),
            OutboxStatus::Succeeded => false,
        }
    }

    /// Whether the record sits in `Processing` past its lease expiry.
    pub fn has_expired_lease(&self, now: DateTime<Utc>) -> bool {
        matches!(self.status, OutboxStatus::Processing)
            && self.locked_until.is_some_and(|until| until <= now)
    }

    /// Whether the record has burned through its attempt ceiling.
    pub fn is_terminally_failed(&self, max_attempts: u32) -> bool {
        matches!(self.status, OutboxStatus::Failed) && self.try_count >= max_attempts
    }

    /// Begin a dispatch attempt: lease the record and count the attempt.
    pub fn begin_attempt(&mut self, now: DateTime<Utc>, locked_until: DateTime<Utc>) {
        self.status = OutboxStatus::Processing;
        self.try_count += 1;
        self.locked_until = Some(locked_until);
        self.next_retry_at = None;
        self.updated_at = now;
    }

    /// Record a fully delivered attempt.
    pub fn record_success(&mut self, now: DateTime<Utc>) {
        self.status = OutboxStatus::Succeeded;
        self.locked_until = None;
        self.next_retry_at = None;
        self.last_error = None;
        self.updated_at = now;
    }

    /// Record a failed attempt and schedule the retry.
    pub fn record_failure(&mut self, now: DateTime<Utc>, error: &str, retry_in: Duration) {
        self.status = OutboxStatus::Failed;
        self.last_error = Some(error.to_string());
        self.next_retry_at =
            Some(now + chrono::Duration::milliseconds(retry_in.as_millis() as i64));
        self.locked_until = None;
        self.updated_at = now;
    }

    /// Return the record to circulation after operator intervention.
    pub fn reset_for_requeue(&mut self, now: DateTime<Utc>) {
        self.status = OutboxStatus::Pending;
        self.try_count = 0;
        self.locked_until = None;
        self.next_retry_at = None;
        self.last_error = None;
        self.updated_at = now;
    }

    /// The envelope delivered through the bus for this record.
    pub fn to_message(&self) -> EventMessage {
        EventMessage::new(
            self.message_id,
            self.event_type.clone(),
            self.payload.clone(),
            self.occurred_at,
        )
    }
}

/// Per-status outbox counts (diagnostic snapshot).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxStats {
    pub pending: u64,
    pub processing: u64,
    pub succeeded: u64,
    pub failed: u64,
}

impl OutboxStats {
    pub fn total(&self) -> u64 {
        self.pending + self.processing + self.succeeded + self.failed
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn pending_record(now: DateTime<Utc>) -> OutboxRecord {
        OutboxRecord::from_new(
            NewOutboxMessage::new("sales.order.placed", json!({"order_id": "O1"}), now),
            now,
        )
    }

    #[test]
    fn exponential_backoff_calculates_correctly() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            strategy: BackoffStrategy::Exponential,
            jitter: 0.0,
        };

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(800));
    }

    #[test]
    fn exponential_backoff_caps_at_max_delay() {
        let policy = RetryPolicy {
            max_attempts: 20,
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(900),
            strategy: BackoffStrategy::Exponential,
            jitter: 0.0,
        };

        assert_eq!(policy.delay_for_attempt(7), Duration::from_secs(640));
        assert_eq!(policy.delay_for_attempt(8), Duration::from_secs(900));
        assert_eq!(policy.delay_for_attempt(15), Duration::from_secs(900));
    }

    #[test]
    fn fixed_backoff_is_constant() {
        let policy = RetryPolicy::fixed(3, Duration::from_millis(500));

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(500));
    }

    #[test]
    fn should_retry_respects_max_attempts() {
        let policy = RetryPolicy {
            max_attempts: 3,
            ..Default::default()
        };

        assert!(policy.should_retry(0));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
        assert!(!policy.should_retry(4));
    }

    #[test]
    fn record_lifecycle_success() {
        let now = Utc::now();
        let mut record = pending_record(now);

        assert_eq!(record.status, OutboxStatus::Pending);
        assert_eq!(record.try_count, 0);

        let lease = now + chrono::Duration::seconds(30);
        record.begin_attempt(now, lease);
        assert_eq!(record.status, OutboxStatus::Processing);
        assert_eq!(record.try_count, 1);
        assert_eq!(record.locked_until, Some(lease));

        record.record_success(now);
        assert_eq!(record.status, OutboxStatus::Succeeded);
        assert_eq!(record.locked_until, None);
        assert_eq!(record.last_error, None);
    }

    #[test]
    fn record_failure_schedules_retry() {
        let now = Utc::now();
        let mut record = pending_record(now);

        record.begin_attempt(now, now + chrono::Duration::seconds(30));
        record.record_failure(now, "connection refused", Duration::from_secs(20));

        assert_eq!(record.status, OutboxStatus::Failed);
        assert_eq!(record.try_count, 1);
        assert_eq!(record.last_error.as_deref(), Some("connection refused"));
        assert_eq!(record.next_retry_at, Some(now + chrono::Duration::seconds(20)));
        assert_eq!(record.locked_until, None);
    }

    #[test]
    fn requeue_resets_attempts_and_diagnostics() {
        let now = Utc::now();
        let mut record = pending_record(now);
        record.begin_attempt(now, now + chrono::Duration::seconds(30));
        record.record_failure(now, "boom", Duration::from_secs(5));

        record.reset_for_requeue(now);

        assert_eq!(record.status, OutboxStatus::Pending);
        assert_eq!(record.try_count, 0);
        assert_eq!(record.last_error, None);
        assert_eq!(record.next_retry_at, None);
    }

    #[test]
    fn eligibility_pending_and_succeeded() {
        let now = Utc::now();
        let mut record = pending_record(now);

        assert!(record.is_dispatch_eligible(now, 8));

        record.begin_attempt(now, now + chrono::Duration::seconds(30));
        record.record_success(now);
        assert!(!record.is_dispatch_eligible(now, 8));
    }

    #[test]
    fn eligibility_respects_live_and_expired_leases() {
        let now = Utc::now();
        let mut record = pending_record(now);
        record.begin_attempt(now, now + chrono::Duration::seconds(30));

        // Live lease: not claimable.
        assert!(!record.is_dispatch_eligible(now, 8));

        // Expired lease: claimable again.
        let later = now + chrono::Duration::seconds(31);
        assert!(record.has_expired_lease(later));
        assert!(record.is_dispatch_eligible(later, 8));
    }

    #[test]
    fn eligibility_respects_retry_schedule_and_ceiling() {
        let now = Utc::now();
        let mut record = pending_record(now);
        record.begin_attempt(now, now + chrono::Duration::seconds(30));
        record.record_failure(now, "boom", Duration::from_secs(60));

        // Backoff not elapsed yet.
        assert!(!record.is_dispatch_eligible(now, 8));
        // Due again.
        assert!(record.is_dispatch_eligible(now + chrono::Duration::seconds(61), 8));
        // At the ceiling the record is terminally failed.
        assert!(!record.is_dispatch_eligible(now + chrono::Duration::seconds(61), 1));
        assert!(record.is_terminally_failed(1));
    }

    #[test]
    fn to_message_carries_the_row_identity() {
        let now = Utc::now();
        let record = pending_record(now);

        let message = record.to_message();

        assert_eq!(message.message_id(), record.message_id);
        assert_eq!(message.event_type(), "sales.order.placed");
        assert_eq!(message.payload()["order_id"], "O1");
        assert_eq!(message.occurred_at(), now);
    }

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            OutboxStatus::Pending,
            OutboxStatus::Processing,
            OutboxStatus::Succeeded,
            OutboxStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<OutboxStatus>().unwrap(), status);
        }
        assert!("unknown".parse::<OutboxStatus>().is_err());
    }

    mod proptest_tests {
        use proptest::prelude::*;

        use super::*;

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 256,
                ..ProptestConfig::default()
            })]

            /// Property: without jitter, backoff never decreases as attempts
            /// grow and never exceeds the cap.
            #[test]
            fn backoff_is_monotone_and_capped(attempt in 1u32..64) {
                let policy = RetryPolicy {
                    max_attempts: 64,
                    base_delay: Duration::from_secs(10),
                    max_delay: Duration::from_secs(900),
                    strategy: BackoffStrategy::Exponential,
                    jitter: 0.0,
                };

                let current = policy.delay_for_attempt(attempt);
                let next = policy.delay_for_attempt(attempt + 1);

                prop_assert!(next >= current);
                prop_assert!(current <= policy.max_delay);
            }

            /// Property: jitter keeps the delay within +-jitter of the raw
            /// backoff value.
            #[test]
            fn jitter_stays_within_band(attempt in 1u32..64) {
                let jittered = RetryPolicy::default();
                let raw = RetryPolicy { jitter: 0.0, ..RetryPolicy::default() };

                let delay = jittered.delay_for_attempt(attempt).as_millis() as f64;
                let base = raw.delay_for_attempt(attempt).as_millis() as f64;
                let band = base * jittered.jitter;

                prop_assert!(delay >= base - band - 1.0);
                prop_assert!(delay <= base + band + 1.0);
            }
        }
    }
}
