//! Configuration for the outbox/inbox delivery subsystem.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::outbox::RetryPolicy;

/// Tunable knobs for the delivery subsystem, with defaults sized for a small
/// service.
///
/// Every field carries a serde default, so a partial config document
/// deserializes cleanly and absent keys keep their defaults. One value is
/// shared by the dispatcher, the bus decorator and the inbox cleaner so the
/// subsystem is configured in one place.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayOptions {
    /// Master switch; when false the dispatcher tick is a no-op.
    pub enabled: bool,
    /// Whether the bus decorator writes outbox rows for integration events.
    pub auto_enqueue_integration_events: bool,
    /// Seconds between dispatcher polls.
    pub dispatch_interval_seconds: u64,
    /// Maximum records fetched per dispatcher tick.
    pub batch_size: usize,
    /// Seconds a dispatch claim stays exclusive before its lease expires.
    pub lease_seconds: u64,
    /// Days an inbox entry is kept before the cleaner may sweep it.
    pub inbox_retention_days: u32,
    /// Whether the cleaner sweeps expired inbox entries.
    pub enable_inbox_cleanup: bool,
    /// Seconds between cleaner sweeps.
    pub cleanup_interval_seconds: u64,
    /// Backoff and attempt-ceiling policy for failed dispatches.
    pub retry: RetryPolicy,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_enqueue_integration_events: true,
            dispatch_interval_seconds: 5,
            batch_size: 50,
            lease_seconds: 30,
            inbox_retention_days: 30,
            enable_inbox_cleanup: true,
            cleanup_interval_seconds: 3600,
            retry: RetryPolicy::default(),
        }
    }
}

impl RelayOptions {
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_auto_enqueue(mut self, auto_enqueue: bool) -> Self {
        self.auto_enqueue_integration_events = auto_enqueue;
        self
    }

    pub fn with_dispatch_interval_seconds(mut self, seconds: u64) -> Self {
        self.dispatch_interval_seconds = seconds;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_lease_seconds(mut self, seconds: u64) -> Self {
        self.lease_seconds = seconds;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_inbox_retention_days(mut self, days: u32) -> Self {
        self.inbox_retention_days = days;
        self
    }

    pub fn with_inbox_cleanup(mut self, enabled: bool) -> Self {
        self.enable_inbox_cleanup = enabled;
        self
    }

    /// Dispatcher poll cadence.
    pub fn dispatch_interval(&self) -> Duration {
        Duration::from_secs(self.dispatch_interval_seconds)
    }

    /// How long a dispatch claim stays exclusive.
    pub fn lease_duration(&self) -> Duration {
        Duration::from_secs(self.lease_seconds)
    }

    /// Cleaner sweep cadence.
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_seconds)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn defaults_are_the_documented_values() {
        let options = RelayOptions::default();

        assert!(options.enabled);
        assert!(options.auto_enqueue_integration_events);
        assert_eq!(options.dispatch_interval_seconds, 5);
        assert_eq!(options.batch_size, 50);
        assert_eq!(options.lease_seconds, 30);
        assert_eq!(options.inbox_retention_days, 30);
        assert!(options.enable_inbox_cleanup);
        assert_eq!(options.cleanup_interval_seconds, 3600);
        assert_eq!(options.retry.max_attempts, 8);
    }

    #[test]
    fn partial_document_keeps_defaults_for_absent_keys() {
        let options: RelayOptions = serde_json::from_value(json!({
            "batch_size": 10,
            "enabled": false
        }))
        .unwrap();

        assert!(!options.enabled);
        assert_eq!(options.batch_size, 10);
        assert_eq!(options.dispatch_interval_seconds, 5);
        assert_eq!(options.retry.max_attempts, 8);
    }

    #[test]
    fn duration_accessors_reflect_the_configured_seconds() {
        let options = RelayOptions::default()
            .with_dispatch_interval_seconds(7)
            .with_lease_seconds(90);

        assert_eq!(options.dispatch_interval(), Duration::from_secs(7));
        assert_eq!(options.lease_duration(), Duration::from_secs(90));
        assert_eq!(options.cleanup_interval(), Duration::from_secs(3600));
    }
}
