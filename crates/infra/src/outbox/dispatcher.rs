//! Background dispatcher with lease-based claiming and retry backoff.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use relaykit_events::EventBus;

use crate::config::RelayOptions;

use super::store::OutboxStore;

/// Outcome of a single dispatch tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct TickSummary {
    /// Dispatch-eligible records returned by the poll
    pub fetched: usize,
    /// Claims won by this instance
    pub claimed: usize,
    /// Claimed messages delivered to every handler
    pub succeeded: usize,
    /// Claimed messages whose delivery failed (rescheduled or parked)
    pub failed: usize,
    /// Candidates another worker claimed first
    pub claim_lost: usize,
}

/// Cumulative dispatcher statistics.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct DispatcherStats {
    pub ticks: u64,
    pub fetched: u64,
    pub claimed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub claim_lost: u64,
}

impl DispatcherStats {
    fn absorb(&mut self, summary: &TickSummary) {
        self.ticks += 1;
        self.fetched += summary.fetched as u64;
        self.claimed += summary.claimed as u64;
        self.succeeded += summary.succeeded as u64;
        self.failed += summary.failed as u64;
        self.claim_lost += summary.claim_lost as u64;
    }
}

/// Handle to control a running dispatcher.
#[derive(Debug)]
pub struct DispatcherHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<JoinHandle<()>>,
    stats: Arc<Mutex<DispatcherStats>>,
}

impl DispatcherHandle {
    /// Request graceful shutdown and wait for the loop to stop.
    ///
    /// A tick in flight finishes first; messages it already claimed are
    /// marked before the task exits.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(()).await;
        if let Some(j) = self.join.take() {
            let _ = j.await;
        }
    }

    /// Get current dispatcher statistics.
    pub fn stats(&self) -> DispatcherStats {
        self.stats.lock().unwrap().clone()
    }
}

/// Background outbox dispatcher.
///
/// Polls the outbox for dispatch-eligible records, claims each one under a
/// time-bounded lease, replays it through the event bus and records the
/// outcome. Several dispatchers may run against one store; the conditional
/// claim guarantees a message is delivered by at most one of them per
/// attempt, and an expired lease makes a crashed claimant's messages
/// eligible again.
pub struct OutboxDispatcher<S, B> {
    store: S,
    bus: B,
    options: RelayOptions,
}

impl<S: OutboxStore, B: EventBus> OutboxDispatcher<S, B> {
    pub fn new(store: S, bus: B, options: RelayOptions) -> Self {
        Self {
            store,
            bus,
            options,
        }
    }

    /// Run one dispatch tick at `now`.
    ///
    /// Public so tests and embedders can drive the loop with their own clock
    /// and cadence; [`spawn`] calls this on an interval with the wall clock.
    ///
    /// [`spawn`]: OutboxDispatcher::spawn
    pub async fn run_once(&self, now: DateTime<Utc>) -> TickSummary {
        let mut summary = TickSummary::default();
        if !self.options.enabled {
            return summary;
        }

        let max_attempts = self.options.retry.max_attempts;
        let records = match self
            .store
            .get_pending(self.options.batch_size, now, max_attempts)
            .await
        {
            Ok(records) => records,
            Err(e) => {
                error!(error = %e, "failed to poll outbox");
                return summary;
            }
        };
        summary.fetched = records.len();

        for record in records {
            let message_id = record.message_id;
            let locked_until = now
                + chrono::Duration::from_std(self.options.lease_duration()).unwrap_or_default();

            match self
                .store
                .try_mark_processing(message_id, now, locked_until, max_attempts)
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    // Another dispatcher got there first, or the record moved
                    // on since the poll.
                    summary.claim_lost += 1;
                    continue;
                }
                Err(e) => {
                    warn!(message_id = %message_id, error = %e, "failed to claim outbox message");
                    continue;
                }
            }
            summary.claimed += 1;

            // The claim advanced the stored counter past our snapshot.
            let attempt = record.try_count + 1;
            let message = record.to_message();

            match self.bus.publish(&message).await {
                Ok(()) => {
                    summary.succeeded += 1;
                    debug!(
                        message_id = %message_id,
                        event_type = %record.event_type,
                        attempt,
                        "outbox message delivered"
                    );
                    if let Err(e) = self.store.mark_succeeded(message_id, now).await {
                        // Delivered but not recorded: once the lease expires
                        // the message goes out again. At-least-once, not lost.
                        error!(
                            message_id = %message_id,
                            error = %e,
                            "delivered but failed to mark succeeded"
                        );
                    }
                }
                Err(e) => {
                    summary.failed += 1;
                    let delay = self.options.retry.delay_for_attempt(attempt);
                    if self.options.retry.should_retry(attempt) {
                        warn!(
                            message_id = %message_id,
                            event_type = %record.event_type,
                            attempt,
                            retry_in_ms = delay.as_millis() as u64,
                            error = %e,
                            "outbox delivery failed; retry scheduled"
                        );
                    } else {
                        warn!(
                            message_id = %message_id,
                            event_type = %record.event_type,
                            attempt,
                            error = %e,
                            "outbox delivery failed; attempts exhausted, awaiting requeue"
                        );
                    }
                    if let Err(mark_err) = self
                        .store
                        .mark_failed(message_id, now, &e.to_string(), delay)
                        .await
                    {
                        error!(
                            message_id = %message_id,
                            error = %mark_err,
                            "failed to record delivery failure"
                        );
                    }
                }
            }
        }

        summary
    }

    /// Spawn the dispatcher on the current tokio runtime.
    ///
    /// The first tick fires immediately, subsequent ticks follow the
    /// configured dispatch interval.
    pub fn spawn(self) -> DispatcherHandle
    where
        S: 'static,
        B: 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        let stats = Arc::new(Mutex::new(DispatcherStats::default()));
        let stats_clone = stats.clone();

        let join = tokio::spawn(async move {
            dispatch_loop(self, shutdown_rx, stats_clone).await;
        });

        DispatcherHandle {
            shutdown: shutdown_tx,
            join: Some(join),
            stats,
        }
    }
}

async fn dispatch_loop<S: OutboxStore, B: EventBus>(
    dispatcher: OutboxDispatcher<S, B>,
    mut shutdown_rx: mpsc::Receiver<()>,
    stats: Arc<Mutex<DispatcherStats>>,
) {
    info!(
        interval_secs = dispatcher.options.dispatch_interval_seconds,
        batch_size = dispatcher.options.batch_size,
        "outbox dispatcher started"
    );

    // tokio panics on a zero-period interval.
    let period = dispatcher.options.dispatch_interval().max(Duration::from_millis(10));
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let summary = dispatcher.run_once(Utc::now()).await;
                stats.lock().unwrap().absorb(&summary);
            }
            // Both an explicit shutdown and a dropped handle stop the loop.
            _ = shutdown_rx.recv() => break,
        }
    }

    info!("outbox dispatcher stopped");
}
