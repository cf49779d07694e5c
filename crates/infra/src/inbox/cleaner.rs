//! Retention sweep for inbox entries.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::RelayOptions;

use super::store::InboxStore;

/// Handle to control a running cleaner.
#[derive(Debug)]
pub struct CleanerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<JoinHandle<()>>,
}

impl CleanerHandle {
    /// Request graceful shutdown and wait for the loop to stop.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(()).await;
        if let Some(j) = self.join.take() {
            let _ = j.await;
        }
    }
}

/// Periodic deletion of inbox entries past the retention window.
///
/// Old entries only exist to absorb redeliveries, and redeliveries stop once
/// a message leaves the outbox for good; entries older than the retention
/// window are dead weight. The sweep is best-effort: a failed pass is logged
/// and retried on the next interval.
pub struct InboxCleaner<I> {
    inbox: I,
    options: RelayOptions,
}

impl<I: InboxStore> InboxCleaner<I> {
    pub fn new(inbox: I, options: RelayOptions) -> Self {
        Self { inbox, options }
    }

    /// Run one sweep at `now`; returns the number of deleted entries.
    ///
    /// A no-op (returning 0) when cleanup is disabled in the options.
    pub async fn run_once(&self, now: DateTime<Utc>) -> u64 {
        if !self.options.enable_inbox_cleanup {
            return 0;
        }

        let cutoff = now - chrono::Duration::days(self.options.inbox_retention_days as i64);
        match self.inbox.cleanup(cutoff).await {
            Ok(0) => {
                debug!(cutoff = %cutoff, "inbox sweep found nothing to delete");
                0
            }
            Ok(deleted) => {
                info!(cutoff = %cutoff, deleted, "inbox entries swept");
                deleted
            }
            Err(e) => {
                warn!(error = %e, "inbox sweep failed");
                0
            }
        }
    }

    /// Spawn the cleaner on the current tokio runtime.
    pub fn spawn(self) -> CleanerHandle
    where
        I: 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);

        let join = tokio::spawn(async move {
            cleaner_loop(self, shutdown_rx).await;
        });

        CleanerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        }
    }
}

async fn cleaner_loop<I: InboxStore>(cleaner: InboxCleaner<I>, mut shutdown_rx: mpsc::Receiver<()>) {
    info!(
        interval_secs = cleaner.options.cleanup_interval_seconds,
        retention_days = cleaner.options.inbox_retention_days,
        "inbox cleaner started"
    );

    // tokio panics on a zero-period interval.
    let period = cleaner.options.cleanup_interval().max(Duration::from_millis(10));
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                cleaner.run_once(Utc::now()).await;
            }
            _ = shutdown_rx.recv() => break,
        }
    }

    info!("inbox cleaner stopped");
}
