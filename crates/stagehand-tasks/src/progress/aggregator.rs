//! Periodic progress aggregation.
//!
//! Producers push cumulative byte counts at any rate; a background ticker
//! folds them into one [`ProgressReport`] per interval and publishes it on
//! a broadcast channel. Ticks with nothing new are skipped.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use stagehand_core::ProgressReport;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::ledger::{ProgressLedger, WorkerId};

const CHANNEL_CAPACITY: usize = 64;

/// Shared aggregator handle. Cheap to share behind an `Arc`.
#[derive(Debug)]
pub struct ProgressAggregator {
    ledger: Arc<Mutex<ProgressLedger>>,
    tx: broadcast::Sender<ProgressReport>,
    shutdown: CancellationToken,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl ProgressAggregator {
    /// Create an aggregator and start ticking every `interval`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(interval: Duration) -> Self {
        let ledger = Arc::new(Mutex::new(ProgressLedger::new(Instant::now())));
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let shutdown = CancellationToken::new();

        let ticker = tokio::spawn(run_ticker(
            Arc::clone(&ledger),
            tx.clone(),
            shutdown.clone(),
            interval,
        ));

        Self {
            ledger,
            tx,
            shutdown,
            ticker: Mutex::new(Some(ticker)),
        }
    }

    /// Receive every report published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressReport> {
        self.tx.subscribe()
    }

    /// Record the cumulative byte count of `worker`.
    pub fn report(&self, worker: WorkerId, bytes: u64) {
        self.ledger().report(worker, bytes);
    }

    /// Stop tracking `worker`; its bytes remain counted.
    pub fn retire(&self, worker: WorkerId) {
        self.ledger().retire(worker);
    }

    /// Set the total number of bytes to process.
    pub fn set_total(&self, total: u64) {
        self.ledger().set_total(total);
    }

    /// Grow the total, for producers that learn their size late.
    pub fn add_total(&self, bytes: u64) {
        self.ledger().add_total(bytes);
    }

    /// Seed bytes completed before tracking began.
    pub fn set_already_done(&self, bytes: u64) {
        self.ledger().set_already_done(bytes);
    }

    /// Exclude wall time from rate computation until [`Self::unpause`].
    pub fn pause(&self) {
        tracing::debug!(target: "stagehand.progress", "Progress paused");
        self.ledger().pause(Instant::now());
    }

    /// Resume rate computation.
    pub fn unpause(&self) {
        tracing::debug!(target: "stagehand.progress", "Progress resumed");
        self.ledger().unpause(Instant::now());
    }

    /// Current figures, without rate information.
    pub fn snapshot(&self) -> ProgressReport {
        self.ledger().snapshot()
    }

    /// Stop the ticker, publishing whatever is still pending.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let ticker = self
            .ticker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(ticker) = ticker {
            if let Err(e) = ticker.await {
                tracing::warn!(target: "stagehand.progress", error = %e, "Progress ticker ended abnormally");
            }
        }
    }

    fn ledger(&self) -> MutexGuard<'_, ProgressLedger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ProgressAggregator {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn run_ticker(
    ledger: Arc<Mutex<ProgressLedger>>,
    tx: broadcast::Sender<ProgressReport>,
    shutdown: CancellationToken,
    interval: Duration,
) {
    let mut ticks = tokio::time::interval(interval);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately; nothing can be pending yet
    ticks.tick().await;

    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            _ = ticks.tick() => publish(&ledger, &tx),
        }
    }

    publish(&ledger, &tx);
    tracing::debug!(target: "stagehand.progress", "Progress ticker stopped");
}

fn publish(ledger: &Mutex<ProgressLedger>, tx: &broadcast::Sender<ProgressReport>) {
    let report = ledger
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .tick(Instant::now());

    if let Some(report) = report {
        tracing::trace!(
            target: "stagehand.progress",
            done = report.done,
            total = report.total,
            rate_bps = report.rate_bps,
            "Progress tick"
        );
        // No subscribers is fine; reports are derived data
        let _ = tx.send(report);
    }
}
