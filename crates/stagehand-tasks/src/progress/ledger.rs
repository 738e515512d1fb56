//! Byte accounting behind the progress aggregator.
//!
//! The ledger is a plain synchronous structure driven by explicit instants,
//! so every computation is testable without a clock. The aggregator wraps it
//! in a mutex and ticks it from a timer.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use stagehand_core::{ProgressReport, percent_of};

/// Identifier of a byte producer (installer worker or download stream).
pub type WorkerId = u32;

/// Per-worker cumulative byte counts plus the state needed to derive
/// rate and ETA between ticks.
#[derive(Debug)]
pub struct ProgressLedger {
    samples: HashMap<WorkerId, u64>,
    retired: HashSet<WorkerId>,
    retired_bytes: u64,
    already_done: u64,
    total: u64,
    started: Instant,
    last_tick: Instant,
    done_at_last_tick: u64,
    paused_since: Option<Instant>,
    paused_total: Duration,
    paused_at_last_tick: Duration,
    dirty: bool,
}

impl ProgressLedger {
    /// Create an empty ledger whose clock starts at `now`.
    pub fn new(now: Instant) -> Self {
        Self {
            samples: HashMap::new(),
            retired: HashSet::new(),
            retired_bytes: 0,
            already_done: 0,
            total: 0,
            started: now,
            last_tick: now,
            done_at_last_tick: 0,
            paused_since: None,
            paused_total: Duration::ZERO,
            paused_at_last_tick: Duration::ZERO,
            dirty: false,
        }
    }

    /// Record the cumulative byte count of `worker`.
    ///
    /// Counts never move backwards; a retired worker's reports are ignored.
    pub fn report(&mut self, worker: WorkerId, bytes: u64) {
        if self.retired.contains(&worker) {
            return;
        }
        let sample = self.samples.entry(worker).or_insert(0);
        if bytes > *sample {
            *sample = bytes;
            self.dirty = true;
        }
    }

    /// Stop tracking `worker`. Its bytes stay counted as done.
    pub fn retire(&mut self, worker: WorkerId) {
        if let Some(bytes) = self.samples.remove(&worker) {
            self.retired_bytes = self.retired_bytes.saturating_add(bytes);
        }
        self.retired.insert(worker);
    }

    /// Set the total number of bytes to process.
    pub const fn set_total(&mut self, total: u64) {
        self.total = total;
    }

    /// Grow the total by `bytes`.
    pub const fn add_total(&mut self, bytes: u64) {
        self.total = self.total.saturating_add(bytes);
    }

    /// Seed bytes completed before tracking began (resumed work).
    ///
    /// Seeded bytes count as done but never as transfer rate.
    pub fn set_already_done(&mut self, bytes: u64) {
        let before = self.done();
        self.already_done = bytes;
        let after = self.done();
        self.done_at_last_tick = if after >= before {
            self.done_at_last_tick.saturating_add(after - before)
        } else {
            self.done_at_last_tick.saturating_sub(before - after)
        };
        self.dirty = true;
    }

    /// Start excluding wall time from rate computations.
    pub fn pause(&mut self, now: Instant) {
        if self.paused_since.is_none() {
            self.paused_since = Some(now);
        }
    }

    /// Stop excluding wall time.
    pub fn unpause(&mut self, now: Instant) {
        if let Some(since) = self.paused_since.take() {
            self.paused_total += now.saturating_duration_since(since);
        }
    }

    /// Whether the ledger is currently paused.
    pub const fn is_paused(&self) -> bool {
        self.paused_since.is_some()
    }

    /// Bytes completed: seeded, retired, and live worker counts.
    pub fn done(&self) -> u64 {
        self.samples
            .values()
            .fold(self.already_done.saturating_add(self.retired_bytes), |acc, b| {
                acc.saturating_add(*b)
            })
    }

    /// Total bytes to process (0 while unknown).
    pub const fn total(&self) -> u64 {
        self.total
    }

    /// Wall time since creation minus time spent paused.
    pub fn active_elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started)
            .saturating_sub(self.paused_until(now))
    }

    /// Produce a report if anything was reported since the previous tick.
    pub fn tick(&mut self, now: Instant) -> Option<ProgressReport> {
        if !self.dirty {
            return None;
        }

        let paused = self.paused_until(now);
        let window = now
            .saturating_duration_since(self.last_tick)
            .saturating_sub(paused.saturating_sub(self.paused_at_last_tick));
        let done = self.done();
        let delta = done.saturating_sub(self.done_at_last_tick);

        #[allow(clippy::cast_precision_loss)]
        let rate_bps = if window.is_zero() {
            0.0
        } else {
            delta as f64 / window.as_secs_f64()
        };

        self.last_tick = now;
        self.done_at_last_tick = done;
        self.paused_at_last_tick = paused;
        self.dirty = false;

        Some(self.report_with_rate(done, rate_bps))
    }

    /// Current figures without consuming the pending tick.
    pub fn snapshot(&self) -> ProgressReport {
        self.report_with_rate(self.done(), 0.0)
    }

    fn report_with_rate(&self, done: u64, rate_bps: f64) -> ProgressReport {
        let eta_seconds = if rate_bps > 0.0 && self.total > 0 {
            #[allow(
                clippy::cast_precision_loss,
                clippy::cast_possible_truncation,
                clippy::cast_sign_loss
            )]
            let eta = (self.total.saturating_sub(done) as f64 / rate_bps).ceil() as u64;
            Some(eta)
        } else {
            None
        };

        ProgressReport {
            done,
            total: self.total,
            percent: percent_of(done, self.total),
            eta_seconds,
            rate_bps,
        }
    }

    fn paused_until(&self, now: Instant) -> Duration {
        self.paused_total
            + self
                .paused_since
                .map_or(Duration::ZERO, |since| now.saturating_duration_since(since))
    }
}
