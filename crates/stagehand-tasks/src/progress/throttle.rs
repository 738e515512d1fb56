//! Progress throttling.
//!
//! Transfers call back once per received chunk; this keeps the resulting
//! event stream at a rate listeners can absorb.

use std::time::{Duration, Instant};

/// Rate-limiter for progress events.
#[derive(Debug)]
pub struct ProgressThrottle {
    last_emit: Option<Instant>,
    last_percent: Option<u8>,
    min_interval: Duration,
}

impl ProgressThrottle {
    /// Create a throttle with the given minimum spacing between events.
    pub const fn new(min_interval: Duration) -> Self {
        Self {
            last_emit: None,
            last_percent: None,
            min_interval,
        }
    }

    /// Whether an update at `percent` should be emitted now.
    ///
    /// The first update and every change of whole percent are emitted once
    /// the interval has elapsed; reaching 100 is always emitted.
    pub fn should_emit(&mut self, percent: u8) -> bool {
        self.should_emit_at(percent, Instant::now())
    }

    fn should_emit_at(&mut self, percent: u8, now: Instant) -> bool {
        if self.last_percent == Some(percent) {
            return false;
        }
        let due = match self.last_emit {
            Some(last) => percent >= 100 || now.duration_since(last) >= self.min_interval,
            None => true,
        };
        if due {
            self.last_emit = Some(now);
            self.last_percent = Some(percent);
        }
        due
    }
}

impl Default for ProgressThrottle {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}
