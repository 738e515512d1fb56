//! Progress tracking.
//!
//! - `ledger` - per-worker byte accounting and rate/ETA computation
//! - `aggregator` - periodic ticker publishing ledger snapshots
//! - `throttle` - rate limiting of per-chunk progress events

mod aggregator;
mod ledger;
mod throttle;

pub use aggregator::ProgressAggregator;
pub use ledger::{ProgressLedger, WorkerId};
pub use throttle::ProgressThrottle;
