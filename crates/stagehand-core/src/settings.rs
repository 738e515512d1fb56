//! Engine settings resolved from named configuration options.
//!
//! Tasks receive an [`EngineSettings`] value at construction and never read
//! configuration on their own.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ports::ConfigSource;

/// Option naming the installer worker count.
pub const WORKER_COUNT_KEY: &str = "core_count";

/// Option enabling the read-only permission override.
pub const IGNORE_PERMISSIONS_KEY: &str = "ignore_permissions";

/// Option naming the aggregator tick in milliseconds.
pub const PROGRESS_INTERVAL_KEY: &str = "progress_interval_ms";

/// Option naming the tool download keep-alive threshold in percent.
pub const TOOL_CANCEL_THRESHOLD_KEY: &str = "tool_cancel_threshold";

/// Default aggregator tick.
pub const DEFAULT_PROGRESS_INTERVAL_MS: u64 = 500;

/// A tool download past this percentage survives losing its last reference.
pub const DEFAULT_TOOL_CANCEL_THRESHOLD: u8 = 75;

/// Settings consulted by the task engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Number of installer worker threads (always at least 1).
    pub worker_count: u8,
    /// Override read-only permissions on installed files.
    pub make_writable: bool,
    /// Aggregator tick interval in milliseconds.
    pub progress_interval_ms: u64,
    /// Keep-alive threshold for unreferenced tool downloads.
    pub tool_cancel_threshold: u8,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            worker_count: 1,
            make_writable: false,
            progress_interval_ms: DEFAULT_PROGRESS_INTERVAL_MS,
            tool_cancel_threshold: DEFAULT_TOOL_CANCEL_THRESHOLD,
        }
    }
}

impl EngineSettings {
    /// Resolve every option from `source`, falling back to documented defaults.
    pub fn from_source(source: &dyn ConfigSource) -> Self {
        Self {
            worker_count: parse_worker_count(source.get(WORKER_COUNT_KEY).as_deref()),
            make_writable: parse_flag(source.get(IGNORE_PERMISSIONS_KEY).as_deref()),
            progress_interval_ms: source
                .get(PROGRESS_INTERVAL_KEY)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .filter(|ms| *ms > 0)
                .unwrap_or(DEFAULT_PROGRESS_INTERVAL_MS),
            tool_cancel_threshold: source
                .get(TOOL_CANCEL_THRESHOLD_KEY)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map_or(DEFAULT_TOOL_CANCEL_THRESHOLD, |v| {
                    u8::try_from(v.min(100)).unwrap_or(100)
                }),
        }
    }

    /// Aggregator tick interval.
    #[must_use]
    pub const fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }
}

/// Parse a worker count. Absent, unparsable, or non-positive values give 1.
#[must_use]
pub fn parse_worker_count(raw: Option<&str>) -> u8 {
    raw.and_then(|v| v.trim().parse::<i64>().ok())
        .filter(|n| *n > 0)
        .map_or(1, |n| u8::try_from(n).unwrap_or(u8::MAX))
}

/// Parse a boolean option. Only `"true"` and `"1"` enable it.
#[must_use]
pub fn parse_flag(raw: Option<&str>) -> bool {
    matches!(raw.map(str::trim), Some("true" | "1"))
}
