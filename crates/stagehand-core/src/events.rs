//! Task events - discriminated union for everything a task reports to callers.

use serde::{Deserialize, Serialize};

use crate::errors::{ErrorKind, TaskError};
use crate::task_state::TaskId;

/// Aggregated progress computed by the progress aggregator on each tick.
///
/// Derived data: recomputed every tick and never persisted.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressReport {
    /// Bytes completed across all workers.
    pub done: u64,
    /// Total bytes to process (0 when unknown).
    pub total: u64,
    /// Progress percentage, saturating at 100.
    pub percent: u8,
    /// Estimated seconds remaining; `None` when rate or total is unknown.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta_seconds: Option<u64>,
    /// Instantaneous rate in bytes per second.
    pub rate_bps: f64,
}

/// Integer percentage of `done` over `total`, saturating at 100.
///
/// Returns 0 while the total is unknown (zero).
#[must_use]
pub fn percent_of(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let pct = u128::from(done) * 100 / u128::from(total);
    u8::try_from(pct.min(100)).unwrap_or(100)
}

/// Single discriminated union for all task events.
///
/// ```json
/// {"type": "progress", "task_id": "…", "done": 10, "total": 100, "percent": 10}
/// {"type": "completed", "task_id": "…", "had_hash_mismatch": false}
/// {"type": "failed", "task_id": "…", "kind": "worker", "message": "…"}
/// {"type": "cancelled", "task_id": "…"}
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskEvent {
    /// Progress of the running task.
    Progress {
        /// Reporting task.
        task_id: TaskId,
        /// Units completed (bytes, or percent points for worker phases).
        done: u64,
        /// Units in total (0 while not yet determined).
        total: u64,
        /// Progress percentage (0 - 100).
        percent: u8,
    },

    /// Task completed its work.
    Completed {
        /// Reporting task.
        task_id: TaskId,
        /// A content hash mismatch was seen even though the operation succeeded.
        had_hash_mismatch: bool,
    },

    /// Task failed.
    Failed {
        /// Reporting task.
        task_id: TaskId,
        /// Error discriminant.
        kind: ErrorKind,
        /// Human-readable error message.
        message: String,
    },

    /// Task was cancelled; reported separately from failures.
    Cancelled {
        /// Reporting task.
        task_id: TaskId,
    },
}

impl TaskEvent {
    /// Build a progress event, deriving the percentage.
    #[must_use]
    pub fn progress(task_id: TaskId, done: u64, total: u64) -> Self {
        Self::Progress {
            task_id,
            done,
            total,
            percent: percent_of(done, total),
        }
    }

    /// Build the terminal event describing an error.
    ///
    /// Cancellation maps to `Cancelled`; everything else to `Failed`.
    #[must_use]
    pub fn from_error(task_id: TaskId, error: &TaskError) -> Self {
        if error.is_cancelled() {
            return Self::Cancelled { task_id };
        }
        Self::Failed {
            task_id,
            kind: error.kind(),
            message: error.to_string(),
        }
    }

    /// The task that produced this event.
    #[must_use]
    pub const fn task_id(&self) -> TaskId {
        match self {
            Self::Progress { task_id, .. }
            | Self::Completed { task_id, .. }
            | Self::Failed { task_id, .. }
            | Self::Cancelled { task_id } => *task_id,
        }
    }
}
