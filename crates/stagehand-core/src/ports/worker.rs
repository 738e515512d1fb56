//! Worker service ports.
//!
//! The installer worker runs out of process. These ports describe its
//! logical request/event surface; the transport (pipes, sockets, shared
//! memory) is an implementation detail of the adapter.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::errors::TaskError;

/// Request to install an archive into a directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallRequest {
    /// Content archive to install from.
    pub source: PathBuf,
    /// Directory to install into.
    pub destination: PathBuf,
    /// Script the worker runs after copying files.
    pub script: Option<PathBuf>,
    /// Number of worker threads to use (at least 1).
    pub workers: u8,
    /// Remove existing files in the destination first.
    pub remove_existing: bool,
    /// Override read-only permissions on existing files.
    pub make_writable: bool,
}

/// Phase flag of a worker progress report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressPhase {
    /// Files are being written; the percent describes install progress.
    #[default]
    Install,
    /// Auxiliary work (hashing, script execution) with its own percent.
    Auxiliary(u8),
}

impl ProgressPhase {
    /// Decode the numeric phase flag sent by the worker.
    #[must_use]
    pub const fn from_flag(flag: u8) -> Self {
        match flag {
            0 => Self::Install,
            other => Self::Auxiliary(other),
        }
    }

    /// Numeric phase flag.
    #[must_use]
    pub const fn flag(self) -> u8 {
        match self {
            Self::Install => 0,
            Self::Auxiliary(flag) => flag,
        }
    }
}

/// Progress report from the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WorkerProgress {
    /// Percent of the current phase (0 - 100).
    pub percent: u8,
    /// Phase the percent refers to.
    pub phase: ProgressPhase,
}

impl WorkerProgress {
    /// Progress of the install phase.
    #[must_use]
    pub const fn install(percent: u8) -> Self {
        Self {
            percent,
            phase: ProgressPhase::Install,
        }
    }
}

/// The fixed set of events a worker session delivers.
///
/// Delivery is serialized: an error always arrives before the completion
/// it relates to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    /// The operation completed.
    Complete,
    /// Progress of the operation.
    Progress(WorkerProgress),
    /// The worker reported an error. May be followed by more events.
    Error(TaskError),
    /// The worker is done with this session; no further events follow.
    Finish,
}

/// One outstanding worker-side operation.
///
/// Owned by exactly one service task and destroyed exactly once, after the
/// operation has completed or been stopped.
#[async_trait]
pub trait WorkerSession: Send + Sync {
    /// Start the install operation.
    async fn start(&self, request: &InstallRequest) -> Result<(), TaskError>;

    /// Suspend the operation.
    async fn pause(&self) -> Result<(), TaskError>;

    /// Resume a suspended operation.
    async fn unpause(&self) -> Result<(), TaskError>;

    /// Abort the operation. The session still delivers `Finish`.
    async fn stop(&self) -> Result<(), TaskError>;

    /// Release worker-side resources. Must not be called twice.
    async fn destroy(&self);
}

/// A freshly created session and the receiving end of its event channel.
pub struct SessionChannel {
    /// Control handle.
    pub session: Arc<dyn WorkerSession>,
    /// Events delivered by the worker for this session.
    pub events: mpsc::UnboundedReceiver<WorkerEvent>,
}

impl std::fmt::Debug for SessionChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionChannel").finish_non_exhaustive()
    }
}

/// Endpoint of the out-of-process worker.
#[async_trait]
pub trait WorkerService: Send + Sync {
    /// Whether the worker endpoint is reachable.
    fn is_running(&self) -> bool;

    /// Create a new install session.
    async fn open_install_session(&self) -> Result<SessionChannel, TaskError>;
}
