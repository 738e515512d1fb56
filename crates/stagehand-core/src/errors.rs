//! Task error types.
//!
//! These errors are designed to be serializable and not depend on external
//! error types like `std::io::Error`. For I/O errors, we capture the kind
//! and message as strings.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::item::ItemId;
use crate::task_state::TaskState;

/// Discriminant of a [`TaskError`], attached to failure events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Target item missing.
    BadItem,
    /// Worker endpoint not running.
    ServiceUnavailable,
    /// Worker session could not be opened or started.
    SessionCreateFailed,
    /// Content hash mismatch reported by the worker.
    HashMismatch,
    /// Stopped on request.
    UserCanceled,
    /// Writing downloaded bytes failed.
    TransferWriteFailed,
    /// HTTP transfer failed.
    Transfer,
    /// Local file system failure.
    Io,
    /// Any other worker-reported failure.
    Worker,
    /// Lifecycle call not valid in the current state.
    InvalidState,
}

/// Error type for task operations.
///
/// Designed to be stored in a task's error slot and attached to events,
/// so it is `Clone` and serializable.
#[derive(Clone, Debug, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum TaskError {
    /// The target item does not exist in the catalog.
    #[error("Bad item: {id} not found")]
    BadItem {
        /// The missing item.
        id: ItemId,
    },

    /// The worker process endpoint is not running.
    #[error("Service is not running")]
    ServiceUnavailable,

    /// The worker refused or failed to create a session.
    #[error("Failed to create worker session: {message}")]
    SessionCreateFailed {
        /// Detailed error message.
        message: String,
    },

    /// Installed content does not match its expected hash.
    ///
    /// Non-fatal: recorded during install and evaluated at completion.
    #[error("Hash mismatch: {message}")]
    HashMismatch {
        /// Detailed error message from the worker.
        message: String,
    },

    /// The operation was cancelled by the user.
    #[error("Canceled by user")]
    UserCanceled,

    /// A received chunk could not be written to disk.
    #[error("Failed to write transfer output ({kind}): {message}")]
    TransferWriteFailed {
        /// The kind of I/O error.
        kind: String,
        /// Detailed error message.
        message: String,
    },

    /// The HTTP transfer failed.
    #[error("Transfer failed: {message}")]
    Transfer {
        /// Detailed error message.
        message: String,
        /// HTTP status code if available.
        #[serde(skip_serializing_if = "Option::is_none")]
        status_code: Option<u16>,
    },

    /// I/O error outside the transfer write path.
    #[error("I/O error ({kind}): {message}")]
    Io {
        /// The kind of I/O error (e.g., "NotFound").
        kind: String,
        /// Detailed error message.
        message: String,
    },

    /// Any other error reported by the worker.
    #[error("Worker error ({kind}): {message}")]
    Worker {
        /// Worker-side error kind.
        kind: String,
        /// Detailed error message.
        message: String,
    },

    /// A lifecycle operation was called in a state that does not allow it.
    #[error("Cannot {operation} a task in state {state}")]
    InvalidState {
        /// State of the task when the call was made.
        state: TaskState,
        /// The rejected operation.
        operation: String,
    },
}

impl TaskError {
    /// Create a session-creation error.
    pub fn session_create_failed(message: impl Into<String>) -> Self {
        Self::SessionCreateFailed {
            message: message.into(),
        }
    }

    /// Create a hash mismatch error.
    pub fn hash_mismatch(message: impl Into<String>) -> Self {
        Self::HashMismatch {
            message: message.into(),
        }
    }

    /// Create a generic worker error.
    pub fn worker(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Worker {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Create a transfer error.
    pub fn transfer(message: impl Into<String>) -> Self {
        Self::Transfer {
            message: message.into(),
            status_code: None,
        }
    }

    /// Create a transfer error with HTTP status code.
    pub fn transfer_with_status(message: impl Into<String>, status_code: u16) -> Self {
        Self::Transfer {
            message: message.into(),
            status_code: Some(status_code),
        }
    }

    /// Create a lifecycle misuse error.
    pub fn invalid_state(state: TaskState, operation: impl Into<String>) -> Self {
        Self::InvalidState {
            state,
            operation: operation.into(),
        }
    }

    /// Capture a `std::io::Error` as a generic I/O error.
    #[must_use]
    pub fn from_io_error(err: &std::io::Error) -> Self {
        Self::Io {
            kind: format!("{:?}", err.kind()),
            message: err.to_string(),
        }
    }

    /// Capture a `std::io::Error` raised while writing transfer output.
    #[must_use]
    pub fn from_write_error(err: &std::io::Error) -> Self {
        Self::TransferWriteFailed {
            kind: format!("{:?}", err.kind()),
            message: err.to_string(),
        }
    }

    /// The discriminant of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::BadItem { .. } => ErrorKind::BadItem,
            Self::ServiceUnavailable => ErrorKind::ServiceUnavailable,
            Self::SessionCreateFailed { .. } => ErrorKind::SessionCreateFailed,
            Self::HashMismatch { .. } => ErrorKind::HashMismatch,
            Self::UserCanceled => ErrorKind::UserCanceled,
            Self::TransferWriteFailed { .. } => ErrorKind::TransferWriteFailed,
            Self::Transfer { .. } => ErrorKind::Transfer,
            Self::Io { .. } => ErrorKind::Io,
            Self::Worker { .. } => ErrorKind::Worker,
            Self::InvalidState { .. } => ErrorKind::InvalidState,
        }
    }

    /// Check if this is a cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::UserCanceled)
    }

    /// Whether this error fails the task when reported mid-operation.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !matches!(self, Self::HashMismatch { .. })
    }

    /// Convert to a user-friendly message.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::BadItem { id } => format!("The item {id} could not be found."),
            Self::ServiceUnavailable => {
                "The installer service is not running. Restart the client and try again."
                    .to_string()
            }
            Self::SessionCreateFailed { message } => {
                format!("Could not start the installer: {message}")
            }
            Self::HashMismatch { .. } => {
                "Some installed files did not match their expected hash.".to_string()
            }
            Self::UserCanceled => "The operation was cancelled.".to_string(),
            Self::TransferWriteFailed { message, .. } => {
                format!("Could not save the downloaded file: {message}")
            }
            Self::Transfer {
                message,
                status_code: Some(code),
            } => format!("Download failed (HTTP {code}): {message}"),
            Self::Transfer { message, .. } => format!("Download failed: {message}"),
            Self::Io { message, .. } => format!("File operation failed: {message}"),
            Self::Worker { message, .. } => format!("Install failed: {message}"),
            Self::InvalidState { .. } => self.to_string(),
        }
    }
}

/// Convenience result type for task operations.
pub type TaskResult<T> = Result<T, TaskError>;
