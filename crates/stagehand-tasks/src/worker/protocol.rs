//! Line protocol spoken with the installer worker process.
//!
//! The worker writes one JSON object per line on stdout and reads one
//! command per line on stdin.
//!
//! # Protocol Schema
//!
//! Worker to engine, discriminated by `event`:
//!
//! ```json
//! {"event": "progress", "percent": 42, "flag": 0}
//! {"event": "error", "kind": "hash_mismatch", "message": "chunk 7 of data.pak"}
//! {"event": "complete"}
//! {"event": "finish"}
//! ```
//!
//! Engine to worker:
//!
//! ```json
//! {"command": "pause"}
//! {"command": "unpause"}
//! {"command": "stop"}
//! ```

use serde::{Deserialize, Serialize};
use stagehand_core::{ProgressPhase, TaskError, WorkerEvent, WorkerProgress};
use thiserror::Error;

/// Error kind the worker uses for content hash mismatches.
pub const HASH_MISMATCH_KIND: &str = "hash_mismatch";

/// Errors that can occur when parsing protocol messages.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Line is not a JSON object.
    #[error("Invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// Object has no usable `event` discriminant.
    #[error("Missing or invalid 'event' field")]
    InvalidEvent,

    /// Event lacks a field it requires.
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    /// Event name not part of the protocol.
    #[error("Unknown event: {0}")]
    UnknownEvent(String),
}

/// Raw JSON envelope for parsing.
#[derive(Deserialize)]
struct RawEnvelope {
    event: Option<String>,
    // Progress fields
    percent: Option<u8>,
    flag: Option<u8>,
    // Error fields
    kind: Option<String>,
    message: Option<String>,
}

/// Parse a single line of worker output into a [`WorkerEvent`].
pub fn parse_line(line: &str) -> Result<WorkerEvent, ProtocolError> {
    let envelope: RawEnvelope = serde_json::from_str(line)?;

    let event = envelope.event.ok_or(ProtocolError::InvalidEvent)?;

    match event.as_str() {
        "progress" => {
            let percent = envelope
                .percent
                .ok_or(ProtocolError::MissingField("percent"))?;

            Ok(WorkerEvent::Progress(WorkerProgress {
                percent: percent.min(100),
                phase: ProgressPhase::from_flag(envelope.flag.unwrap_or(0)),
            }))
        }

        "error" => {
            let message = envelope
                .message
                .ok_or(ProtocolError::MissingField("message"))?;
            let kind = envelope.kind.unwrap_or_else(|| "unknown".to_string());

            let error = if kind == HASH_MISMATCH_KIND {
                TaskError::hash_mismatch(message)
            } else {
                TaskError::worker(kind, message)
            };
            Ok(WorkerEvent::Error(error))
        }

        "complete" => Ok(WorkerEvent::Complete),

        "finish" => Ok(WorkerEvent::Finish),

        other => Err(ProtocolError::UnknownEvent(other.to_string())),
    }
}

/// Control command sent to the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ControlCommand {
    /// Suspend work at the next safe point.
    Pause,
    /// Resume suspended work.
    Unpause,
    /// Abort and reply with `finish`.
    Stop,
}

impl ControlCommand {
    /// Encode as a newline-terminated protocol line.
    pub fn encode(self) -> Result<String, ProtocolError> {
        let mut line = serde_json::to_string(&self)?;
        line.push('\n');
        Ok(line)
    }
}
