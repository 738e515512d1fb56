//! Out-of-process installer worker.
//!
//! - `protocol` - JSON line protocol between engine and worker
//! - `process` - [`WorkerService`](stagehand_core::WorkerService) spawning the worker executable

mod process;
mod protocol;

pub use process::{ProcessWorkerService, install_args};
pub use protocol::{ControlCommand, HASH_MISMATCH_KIND, ProtocolError, parse_line};
