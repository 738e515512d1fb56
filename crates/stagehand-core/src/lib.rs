//! Core domain types and ports for the stagehand task engine.
//!
//! - `item` - item identifiers, status flags and options
//! - `errors` - the task error taxonomy
//! - `events` - events tasks report to callers
//! - `ports` - traits for the worker service, HTTP transport, catalog and config
//! - `memory` - in-memory catalog used by tests and the CLI
//! - `settings` - typed engine settings with documented defaults
#![deny(unused_crate_dependencies)]

pub mod errors;
pub mod events;
pub mod item;
pub mod memory;
pub mod ports;
pub mod settings;
pub mod task_state;
pub mod tool;

// Re-export commonly used types for convenience
pub use errors::{ErrorKind, TaskError, TaskResult};
pub use events::{ProgressReport, TaskEvent, percent_of};
pub use item::{Branch, Build, ItemId, ItemOptions, ItemStatus, VerifyTarget};
pub use memory::{MemoryCatalog, MemoryItem, StageCall};
pub use ports::{
    AlwaysVerify, ChannelTaskEmitter, ConfigSource, EnvConfig, HttpTransport, InstallRequest,
    ItemCatalog, ItemHandle, MapConfig, NoopPostInstall, NoopTaskEmitter, PostInstallHook,
    ProgressPhase, SessionChannel, TaskEventEmitterPort, TransferProgress, TransferRequest,
    TransferSink, VerifyDecider, WorkerEvent, WorkerProgress, WorkerService, WorkerSession,
};
pub use settings::EngineSettings;
pub use task_state::{TaskId, TaskState};
pub use tool::ToolInfo;
