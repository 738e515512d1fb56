//! Task engine for stagehand.
//!
//! - `task` - task lifecycle state machine and the `TaskBody` seam
//! - `service` - tasks delegating their work to the installer worker
//! - `install` - item-state policy of the install stage
//! - `tool_fetch` - reference-counted auxiliary tool downloads
//! - `progress` - byte aggregation with rate and ETA
//! - `worker` - child-process worker adapter
//! - `http` - `reqwest` transport adapter

// Public API - lifecycle and bodies
mod task;
pub use task::{Task, TaskBody, TaskControl};

mod service;
pub use service::{ErrorDisposition, ServiceDeps, ServiceHandler, ServiceTask};

mod install;
pub use install::{InstallDeps, InstallJob, InstallOrchestrator, InstallTask, build_install_task};

mod tool_fetch;
pub use tool_fetch::{
    DEFAULT_USER_AGENT, RefRelease, ToolFetch, ToolFetchDeps, ToolFetchTask, should_cancel,
};

pub mod progress;
pub use progress::{ProgressAggregator, ProgressLedger, WorkerId};

// Adapters
pub mod http;
pub mod worker;

pub use http::ReqwestTransport;
pub use worker::ProcessWorkerService;
