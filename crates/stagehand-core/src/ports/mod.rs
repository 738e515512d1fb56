//! Port definitions (trait abstractions) for external systems.
//!
//! Ports define the interfaces between the task engine and the client around
//! it. They use only domain types and contain no implementation details.
//!
//! # Design Rules
//!
//! - No adapter types (pipes, HTTP clients) in signatures
//! - Traits are minimal: what the engine calls, nothing more
//! - Callback wiring is expressed as typed events, never ad hoc delegates

pub mod collaborators;
pub mod config;
pub mod event_emitter;
pub mod item;
pub mod transfer;
pub mod worker;

pub use collaborators::{AlwaysVerify, NoopPostInstall, PostInstallHook, VerifyDecider};
#[cfg(any(test, feature = "test-utils"))]
pub use collaborators::MockVerifyDecider;
pub use config::{ConfigSource, EnvConfig, MapConfig};
pub use event_emitter::{ChannelTaskEmitter, NoopTaskEmitter, TaskEventEmitterPort};
pub use item::{ItemCatalog, ItemHandle};
pub use transfer::{HttpTransport, TransferProgress, TransferRequest, TransferSink};
pub use worker::{
    InstallRequest, ProgressPhase, SessionChannel, WorkerEvent, WorkerProgress, WorkerService,
    WorkerSession,
};
