//! Auxiliary tool downloads.
//!
//! A tool download streams one executable to a deterministic local path.
//! Several consumers may wait on the same download; each holds a reference,
//! and releasing the last one stops the download unless it is far enough
//! along to be worth finishing.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU32, Ordering};

use async_trait::async_trait;
use stagehand_core::{
    HttpTransport, TaskError, TaskEvent, TaskEventEmitterPort, TaskResult, TaskState, ToolInfo,
    TransferProgress, TransferRequest, TransferSink,
};

use crate::progress::{ProgressAggregator, ProgressThrottle, WorkerId};
use crate::task::{Task, TaskBody, TaskControl};

/// Value of the `User-Agent` header on tool downloads.
pub const DEFAULT_USER_AGENT: &str = concat!("stagehand/", env!("CARGO_PKG_VERSION"));

/// Whether releasing the last reference should stop a download at `percent`.
pub const fn should_cancel(percent: u8, forced: bool, threshold: u8) -> bool {
    forced || percent < threshold
}

/// Outcome of releasing a reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefRelease {
    /// Other references remain.
    Retained {
        /// References still held.
        remaining: u32,
    },
    /// Last reference released; the download continues to completion.
    KeptAlive,
    /// Last reference released; the download was stopped.
    Stopped,
}

/// Dependencies for tool downloads.
#[derive(Clone)]
pub struct ToolFetchDeps {
    /// Streaming transport.
    pub transport: Arc<dyn HttpTransport>,
    /// Task event sink.
    pub emitter: Arc<dyn TaskEventEmitterPort>,
    /// Directory under which `tools/<host>/<file>` is created.
    pub root: PathBuf,
    /// Keep-alive threshold in percent.
    pub cancel_threshold: u8,
    /// Value of the `User-Agent` header.
    pub user_agent: String,
    /// Optional aggregator fed with this download's byte counts.
    pub progress: Option<(Arc<ProgressAggregator>, WorkerId)>,
}

impl std::fmt::Debug for ToolFetchDeps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolFetchDeps")
            .field("root", &self.root)
            .field("cancel_threshold", &self.cancel_threshold)
            .field("user_agent", &self.user_agent)
            .finish_non_exhaustive()
    }
}

/// Task body downloading a tool executable.
pub struct ToolFetch {
    tool: Arc<ToolInfo>,
    path: PathBuf,
    deps: ToolFetchDeps,
    percent: AtomicU8,
}

impl std::fmt::Debug for ToolFetch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolFetch")
            .field("tool", &self.tool.name())
            .field("path", &self.path)
            .field("percent", &self.percent())
            .finish_non_exhaustive()
    }
}

impl ToolFetch {
    /// Local destination of the download.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Percent received; 0 until the total size is known.
    pub fn percent(&self) -> u8 {
        self.percent.load(Ordering::Acquire)
    }

    fn remove_partial(&self) {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::debug!(target: "stagehand.tool", path = %self.path.display(), "Removed partial download");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(target: "stagehand.tool", path = %self.path.display(), error = %e, "Failed to remove partial download");
            }
        }
    }
}

/// Writes received chunks to the destination file and reports progress.
struct FileSink<'a> {
    file: File,
    percent: &'a AtomicU8,
    control: &'a TaskControl,
    throttle: ProgressThrottle,
    aggregator: Option<&'a (Arc<ProgressAggregator>, WorkerId)>,
    total_reported: bool,
}

impl TransferSink for FileSink<'_> {
    fn on_progress(&mut self, progress: TransferProgress) {
        if let Some((aggregator, worker)) = self.aggregator {
            if !self.total_reported {
                if let Some(total) = progress.total {
                    aggregator.add_total(total);
                    self.total_reported = true;
                }
            }
            aggregator.report(*worker, progress.received);
        }

        let Some(percent) = progress.percent() else {
            return;
        };
        self.percent.store(percent, Ordering::Release);

        if self.throttle.should_emit(percent) {
            self.control.emit(TaskEvent::Progress {
                task_id: self.control.id(),
                done: progress.received,
                total: progress.total.unwrap_or(0),
                percent,
            });
        }
    }

    fn on_write(&mut self, chunk: &[u8]) -> std::io::Result<()> {
        self.file.write_all(chunk)
    }
}

#[async_trait]
impl TaskBody for ToolFetch {
    async fn run(&self, control: &TaskControl) -> TaskResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| TaskError::from_io_error(&e))?;
        }
        let file = File::create(&self.path).map_err(|e| TaskError::from_io_error(&e))?;

        tracing::info!(
            target: "stagehand.tool",
            tool = self.tool.name(),
            url = self.tool.url(),
            path = %self.path.display(),
            "Downloading tool"
        );

        let request = TransferRequest::new(self.tool.url(), self.deps.user_agent.clone());
        let mut sink = FileSink {
            file,
            percent: &self.percent,
            control,
            throttle: ProgressThrottle::default(),
            aggregator: self.deps.progress.as_ref(),
            total_reported: false,
        };

        let result = self
            .deps
            .transport
            .fetch(&request, &mut sink, control.cancel_token())
            .await;
        let flushed = sink.file.flush();
        drop(sink);

        if let Some((aggregator, worker)) = &self.deps.progress {
            aggregator.retire(*worker);
        }

        if control.is_stopped() {
            self.remove_partial();
            return Err(TaskError::UserCanceled);
        }

        if let Err(e) = result.and_then(|()| flushed.map_err(|e| TaskError::from_write_error(&e))) {
            self.remove_partial();
            return Err(e);
        }

        self.tool.set_exe_path(&self.path);
        tracing::info!(target: "stagehand.tool", tool = self.tool.name(), path = %self.path.display(), "Tool downloaded");
        control.emit(TaskEvent::Completed {
            task_id: control.id(),
            had_hash_mismatch: false,
        });
        Ok(())
    }

    async fn on_stop(&self) {
        tracing::debug!(target: "stagehand.tool", tool = self.tool.name(), percent = self.percent(), "Aborting tool download");
    }
}

/// A shared, reference-counted tool download.
#[derive(Debug, Clone)]
pub struct ToolFetchTask {
    task: Task<ToolFetch>,
    refs: Arc<AtomicU32>,
}

impl ToolFetchTask {
    /// Create an idle download of `tool` into its deterministic path under
    /// `deps.root`.
    pub fn new(deps: ToolFetchDeps, tool: Arc<ToolInfo>) -> TaskResult<Self> {
        let path = tool.path_from_url(&deps.root)?;
        let emitter = Arc::clone(&deps.emitter);
        let body = ToolFetch {
            tool: Arc::clone(&tool),
            path,
            deps,
            percent: AtomicU8::new(0),
        };
        Ok(Self {
            task: Task::new(format!("fetch {}", tool.name()), body, emitter),
            refs: Arc::new(AtomicU32::new(0)),
        })
    }

    /// The underlying task.
    pub const fn task(&self) -> &Task<ToolFetch> {
        &self.task
    }

    /// Begin the download.
    pub fn start(&self) -> TaskResult<()> {
        self.task.start()
    }

    /// Wait for the download to end.
    pub async fn wait_for_finish(&self) -> TaskState {
        self.task.wait_for_finish().await
    }

    /// Percent received so far.
    pub fn percent(&self) -> u8 {
        self.task.body().percent()
    }

    /// References currently held.
    pub fn ref_count(&self) -> u32 {
        self.refs.load(Ordering::Acquire)
    }

    /// Register another consumer. Returns the new count.
    pub fn increase_ref_count(&self) -> u32 {
        self.refs.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Release a consumer.
    ///
    /// When the count reaches zero the download is stopped if it is below
    /// the keep-alive threshold or `forced` is set.
    pub async fn decrease_ref_count(&self, forced: bool) -> RefRelease {
        let previous = self
            .refs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| Some(n.saturating_sub(1)))
            .unwrap_or_else(|n| n);
        let remaining = previous.saturating_sub(1);
        if remaining > 0 {
            return RefRelease::Retained { remaining };
        }

        let percent = self.percent();
        let threshold = self.task.body().deps.cancel_threshold;
        if !should_cancel(percent, forced, threshold) {
            tracing::debug!(target: "stagehand.tool", percent, "Unreferenced tool download kept alive");
            return RefRelease::KeptAlive;
        }

        tracing::debug!(target: "stagehand.tool", percent, forced, "Stopping unreferenced tool download");
        if let Err(e) = self.task.stop().await {
            tracing::debug!(target: "stagehand.tool", error = %e, "Tool download already ended");
        }
        RefRelease::Stopped
    }
}
