//! Install orchestration.
//!
//! Maps worker events onto item state for the install stage. An install
//! may be the second half of an update, in which case progress continues
//! from 50% and the item keeps its `UPDATING` flag until completion.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use stagehand_core::{
    Build, EngineSettings, ErrorKind, InstallRequest, ItemHandle, ItemId, ItemOptions, ItemStatus,
    NoopPostInstall, PostInstallHook, ProgressPhase, TaskError, TaskEvent, TaskEventEmitterPort,
    VerifyDecider, VerifyTarget, WorkerProgress,
};

use crate::service::{ErrorDisposition, ServiceDeps, ServiceHandler, ServiceTask};
use crate::task::{Task, TaskControl};

/// Install task: a service task driven by an [`InstallOrchestrator`].
pub type InstallTask = Task<ServiceTask<InstallOrchestrator>>;

/// Dependencies for building install tasks.
#[derive(Clone)]
pub struct InstallDeps {
    /// Item lookup and worker endpoint.
    pub service: ServiceDeps,
    /// Task event sink.
    pub emitter: Arc<dyn TaskEventEmitterPort>,
    /// Resolved engine settings.
    pub settings: EngineSettings,
    /// Consulted once at completion when hash mismatches were seen.
    /// Without one, mismatches never trigger verification.
    pub verify: Option<Arc<dyn VerifyDecider>>,
    /// Platform steps run before the item is marked installed.
    pub post_install: Arc<dyn PostInstallHook>,
}

impl InstallDeps {
    /// Dependencies with no verify decider and a no-op post-install hook.
    pub fn new(
        service: ServiceDeps,
        emitter: Arc<dyn TaskEventEmitterPort>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            service,
            emitter,
            settings,
            verify: None,
            post_install: Arc::new(NoopPostInstall),
        }
    }

    /// Use `decider` after hash mismatches.
    #[must_use]
    pub fn with_verify(mut self, decider: Arc<dyn VerifyDecider>) -> Self {
        self.verify = Some(decider);
        self
    }

    /// Run `hook` after files are installed.
    #[must_use]
    pub fn with_post_install(mut self, hook: Arc<dyn PostInstallHook>) -> Self {
        self.post_install = hook;
        self
    }
}

impl std::fmt::Debug for InstallDeps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstallDeps")
            .field("settings", &self.settings)
            .field("has_verify", &self.verify.is_some())
            .finish_non_exhaustive()
    }
}

/// What to install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallJob {
    /// Target item.
    pub item: ItemId,
    /// Content archive to install from.
    pub source: PathBuf,
    /// Build contained in the archive, when known.
    pub build: Option<Build>,
}

/// Build an idle install task for `job`.
pub fn build_install_task(deps: InstallDeps, job: InstallJob) -> InstallTask {
    let orchestrator = InstallOrchestrator {
        settings: deps.settings,
        source: job.source,
        build: job.build,
        verify: deps.verify,
        post_install: deps.post_install,
        has_error: AtomicBool::new(false),
        hash_mismatches: AtomicU32::new(0),
    };
    Task::new(
        format!("install {}", job.item),
        ServiceTask::new(job.item, deps.service, orchestrator),
        deps.emitter,
    )
}

/// Item-state policy for the install stage.
pub struct InstallOrchestrator {
    settings: EngineSettings,
    source: PathBuf,
    build: Option<Build>,
    verify: Option<Arc<dyn VerifyDecider>>,
    post_install: Arc<dyn PostInstallHook>,
    has_error: AtomicBool,
    hash_mismatches: AtomicU32,
}

impl std::fmt::Debug for InstallOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstallOrchestrator")
            .field("source", &self.source)
            .field("build", &self.build)
            .field("has_error", &self.has_error())
            .field("hash_mismatches", &self.hash_mismatches())
            .finish_non_exhaustive()
    }
}

impl InstallOrchestrator {
    /// Whether a fatal worker error was recorded.
    pub fn has_error(&self) -> bool {
        self.has_error.load(Ordering::Acquire)
    }

    /// Number of hash mismatches reported so far.
    pub fn hash_mismatches(&self) -> u32 {
        self.hash_mismatches.load(Ordering::Acquire)
    }
}

impl ServiceHandler for InstallOrchestrator {
    fn stage_name(&self) -> &'static str {
        "install"
    }

    fn prepare(&self, item: &dyn ItemHandle) -> InstallRequest {
        if !item.is_updating() {
            item.set_percent(0);
            item.remove_status(ItemStatus::DOWNLOADING | ItemStatus::READY);
            item.add_status(ItemStatus::INSTALLING);
        }

        InstallRequest {
            source: self.source.clone(),
            destination: item.install_path(),
            script: item.install_script_path(),
            workers: self.settings.worker_count.max(1),
            remove_existing: item.options().contains(ItemOptions::REMOVE_FILES),
            make_writable: self.settings.make_writable,
        }
    }

    fn on_progress(&self, item: &dyn ItemHandle, progress: WorkerProgress) -> WorkerProgress {
        if progress.phase != ProgressPhase::Install {
            return progress;
        }

        let percent = progress.percent.min(100);
        let percent = if item.is_updating() {
            50 + percent / 2
        } else {
            percent
        };
        item.set_percent(percent);

        if !item.status().contains(ItemStatus::INSTALLCOMPLEX) {
            item.set_pausable(true);
        }

        WorkerProgress::install(percent)
    }

    fn on_error(&self, item: &dyn ItemHandle, error: TaskError) -> ErrorDisposition {
        if error.kind() == ErrorKind::HashMismatch {
            let seen = self.hash_mismatches.fetch_add(1, Ordering::AcqRel) + 1;
            tracing::warn!(target: "stagehand.install", item = %item.id(), count = seen, error = %error, "Hash mismatch during install");
            return ErrorDisposition::Deferred;
        }

        self.has_error.store(true, Ordering::Release);
        tracing::warn!(target: "stagehand.install", item = %item.id(), error = %error, "Install failed");

        item.set_pausable(false);
        if item.should_pause_on_error() {
            item.set_paused(true, true);
        } else {
            item.remove_status(ItemStatus::TRANSIENT);
            item.reset_stage(true);
        }

        ErrorDisposition::Fail(error)
    }

    fn on_complete(&self, item: &dyn ItemHandle, control: &TaskControl) {
        if self.has_error() {
            tracing::debug!(target: "stagehand.install", item = %item.id(), "Completion after failure ignored");
            return;
        }

        self.post_install.after_install(item);

        let was_updating = item.is_updating();
        if was_updating && self.build.is_some() && self.build == item.next_update_build() {
            item.mark_updated();
        }

        item.remove_status(ItemStatus::TRANSIENT);
        item.add_status(ItemStatus::INSTALLED | ItemStatus::READY);
        if was_updating {
            item.add_status(ItemStatus::NEEDCLEANUP);
        }

        item.set_percent(100);
        control.emit(TaskEvent::progress(control.id(), 100, 100));
        item.set_pausable(false);

        let had_hash_mismatch = self.hash_mismatches() > 0;
        let verify = had_hash_mismatch
            && self
                .verify
                .as_ref()
                .is_some_and(|decider| decider.verify_after_hash_fail());

        tracing::info!(
            target: "stagehand.install",
            item = %item.id(),
            updated = was_updating,
            had_hash_mismatch,
            verify,
            "Install complete"
        );

        control.emit(TaskEvent::Completed {
            task_id: control.id(),
            had_hash_mismatch,
        });

        if verify {
            item.go_to_stage_verify(VerifyTarget::full(
                item.installed_branch(),
                item.installed_build(),
            ));
        } else {
            item.complete_stage();
        }
    }
}
