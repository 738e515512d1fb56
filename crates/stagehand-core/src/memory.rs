//! In-memory item catalog.
//!
//! Backs the CLI composition root and the engine's test suites. Stage
//! transitions are recorded so callers can assert on them.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::item::{Branch, Build, ItemId, ItemOptions, ItemStatus, VerifyTarget};
use crate::ports::{ItemCatalog, ItemHandle};

/// A stage transition requested by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageCall {
    /// `complete_stage` was called.
    Completed,
    /// `reset_stage` was called.
    Reset {
        /// Whether stage progress was discarded.
        to_start: bool,
    },
    /// `go_to_stage_verify` was called.
    Verify(VerifyTarget),
    /// `set_paused` was called.
    Paused {
        /// Requested paused state.
        paused: bool,
        /// Requested pausable state.
        pausable: bool,
    },
    /// `mark_updated` was called.
    Updated,
}

#[derive(Debug)]
struct ItemState {
    status: ItemStatus,
    options: ItemOptions,
    percent: u8,
    paused: bool,
    install_path: PathBuf,
    install_script: Option<PathBuf>,
    next_update_build: Option<Build>,
    installed_branch: Branch,
    installed_build: Build,
    stage_calls: Vec<StageCall>,
}

/// An item held entirely in memory.
#[derive(Debug)]
pub struct MemoryItem {
    id: ItemId,
    state: Mutex<ItemState>,
}

impl MemoryItem {
    /// Create an item installing into `install_path`.
    pub fn new(id: ItemId, install_path: impl Into<PathBuf>) -> Self {
        Self {
            id,
            state: Mutex::new(ItemState {
                status: ItemStatus::empty(),
                options: ItemOptions::empty(),
                percent: 0,
                paused: false,
                install_path: install_path.into(),
                install_script: None,
                next_update_build: None,
                installed_branch: Branch(0),
                installed_build: Build(0),
                stage_calls: Vec::new(),
            }),
        }
    }

    /// Set initial status flags.
    #[must_use]
    pub fn with_status(self, status: ItemStatus) -> Self {
        self.state().status = status;
        self
    }

    /// Set item options.
    #[must_use]
    pub fn with_options(self, options: ItemOptions) -> Self {
        self.state().options = options;
        self
    }

    /// Set the install script.
    #[must_use]
    pub fn with_install_script(self, script: impl Into<PathBuf>) -> Self {
        self.state().install_script = Some(script.into());
        self
    }

    /// Mark an update towards `build` as pending.
    #[must_use]
    pub fn with_pending_update(self, build: Build) -> Self {
        {
            let mut state = self.state();
            state.next_update_build = Some(build);
            state.status |= ItemStatus::UPDATING;
        }
        self
    }

    /// Set the installed branch and build.
    #[must_use]
    pub fn with_installed(self, branch: Branch, build: Build) -> Self {
        {
            let mut state = self.state();
            state.installed_branch = branch;
            state.installed_build = build;
        }
        self
    }

    /// Whether the item has been paused by the engine.
    pub fn is_paused(&self) -> bool {
        self.state().paused
    }

    /// Stage transitions requested so far, oldest first.
    pub fn stage_calls(&self) -> Vec<StageCall> {
        self.state().stage_calls.clone()
    }

    fn state(&self) -> MutexGuard<'_, ItemState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ItemHandle for MemoryItem {
    fn id(&self) -> ItemId {
        self.id
    }

    fn status(&self) -> ItemStatus {
        self.state().status
    }

    fn add_status(&self, flags: ItemStatus) {
        self.state().status |= flags;
    }

    fn remove_status(&self, flags: ItemStatus) {
        self.state().status &= !flags;
    }

    fn options(&self) -> ItemOptions {
        self.state().options
    }

    fn percent(&self) -> u8 {
        self.state().percent
    }

    fn set_percent(&self, percent: u8) {
        self.state().percent = percent.min(100);
    }

    fn install_path(&self) -> PathBuf {
        self.state().install_path.clone()
    }

    fn install_script_path(&self) -> Option<PathBuf> {
        self.state().install_script.clone()
    }

    fn next_update_build(&self) -> Option<Build> {
        self.state().next_update_build
    }

    fn installed_branch(&self) -> Branch {
        self.state().installed_branch
    }

    fn installed_build(&self) -> Build {
        self.state().installed_build
    }

    fn mark_updated(&self) {
        let mut state = self.state();
        if let Some(build) = state.next_update_build.take() {
            state.installed_build = build;
        }
        state.stage_calls.push(StageCall::Updated);
    }

    fn complete_stage(&self) {
        self.state().stage_calls.push(StageCall::Completed);
    }

    fn reset_stage(&self, to_start: bool) {
        let mut state = self.state();
        if to_start {
            state.percent = 0;
        }
        state.stage_calls.push(StageCall::Reset { to_start });
    }

    fn go_to_stage_verify(&self, target: VerifyTarget) {
        let mut state = self.state();
        state.status.remove(ItemStatus::ACTIVE_STAGES);
        state.status.insert(ItemStatus::VERIFYING);
        state.stage_calls.push(StageCall::Verify(target));
    }

    fn set_paused(&self, paused: bool, pausable: bool) {
        let mut state = self.state();
        state.paused = paused;
        state.status.set(ItemStatus::PAUSABLE, pausable);
        state.stage_calls.push(StageCall::Paused { paused, pausable });
    }
}

/// A catalog of [`MemoryItem`]s.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    items: Mutex<HashMap<ItemId, Arc<MemoryItem>>>,
    kills: Mutex<Vec<ItemId>>,
}

impl MemoryCatalog {
    /// Create an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an item, returning a handle to it.
    pub fn insert(&self, item: MemoryItem) -> Arc<MemoryItem> {
        let item = Arc::new(item);
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(item.id(), Arc::clone(&item));
        item
    }

    /// Items whose processes were killed, in call order.
    pub fn killed(&self) -> Vec<ItemId> {
        self.kills
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ItemCatalog for MemoryCatalog {
    fn item(&self, id: ItemId) -> Option<Arc<dyn ItemHandle>> {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .map(|item| Arc::clone(item) as Arc<dyn ItemHandle>)
    }

    fn kill_all_processes(&self, id: ItemId) {
        tracing::debug!(target: "stagehand.catalog", item = %id, "Killing item processes");
        self.kills
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(id);
    }
}
