//! Item catalog ports.
//!
//! The item entity and its catalog are owned by the client. The engine only
//! reads a few attributes and mutates status through these calls, under the
//! assumption that a single task owns an item's active stage at a time.

use std::path::PathBuf;
use std::sync::Arc;

use crate::item::{Branch, Build, ItemId, ItemOptions, ItemStatus, VerifyTarget};

/// Handle to a single item in the catalog.
///
/// Implementations must be cheap to call and must not block on I/O; the
/// engine calls them from worker event handlers.
pub trait ItemHandle: Send + Sync {
    /// Identifier of this item.
    fn id(&self) -> ItemId;

    /// Current status flags.
    fn status(&self) -> ItemStatus;

    /// Set the given status flags.
    fn add_status(&self, flags: ItemStatus);

    /// Clear the given status flags.
    fn remove_status(&self, flags: ItemStatus);

    /// Per-item preferences.
    fn options(&self) -> ItemOptions;

    /// Progress of the current stage (0 - 100).
    fn percent(&self) -> u8;

    /// Set progress of the current stage (0 - 100).
    fn set_percent(&self, percent: u8);

    /// Directory the content installs into.
    fn install_path(&self) -> PathBuf;

    /// Optional script run by the worker after copying files.
    fn install_script_path(&self) -> Option<PathBuf>;

    /// Build an in-progress update is heading towards.
    fn next_update_build(&self) -> Option<Build>;

    /// Branch currently installed.
    fn installed_branch(&self) -> Branch;

    /// Build currently installed.
    fn installed_build(&self) -> Build;

    /// Record that the pending update has been applied.
    fn mark_updated(&self);

    /// Advance the item past its current stage.
    fn complete_stage(&self);

    /// Abandon the current stage. `to_start` also discards stage progress.
    fn reset_stage(&self, to_start: bool);

    /// Move the item into the verification stage.
    fn go_to_stage_verify(&self, target: VerifyTarget);

    /// Pause or resume the item's stage.
    fn set_paused(&self, paused: bool, pausable: bool);

    /// Set or clear the `PAUSABLE` flag.
    fn set_pausable(&self, pausable: bool) {
        if pausable {
            self.add_status(ItemStatus::PAUSABLE);
        } else {
            self.remove_status(ItemStatus::PAUSABLE);
        }
    }

    /// Whether an update is in progress.
    fn is_updating(&self) -> bool {
        self.status().contains(ItemStatus::UPDATING)
    }

    /// Whether worker failures should pause the item instead of resetting it.
    fn should_pause_on_error(&self) -> bool {
        self.options().contains(ItemOptions::PAUSE_ON_ERROR)
    }
}

/// Lookup of items and their associated processes.
pub trait ItemCatalog: Send + Sync {
    /// Find an item by id.
    fn item(&self, id: ItemId) -> Option<Arc<dyn ItemHandle>>;

    /// Terminate every process launched from the item's install directory.
    fn kill_all_processes(&self, id: ItemId);
}
