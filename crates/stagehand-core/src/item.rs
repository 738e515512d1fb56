//! Item domain types.
//!
//! An item is a piece of distributed content (an application, a mod, a tool)
//! whose lifecycle is tracked through status flags. The catalog that owns
//! items lives outside this crate; these types only describe the bits the
//! task engine reads and mutates.

use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Stable identifier of an item in the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemId(pub u64);

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "item:{}", self.0)
    }
}

bitflags! {
    /// Status flags belonging to an item.
    ///
    /// At most one of `DOWNLOADING`, `INSTALLING` and `VERIFYING` is set at a
    /// time. `PAUSABLE` is only set while an interruptible sub-operation runs.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    #[repr(transparent)]
    pub struct ItemStatus: u32 {
        /// Content is being downloaded.
        const DOWNLOADING    = 1 << 0;
        /// Content is being installed by the worker.
        const INSTALLING     = 1 << 1;
        /// An update to a newer build is in progress.
        const UPDATING       = 1 << 2;
        /// Installed files are being verified.
        const VERIFYING      = 1 << 3;
        /// Content is installed on disk.
        const INSTALLED      = 1 << 4;
        /// Item is ready to launch.
        const READY          = 1 << 5;
        /// The running sub-operation can be paused.
        const PAUSABLE       = 1 << 6;
        /// Files superseded by an update must be cleaned up.
        const NEEDCLEANUP    = 1 << 7;
        /// Install cannot be safely interrupted.
        const INSTALLCOMPLEX = 1 << 8;
    }
}

impl ItemStatus {
    /// Flags that mark an active stage. Mutually exclusive.
    pub const ACTIVE_STAGES: Self = Self::DOWNLOADING
        .union(Self::INSTALLING)
        .union(Self::VERIFYING);

    /// Flags cleared when an install window closes.
    pub const TRANSIENT: Self = Self::INSTALLING
        .union(Self::UPDATING)
        .union(Self::DOWNLOADING);

    /// Whether at most one active stage flag is set.
    #[must_use]
    pub const fn has_single_active_stage(self) -> bool {
        self.intersection(Self::ACTIVE_STAGES).bits().count_ones() <= 1
    }
}

bitflags! {
    /// Per-item user preferences consulted by the engine.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    #[repr(transparent)]
    pub struct ItemOptions: u32 {
        /// Remove existing files in the destination before installing.
        const REMOVE_FILES   = 1 << 0;
        /// Pause the item on worker failure instead of resetting its stage.
        const PAUSE_ON_ERROR = 1 << 1;
    }
}

/// A content build number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Build(pub u32);

impl fmt::Display for Build {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "build {}", self.0)
    }
}

/// A content branch identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Branch(pub u32);

/// Target handed to the item when it moves into the verification stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyTarget {
    /// Branch to verify.
    pub branch: Branch,
    /// Build to verify.
    pub build: Build,
    /// Verify file contents, not just presence.
    pub files: bool,
    /// Verify the content archive.
    pub archive: bool,
    /// Repair what fails verification.
    pub repair: bool,
}

impl VerifyTarget {
    /// Full verification with repair of the given branch and build.
    #[must_use]
    pub const fn full(branch: Branch, build: Build) -> Self {
        Self {
            branch,
            build,
            files: true,
            archive: true,
            repair: true,
        }
    }
}
