//! Single-decision collaborators injected into the install orchestrator.

use crate::ports::item::ItemHandle;

/// Decides whether an install that saw hash mismatches should be re-verified.
#[cfg_attr(any(test, feature = "test-utils"), mockall::automock)]
pub trait VerifyDecider: Send + Sync {
    /// Called once per install, at completion, if any mismatch was reported.
    fn verify_after_hash_fail(&self) -> bool;
}

/// Always re-verifies after a hash mismatch.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysVerify;

impl VerifyDecider for AlwaysVerify {
    fn verify_after_hash_fail(&self) -> bool {
        true
    }
}

/// Platform-specific steps run after files are installed, before the
/// item is marked installed (e.g. writing launch scripts on Unix).
pub trait PostInstallHook: Send + Sync {
    /// Run the hook for the given item.
    fn after_install(&self, item: &dyn ItemHandle);
}

/// A hook that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPostInstall;

impl PostInstallHook for NoopPostInstall {
    fn after_install(&self, _item: &dyn ItemHandle) {}
}
