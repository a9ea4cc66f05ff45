//! What a foreground thread may do when the intent log is over budget.
//!
//! | Lock mode | Action |
//! |-----------|--------|
//! | Unlocked | take ExclusiveRead, re-check, commit |
//! | SharedWrite | decline inside `local`/`admin`, otherwise try to upgrade |
//! | ExclusiveWrite, ExclusiveRead | commit inline |
//! | SharedRead | decline |

use mmj_core::LockMode;

/// Namespaces whose holders never force a commit.
pub const SYSTEM_NAMESPACES: [&str; 2] = ["local", "admin"];

/// Early commit decision for one lock mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EarlyCommitAction {
    /// Acquire the global read lock first
    AcquireAndCommit,
    /// Try to upgrade SharedWrite to ExclusiveWrite
    TryUpgrade,
    /// Safe to commit with the locks already held
    CommitInline,
    /// Leave it to the background thread
    Decline,
}

/// Map a lock mode to its action.
pub fn decide(mode: LockMode) -> EarlyCommitAction {
    match mode {
        LockMode::Unlocked => EarlyCommitAction::AcquireAndCommit,
        LockMode::SharedWrite => EarlyCommitAction::TryUpgrade,
        LockMode::ExclusiveWrite | LockMode::ExclusiveRead => EarlyCommitAction::CommitInline,
        LockMode::SharedRead => EarlyCommitAction::Decline,
    }
}
