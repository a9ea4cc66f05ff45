//! Concurrency layer for mmjournal
//!
//! This crate implements the coordination between foreground writers and
//! the commit cycle:
//! - GlobalLock: four-mode global lock with upgrade/downgrade and writer greed
//! - OperationContext / LockState: per-thread lock bookkeeping
//! - CommitJob: the write intent log accumulated between commits
//! - CommitNotifier: wakes threads waiting for a journal write
//! - ShutdownSignal: process-wide stop flag

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod commit_job;
pub mod context;
pub mod lock;
pub mod notify;
pub mod shutdown;

pub use commit_job::{CommitJob, PendingWrites};
pub use context::{GlobalLockGuard, LockState, NamespaceGuard, OperationContext, UpgradeGuard};
pub use lock::GlobalLock;
pub use notify::CommitNotifier;
pub use shutdown::ShutdownSignal;
