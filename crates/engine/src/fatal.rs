//! Fatal error policy.
//!
//! A failure inside a commit cycle leaves the journal, the data files and the
//! private views in an unknown relationship, so the process must not go on.
//! Every entry point that runs a cycle routes its error through
//! [`FatalSupervisor::abort_on_fatal`].

use std::sync::atomic::{AtomicBool, Ordering};

use mmj_core::Error;
use tracing::error;

/// Called with the error once a fatal failure has been logged.
pub type FatalHandler = Box<dyn Fn(&Error) + Send + Sync>;

/// Logs fatal errors and runs the fatal handler.
pub struct FatalSupervisor {
    handler: FatalHandler,
    failed: AtomicBool,
}

impl FatalSupervisor {
    /// Supervisor that aborts the process.
    pub fn new() -> Self {
        Self::with_handler(Box::new(|_| std::process::abort()))
    }

    /// Supervisor with a custom handler.
    pub fn with_handler(handler: FatalHandler) -> Self {
        FatalSupervisor {
            handler,
            failed: AtomicBool::new(false),
        }
    }

    /// Log `err` and run the handler if it is fatal; the error is returned
    /// for handlers that do not end the process. The handler runs once.
    pub fn abort_on_fatal(&self, context: &'static str, err: Error) -> Error {
        if err.is_fatal() && !self.failed.swap(true, Ordering::AcqRel) {
            error!(context, error = %err, "fatal durability error, shutting down");
            (self.handler)(&err);
        }
        err
    }

    /// Whether a fatal error has been reported.
    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }
}

impl Default for FatalSupervisor {
    fn default() -> Self {
        Self::new()
    }
}
