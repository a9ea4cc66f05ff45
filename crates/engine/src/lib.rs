//! Engine layer for mmjournal
//!
//! This crate ties the lower layers into a running durability engine:
//! - engine: DurabilityEngine, the foreground API and lifecycle
//! - group_commit: the limited-locks and full commit cycles
//! - background: the journal thread driving cycles on an interval
//! - remap: incremental private view remapping
//! - early_commit: what a writer may do when the log outgrows its budget
//! - stats: per-interval commit statistics
//! - fatal: abort policy for failed cycles

#![warn(missing_docs)]
#![warn(clippy::all)]

mod background;
pub mod early_commit;
pub mod engine;
pub mod fatal;
mod group_commit;
pub mod remap;
pub mod stats;

pub use early_commit::{decide, EarlyCommitAction, SYSTEM_NAMESPACES};
pub use engine::{DurabilityEngine, EngineBuilder};
pub use fatal::{FatalHandler, FatalSupervisor};
pub use remap::{files_to_visit, PrivateViewRemapper, RemapSweep};
pub use stats::{DurStats, MetricsSink, StatsWindow};
