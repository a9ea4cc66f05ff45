//! Convenient imports for mmjournal.
//!
//! ```ignore
//! use mmjournal::prelude::*;
//!
//! let engine = DurabilityEngine::open(DurabilityConfig::new("./data"))?;
//! ```

// Engine
pub use mmj_engine::{DurabilityEngine, EngineBuilder, MetricsSink, StatsWindow};

// Locking
pub use mmj_concurrency::{GlobalLockGuard, OperationContext};

// Core types
pub use mmj_core::{DurabilityConfig, Error, FileId, LockMode, Result};

// Recovery
pub use mmj_durability::RecoveryResult;
