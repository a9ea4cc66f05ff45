//! # mmjournal
//!
//! Write-ahead journaling and group commit for memory-mapped data files.
//!
//! Writers change a private copy-on-write view of each data file after
//! declaring a write intent. A commit cycle copies the declared ranges into a
//! journal section, fsyncs it, and only then applies the same bytes to the
//! shared views backing the files. After a crash, the journal sections newer
//! than the lsn file are replayed into the data files.
//!
//! ## Quick Start
//!
//! ```ignore
//! use mmjournal::prelude::*;
//!
//! let engine = DurabilityEngine::open(DurabilityConfig::new("./data"))?;
//! engine.start()?;
//!
//! let ctx = engine.context();
//! {
//!     let _w = ctx.lock(LockMode::SharedWrite)?;
//!     let file = engine.created_file(&ctx, "data.0", 1 << 20)?;
//!     engine.write_bytes(&ctx, file.id(), 0, b"hello")?;
//! }
//! engine.await_commit(&ctx)?;
//!
//! engine.shutdown()?;
//! ```
//!
//! ## Crates
//!
//! - [`mmj_core`] - errors, ids, config
//! - [`mmj_storage`] - mapped files, journal format, section builder
//! - [`mmj_concurrency`] - global lock, intent log, commit notifier
//! - [`mmj_durability`] - section preparation, journal writer, recovery
//! - [`mmj_engine`] - the durability engine and its background thread

#![warn(missing_docs)]

pub mod prelude;

pub use mmj_concurrency;
pub use mmj_core;
pub use mmj_durability;
pub use mmj_engine;
pub use mmj_storage;

pub use mmj_core::{DurabilityConfig, Error, FileId, LockMode, Result};
pub use mmj_engine::{DurabilityEngine, EngineBuilder};
