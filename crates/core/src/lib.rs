//! Core types for mmjournal
//!
//! This crate defines the vocabulary shared by every layer of the
//! journaling engine:
//! - Error: the error taxonomy (fatal vs recoverable)
//! - FileId / WriteIntent: byte ranges of mapped files awaiting journaling
//! - DurOp: non byte-range operations such as file creation
//! - LockMode: the global lock states a thread can be in
//! - DurabilityConfig: tunables loaded from TOML

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod types;

pub use config::DurabilityConfig;
pub use error::{Error, Result};
pub use types::{DurOp, FileId, LockMode, WriteIntent};
