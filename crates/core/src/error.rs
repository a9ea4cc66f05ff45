//! Error types for the journaling engine.
//!
//! Most errors raised inside a commit cycle are fatal: once a cycle has
//! started, the journal, the data files and the private views are only known
//! to be consistent if every phase completes. [`Error::is_fatal`] tells the
//! supervisor which errors must end the process.

use crate::types::FileId;
use thiserror::Error;

/// Errors raised by the journaling engine.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error writing or reading the journal or a data file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Journal or LSN file content failed validation
    #[error("corruption in {location}: {reason}")]
    Corruption {
        /// File (and offset) where the corruption was found
        location: String,
        /// What was wrong
        reason: String,
    },

    /// An internal invariant did not hold (e.g. remap with pending intents)
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// A write intent fell outside the mapped length of its file
    #[error("write intent out of bounds for {file}: offset {offset} + {len} > {file_len}")]
    OutOfBounds {
        /// File the intent referred to
        file: FileId,
        /// Start offset of the intent
        offset: u64,
        /// Length of the intent
        len: u64,
        /// Mapped length of the file
        file_len: u64,
    },

    /// The file handle is not (or no longer) registered
    #[error("unknown file: {0}")]
    UnknownFile(FileId),

    /// A bounded lock acquisition gave up
    #[error("timed out acquiring {0} lock")]
    LockTimeout(&'static str),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// zstd compression or decompression failed
    #[error("compression error: {0}")]
    Compression(String),
}

/// Result type for journaling operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Build a corruption error.
    pub fn corruption(location: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Corruption {
            location: location.into(),
            reason: reason.into(),
        }
    }

    /// Build an invariant violation.
    pub fn invariant(msg: impl Into<String>) -> Self {
        Error::InvariantViolation(msg.into())
    }

    /// Whether the error leaves durability state indeterminate.
    ///
    /// Lock timeouts and configuration errors are local; everything else that
    /// escapes a commit cycle or recovery is fatal.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::LockTimeout(_) | Error::Config(_))
    }

    /// Whether the error is a corruption error.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::Corruption { .. })
    }
}
