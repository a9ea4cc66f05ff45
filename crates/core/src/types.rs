//! Core value types shared across crates.

use std::fmt;

/// Handle of a mapped data file, assigned by the file registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileId(pub u32);

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "file#{}", self.0)
    }
}

/// A declared modification of `len` bytes at `offset` in `file`.
///
/// Intents may overlap or be adjacent; the commit cycle captures the current
/// private-view bytes of each range, so duplicates are harmless.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WriteIntent {
    /// File the range belongs to
    pub file: FileId,
    /// Byte offset within the file
    pub offset: u64,
    /// Number of bytes
    pub len: u32,
}

impl WriteIntent {
    /// Create a new intent.
    pub fn new(file: FileId, offset: u64, len: u32) -> Self {
        WriteIntent { file, offset, len }
    }

    /// One past the last byte covered.
    pub fn end(&self) -> u64 {
        self.offset + self.len as u64
    }

    /// Whether two intents on the same file overlap or touch.
    pub fn touches(&self, other: &WriteIntent) -> bool {
        self.file == other.file && self.offset <= other.end() && other.offset <= self.end()
    }
}

/// A durable operation replayed verbatim rather than as a byte range.
///
/// Operations are journaled ahead of the byte writes of the same section and
/// replayed first at recovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DurOp {
    /// A data file was created with `len` bytes
    FileCreated {
        /// Registry handle of the new file
        file: FileId,
        /// Name relative to the data directory
        name: String,
        /// Initial length
        len: u64,
    },
}

/// Global lock state of a thread.
///
/// | Mode | Meaning |
/// |------|---------|
/// | Unlocked | holds nothing |
/// | SharedRead | intent-shared: reading some namespace |
/// | SharedWrite | intent-exclusive: writing some namespace |
/// | ExclusiveRead | whole-store read lock, excludes all writers |
/// | ExclusiveWrite | whole-store write lock, excludes everyone |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LockMode {
    /// No global lock held
    #[default]
    Unlocked,
    /// Intent-shared (namespace read)
    SharedRead,
    /// Intent-exclusive (namespace write)
    SharedWrite,
    /// Global read lock
    ExclusiveRead,
    /// Global write lock
    ExclusiveWrite,
}

impl LockMode {
    /// Whether two modes may be held at the same time by different threads.
    pub fn is_compatible_with(self, other: LockMode) -> bool {
        use LockMode::*;
        match (self, other) {
            (Unlocked, _) | (_, Unlocked) => true,
            (ExclusiveWrite, _) | (_, ExclusiveWrite) => false,
            (SharedRead, _) | (_, SharedRead) => true,
            (SharedWrite, SharedWrite) => true,
            (ExclusiveRead, ExclusiveRead) => true,
            (SharedWrite, ExclusiveRead) | (ExclusiveRead, SharedWrite) => false,
        }
    }

    /// Short name used in log lines and lock timeout errors.
    pub fn name(self) -> &'static str {
        match self {
            LockMode::Unlocked => "unlocked",
            LockMode::SharedRead => "shared read",
            LockMode::SharedWrite => "shared write",
            LockMode::ExclusiveRead => "exclusive read",
            LockMode::ExclusiveWrite => "exclusive write",
        }
    }
}
