//! Applying a prepared section to the shared views.
//!
//! The bytes come from the section in the log builder, not from the private
//! views: once the global lock is released, writers may already be changing
//! the private views again for the next cycle.

use mmj_core::{Error, Result};
use mmj_storage::format::{entries, JournalEntry};
use mmj_storage::FilesShared;
use tracing::trace;

/// Counters of one application.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ApplyStats {
    /// Write entries applied
    pub writes: usize,
    /// Bytes copied to shared views
    pub bytes: usize,
}

/// Writes journaled bytes into the data files.
#[derive(Debug, Default)]
pub struct DataFileWriter;

impl DataFileWriter {
    /// Apply the raw payload of a section.
    ///
    /// File handles in the payload are this process's registry handles, so
    /// every file must still be registered; the caller holds the files lock.
    pub fn apply(payload: &[u8], files: &FilesShared<'_>) -> Result<ApplyStats> {
        let mut stats = ApplyStats::default();
        for entry in entries(payload) {
            match entry.map_err(|e| e.at("log builder"))? {
                JournalEntry::FileContext { file, name } => {
                    let mapped = files.get(file)?;
                    if mapped.name() != name {
                        return Err(Error::invariant(format!(
                            "{} is {} in the registry but {} in the section",
                            file,
                            mapped.name(),
                            name
                        )));
                    }
                }
                // the file was created when the op was noted
                JournalEntry::FileCreated { .. } => {}
                JournalEntry::Write { file, offset, data } => {
                    files.get(file)?.write_shared(offset, data)?;
                    stats.writes += 1;
                    stats.bytes += data.len();
                }
            }
        }
        trace!(writes = stats.writes, bytes = stats.bytes, "applied section to data files");
        Ok(stats)
    }

    /// msync every shared view.
    pub fn flush_all(files: &FilesShared<'_>) -> Result<usize> {
        let mut flushed = 0;
        for file in files.iter() {
            file.flush()?;
            flushed += 1;
        }
        Ok(flushed)
    }
}
