//! The `lsn` file in the journal directory.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use mmj_core::Result;
use mmj_storage::format::LsnRecord;
use tracing::{debug, warn};

/// File name of the LSN marker.
pub const LSN_FILE_NAME: &str = "lsn";

/// Last section sequence known to be flushed to the data files.
#[derive(Debug, Clone)]
pub struct LsnFile {
    path: PathBuf,
}

impl LsnFile {
    /// The marker inside `journal_dir`.
    pub fn new(journal_dir: &Path) -> Self {
        LsnFile {
            path: journal_dir.join(LSN_FILE_NAME),
        }
    }

    /// Path of the marker.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the stored sequence.
    ///
    /// A missing or damaged marker reads as `None`: everything in the journal
    /// is replayed, which is always safe.
    pub fn read(&self) -> Result<Option<u64>> {
        let buf = match fs::read(&self.path) {
            Ok(buf) => buf,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no lsn file");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        match LsnRecord::decode(&buf) {
            Ok(record) => Ok(Some(record.seq)),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "ignoring invalid lsn file");
                Ok(None)
            }
        }
    }

    /// Persist `seq` and fsync.
    pub fn write(&self, seq: u64) -> Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)?;
        file.write_all(&LsnRecord { seq }.encode())?;
        file.sync_all()?;
        debug!(seq, "wrote lsn");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_reads_none() {
        let dir = TempDir::new().unwrap();
        assert_eq!(LsnFile::new(dir.path()).read().unwrap(), None);
    }

    #[test]
    fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        let lsn = LsnFile::new(dir.path());
        lsn.write(41).unwrap();
        lsn.write(42).unwrap();
        assert_eq!(lsn.read().unwrap(), Some(42));
    }

    #[test]
    fn test_damaged_reads_none() {
        let dir = TempDir::new().unwrap();
        let lsn = LsnFile::new(dir.path());
        lsn.write(5).unwrap();
        let mut bytes = fs::read(lsn.path()).unwrap();
        bytes[0] ^= 0xff;
        fs::write(lsn.path(), bytes).unwrap();
        assert_eq!(lsn.read().unwrap(), None);
    }
}
