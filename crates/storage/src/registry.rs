//! Registry of mapped data files.
//!
//! The registry's RwLock is the "files lock": commit cycles hold it shared
//! while they write the journal and the data files so no file can be closed
//! underneath them, and closing a file takes it exclusively. It is distinct
//! from the global lock.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use mmj_core::{Error, FileId, Result};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::info;

use crate::format::MAX_FILE_NAME_LEN;
use crate::mapped_file::DurableMappedFile;

type FileMap = BTreeMap<FileId, Arc<DurableMappedFile>>;

/// The set of open data files.
pub struct MappedFileRegistry {
    data_dir: PathBuf,
    files: RwLock<FileMap>,
    next_id: AtomicU32,
}

impl MappedFileRegistry {
    /// Create an empty registry for files under `data_dir`.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        MappedFileRegistry {
            data_dir: data_dir.into(),
            files: RwLock::new(BTreeMap::new()),
            next_id: AtomicU32::new(0),
        }
    }

    /// Directory the files live in.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Map an existing file, or return it if it is already open.
    pub fn open_file(&self, name: &str) -> Result<Arc<DurableMappedFile>> {
        check_name(name)?;
        let mut files = self.files.write();
        if let Some(existing) = files.values().find(|f| f.name() == name) {
            return Ok(Arc::clone(existing));
        }
        let id = self.allocate_id();
        let file = Arc::new(DurableMappedFile::open(id, &self.data_dir, name)?);
        files.insert(id, Arc::clone(&file));
        Ok(file)
    }

    /// Create a file of `len` bytes and map it.
    ///
    /// The caller is responsible for journaling the creation.
    pub fn create_file(&self, name: &str, len: u64) -> Result<Arc<DurableMappedFile>> {
        check_name(name)?;
        let mut files = self.files.write();
        if files.values().any(|f| f.name() == name) {
            return Err(Error::invariant(format!("file {} is already open", name)));
        }
        let id = self.allocate_id();
        let file = Arc::new(DurableMappedFile::create(id, &self.data_dir, name, len)?);
        info!(file = %id, name, len, "created data file");
        files.insert(id, Arc::clone(&file));
        Ok(file)
    }

    /// Look up a file by handle.
    pub fn get(&self, id: FileId) -> Result<Arc<DurableMappedFile>> {
        self.files
            .read()
            .get(&id)
            .cloned()
            .ok_or(Error::UnknownFile(id))
    }

    /// Look up a file by name.
    pub fn find_by_name(&self, name: &str) -> Option<Arc<DurableMappedFile>> {
        self.files.read().values().find(|f| f.name() == name).cloned()
    }

    /// Number of open files.
    pub fn len(&self) -> usize {
        self.files.read().len()
    }

    /// Whether no file is open.
    pub fn is_empty(&self) -> bool {
        self.files.read().is_empty()
    }

    /// Take the files lock shared.
    pub fn shared(&self) -> FilesShared<'_> {
        FilesShared(self.files.read())
    }

    /// Take the files lock exclusively.
    pub fn exclusive(&self) -> FilesExclusive<'_> {
        FilesExclusive(self.files.write())
    }

    fn allocate_id(&self) -> FileId {
        FileId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

/// Files lock held shared: the set of files cannot change.
pub struct FilesShared<'a>(RwLockReadGuard<'a, FileMap>);

impl FilesShared<'_> {
    /// Look up a file by handle.
    pub fn get(&self, id: FileId) -> Result<&Arc<DurableMappedFile>> {
        self.0.get(&id).ok_or(Error::UnknownFile(id))
    }

    /// Iterate files in handle order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<DurableMappedFile>> + Clone {
        self.0.values()
    }

    /// Number of files.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no files.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Files lock held exclusively.
pub struct FilesExclusive<'a>(RwLockWriteGuard<'a, FileMap>);

impl FilesExclusive<'_> {
    /// Unregister a file; its mappings go away with the last handle.
    pub fn remove(&mut self, id: FileId) -> Result<Arc<DurableMappedFile>> {
        self.0.remove(&id).ok_or(Error::UnknownFile(id))
    }

    /// Look up a file by handle.
    pub fn get(&self, id: FileId) -> Result<&Arc<DurableMappedFile>> {
        self.0.get(&id).ok_or(Error::UnknownFile(id))
    }
}

// Journal entries carry the name with a u16 length.
fn check_name(name: &str) -> Result<()> {
    if name.len() > MAX_FILE_NAME_LEN {
        return Err(Error::invariant(format!(
            "file name is {} bytes, journal entries allow at most {}",
            name.len(),
            MAX_FILE_NAME_LEN
        )));
    }
    Ok(())
}
