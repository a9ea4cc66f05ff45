//! Memory-mapped data file with a private and a shared view.
//!
//! Foreground threads write into the private view, a copy-on-write mapping
//! whose changes never reach the file by themselves. The commit cycle copies
//! journaled ranges into the shared view, a writable shared mapping that is
//! the canonical content of the file. Remapping throws the private mapping
//! away and maps it again, which releases every copied page and makes the
//! private view read through to the (now up to date) file again.

#![allow(unsafe_code)]

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use memmap2::{MmapMut, MmapOptions};
use mmj_core::{Error, FileId, Result};
use parking_lot::{Mutex, RwLock};
use tracing::debug;

/// A data file mapped twice: private (copy-on-write) and shared.
pub struct DurableMappedFile {
    id: FileId,
    name: String,
    path: PathBuf,
    len: u64,
    file: File,
    private: RwLock<MmapMut>,
    shared: Mutex<MmapMut>,
    will_need_remap: AtomicBool,
}

impl DurableMappedFile {
    /// Map an existing, non-empty file.
    pub fn open(id: FileId, data_dir: &Path, name: &str) -> Result<Self> {
        let path = data_dir.join(name);
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let len = file.metadata()?.len();
        if len == 0 {
            return Err(Error::invariant(format!(
                "cannot map empty data file {}",
                path.display()
            )));
        }
        let shared = map_shared(&file, len)?;
        let private = map_private(&file, len)?;
        debug!(file = %id, name, len, "mapped data file");
        Ok(DurableMappedFile {
            id,
            name: name.to_string(),
            path,
            len,
            file,
            private: RwLock::new(private),
            shared: Mutex::new(shared),
            will_need_remap: AtomicBool::new(false),
        })
    }

    /// Create (or extend) a file to `len` bytes and map it.
    pub fn create(id: FileId, data_dir: &Path, name: &str, len: u64) -> Result<Self> {
        let path = data_dir.join(name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;
        if file.metadata()?.len() < len {
            file.set_len(len)?;
        }
        file.sync_all()?;
        drop(file);
        Self::open(id, data_dir, name)
    }

    /// Registry handle.
    pub fn id(&self) -> FileId {
        self.id
    }

    /// Name relative to the data directory.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Full path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Mapped length.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether the mapping is empty (never true for an open file).
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Reject intents that do not fit inside the mapping.
    pub fn check_bounds(&self, offset: u64, len: u64) -> Result<()> {
        match offset.checked_add(len) {
            Some(end) if end <= self.len => Ok(()),
            _ => Err(Error::OutOfBounds {
                file: self.id,
                offset,
                len,
                file_len: self.len,
            }),
        }
    }

    /// Copy `data` into the private view.
    pub fn write_private(&self, offset: u64, data: &[u8]) -> Result<()> {
        self.check_bounds(offset, data.len() as u64)?;
        let start = offset as usize;
        let mut view = self.private.write();
        view[start..start + data.len()].copy_from_slice(data);
        self.will_need_remap.store(true, Ordering::Release);
        Ok(())
    }

    /// Read `len` bytes of the private view.
    pub fn read_private(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        self.with_private_range(offset, len, |bytes| bytes.to_vec())
    }

    /// Run `f` over a range of the private view.
    pub fn with_private_range<T>(
        &self,
        offset: u64,
        len: usize,
        f: impl FnOnce(&[u8]) -> T,
    ) -> Result<T> {
        self.check_bounds(offset, len as u64)?;
        let start = offset as usize;
        let view = self.private.read();
        Ok(f(&view[start..start + len]))
    }

    /// Copy `data` into the shared view (the canonical file content).
    pub fn write_shared(&self, offset: u64, data: &[u8]) -> Result<()> {
        self.check_bounds(offset, data.len() as u64)?;
        let start = offset as usize;
        let mut view = self.shared.lock();
        view[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Read `len` bytes of the shared view.
    pub fn read_shared(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        self.check_bounds(offset, len as u64)?;
        let start = offset as usize;
        let view = self.shared.lock();
        Ok(view[start..start + len].to_vec())
    }

    /// msync the shared view.
    pub fn flush(&self) -> Result<()> {
        self.shared.lock().flush()?;
        Ok(())
    }

    /// Whether the private view has diverged since the last remap.
    pub fn will_need_remap(&self) -> bool {
        self.will_need_remap.load(Ordering::Acquire)
    }

    /// Replace the private view with a fresh copy-on-write mapping.
    ///
    /// Any byte written to the private view but not yet to the shared view is
    /// lost, so callers must only remap once every intent has been applied.
    pub fn remap_private_view(&self) -> Result<()> {
        let mut view = self.private.write();
        *view = map_private(&self.file, self.len)?;
        self.will_need_remap.store(false, Ordering::Release);
        Ok(())
    }

    /// First and last differing offsets between the two views, if any.
    pub fn views_mismatch(&self) -> Option<(u64, u64)> {
        let private = self.private.read();
        let shared = self.shared.lock();
        let first = private.iter().zip(shared.iter()).position(|(p, s)| p != s)?;
        let last = private
            .iter()
            .zip(shared.iter())
            .rposition(|(p, s)| p != s)
            .unwrap_or(first);
        Some((first as u64, last as u64))
    }
}

impl std::fmt::Debug for DurableMappedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableMappedFile")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("len", &self.len)
            .field("will_need_remap", &self.will_need_remap())
            .finish()
    }
}

fn map_shared(file: &File, len: u64) -> Result<MmapMut> {
    // SAFETY: data files are owned by this process; nothing else truncates
    // them while they are registered.
    let map = unsafe { MmapOptions::new().len(len as usize).map_mut(file)? };
    Ok(map)
}

fn map_private(file: &File, len: u64) -> Result<MmapMut> {
    // SAFETY: as for map_shared; the private mapping never writes back.
    let map = unsafe { MmapOptions::new().len(len as usize).map_copy(file)? };
    Ok(map)
}
