//! Journal writer.
//!
//! Sections are appended to `j._N` files in the journal directory and made
//! durable with `sync_data` before the call returns. A file is retired once
//! it reaches the size limit; retired files are deleted after a data-file
//! flush has covered their last section.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use mmj_core::{DurabilityConfig, Error, Result};
use mmj_storage::format::{
    JournalFileHeader, SectionHeader, JOURNAL_FILE_HEADER_SIZE, SECTION_FLAG_COMPRESSED,
    SECTION_HEADER_SIZE,
};
use mmj_storage::{AlignedBuilder, ALIGNMENT};
use tracing::{debug, info};

use crate::prep::seal_section;

const JOURNAL_FILE_PREFIX: &str = "j._";

/// Journal files in `dir`, ordered by file number.
pub fn journal_files(dir: &Path) -> Result<Vec<(u32, PathBuf)>> {
    let mut files = Vec::new();
    if !dir.exists() {
        return Ok(files);
    }
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if let Some(n) = name
            .strip_prefix(JOURNAL_FILE_PREFIX)
            .and_then(|n| n.parse::<u32>().ok())
        {
            files.push((n, entry.path()));
        }
    }
    files.sort_by_key(|(n, _)| *n);
    Ok(files)
}

/// Outcome of one section write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JournalWriteStats {
    /// Sequence number written
    pub seq: u64,
    /// Bytes appended to the journal
    pub bytes_written: usize,
    /// Whether the payload was stored compressed
    pub compressed: bool,
}

#[derive(Debug)]
struct RetiredFile {
    path: PathBuf,
    last_seq: u64,
}

/// Appends sections to the journal.
pub struct JournalWriter {
    dir: PathBuf,
    current: File,
    file_number: u32,
    file_len: u64,
    max_file_size: u64,
    last_seq: u64,
    compress: bool,
    compression_level: i32,
    scratch: AlignedBuilder,
    retired: Vec<RetiredFile>,
}

impl JournalWriter {
    /// Open a new journal file after any existing one.
    ///
    /// `last_seq` is the highest sequence already durable (from recovery);
    /// the next section must carry `last_seq + 1`. Files already present are
    /// treated as covered by `last_seq`.
    pub fn open(config: &DurabilityConfig, last_seq: u64) -> Result<Self> {
        let dir = config.journal_dir();
        fs::create_dir_all(&dir)?;
        let existing = journal_files(&dir)?;
        let file_number = existing.last().map(|(n, _)| n + 1).unwrap_or(0);
        let retired = existing
            .into_iter()
            .map(|(_, path)| RetiredFile { path, last_seq })
            .collect();
        let current = create_journal_file(&dir, file_number)?;
        info!(dir = %dir.display(), file_number, last_seq, "opened journal");
        Ok(JournalWriter {
            dir,
            current,
            file_number,
            file_len: JOURNAL_FILE_HEADER_SIZE as u64,
            max_file_size: config.max_journal_file_size,
            last_seq,
            compress: config.compress,
            compression_level: config.compression_level,
            scratch: AlignedBuilder::with_capacity(ALIGNMENT),
            retired,
        })
    }

    /// Journal directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Highest sequence made durable.
    pub fn last_seq(&self) -> u64 {
        self.last_seq
    }

    /// Sequence the next section must carry.
    pub fn next_seq(&self) -> u64 {
        self.last_seq + 1
    }

    /// Number of the file being appended to.
    pub fn file_number(&self) -> u32 {
        self.file_number
    }

    /// Append the sealed section in `b` and fsync it.
    ///
    /// The builder is left untouched; a compressed copy, when smaller, is
    /// framed in a scratch buffer and written instead.
    pub fn write_section(&mut self, b: &AlignedBuilder) -> Result<JournalWriteStats> {
        let header = SectionHeader::decode(b.as_slice()).map_err(|e| e.at("log builder"))?;
        if header.seq != self.next_seq() {
            return Err(Error::invariant(format!(
                "journal sequence out of order: expected {}, got {}",
                self.next_seq(),
                header.seq
            )));
        }
        if header.section_len as usize != b.len() {
            return Err(Error::invariant(format!(
                "section {} is {} bytes but the builder holds {}",
                header.seq,
                header.section_len,
                b.len()
            )));
        }

        let compressed = self.compress && header.raw_len > 0 && self.frame_compressed(b, &header)?;
        let len = if compressed {
            self.scratch.len()
        } else {
            b.len()
        };

        if self.file_len > JOURNAL_FILE_HEADER_SIZE as u64
            && self.file_len + len as u64 > self.max_file_size
        {
            self.rotate()?;
        }
        let bytes = if compressed {
            self.scratch.as_slice()
        } else {
            b.as_slice()
        };
        self.current.write_all(bytes)?;
        self.current.sync_data()?;
        self.file_len += len as u64;
        self.last_seq = header.seq;
        debug!(seq = header.seq, bytes = len, compressed, "journal section durable");
        Ok(JournalWriteStats {
            seq: header.seq,
            bytes_written: len,
            compressed,
        })
    }

    /// Delete retired files whose sections are all at or below `lsn`.
    pub fn remove_files_covered_by(&mut self, lsn: u64) -> Result<usize> {
        let mut removed = 0;
        let mut keep = Vec::new();
        for file in self.retired.drain(..) {
            if file.last_seq <= lsn {
                fs::remove_file(&file.path)?;
                debug!(path = %file.path.display(), "removed journal file");
                removed += 1;
            } else {
                keep.push(file);
            }
        }
        self.retired = keep;
        Ok(removed)
    }

    /// Start a fresh file and delete every older one.
    ///
    /// Only valid once the data files are flushed up to [`last_seq`](Self::last_seq).
    pub fn truncate(&mut self) -> Result<usize> {
        self.rotate()?;
        let last = self.last_seq;
        self.remove_files_covered_by(last)
    }

    /// Retire the current file and continue in the next one.
    pub fn rotate(&mut self) -> Result<()> {
        let next = self.file_number + 1;
        let file = create_journal_file(&self.dir, next)?;
        let old = std::mem::replace(&mut self.current, file);
        drop(old);
        self.retired.push(RetiredFile {
            path: journal_file_path(&self.dir, self.file_number),
            last_seq: self.last_seq,
        });
        info!(from = self.file_number, to = next, last_seq = self.last_seq, "rotated journal file");
        self.file_number = next;
        self.file_len = JOURNAL_FILE_HEADER_SIZE as u64;
        Ok(())
    }

    // Frame a compressed copy of the section in `scratch`; false when
    // compression does not pay off.
    fn frame_compressed(&mut self, b: &AlignedBuilder, header: &SectionHeader) -> Result<bool> {
        let raw_len = header.raw_len as usize;
        let raw = &b.as_slice()[SECTION_HEADER_SIZE..SECTION_HEADER_SIZE + raw_len];
        let packed = zstd::bulk::compress(raw, self.compression_level)
            .map_err(|e| Error::Compression(e.to_string()))?;
        if packed.len() >= raw_len {
            return Ok(false);
        }
        self.scratch.reset();
        let start = self.scratch.skip(SECTION_HEADER_SIZE);
        self.scratch.append_bytes(&packed);
        seal_section(
            &mut self.scratch,
            start,
            SECTION_FLAG_COMPRESSED,
            header.seq,
            raw_len,
        )?;
        Ok(true)
    }
}

fn journal_file_path(dir: &Path, number: u32) -> PathBuf {
    dir.join(format!("{}{}", JOURNAL_FILE_PREFIX, number))
}

fn create_journal_file(dir: &Path, number: u32) -> Result<File> {
    let path = journal_file_path(dir, number);
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)?;
    let created_secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    file.write_all(
        &JournalFileHeader {
            file_number: number,
            created_secs,
        }
        .encode(),
    )?;
    file.sync_all()?;
    sync_dir(dir)?;
    Ok(file)
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}
