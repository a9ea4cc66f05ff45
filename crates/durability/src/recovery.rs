//! Startup recovery.
//!
//! Replays every journal section newer than the `lsn` marker straight into
//! the data files, then flushes them, records the last sequence and deletes
//! the journal. Runs once, before the background thread starts.
//!
//! A crash while appending leaves a torn tail in the newest journal file: a
//! last section that runs past the end of the file or fails its checksum.
//! That section ends recovery and is dropped. Damage followed by another
//! section, damage in an older file, or sequence numbers that do not
//! increase, fails recovery.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use mmj_core::{DurabilityConfig, Error, FileId, Result};
use mmj_storage::format::{
    decode_entries, verify_section, FormatError, JournalEntry, JournalFileHeader, SectionHeader,
    JOURNAL_FILE_HEADER_SIZE,
};
use mmj_storage::{DurableMappedFile, MappedFileRegistry, ALIGNMENT};
use tracing::{debug, info, warn};

use crate::journal::journal_files;
use crate::lsn::LsnFile;

/// Outcome of a recovery run.
#[derive(Debug, Default, Clone)]
pub struct RecoveryResult {
    /// Journal files examined
    pub journal_files: usize,
    /// Sequence in the lsn marker at startup, if any
    pub lsn_at_start: Option<u64>,
    /// Sections replayed
    pub sections_replayed: u64,
    /// Sections skipped as already in the data files
    pub sections_skipped: u64,
    /// Ops replayed
    pub ops_replayed: u64,
    /// Write entries replayed
    pub writes_replayed: u64,
    /// Bytes written to data files
    pub bytes_replayed: u64,
    /// Whether an unreadable tail was discarded
    pub discarded_tail: bool,
    /// Highest sequence now reflected in the data files
    pub last_seq: u64,
    /// Total recovery time (microseconds)
    pub recovery_time_micros: u64,
}

impl RecoveryResult {
    /// Get human-readable summary
    pub fn summary(&self) -> String {
        format!(
            "Recovery complete: {} sections replayed, {} skipped, {} ops, {} writes ({} bytes) from {} journal files, last seq {}{}, {:.2}ms",
            self.sections_replayed,
            self.sections_skipped,
            self.ops_replayed,
            self.writes_replayed,
            self.bytes_replayed,
            self.journal_files,
            self.last_seq,
            if self.discarded_tail { ", torn tail discarded" } else { "" },
            self.recovery_time_micros as f64 / 1000.0,
        )
    }

    /// Whether anything had to be thrown away.
    pub fn has_issues(&self) -> bool {
        self.discarded_tail
    }
}

/// Replays the journal into the data files.
pub struct RecoveryReplayer<'a> {
    journal_dir: PathBuf,
    registry: &'a MappedFileRegistry,
    touched: Vec<Arc<DurableMappedFile>>,
}

impl<'a> RecoveryReplayer<'a> {
    /// A replayer for the journal configured in `config`, writing through
    /// `registry`.
    pub fn new(config: &DurabilityConfig, registry: &'a MappedFileRegistry) -> Self {
        RecoveryReplayer {
            journal_dir: config.journal_dir(),
            registry,
            touched: Vec::new(),
        }
    }

    /// Run recovery.
    pub fn recover(mut self) -> Result<RecoveryResult> {
        let start = Instant::now();
        let lsn_file = LsnFile::new(&self.journal_dir);
        let lsn = lsn_file.read()?;
        let files = journal_files(&self.journal_dir)?;
        let mut result = RecoveryResult {
            journal_files: files.len(),
            lsn_at_start: lsn,
            last_seq: lsn.unwrap_or(0),
            ..Default::default()
        };
        if files.is_empty() {
            debug!(dir = %self.journal_dir.display(), "no journal files, nothing to recover");
            result.recovery_time_micros = start.elapsed().as_micros() as u64;
            return Ok(result);
        }
        info!(files = files.len(), lsn = ?lsn, "starting journal recovery");

        let mut prev_seq: Option<u64> = None;
        let last_index = files.len() - 1;
        'files: for (index, (_, path)) in files.iter().enumerate() {
            let is_last = index == last_index;
            let location = path.display().to_string();
            let buf = fs::read(path)?;

            if let Err(e) = JournalFileHeader::decode(&buf) {
                if is_last {
                    warn!(file = %location, error = %e, "discarding unreadable journal file tail");
                    result.discarded_tail = true;
                    break;
                }
                return Err(e.at(location));
            }

            let mut pos = JOURNAL_FILE_HEADER_SIZE;
            while pos < buf.len() {
                let (header, payload) = match verify_section(&buf[pos..]) {
                    Ok(section) => section,
                    Err(e) if is_last && is_torn_tail(&buf, pos) => {
                        warn!(file = %location, offset = pos, error = %e, "discarding torn journal tail");
                        result.discarded_tail = true;
                        break 'files;
                    }
                    Err(e) => return Err(e.at(format!("{} at {}", location, pos))),
                };
                if let Some(prev) = prev_seq {
                    if header.seq <= prev {
                        return Err(Error::corruption(
                            format!("{} at {}", location, pos),
                            format!("section sequence {} follows {}", header.seq, prev),
                        ));
                    }
                }
                prev_seq = Some(header.seq);
                pos += header.section_len as usize;

                if lsn.is_some_and(|lsn| header.seq <= lsn) {
                    result.sections_skipped += 1;
                    continue;
                }

                let raw = if header.is_compressed() {
                    zstd::bulk::decompress(payload, header.raw_len as usize)
                        .map_err(|e| Error::Compression(e.to_string()))?
                } else {
                    payload.to_vec()
                };
                if raw.len() != header.raw_len as usize {
                    return Err(FormatError::Malformed(format!(
                        "payload of section {} is {} bytes, header says {}",
                        header.seq,
                        raw.len(),
                        header.raw_len
                    ))
                    .at(location));
                }
                self.replay_section(&raw, &mut result)
                    .map_err(|e| match e {
                        Error::Corruption { .. } | Error::Io(_) => e,
                        other => Error::corruption(
                            format!("section {}", header.seq),
                            other.to_string(),
                        ),
                    })?;
                result.sections_replayed += 1;
                result.last_seq = header.seq;
            }
        }

        if let Some(prev) = prev_seq {
            result.last_seq = result.last_seq.max(prev);
        }
        for file in &self.touched {
            file.flush()?;
            file.remap_private_view()?;
        }
        lsn_file.write(result.last_seq)?;
        for (_, path) in &files {
            fs::remove_file(path)?;
        }

        result.recovery_time_micros = start.elapsed().as_micros() as u64;
        info!("{}", result.summary());
        Ok(result)
    }

    fn replay_section(&mut self, raw: &[u8], result: &mut RecoveryResult) -> Result<()> {
        let entries = decode_entries(raw).map_err(|e| e.at("section payload"))?;
        let mut files: HashMap<FileId, Arc<DurableMappedFile>> = HashMap::new();

        for entry in &entries {
            if let JournalEntry::FileCreated { file, name, len } = entry {
                let mapped = self.open_or_create(name, *len)?;
                files.insert(*file, mapped);
                result.ops_replayed += 1;
            }
        }
        for entry in entries {
            match entry {
                JournalEntry::FileCreated { .. } => {}
                JournalEntry::FileContext { file, name } => {
                    let mapped = self.registry.open_file(name)?;
                    self.touch(&mapped);
                    files.insert(file, mapped);
                }
                JournalEntry::Write { file, offset, data } => {
                    let mapped = files.get(&file).ok_or_else(|| {
                        Error::corruption("section payload", format!("write to unnamed {}", file))
                    })?;
                    mapped.write_shared(offset, data)?;
                    result.writes_replayed += 1;
                    result.bytes_replayed += data.len() as u64;
                }
            }
        }
        Ok(())
    }

    fn open_or_create(&mut self, name: &str, len: u64) -> Result<Arc<DurableMappedFile>> {
        let on_disk = self
            .registry
            .data_dir()
            .join(name)
            .metadata()
            .map(|m| m.len())
            .unwrap_or(0);
        let mapped = if let Some(open) = self.registry.find_by_name(name) {
            open
        } else if on_disk >= len && on_disk > 0 {
            self.registry.open_file(name)?
        } else {
            debug!(name, len, "recreating data file");
            self.registry.create_file(name, len)?
        };
        self.touch(&mapped);
        Ok(mapped)
    }

    fn touch(&mut self, file: &Arc<DurableMappedFile>) {
        if !self.touched.iter().any(|f| f.id() == file.id()) {
            self.touched.push(Arc::clone(file));
        }
    }
}

// The section at `pos` failed to verify. It is the tail only if nothing
// durable follows: its own extent reaches the end of the file, or, when the
// header itself is unreadable, no later aligned offset starts a section.
fn is_torn_tail(buf: &[u8], pos: usize) -> bool {
    match SectionHeader::decode(&buf[pos..]) {
        Ok(header) => pos + header.section_len as usize >= buf.len(),
        Err(_) => (pos + ALIGNMENT..buf.len())
            .step_by(ALIGNMENT)
            .all(|at| SectionHeader::decode(&buf[at..]).is_err()),
    }
}
