//! Section preparation.
//!
//! Serializes everything a commit cycle captured into the log builder as one
//! complete, uncompressed section: durable ops first, then the current
//! private-view bytes of every intent. Must run while writers are excluded,
//! because the bytes are copied out of live memory.

use mmj_concurrency::PendingWrites;
use mmj_core::{DurOp, Error, FileId, Result};
use mmj_storage::format::{
    put_file_context, put_file_created, put_write_header, SectionFooter, SectionHeader,
    SECTION_FOOTER_SIZE, SECTION_HEADER_SIZE,
};
use mmj_storage::{AlignedBuilder, FilesShared};
use tracing::trace;

/// Summary of the section left in the builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreparedSection {
    /// Sequence number in the header
    pub seq: u64,
    /// Uncompressed payload length
    pub raw_len: usize,
    /// Section length in the builder, padding included
    pub section_len: usize,
    /// Write entries emitted
    pub writes: usize,
    /// Op entries emitted
    pub ops: usize,
    /// Data bytes captured from private views
    pub data_bytes: usize,
}

/// Build section `seq` from `pending` into `b`, which is reset first.
pub fn prepare_section(
    b: &mut AlignedBuilder,
    pending: &PendingWrites,
    files: &FilesShared<'_>,
    seq: u64,
) -> Result<PreparedSection> {
    b.reset();
    let start = b.skip(SECTION_HEADER_SIZE);
    let mut named: Vec<FileId> = Vec::new();

    for op in &pending.ops {
        match op {
            DurOp::FileCreated { file, name, len } => {
                put_file_created(b, *file, name, *len);
                named.push(*file);
            }
        }
    }

    let mut data_bytes = 0usize;
    for intent in &pending.intents {
        let file = files.get(intent.file)?;
        file.check_bounds(intent.offset, intent.len as u64)?;
        if !named.contains(&intent.file) {
            put_file_context(b, intent.file, file.name());
            named.push(intent.file);
        }
        put_write_header(b, intent.file, intent.offset, intent.len);
        let dst = b.reserve_mut(intent.len as usize);
        file.with_private_range(intent.offset, intent.len as usize, |src| {
            dst.copy_from_slice(src)
        })?;
        data_bytes += intent.len as usize;
    }

    let raw_len = b.len() - start - SECTION_HEADER_SIZE;
    let section_len = seal_section(b, start, 0, seq, raw_len)?;
    trace!(seq, raw_len, section_len, "prepared section");
    Ok(PreparedSection {
        seq,
        raw_len,
        section_len,
        writes: pending.intents.len(),
        ops: pending.ops.len(),
        data_bytes,
    })
}

/// The uncompressed entries of the section prepared in `b`.
pub fn raw_payload<'a>(b: &'a AlignedBuilder, prepared: &PreparedSection) -> &'a [u8] {
    &b.as_slice()[SECTION_HEADER_SIZE..SECTION_HEADER_SIZE + prepared.raw_len]
}

/// Write header and footer around the payload that follows `start`, then pad.
///
/// Returns the section length.
pub(crate) fn seal_section(
    b: &mut AlignedBuilder,
    start: usize,
    flags: u16,
    seq: u64,
    raw_len: usize,
) -> Result<usize> {
    let payload_len = b.len() - start - SECTION_HEADER_SIZE;
    let section_len = SectionHeader::section_len_for(payload_len);
    if section_len > u32::MAX as usize {
        return Err(Error::invariant(format!(
            "section {} too large: {} bytes",
            seq, section_len
        )));
    }
    let header = SectionHeader {
        flags,
        seq,
        section_len: section_len as u32,
        payload_len: payload_len as u32,
        raw_len: raw_len as u32,
    };
    header.encode_into(b.slice_mut(start, start + SECTION_HEADER_SIZE));
    let crc = crc32fast::hash(&b.as_slice()[start..]);
    let at = b.skip(SECTION_FOOTER_SIZE);
    SectionFooter { crc, seq }.encode_into(b.slice_mut(at, at + SECTION_FOOTER_SIZE));
    b.pad_to_alignment();
    Ok(section_len)
}
