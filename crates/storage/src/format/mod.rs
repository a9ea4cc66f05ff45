//! On-disk byte formats for the journal and the LSN file.
//!
//! Operational logic (how sections are prepared, written and replayed) lives
//! in `mmj-durability`; this module only encodes and decodes bytes.
//!
//! # Module Structure
//!
//! - `journal_file`: per-file header written at the start of every `j._N`
//! - `section`: section header/footer and the entries of a section payload
//! - `lsn`: the last-sequence-applied marker persisted after data-file flushes

pub mod journal_file;
pub mod lsn;
pub mod section;

use thiserror::Error;

pub use journal_file::{JournalFileHeader, JOURNAL_FILE_HEADER_SIZE, JOURNAL_MAGIC};
pub use lsn::{LsnRecord, LSN_RECORD_SIZE};
pub use section::{
    decode_entries, entries, put_file_context, put_file_created, put_write_header, verify_section,
    Entries, JournalEntry, SectionFooter, SectionHeader, MAX_FILE_NAME_LEN, SECTION_FLAG_COMPRESSED,
    SECTION_FOOTER_SIZE, SECTION_FORMAT_VERSION, SECTION_HEADER_SIZE, SECTION_MAGIC,
};

/// Errors decoding on-disk structures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormatError {
    /// Fewer bytes than the structure needs
    #[error("truncated: need {needed} bytes, have {available}")]
    Truncated {
        /// Bytes required
        needed: usize,
        /// Bytes present
        available: usize,
    },

    /// Magic number mismatch
    #[error("bad magic {found:#x}")]
    BadMagic {
        /// Value found in place of the magic
        found: u64,
    },

    /// CRC mismatch
    #[error("checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    Checksum {
        /// CRC stored on disk
        stored: u32,
        /// CRC computed over the bytes read
        computed: u32,
    },

    /// Unknown format version
    #[error("unsupported format version {0}")]
    UnsupportedVersion(u16),

    /// Structurally invalid content
    #[error("malformed: {0}")]
    Malformed(String),
}

impl FormatError {
    /// Whether the bytes simply ran out (a torn tail) rather than being wrong.
    pub fn is_truncation(&self) -> bool {
        matches!(self, FormatError::Truncated { .. })
    }

    /// Convert into a core corruption error at `location`.
    pub fn at(self, location: impl Into<String>) -> mmj_core::Error {
        mmj_core::Error::corruption(location, self.to_string())
    }
}

pub(crate) fn need(buf: &[u8], needed: usize) -> Result<(), FormatError> {
    if buf.len() < needed {
        Err(FormatError::Truncated {
            needed,
            available: buf.len(),
        })
    } else {
        Ok(())
    }
}
