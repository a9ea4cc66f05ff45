//! Journal section format.
//!
//! A section is the unit of durability: everything captured by one commit
//! cycle. It is self-describing, checksummed and padded to the alignment
//! unit so the next section starts aligned.
//!
//! ```text
//! header (32 bytes)
//!   0  u32 magic
//!   4  u16 format version
//!   6  u16 flags (bit 0: payload is zstd-compressed)
//!   8  u64 sequence number
//!   16 u32 section length (header + payload + footer + padding)
//!   20 u32 stored payload length
//!   24 u32 raw (uncompressed) payload length
//!   28 u32 reserved
//! payload (stored payload length bytes)
//! footer (16 bytes)
//!   0  u32 crc32 over header and stored payload
//!   4  u32 footer magic
//!   8  u64 sequence number (repeated, detects torn sections)
//! zero padding to ALIGNMENT
//! ```
//!
//! The raw payload is a sequence of entries, each starting with a tag byte:
//!
//! | Tag | Entry | Body |
//! |-----|-------|------|
//! | 1 | FileContext | u32 file, u16 name len, name |
//! | 2 | FileCreated | u32 file, u64 length, u16 name len, name |
//! | 3 | Write | u32 file, u64 offset, u32 len, data |
//!
//! Operations (FileCreated) are written before any Write entry. A FileContext
//! entry names a file before the first Write to it, so a section can be
//! replayed without any outside state.

use byteorder::{ByteOrder, LittleEndian};
use mmj_core::FileId;

use super::{need, FormatError};
use crate::aligned::{aligned_len, AlignedBuilder};

/// Magic at the start of every section.
pub const SECTION_MAGIC: u32 = u32::from_le_bytes(*b"JSEC");

const FOOTER_MAGIC: u32 = u32::from_le_bytes(*b"JEND");

/// Current section format version.
pub const SECTION_FORMAT_VERSION: u16 = 1;

/// Encoded header size.
pub const SECTION_HEADER_SIZE: usize = 32;

/// Encoded footer size.
pub const SECTION_FOOTER_SIZE: usize = 16;

/// Payload is zstd-compressed.
pub const SECTION_FLAG_COMPRESSED: u16 = 0x1;

/// Longest file name an entry can carry (u16 length prefix).
pub const MAX_FILE_NAME_LEN: usize = u16::MAX as usize;

const TAG_FILE_CONTEXT: u8 = 1;
const TAG_FILE_CREATED: u8 = 2;
const TAG_WRITE: u8 = 3;

/// Section header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionHeader {
    /// Flags (see [`SECTION_FLAG_COMPRESSED`])
    pub flags: u16,
    /// Sequence number, strictly increasing across the journal
    pub seq: u64,
    /// Total on-disk length including padding
    pub section_len: u32,
    /// Stored payload length
    pub payload_len: u32,
    /// Payload length before compression
    pub raw_len: u32,
}

impl SectionHeader {
    /// Section length for a stored payload of `payload_len` bytes.
    pub fn section_len_for(payload_len: usize) -> usize {
        aligned_len(SECTION_HEADER_SIZE + payload_len + SECTION_FOOTER_SIZE)
    }

    /// Whether the payload is compressed.
    pub fn is_compressed(&self) -> bool {
        self.flags & SECTION_FLAG_COMPRESSED != 0
    }

    /// Encode into the first [`SECTION_HEADER_SIZE`] bytes of `buf`.
    pub fn encode_into(&self, buf: &mut [u8]) {
        LittleEndian::write_u32(&mut buf[0..4], SECTION_MAGIC);
        LittleEndian::write_u16(&mut buf[4..6], SECTION_FORMAT_VERSION);
        LittleEndian::write_u16(&mut buf[6..8], self.flags);
        LittleEndian::write_u64(&mut buf[8..16], self.seq);
        LittleEndian::write_u32(&mut buf[16..20], self.section_len);
        LittleEndian::write_u32(&mut buf[20..24], self.payload_len);
        LittleEndian::write_u32(&mut buf[24..28], self.raw_len);
        LittleEndian::write_u32(&mut buf[28..32], 0);
    }

    /// Decode a header and check its lengths are self-consistent.
    pub fn decode(buf: &[u8]) -> Result<Self, FormatError> {
        need(buf, SECTION_HEADER_SIZE)?;
        let magic = LittleEndian::read_u32(&buf[0..4]);
        if magic != SECTION_MAGIC {
            return Err(FormatError::BadMagic {
                found: magic as u64,
            });
        }
        let version = LittleEndian::read_u16(&buf[4..6]);
        if version != SECTION_FORMAT_VERSION {
            return Err(FormatError::UnsupportedVersion(version));
        }
        let header = SectionHeader {
            flags: LittleEndian::read_u16(&buf[6..8]),
            seq: LittleEndian::read_u64(&buf[8..16]),
            section_len: LittleEndian::read_u32(&buf[16..20]),
            payload_len: LittleEndian::read_u32(&buf[20..24]),
            raw_len: LittleEndian::read_u32(&buf[24..28]),
        };
        if header.section_len as usize != Self::section_len_for(header.payload_len as usize) {
            return Err(FormatError::Malformed(format!(
                "section length {} does not match payload length {}",
                header.section_len, header.payload_len
            )));
        }
        if !header.is_compressed() && header.raw_len != header.payload_len {
            return Err(FormatError::Malformed(
                "uncompressed section with differing raw length".to_string(),
            ));
        }
        Ok(header)
    }
}

/// Section footer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionFooter {
    /// crc32 over header and stored payload
    pub crc: u32,
    /// Sequence number, must match the header
    pub seq: u64,
}

impl SectionFooter {
    /// Encode into the first [`SECTION_FOOTER_SIZE`] bytes of `buf`.
    pub fn encode_into(&self, buf: &mut [u8]) {
        LittleEndian::write_u32(&mut buf[0..4], self.crc);
        LittleEndian::write_u32(&mut buf[4..8], FOOTER_MAGIC);
        LittleEndian::write_u64(&mut buf[8..16], self.seq);
    }

    /// Decode a footer.
    pub fn decode(buf: &[u8]) -> Result<Self, FormatError> {
        need(buf, SECTION_FOOTER_SIZE)?;
        let magic = LittleEndian::read_u32(&buf[4..8]);
        if magic != FOOTER_MAGIC {
            return Err(FormatError::BadMagic {
                found: magic as u64,
            });
        }
        Ok(SectionFooter {
            crc: LittleEndian::read_u32(&buf[0..4]),
            seq: LittleEndian::read_u64(&buf[8..16]),
        })
    }
}

/// Validate the section at the start of `buf`.
///
/// Returns the header and the stored payload. A section that extends past
/// the end of `buf` reports [`FormatError::Truncated`].
pub fn verify_section(buf: &[u8]) -> Result<(SectionHeader, &[u8]), FormatError> {
    let header = SectionHeader::decode(buf)?;
    need(buf, header.section_len as usize)?;
    let payload_end = SECTION_HEADER_SIZE + header.payload_len as usize;
    let footer = SectionFooter::decode(&buf[payload_end..])?;
    if footer.seq != header.seq {
        return Err(FormatError::Malformed(format!(
            "footer sequence {} does not match header sequence {}",
            footer.seq, header.seq
        )));
    }
    let computed = crc32fast::hash(&buf[..payload_end]);
    if computed != footer.crc {
        return Err(FormatError::Checksum {
            stored: footer.crc,
            computed,
        });
    }
    Ok((header, &buf[SECTION_HEADER_SIZE..payload_end]))
}

/// A decoded payload entry, borrowing from the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalEntry<'a> {
    /// Names the file that following writes refer to
    FileContext {
        /// File handle used in this section
        file: FileId,
        /// File name relative to the data directory
        name: &'a str,
    },
    /// A data file was created with this length
    FileCreated {
        /// File handle used in this section
        file: FileId,
        /// File name relative to the data directory
        name: &'a str,
        /// Length the file was created with
        len: u64,
    },
    /// Bytes written at `offset`
    Write {
        /// File handle used in this section
        file: FileId,
        /// Offset within the file
        offset: u64,
        /// Captured bytes
        data: &'a [u8],
    },
}

/// Append a FileContext entry.
pub fn put_file_context(b: &mut AlignedBuilder, file: FileId, name: &str) {
    b.append_u8(TAG_FILE_CONTEXT);
    b.append_u32(file.0);
    put_name(b, name);
}

/// Append a FileCreated entry.
pub fn put_file_created(b: &mut AlignedBuilder, file: FileId, name: &str, len: u64) {
    b.append_u8(TAG_FILE_CREATED);
    b.append_u32(file.0);
    b.append_u64(len);
    put_name(b, name);
}

/// Append the head of a Write entry; the caller appends exactly `len` bytes.
pub fn put_write_header(b: &mut AlignedBuilder, file: FileId, offset: u64, len: u32) {
    b.append_u8(TAG_WRITE);
    b.append_u32(file.0);
    b.append_u64(offset);
    b.append_u32(len);
}

// Names are checked against MAX_FILE_NAME_LEN when the file is registered.
fn put_name(b: &mut AlignedBuilder, name: &str) {
    debug_assert!(name.len() <= MAX_FILE_NAME_LEN);
    b.append_u16(name.len() as u16);
    b.append_bytes(name.as_bytes());
}

/// Iterate the entries of a raw payload without copying.
///
/// Stops after the first malformed entry.
pub fn entries(buf: &[u8]) -> Entries<'_> {
    Entries { buf }
}

/// Decode every entry of a raw payload, failing on the first malformed one.
pub fn decode_entries(buf: &[u8]) -> Result<Vec<JournalEntry<'_>>, FormatError> {
    entries(buf).collect()
}

/// Iterator returned by [`entries`].
#[derive(Debug, Clone)]
pub struct Entries<'a> {
    buf: &'a [u8],
}

impl<'a> Iterator for Entries<'a> {
    type Item = Result<JournalEntry<'a>, FormatError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buf.is_empty() {
            return None;
        }
        let next = decode_entry(self.buf);
        match next {
            Ok((entry, rest)) => {
                self.buf = rest;
                Some(Ok(entry))
            }
            Err(e) => {
                self.buf = &[];
                Some(Err(e))
            }
        }
    }
}

fn decode_entry(buf: &[u8]) -> Result<(JournalEntry<'_>, &[u8]), FormatError> {
    let tag = buf[0];
    let buf = &buf[1..];
    match tag {
        TAG_FILE_CONTEXT => {
            need(buf, 4)?;
            let file = FileId(LittleEndian::read_u32(&buf[0..4]));
            let (name, rest) = take_name(&buf[4..])?;
            Ok((JournalEntry::FileContext { file, name }, rest))
        }
        TAG_FILE_CREATED => {
            need(buf, 12)?;
            let file = FileId(LittleEndian::read_u32(&buf[0..4]));
            let len = LittleEndian::read_u64(&buf[4..12]);
            let (name, rest) = take_name(&buf[12..])?;
            Ok((JournalEntry::FileCreated { file, name, len }, rest))
        }
        TAG_WRITE => {
            need(buf, 16)?;
            let file = FileId(LittleEndian::read_u32(&buf[0..4]));
            let offset = LittleEndian::read_u64(&buf[4..12]);
            let len = LittleEndian::read_u32(&buf[12..16]) as usize;
            need(&buf[16..], len)?;
            let data = &buf[16..16 + len];
            Ok((JournalEntry::Write { file, offset, data }, &buf[16 + len..]))
        }
        other => Err(FormatError::Malformed(format!("unknown entry tag {}", other))),
    }
}

fn take_name(buf: &[u8]) -> Result<(&str, &[u8]), FormatError> {
    need(buf, 2)?;
    let len = LittleEndian::read_u16(&buf[0..2]) as usize;
    need(&buf[2..], len)?;
    let name = std::str::from_utf8(&buf[2..2 + len])
        .map_err(|e| FormatError::Malformed(format!("file name is not utf-8: {}", e)))?;
    Ok((name, &buf[2 + len..]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aligned::ALIGNMENT;
    use proptest::prelude::*;

    fn build_section(seq: u64, fill: impl FnOnce(&mut AlignedBuilder)) -> Vec<u8> {
        let mut b = AlignedBuilder::with_capacity(ALIGNMENT);
        let start = b.skip(SECTION_HEADER_SIZE);
        fill(&mut b);
        let payload_len = b.len() - start - SECTION_HEADER_SIZE;
        let header = SectionHeader {
            flags: 0,
            seq,
            section_len: SectionHeader::section_len_for(payload_len) as u32,
            payload_len: payload_len as u32,
            raw_len: payload_len as u32,
        };
        header.encode_into(b.slice_mut(start, start + SECTION_HEADER_SIZE));
        let crc = crc32fast::hash(b.as_slice());
        let at = b.skip(SECTION_FOOTER_SIZE);
        SectionFooter { crc, seq }.encode_into(b.slice_mut(at, at + SECTION_FOOTER_SIZE));
        b.pad_to_alignment();
        b.as_slice().to_vec()
    }

    #[test]
    fn test_section_with_all_entry_kinds() {
        let bytes = build_section(9, |b| {
            put_file_created(b, FileId(2), "db.1", 1 << 20);
            put_file_context(b, FileId(2), "db.1");
            put_write_header(b, FileId(2), 4096, 3);
            b.append_bytes(b"xyz");
        });
        assert_eq!(bytes.len(), ALIGNMENT);

        let (header, payload) = verify_section(&bytes).unwrap();
        assert_eq!(header.seq, 9);
        let entries = decode_entries(payload).unwrap();
        assert_eq!(
            entries,
            vec![
                JournalEntry::FileCreated {
                    file: FileId(2),
                    name: "db.1",
                    len: 1 << 20
                },
                JournalEntry::FileContext {
                    file: FileId(2),
                    name: "db.1"
                },
                JournalEntry::Write {
                    file: FileId(2),
                    offset: 4096,
                    data: b"xyz"
                },
            ]
        );
    }

    #[test]
    fn test_truncated_section_reports_truncation() {
        let bytes = build_section(1, |b| {
            put_write_header(b, FileId(0), 0, 4);
            b.append_bytes(&[1, 2, 3, 4]);
        });
        let err = verify_section(&bytes[..100]).unwrap_err();
        assert!(err.is_truncation());
    }

    #[test]
    fn test_flipped_payload_bit_fails_checksum() {
        let mut bytes = build_section(1, |b| {
            put_write_header(b, FileId(0), 0, 4);
            b.append_bytes(&[1, 2, 3, 4]);
        });
        bytes[SECTION_HEADER_SIZE + 18] ^= 0x01;
        assert!(matches!(
            verify_section(&bytes),
            Err(FormatError::Checksum { .. })
        ));
    }

    #[test]
    fn test_zeroed_tail_is_bad_magic() {
        let zeros = vec![0u8; ALIGNMENT];
        assert!(matches!(
            verify_section(&zeros),
            Err(FormatError::BadMagic { found: 0 })
        ));
    }

    #[test]
    fn test_unknown_tag() {
        assert!(matches!(
            decode_entries(&[42, 0, 0]),
            Err(FormatError::Malformed(_))
        ));
    }

    #[test]
    fn test_entries_stop_after_malformed_entry() {
        let mut b = AlignedBuilder::with_capacity(ALIGNMENT);
        put_write_header(&mut b, FileId(1), 8, 2);
        b.append_bytes(b"ok");
        b.append_u8(42);
        put_write_header(&mut b, FileId(1), 16, 2);
        b.append_bytes(b"no");

        let mut it = entries(b.as_slice());
        assert!(matches!(
            it.next(),
            Some(Ok(JournalEntry::Write { offset: 8, data: b"ok", .. }))
        ));
        assert!(matches!(it.next(), Some(Err(FormatError::Malformed(_)))));
        assert!(it.next().is_none());
    }

    proptest! {
        #[test]
        fn prop_write_entries_decode_to_what_was_put(
            writes in proptest::collection::vec(
                (0u32..4, 0u64..1_000_000, proptest::collection::vec(any::<u8>(), 0..64)),
                0..20,
            )
        ) {
            let mut b = AlignedBuilder::with_capacity(ALIGNMENT);
            for (file, offset, data) in &writes {
                put_write_header(&mut b, FileId(*file), *offset, data.len() as u32);
                b.append_bytes(data);
            }
            let entries = decode_entries(b.as_slice()).unwrap();
            prop_assert_eq!(entries.len(), writes.len());
            for (entry, (file, offset, data)) in entries.iter().zip(writes.iter()) {
                prop_assert_eq!(
                    entry,
                    &JournalEntry::Write { file: FileId(*file), offset: *offset, data: &data[..] }
                );
            }
        }
    }
}
