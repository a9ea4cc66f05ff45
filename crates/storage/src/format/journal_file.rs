//! Journal file header.
//!
//! Every journal file starts with one alignment unit holding this header,
//! followed by sections.
//!
//! ```text
//! offset size field
//! 0      8    magic "MMJRNL\0\x01"
//! 8      2    format version
//! 10     2    reserved
//! 12     4    file number (N in j._N)
//! 16     8    creation time, unix seconds
//! 24     4    crc32 of bytes 0..24
//! 28..   zero padding to ALIGNMENT
//! ```

use byteorder::{ByteOrder, LittleEndian};

use super::{need, FormatError};
use crate::aligned::ALIGNMENT;

/// Magic bytes at the start of every journal file.
pub const JOURNAL_MAGIC: [u8; 8] = *b"MMJRNL\0\x01";

/// Current journal file format version.
pub const JOURNAL_FILE_VERSION: u16 = 1;

/// On-disk size of the header including padding.
pub const JOURNAL_FILE_HEADER_SIZE: usize = ALIGNMENT;

const ENCODED_LEN: usize = 28;

/// Header of a `j._N` journal file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JournalFileHeader {
    /// File number
    pub file_number: u32,
    /// Creation time in unix seconds
    pub created_secs: u64,
}

impl JournalFileHeader {
    /// Encode into a full, padded header block.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; JOURNAL_FILE_HEADER_SIZE];
        buf[0..8].copy_from_slice(&JOURNAL_MAGIC);
        LittleEndian::write_u16(&mut buf[8..10], JOURNAL_FILE_VERSION);
        LittleEndian::write_u32(&mut buf[12..16], self.file_number);
        LittleEndian::write_u64(&mut buf[16..24], self.created_secs);
        let crc = crc32fast::hash(&buf[0..24]);
        LittleEndian::write_u32(&mut buf[24..28], crc);
        buf
    }

    /// Decode and validate a header.
    pub fn decode(buf: &[u8]) -> Result<Self, FormatError> {
        need(buf, ENCODED_LEN)?;
        if buf[0..8] != JOURNAL_MAGIC {
            return Err(FormatError::BadMagic {
                found: LittleEndian::read_u64(&buf[0..8]),
            });
        }
        let stored = LittleEndian::read_u32(&buf[24..28]);
        let computed = crc32fast::hash(&buf[0..24]);
        if stored != computed {
            return Err(FormatError::Checksum { stored, computed });
        }
        let version = LittleEndian::read_u16(&buf[8..10]);
        if version != JOURNAL_FILE_VERSION {
            return Err(FormatError::UnsupportedVersion(version));
        }
        Ok(JournalFileHeader {
            file_number: LittleEndian::read_u32(&buf[12..16]),
            created_secs: LittleEndian::read_u64(&buf[16..24]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let header = JournalFileHeader {
            file_number: 12,
            created_secs: 1_700_000_000,
        };
        let buf = header.encode();
        assert_eq!(buf.len(), JOURNAL_FILE_HEADER_SIZE);
        assert_eq!(JournalFileHeader::decode(&buf).unwrap(), header);
    }

    #[test]
    fn test_header_rejects_garbage() {
        let mut buf = JournalFileHeader {
            file_number: 1,
            created_secs: 5,
        }
        .encode();
        buf[13] ^= 0x40;
        assert!(matches!(
            JournalFileHeader::decode(&buf),
            Err(FormatError::Checksum { .. })
        ));
        assert!(matches!(
            JournalFileHeader::decode(&[0u8; 64]),
            Err(FormatError::BadMagic { .. })
        ));
        assert!(JournalFileHeader::decode(&[0u8; 4]).unwrap_err().is_truncation());
    }
}
