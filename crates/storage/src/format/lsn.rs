//! LSN file format.
//!
//! The LSN file records the sequence number of the last journal section
//! whose effects are known to be flushed to the data files. Recovery skips
//! sections at or below it.
//!
//! ```text
//! 0  8  last applied section sequence
//! 8  4  crc32 of bytes 0..8
//! 12 4  magic "LSN1"
//! ```

use byteorder::{ByteOrder, LittleEndian};

use super::{need, FormatError};

/// Encoded size of an LSN record.
pub const LSN_RECORD_SIZE: usize = 16;

const LSN_MAGIC: u32 = u32::from_le_bytes(*b"LSN1");

/// Persisted last-applied sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LsnRecord {
    /// Highest section sequence reflected in the data files
    pub seq: u64,
}

impl LsnRecord {
    /// Encode to bytes.
    pub fn encode(&self) -> [u8; LSN_RECORD_SIZE] {
        let mut buf = [0u8; LSN_RECORD_SIZE];
        LittleEndian::write_u64(&mut buf[0..8], self.seq);
        let crc = crc32fast::hash(&buf[0..8]);
        LittleEndian::write_u32(&mut buf[8..12], crc);
        LittleEndian::write_u32(&mut buf[12..16], LSN_MAGIC);
        buf
    }

    /// Decode and validate.
    pub fn decode(buf: &[u8]) -> Result<Self, FormatError> {
        need(buf, LSN_RECORD_SIZE)?;
        let magic = LittleEndian::read_u32(&buf[12..16]);
        if magic != LSN_MAGIC {
            return Err(FormatError::BadMagic {
                found: magic as u64,
            });
        }
        let stored = LittleEndian::read_u32(&buf[8..12]);
        let computed = crc32fast::hash(&buf[0..8]);
        if stored != computed {
            return Err(FormatError::Checksum { stored, computed });
        }
        Ok(LsnRecord {
            seq: LittleEndian::read_u64(&buf[0..8]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lsn_detects_torn_write() {
        let mut buf = LsnRecord { seq: 77 }.encode();
        assert_eq!(LsnRecord::decode(&buf).unwrap().seq, 77);
        assert_eq!(
            LittleEndian::read_u32(&buf[8..12]),
            crc32fast::hash(&77u64.to_le_bytes())
        );
        buf[3] = 0xaa;
        assert!(matches!(
            LsnRecord::decode(&buf),
            Err(FormatError::Checksum { .. })
        ));
        assert!(LsnRecord::decode(&buf[..10]).unwrap_err().is_truncation());
    }
}
