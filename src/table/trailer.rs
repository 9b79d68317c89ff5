//! The fixed-size trailer at the end of every table file.
//!
//! ```text
//! magic(8) | format_version(u32) | compression_id(u32) |
//! data_block_count(u64) | index_offset(u64) | index_length(u64) |
//! key_bytes_total(u64) | value_bytes_total(u64) | record_count(u64) |
//! bytes_total(u64) | trailer_crc(u32)
//! ```
//!
//! Integers are little-endian. The crc32c covers everything before it. A
//! reader locates the trailer by seeking to `file_size - TRAILER_SIZE`, so
//! the file can be validated without scanning.

use byteorder::{ByteOrder, LittleEndian};

use crate::codec::Compression;
use crate::corrupt;
use crate::error::Result;
use crate::table::block::CRC32C;

pub const MAGIC: [u8; 8] = *b"SIFTTBL\0";
pub const FORMAT_VERSION: u32 = 1;

/// Total encoded size: magic + 2 u32 + 7 u64 + crc.
pub const TRAILER_SIZE: u64 = 8 + 4 + 4 + 7 * 8 + 4;

#[derive(Debug, Clone, PartialEq)]
pub struct Trailer {
    pub compression: Compression,
    pub data_block_count: u64,
    pub index_offset: u64,
    pub index_length: u64,
    pub key_bytes_total: u64,
    pub value_bytes_total: u64,
    pub record_count: u64,
    pub bytes_total: u64,
}

impl Trailer {
    pub fn encode(&self) -> [u8; TRAILER_SIZE as usize] {
        let mut buf = [0u8; TRAILER_SIZE as usize];
        buf[..8].copy_from_slice(&MAGIC);
        LittleEndian::write_u32(&mut buf[8..12], FORMAT_VERSION);
        LittleEndian::write_u32(&mut buf[12..16], self.compression.id());
        LittleEndian::write_u64(&mut buf[16..24], self.data_block_count);
        LittleEndian::write_u64(&mut buf[24..32], self.index_offset);
        LittleEndian::write_u64(&mut buf[32..40], self.index_length);
        LittleEndian::write_u64(&mut buf[40..48], self.key_bytes_total);
        LittleEndian::write_u64(&mut buf[48..56], self.value_bytes_total);
        LittleEndian::write_u64(&mut buf[56..64], self.record_count);
        LittleEndian::write_u64(&mut buf[64..72], self.bytes_total);
        let crc = CRC32C.checksum(&buf[..72]);
        LittleEndian::write_u32(&mut buf[72..76], crc);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() != TRAILER_SIZE as usize {
            return Err(corrupt!(
                "trailer is {} bytes, expected {}",
                buf.len(),
                TRAILER_SIZE
            ));
        }
        if buf[..8] != MAGIC {
            return Err(corrupt!("bad magic"));
        }
        let crc = LittleEndian::read_u32(&buf[72..76]);
        let computed = CRC32C.checksum(&buf[..72]);
        if crc != computed {
            return Err(corrupt!(
                "trailer crc mismatch: {computed:#010x} != {crc:#010x}"
            ));
        }
        let version = LittleEndian::read_u32(&buf[8..12]);
        if version != FORMAT_VERSION {
            return Err(corrupt!("unsupported format version {version}"));
        }
        Ok(Self {
            compression: Compression::from_id(LittleEndian::read_u32(&buf[12..16]))?,
            data_block_count: LittleEndian::read_u64(&buf[16..24]),
            index_offset: LittleEndian::read_u64(&buf[24..32]),
            index_length: LittleEndian::read_u64(&buf[32..40]),
            key_bytes_total: LittleEndian::read_u64(&buf[40..48]),
            value_bytes_total: LittleEndian::read_u64(&buf[48..56]),
            record_count: LittleEndian::read_u64(&buf[56..64]),
            bytes_total: LittleEndian::read_u64(&buf[64..72]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_trailer() -> Trailer {
        Trailer {
            compression: Compression::Lz4,
            data_block_count: 12,
            index_offset: 98_304,
            index_length: 512,
            key_bytes_total: 40_000,
            value_bytes_total: 120_000,
            record_count: 3_000,
            bytes_total: 98_892,
        }
    }

    #[test]
    fn test_roundtrip() {
        let trailer = sample_trailer();
        let buf = trailer.encode();
        assert_eq!(buf.len() as u64, TRAILER_SIZE);
        let decoded = Trailer::decode(&buf).expect("decode failed");
        assert_eq!(decoded, trailer);
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut buf = sample_trailer().encode();
        buf[0] = b'X';
        assert!(matches!(
            Trailer::decode(&buf).unwrap_err(),
            crate::Error::Corrupt(_)
        ));
    }

    #[test]
    fn test_corrupt_field_rejected() {
        let mut buf = sample_trailer().encode();
        buf[20] ^= 0x01;
        assert!(Trailer::decode(&buf).is_err());
    }

    #[test]
    fn test_wrong_size_rejected() {
        let buf = sample_trailer().encode();
        assert!(Trailer::decode(&buf[1..]).is_err());
    }
}
