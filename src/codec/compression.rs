//! Block compression.
//!
//! Five algorithms are supported; the choice is made per file and persisted
//! in the trailer. `Lz4` and `Lz4hc` are distinct identifiers over the same
//! LZ4 block format: high-compression is an encoder-effort setting, so both
//! decode through the same path.
//!
//! Compression is advisory: if the compressed payload is not strictly
//! smaller than the input, the block is stored raw. Readers detect stored
//! blocks by `compressed_len == uncompressed_len`, which a real compressor
//! can never produce for a win.

use std::io::{Read, Write};

use crate::error::Result;
use crate::{corrupt, errinput};

/// Per-file compression algorithm, persisted in the trailer as a u32.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Compression {
    None,
    Snappy,
    Zlib,
    Lz4,
    Lz4hc,
}

impl Compression {
    /// Parses a user-facing compression name, as accepted by the `-c` flag.
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "none" => Ok(Compression::None),
            "snappy" => Ok(Compression::Snappy),
            "zlib" => Ok(Compression::Zlib),
            "lz4" => Ok(Compression::Lz4),
            "lz4hc" => Ok(Compression::Lz4hc),
            other => Err(errinput!("unknown compression algorithm: {other}")),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Snappy => "snappy",
            Compression::Zlib => "zlib",
            Compression::Lz4 => "lz4",
            Compression::Lz4hc => "lz4hc",
        }
    }

    /// The identifier persisted in the trailer.
    pub fn id(&self) -> u32 {
        match self {
            Compression::None => 0,
            Compression::Snappy => 1,
            Compression::Zlib => 2,
            Compression::Lz4 => 3,
            Compression::Lz4hc => 4,
        }
    }

    pub fn from_id(id: u32) -> Result<Self> {
        match id {
            0 => Ok(Compression::None),
            1 => Ok(Compression::Snappy),
            2 => Ok(Compression::Zlib),
            3 => Ok(Compression::Lz4),
            4 => Ok(Compression::Lz4hc),
            other => Err(corrupt!("unknown compression id {other}")),
        }
    }

    /// Compresses `data`, returning the stored form. Falls back to the raw
    /// input when compression does not strictly shrink it.
    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let compressed = match self {
            Compression::None => return Ok(data.to_vec()),
            Compression::Snappy => snap::raw::Encoder::new()
                .compress_vec(data)
                .map_err(|e| corrupt!("snappy compression failed: {e}"))?,
            Compression::Zlib => {
                let mut encoder = flate2::write::ZlibEncoder::new(
                    Vec::with_capacity(data.len() / 2),
                    flate2::Compression::default(),
                );
                encoder.write_all(data)?;
                encoder.finish()?
            }
            // HC would spend more encoder effort for a denser stream; the
            // block format is identical either way.
            Compression::Lz4 | Compression::Lz4hc => lz4_flex::block::compress(data),
        };
        if compressed.len() < data.len() {
            Ok(compressed)
        } else {
            Ok(data.to_vec())
        }
    }

    /// Decompresses a stored block payload. `uncompressed_len` comes from
    /// the block header; a stored (uncompressed) block is recognized by
    /// `data.len() == uncompressed_len`.
    pub fn decompress(&self, data: &[u8], uncompressed_len: usize) -> Result<Vec<u8>> {
        if data.len() == uncompressed_len {
            return Ok(data.to_vec());
        }
        let out = match self {
            Compression::None => {
                return Err(corrupt!(
                    "block length {} does not match header {} with compression disabled",
                    data.len(),
                    uncompressed_len
                ))
            }
            Compression::Snappy => snap::raw::Decoder::new()
                .decompress_vec(data)
                .map_err(|e| corrupt!("snappy decompression failed: {e}"))?,
            Compression::Zlib => {
                let mut decoder = flate2::read::ZlibDecoder::new(data);
                let mut out = Vec::with_capacity(uncompressed_len);
                decoder.read_to_end(&mut out)?;
                out
            }
            Compression::Lz4 | Compression::Lz4hc => {
                lz4_flex::block::decompress(data, uncompressed_len)
                    .map_err(|e| corrupt!("lz4 decompression failed: {e}"))?
            }
        };
        if out.len() != uncompressed_len {
            return Err(corrupt!(
                "decompressed {} bytes, header said {}",
                out.len(),
                uncompressed_len
            ));
        }
        Ok(out)
    }
}

impl Default for Compression {
    fn default() -> Self {
        Compression::Snappy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Compression; 5] = [
        Compression::None,
        Compression::Snappy,
        Compression::Zlib,
        Compression::Lz4,
        Compression::Lz4hc,
    ];

    #[test]
    fn test_roundtrip_compressible() {
        let data: Vec<u8> = b"example.com,a,10.0.0.1\n".repeat(200);
        for algo in ALL {
            let stored = algo.compress(&data).expect("compress failed");
            if algo != Compression::None {
                assert!(stored.len() < data.len(), "{} did not shrink", algo.name());
            }
            let restored = algo
                .decompress(&stored, data.len())
                .expect("decompress failed");
            assert_eq!(restored, data);
        }
    }

    #[test]
    fn test_incompressible_stored_raw() {
        // A short high-entropy payload that no algorithm can shrink.
        let data: Vec<u8> = (0..64u32).map(|i| (i.wrapping_mul(2654435761) >> 13) as u8).collect();
        for algo in ALL {
            let stored = algo.compress(&data).expect("compress failed");
            assert!(stored.len() <= data.len());
            let restored = algo
                .decompress(&stored, data.len())
                .expect("decompress failed");
            assert_eq!(restored, data);
        }
    }

    #[test]
    fn test_name_and_id_roundtrip() {
        for algo in ALL {
            assert_eq!(Compression::from_name(algo.name()).unwrap(), algo);
            assert_eq!(Compression::from_id(algo.id()).unwrap(), algo);
        }
        assert!(Compression::from_name("gzip").is_err());
        assert!(Compression::from_id(99).is_err());
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let data = b"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa".to_vec();
        let stored = Compression::Snappy.compress(&data).unwrap();
        assert!(stored.len() < data.len());
        assert!(Compression::Snappy.decompress(&stored, data.len() + 1).is_err());
    }
}
