//! The block index: one entry per data block, keyed by the block's last key.
//!
//! In memory the index is a sorted `Vec` binary-searched on lookup. On disk
//! it is serialized as an ordinary prefix-compressed block whose record
//! values are the block's file offset as a fixed 8-byte big-endian integer,
//! followed by the framed block length and the uncompressed payload size as
//! varints.

use byteorder::{BigEndian, ByteOrder};

use crate::codec::varint;
use crate::corrupt;
use crate::error::Result;
use crate::table::block::{BlockBuilder, BlockCursor};

/// Index entry for one data block.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    /// The last (largest) key stored in the block.
    pub last_key: Vec<u8>,
    /// File offset of the framed block.
    pub offset: u64,
    /// Length of the framed block on disk.
    pub length: u64,
    /// Uncompressed payload size, used to pre-size the decode buffer.
    pub uncompressed: u64,
}

#[derive(Debug, Clone, Default)]
pub struct BlockIndex {
    entries: Vec<IndexEntry>,
}

impl BlockIndex {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn push(&mut self, last_key: Vec<u8>, offset: u64, length: u64, uncompressed: u64) {
        self.entries.push(IndexEntry {
            last_key,
            offset,
            length,
            uncompressed,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, i: usize) -> Option<&IndexEntry> {
        self.entries.get(i)
    }

    /// Position of the first block whose last key is >= `key`: the only
    /// block that can contain `key`, and the block where an iterator
    /// positioned at `key` must start.
    pub fn first_candidate(&self, key: &[u8]) -> usize {
        self.entries
            .partition_point(|entry| entry.last_key.as_slice() < key)
    }

    /// The entry that may contain `key`, if any.
    pub fn find(&self, key: &[u8]) -> Option<&IndexEntry> {
        self.entries.get(self.first_candidate(key))
    }

    /// Serializes the index as an uncompressed block payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut builder = BlockBuilder::new();
        let mut value = Vec::with_capacity(8 + 2 * varint::MAX_VARINT_LEN);
        for entry in &self.entries {
            value.clear();
            value.extend_from_slice(&[0u8; 8]);
            BigEndian::write_u64(&mut value[..8], entry.offset);
            varint::write_u64(&mut value, entry.length);
            varint::write_u64(&mut value, entry.uncompressed);
            builder.add_entry(&entry.last_key, &value);
        }
        builder.finish()
    }

    /// Reconstructs an index from a decoded index-block payload.
    pub fn decode(payload: Vec<u8>) -> Result<Self> {
        let mut entries = Vec::new();
        for record in BlockCursor::new(payload) {
            let (last_key, value) = record?;
            if value.len() < 8 {
                return Err(corrupt!("index value shorter than offset field"));
            }
            let offset = BigEndian::read_u64(&value[..8]);
            let (length, n) = varint::read_u64(&value[8..])?;
            let (uncompressed, _) = varint::read_u64(&value[8 + n..])?;
            entries.push(IndexEntry {
                last_key,
                offset,
                length,
                uncompressed,
            });
        }
        Ok(Self { entries })
    }
}
