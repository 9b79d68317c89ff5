//! Data block encoding and decoding.
//!
//! A block holds a monotonically increasing run of records with
//! prefix-compressed keys. Each record is encoded as:
//!
//! ```text
//! shared_key_len(varint) | unshared_key_len(varint) | key suffix |
//! value_len(varint) | value
//! ```
//!
//! On disk a block (data or index) is framed as:
//!
//! ```text
//! uncompressed_len(varint) | stored_len(varint) | stored bytes | crc32c(u32 LE)
//! ```
//!
//! The crc covers the stored bytes. A block whose stored length equals its
//! uncompressed length was stored raw (see [`crate::codec::Compression`]).

use crc::{Crc, CRC_32_ISCSI};

use crate::codec::{varint, Compression};
use crate::corrupt;
use crate::error::Result;

/// Checksum algorithm for block and trailer framing.
pub const CRC32C: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

/// Accumulates records into an uncompressed block payload.
///
/// Key ordering is the caller's responsibility; the builder only computes
/// the shared prefix against the previous key.
pub struct BlockBuilder {
    buffer: Vec<u8>,
    last_key: Vec<u8>,
    entry_count: usize,
}

impl BlockBuilder {
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            last_key: Vec::new(),
            entry_count: 0,
        }
    }

    pub fn add_entry(&mut self, key: &[u8], value: &[u8]) {
        let shared = shared_prefix_len(&self.last_key, key);
        let unshared = key.len() - shared;

        varint::write_u64(&mut self.buffer, shared as u64);
        varint::write_u64(&mut self.buffer, unshared as u64);
        self.buffer.extend_from_slice(&key[shared..]);
        varint::write_u64(&mut self.buffer, value.len() as u64);
        self.buffer.extend_from_slice(value);

        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        self.entry_count += 1;
    }

    /// Uncompressed payload size so far.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entry_count == 0
    }

    pub fn entry_count(&self) -> usize {
        self.entry_count
    }

    /// The most recently added key, which becomes the block's index key.
    pub fn last_key(&self) -> &[u8] {
        &self.last_key
    }

    /// Returns the finished payload and resets the builder for the next
    /// block.
    pub fn finish(&mut self) -> Vec<u8> {
        self.entry_count = 0;
        self.last_key.clear();
        std::mem::take(&mut self.buffer)
    }
}

impl Default for BlockBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn shared_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|&(x, y)| x == y).count()
}

/// Frames an uncompressed payload for disk: compress, prepend the length
/// header, append the checksum.
pub fn encode_block(payload: &[u8], compression: Compression) -> Result<Vec<u8>> {
    let stored = compression.compress(payload)?;
    let mut out = Vec::with_capacity(stored.len() + 2 * varint::MAX_VARINT_LEN + 4);
    varint::write_u64(&mut out, payload.len() as u64);
    varint::write_u64(&mut out, stored.len() as u64);
    out.extend_from_slice(&stored);
    out.extend_from_slice(&CRC32C.checksum(&stored).to_le_bytes());
    Ok(out)
}

/// Parses a framed block from `buf`, returning the uncompressed payload and
/// the number of framed bytes consumed.
pub fn decode_block(buf: &[u8], compression: Compression, verify: bool) -> Result<(Vec<u8>, usize)> {
    let (uncompressed_len, n) = varint::read_u64(buf)?;
    let (stored_len, m) = varint::read_u64(&buf[n..])?;
    let header = n + m;
    let stored_len = stored_len as usize;

    let total = header
        .checked_add(stored_len)
        .and_then(|t| t.checked_add(4))
        .ok_or_else(|| corrupt!("block length overflow"))?;
    if buf.len() < total {
        return Err(corrupt!(
            "block truncated: need {} bytes, have {}",
            total,
            buf.len()
        ));
    }

    let stored = &buf[header..header + stored_len];
    if verify {
        let crc = u32::from_le_bytes(
            buf[header + stored_len..total]
                .try_into()
                .expect("4-byte slice"),
        );
        let computed = CRC32C.checksum(stored);
        if crc != computed {
            return Err(corrupt!("block crc mismatch: {computed:#010x} != {crc:#010x}"));
        }
    }

    let payload = compression.decompress(stored, uncompressed_len as usize)?;
    Ok((payload, total))
}

/// A decoding cursor over an uncompressed block payload.
///
/// Yields records in storage order, reconstructing each key from the shared
/// prefix of its predecessor, and rejects payloads whose keys are not
/// strictly increasing.
pub struct BlockCursor {
    data: Vec<u8>,
    pos: usize,
    last_key: Vec<u8>,
    started: bool,
}

impl BlockCursor {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            pos: 0,
            last_key: Vec::new(),
            started: false,
        }
    }
}

impl Iterator for BlockCursor {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.data.len() {
            return None;
        }

        let step = || -> Result<(Vec<u8>, Vec<u8>, usize)> {
            let mut pos = self.pos;
            let data = &self.data;

            let (shared, n) = varint::read_u64(&data[pos..])?;
            pos += n;
            let (unshared, n) = varint::read_u64(&data[pos..])?;
            pos += n;
            let shared = shared as usize;
            let unshared = unshared as usize;

            if shared > self.last_key.len() || pos + unshared > data.len() {
                return Err(corrupt!("block record out of bounds"));
            }

            let mut key = Vec::with_capacity(shared + unshared);
            key.extend_from_slice(&self.last_key[..shared]);
            key.extend_from_slice(&data[pos..pos + unshared]);
            pos += unshared;

            let (value_len, n) = varint::read_u64(&data[pos..])?;
            pos += n;
            let value_len = value_len as usize;
            if pos + value_len > data.len() {
                return Err(corrupt!("block value out of bounds"));
            }
            let value = data[pos..pos + value_len].to_vec();
            pos += value_len;

            Ok((key, value, pos))
        };

        match step() {
            Ok((key, value, pos)) => {
                if self.started && key <= self.last_key {
                    self.pos = self.data.len();
                    return Some(Err(corrupt!(
                        "block keys not strictly increasing at {:?}",
                        String::from_utf8_lossy(&key)
                    )));
                }
                self.pos = pos;
                self.started = true;
                self.last_key = key.clone();
                Some(Ok((key, value)))
            }
            Err(e) => {
                self.pos = self.data.len();
                Some(Err(e))
            }
        }
    }
}
