//! LEB128 variable-length integers.
//!
//! Block record framing and block headers store lengths as varints: seven
//! payload bits per byte, the high bit set on every byte except the last.
//! Values up to 127 fit in one byte, which covers almost every shared/unshared
//! key length in practice.

use crate::error::Result;
use crate::corrupt;

/// Maximum encoded size of a u64 varint.
pub const MAX_VARINT_LEN: usize = 10;

/// Appends `value` to `buf` in LEB128 form.
pub fn write_u64(buf: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        buf.push((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}

/// Decodes a varint from the front of `buf`, returning the value and the
/// number of bytes consumed.
pub fn read_u64(buf: &[u8]) -> Result<(u64, usize)> {
    let mut value: u64 = 0;
    let mut shift: u32 = 0;
    for (i, &byte) in buf.iter().enumerate() {
        if i >= MAX_VARINT_LEN {
            return Err(corrupt!("varint longer than {} bytes", MAX_VARINT_LEN));
        }
        if shift >= 64 {
            return Err(corrupt!("varint overflows u64"));
        }
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
        shift += 7;
    }
    Err(corrupt!("truncated varint"))
}
