//! Variable-length integer (varint) operations for SQLite format.

use super::constants::{VARINT_CONTINUATION_BIT, VARINT_DATA_MASK, VARINT_MAX_BYTES};
use super::error::{DbError, Result};

/// Read a varint from a byte slice starting at the given position.
///
/// Varints are a variable-length encoding for integers used by SQLite.
/// They use 1-9 bytes depending on the magnitude of the value: the first
/// eight bytes contribute their low 7 bits while the high bit signals
/// continuation, and a ninth byte contributes all 8 bits.
///
/// Returns a tuple of (value, number of bytes read), or
/// [`DbError::Truncated`] if the slice ends before the varint does.
pub fn read_varint(data: &[u8], pos: usize) -> Result<(i64, usize)> {
    let mut value: u64 = 0;

    for i in 0..VARINT_MAX_BYTES - 1 {
        let byte = byte_at(data, pos, i)?;
        // Use lower 7 bits
        value = (value << 7) | u64::from(byte & VARINT_DATA_MASK);

        // If high bit is 0, we're done
        if byte & VARINT_CONTINUATION_BIT == 0 {
            return Ok((value as i64, i + 1));
        }
    }

    // 9th byte uses all 8 bits
    let byte = byte_at(data, pos, VARINT_MAX_BYTES - 1)?;
    value = (value << 8) | u64::from(byte);
    Ok((value as i64, VARINT_MAX_BYTES))
}

fn byte_at(data: &[u8], pos: usize, i: usize) -> Result<u8> {
    data.get(pos + i).copied().ok_or_else(|| {
        DbError::Truncated(format!(
            "varint at offset {} runs past end of {}-byte buffer",
            pos,
            data.len()
        ))
    })
}

/// Encode a value the way SQLite writes varints.
pub fn write_varint(value: i64) -> Vec<u8> {
    let mut v = value as u64;

    if v & (0xff00_0000u64 << 32) != 0 {
        let mut out = vec![0u8; VARINT_MAX_BYTES];
        out[VARINT_MAX_BYTES - 1] = v as u8;
        v >>= 8;
        for byte in out[..VARINT_MAX_BYTES - 1].iter_mut().rev() {
            *byte = (v as u8 & VARINT_DATA_MASK) | VARINT_CONTINUATION_BIT;
            v >>= 7;
        }
        return out;
    }

    let mut out = Vec::with_capacity(VARINT_MAX_BYTES);
    loop {
        out.push((v as u8 & VARINT_DATA_MASK) | VARINT_CONTINUATION_BIT);
        v >>= 7;
        if v == 0 {
            break;
        }
    }
    out[0] &= VARINT_DATA_MASK;
    out.reverse();
    out
}
