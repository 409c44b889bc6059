//! Record parsing utilities for SQLite database format.

use std::fmt;

use crate::db::error::{DbError, Result};
use crate::db::header::TextEncoding;
use crate::db::varint::read_varint;

/// A single decoded column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Integer(v) => write!(f, "{}", v),
            Value::Real(v) => write!(f, "{}", v),
            Value::Text(v) => write!(f, "{}", v),
            Value::Blob(v) => {
                write!(f, "x'")?;
                for byte in v {
                    write!(f, "{:02x}", byte)?;
                }
                write!(f, "'")
            }
        }
    }
}

/// Get the size in bytes of a column value based on its serial type code.
///
/// Returns `None` for the reserved codes 10 and 11, which never appear in a
/// well-formed record.
pub fn get_column_size(serial_type: u64) -> Option<usize> {
    match serial_type {
        0 => Some(0),                                                // NULL
        1 => Some(1),                                                // 8-bit integer
        2 => Some(2),                                                // 16-bit integer
        3 => Some(3),                                                // 24-bit integer
        4 => Some(4),                                                // 32-bit integer
        5 => Some(6),                                                // 48-bit integer
        6 => Some(8),                                                // 64-bit integer
        7 => Some(8),                                                // IEEE 754 float
        8 => Some(0),                                                // Integer constant 0
        9 => Some(0),                                                // Integer constant 1
        10 | 11 => None,                                             // Reserved
        n if n % 2 == 0 => usize::try_from((n - 12) / 2).ok(),       // BLOB
        n => usize::try_from((n - 13) / 2).ok(),                     // Text string
    }
}

/// Decode one column from exactly the bytes its serial type occupies.
pub fn decode_value(serial_type: u64, data: &[u8], encoding: TextEncoding) -> Value {
    match serial_type {
        0 => Value::Null,
        1..=6 => Value::Integer(read_signed(data)),
        7 => {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(data);
            Value::Real(f64::from_be_bytes(raw))
        }
        8 => Value::Integer(0),
        9 => Value::Integer(1),
        n if n >= 12 && n % 2 == 0 => Value::Blob(data.to_vec()),
        n if n >= 13 => Value::Text(encoding.decode(data)),
        _ => Value::Null,
    }
}

/// Big-endian two's complement integer of 1 to 8 bytes.
fn read_signed(data: &[u8]) -> i64 {
    let mut value: i64 = match data.first() {
        Some(byte) if byte & 0x80 != 0 => -1,
        _ => 0,
    };
    for &byte in data {
        value = (value << 8) | i64::from(byte);
    }
    value
}

/// A parsed SQLite record.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub serial_types: Vec<u64>,
    pub values: Vec<Value>,
}

impl Record {
    /// Decode a record from the start of `payload`.
    ///
    /// Returns the record and the number of bytes consumed (header plus body).
    /// Fails with [`DbError::Truncated`] when the header or a column runs past
    /// the end of `payload`, and with [`DbError::Corrupt`] on an impossible
    /// header length or a reserved serial type.
    pub fn decode(payload: &[u8], encoding: TextEncoding) -> Result<(Self, usize)> {
        let (header_size, mut pos) = read_varint(payload, 0)?;
        if header_size < pos as i64 {
            return Err(DbError::Corrupt(format!(
                "record header length {} shorter than its own varint",
                header_size
            )));
        }
        let header_end = usize::try_from(header_size)
            .ok()
            .filter(|&end| end <= payload.len())
            .ok_or_else(|| {
                DbError::Truncated(format!(
                    "record header of {} bytes exceeds {}-byte payload",
                    header_size,
                    payload.len()
                ))
            })?;

        // Serial types may not straddle the header end.
        let header = &payload[..header_end];
        let mut serial_types = Vec::new();
        while pos < header_end {
            let (serial_type, bytes_read) = read_varint(header, pos)?;
            serial_types.push(serial_type as u64);
            pos += bytes_read;
        }

        let mut offset = header_end;
        let mut values = Vec::with_capacity(serial_types.len());
        for &serial_type in &serial_types {
            let size = get_column_size(serial_type).ok_or_else(|| {
                DbError::Corrupt(format!("reserved serial type {}", serial_type))
            })?;
            let end = offset
                .checked_add(size)
                .filter(|&end| end <= payload.len())
                .ok_or_else(|| {
                    DbError::Truncated(format!(
                        "column of {} bytes at offset {} exceeds {}-byte payload",
                        size,
                        offset,
                        payload.len()
                    ))
                })?;
            values.push(decode_value(serial_type, &payload[offset..end], encoding));
            offset = end;
        }

        Ok((
            Self {
                serial_types,
                values,
            },
            offset,
        ))
    }

    /// Get the number of columns in this record.
    pub fn column_count(&self) -> usize {
        self.values.len()
    }

    /// Read a column value as a string.
    pub fn read_string(&self, column_index: usize) -> Option<String> {
        match self.values.get(column_index)? {
            Value::Text(text) => Some(text.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    /// Read a column value as an integer.
    pub fn read_int(&self, column_index: usize) -> Option<i64> {
        match self.values.get(column_index)? {
            Value::Integer(v) => Some(*v),
            _ => None,
        }
    }
}
