//! Database header parsing for SQLite format.

use bytes::Buf;

use super::constants::{
    DB_HEADER_SIZE, MAX_PAGE_SIZE, MIN_PAGE_SIZE, MIN_USABLE_SIZE, SQLITE_SIGNATURE,
};
use super::error::{DbError, Result};

/// How text values are stored in records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextEncoding {
    #[default]
    Utf8,
    Utf16Le,
    Utf16Be,
}

impl TextEncoding {
    fn from_header(value: u32) -> Result<Self> {
        match value {
            // An empty database has not chosen yet; SQLite treats it as UTF-8.
            0 | 1 => Ok(Self::Utf8),
            2 => Ok(Self::Utf16Le),
            3 => Ok(Self::Utf16Be),
            other => Err(DbError::Format(format!("unknown text encoding {}", other))),
        }
    }

    /// Decode stored text, replacing invalid sequences.
    pub fn decode(self, bytes: &[u8]) -> String {
        match self {
            Self::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            Self::Utf16Le => decode_utf16(bytes, u16::from_le_bytes),
            Self::Utf16Be => decode_utf16(bytes, u16::from_be_bytes),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Utf8 => "UTF-8",
            Self::Utf16Le => "UTF-16le",
            Self::Utf16Be => "UTF-16be",
        }
    }
}

fn decode_utf16(bytes: &[u8], unit: fn([u8; 2]) -> u16) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| unit([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

/// The 100-byte header at the start of page 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseHeader {
    pub page_size: u32,
    pub write_version: u8,
    pub read_version: u8,
    pub reserved_space: u8,
    pub max_payload_fraction: u8,
    pub min_payload_fraction: u8,
    pub leaf_payload_fraction: u8,
    pub file_change_counter: u32,
    /// Page count as recorded by the last writer; may be stale.
    pub database_size: u32,
    pub first_freelist_trunk: u32,
    pub freelist_pages: u32,
    pub schema_cookie: u32,
    pub schema_format: u32,
    pub default_cache_size: u32,
    /// Non-zero in auto-vacuum databases.
    pub largest_root_btree: u32,
    pub text_encoding: TextEncoding,
    pub user_version: u32,
    pub incremental_vacuum: u32,
    pub application_id: u32,
    pub version_valid_for: u32,
    pub sqlite_version: u32,
}

impl DatabaseHeader {
    /// Parse the database header from the first bytes of the file.
    ///
    /// The page size is stored at byte offset 16-17 as a 2-byte big-endian
    /// integer, where the value 1 stands for 65536.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < DB_HEADER_SIZE {
            return Err(DbError::Format(format!(
                "header needs {} bytes, file has {}",
                DB_HEADER_SIZE,
                data.len()
            )));
        }
        if &data[..SQLITE_SIGNATURE.len()] != SQLITE_SIGNATURE {
            return Err(DbError::Format("missing SQLite signature".to_owned()));
        }

        let mut buf = &data[SQLITE_SIGNATURE.len()..DB_HEADER_SIZE];
        let page_size = match buf.get_u16() {
            1 => MAX_PAGE_SIZE,
            n => u32::from(n),
        };
        if !page_size.is_power_of_two() || !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&page_size) {
            return Err(DbError::Format(format!("impossible page size {}", page_size)));
        }

        let write_version = buf.get_u8();
        let read_version = buf.get_u8();
        let reserved_space = buf.get_u8();
        let max_payload_fraction = buf.get_u8();
        let min_payload_fraction = buf.get_u8();
        let leaf_payload_fraction = buf.get_u8();
        let file_change_counter = buf.get_u32();
        let database_size = buf.get_u32();
        let first_freelist_trunk = buf.get_u32();
        let freelist_pages = buf.get_u32();
        let schema_cookie = buf.get_u32();
        let schema_format = buf.get_u32();
        let default_cache_size = buf.get_u32();
        let largest_root_btree = buf.get_u32();
        let text_encoding = TextEncoding::from_header(buf.get_u32())?;
        let user_version = buf.get_u32();
        let incremental_vacuum = buf.get_u32();
        let application_id = buf.get_u32();
        buf.advance(20);
        let version_valid_for = buf.get_u32();
        let sqlite_version = buf.get_u32();

        let header = Self {
            page_size,
            write_version,
            read_version,
            reserved_space,
            max_payload_fraction,
            min_payload_fraction,
            leaf_payload_fraction,
            file_change_counter,
            database_size,
            first_freelist_trunk,
            freelist_pages,
            schema_cookie,
            schema_format,
            default_cache_size,
            largest_root_btree,
            text_encoding,
            user_version,
            incremental_vacuum,
            application_id,
            version_valid_for,
            sqlite_version,
        };
        if header.usable_size() < MIN_USABLE_SIZE {
            return Err(DbError::Format(format!(
                "usable size {} below minimum {}",
                header.usable_size(),
                MIN_USABLE_SIZE
            )));
        }
        Ok(header)
    }

    /// Page size minus the reserved bytes at the end of every page.
    pub fn usable_size(&self) -> usize {
        self.page_size as usize - usize::from(self.reserved_space)
    }

    /// Whether the database keeps pointer-map pages.
    pub fn is_auto_vacuum(&self) -> bool {
        self.largest_root_btree != 0
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A minimal valid header for the given raw page-size field.
    pub(crate) fn header_bytes(raw_page_size: u16) -> Vec<u8> {
        let mut data = vec![0u8; DB_HEADER_SIZE];
        data[..16].copy_from_slice(SQLITE_SIGNATURE);
        data[16..18].copy_from_slice(&raw_page_size.to_be_bytes());
        data[18] = 1;
        data[19] = 1;
        data[21] = 64;
        data[22] = 32;
        data[23] = 32;
        data[44..48].copy_from_slice(&4u32.to_be_bytes());
        data[56..60].copy_from_slice(&1u32.to_be_bytes());
        data
    }

    #[test]
    fn parses_page_size_and_encoding() {
        let header = DatabaseHeader::parse(&header_bytes(4096)).unwrap();
        assert_eq!(header.page_size, 4096);
        assert_eq!(header.usable_size(), 4096);
        assert_eq!(header.text_encoding, TextEncoding::Utf8);
        assert_eq!(header.schema_format, 4);
        assert!(!header.is_auto_vacuum());
    }

    #[test]
    fn page_size_one_means_65536() {
        let header = DatabaseHeader::parse(&header_bytes(1)).unwrap();
        assert_eq!(header.page_size, 65536);
    }

    #[test]
    fn rejects_impossible_page_sizes() {
        for raw in [0u16, 256, 1000, 4095] {
            assert!(matches!(
                DatabaseHeader::parse(&header_bytes(raw)),
                Err(DbError::Format(_))
            ));
        }
    }

    #[test]
    fn rejects_missing_signature() {
        let mut data = header_bytes(4096);
        data[0] = b'X';
        assert!(matches!(DatabaseHeader::parse(&data), Err(DbError::Format(_))));
    }

    #[test]
    fn reserved_space_shrinks_usable_size() {
        let mut data = header_bytes(512);
        data[20] = 24;
        let header = DatabaseHeader::parse(&data).unwrap();
        assert_eq!(header.usable_size(), 488);

        data[20] = 100;
        assert!(matches!(DatabaseHeader::parse(&data), Err(DbError::Format(_))));
    }

    #[test]
    fn reads_freelist_fields() {
        let mut data = header_bytes(4096);
        data[32..36].copy_from_slice(&7u32.to_be_bytes());
        data[36..40].copy_from_slice(&3u32.to_be_bytes());
        let header = DatabaseHeader::parse(&data).unwrap();
        assert_eq!(header.first_freelist_trunk, 7);
        assert_eq!(header.freelist_pages, 3);
    }

    #[test]
    fn decodes_utf16_text() {
        assert_eq!(TextEncoding::Utf16Le.decode(&[b'h', 0, b'i', 0]), "hi");
        assert_eq!(TextEncoding::Utf16Be.decode(&[0, b'h', 0, b'i']), "hi");
    }
}
