//! Database file abstraction for SQLite.

use std::fs::File;
use std::io::{self, prelude::*};
use std::path::Path;

use bytes::Bytes;
use tracing::debug;

use super::constants::DB_HEADER_SIZE;
use super::error::{DbError, Result};
use super::header::DatabaseHeader;
use super::page::{CellPayload, Page, overflow};

/// A SQLite database file handle.
///
/// Pages are read on demand; every read hands back an owned buffer, so nothing
/// decoded later keeps a reference into the file.
pub struct Database {
    file: File,
    header: DatabaseHeader,
    page_count: u32,
}

impl Database {
    /// Open a SQLite database file and validate its header.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut file = File::open(path)?;
        let file_len = file.metadata()?.len();

        let mut raw = [0u8; DB_HEADER_SIZE];
        file.read_exact(&mut raw)?;
        let header = DatabaseHeader::parse(&raw)?;

        let page_size = u64::from(header.page_size);
        if file_len < page_size {
            return Err(DbError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "{} is {} bytes, smaller than one {}-byte page",
                    path.display(),
                    file_len,
                    page_size
                ),
            )));
        }
        // Trailing pages past a stale in-header size may still hold evidence.
        let page_count = u32::try_from(file_len / page_size).unwrap_or(u32::MAX);

        debug!(
            path = %path.display(),
            page_size = header.page_size,
            page_count,
            header_page_count = header.database_size,
            "opened database"
        );
        Ok(Self {
            file,
            header,
            page_count,
        })
    }

    pub fn header(&self) -> &DatabaseHeader {
        &self.header
    }

    pub fn page_size(&self) -> usize {
        self.header.page_size as usize
    }

    pub fn usable_size(&self) -> usize {
        self.header.usable_size()
    }

    /// Number of whole pages present in the file.
    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    /// Read a page from the database (1-indexed).
    pub fn read_page(&self, page_num: u32) -> Result<Bytes> {
        if page_num == 0 || page_num > self.page_count {
            return Err(DbError::PageOutOfRange {
                page: page_num,
                page_count: self.page_count,
            });
        }
        let page_offset = u64::from(page_num - 1) * u64::from(self.header.page_size);
        let mut page = vec![0u8; self.page_size()];
        let mut file = &self.file;
        file.seek(io::SeekFrom::Start(page_offset))?;
        file.read_exact(&mut page)?;
        Ok(Bytes::from(page))
    }

    /// Read a page and decode it as a b-tree page.
    pub fn btree_page(&self, page_num: u32) -> Result<Page> {
        Page::btree(page_num, self.read_page(page_num)?)
    }

    /// Assemble a cell's full payload, following its overflow chain.
    pub fn read_payload(&self, page: &Page, payload: &CellPayload) -> Result<Vec<u8>> {
        overflow::read_payload(
            page.data(),
            payload,
            self.usable_size(),
            self.page_count,
            |n| self.read_page(n),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::build_db;

    #[test]
    fn opens_fresh_database() {
        let (_dir, path) = build_db(&["CREATE TABLE t (a INTEGER, b TEXT)"]);
        let db = Database::open(&path).unwrap();
        assert_eq!(db.page_size(), 4096);
        assert_eq!(db.page_count(), 2);
        assert_eq!(db.read_page(1).unwrap().len(), 4096);
    }

    #[test]
    fn out_of_range_pages_are_rejected() {
        let (_dir, path) = build_db(&["CREATE TABLE t (a)"]);
        let db = Database::open(&path).unwrap();
        assert!(matches!(
            db.read_page(0),
            Err(DbError::PageOutOfRange { page: 0, .. })
        ));
        assert!(matches!(
            db.read_page(3),
            Err(DbError::PageOutOfRange { page: 3, page_count: 2 })
        ));
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Database::open(dir.path().join("nope.db")).err().unwrap();
        assert!(matches!(err, DbError::Io(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn file_shorter_than_a_page_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.db");
        std::fs::write(&path, crate::db::header::tests::header_bytes(4096)).unwrap();
        assert!(matches!(Database::open(&path), Err(DbError::Io(_))));
    }

    #[test]
    fn garbage_header_is_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.db");
        std::fs::write(&path, vec![0x41u8; 8192]).unwrap();
        assert!(matches!(Database::open(&path), Err(DbError::Format(_))));
    }
}
