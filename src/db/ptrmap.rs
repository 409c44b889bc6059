//! Pointer-map pages of auto-vacuum databases.
//!
//! The first pointer-map page is page 2; each one describes the `usable / 5`
//! pages that follow it with a type byte and the parent page number.

use bytes::Buf;

use crate::db::constants::PTRMAP_ENTRY_SIZE;
use crate::db::database::Database;
use crate::db::error::{DbError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PtrMapKind {
    RootPage,
    FreePage,
    /// First page of an overflow chain; parent is the b-tree page.
    Overflow1,
    /// Later overflow page; parent is the previous overflow page.
    Overflow2,
    BTree,
}

impl PtrMapKind {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::RootPage),
            2 => Some(Self::FreePage),
            3 => Some(Self::Overflow1),
            4 => Some(Self::Overflow2),
            5 => Some(Self::BTree),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PtrMapEntry {
    pub page: u32,
    pub kind: PtrMapKind,
    pub parent: u32,
}

fn pages_per_map(usable_size: usize) -> u32 {
    (usable_size / PTRMAP_ENTRY_SIZE) as u32
}

/// Whether `page` holds pointer-map entries in an auto-vacuum database.
pub fn is_ptrmap_page(db: &Database, page: u32) -> bool {
    if !db.header().is_auto_vacuum() || page < 2 {
        return false;
    }
    (page - 2) % (pages_per_map(db.usable_size()) + 1) == 0
}

/// Decode every pointer-map entry; empty for databases without auto-vacuum.
pub fn read(db: &Database) -> Result<Vec<PtrMapEntry>> {
    let mut entries = Vec::new();
    if !db.header().is_auto_vacuum() {
        return Ok(entries);
    }

    let per_map = pages_per_map(db.usable_size());
    let mut map_page = 2u32;
    while map_page <= db.page_count() {
        let data = db.read_page(map_page)?;
        let mut buf = &data[..per_map as usize * PTRMAP_ENTRY_SIZE];
        for i in 1..=per_map {
            let page = map_page + i;
            if page > db.page_count() {
                break;
            }
            let type_byte = buf.get_u8();
            let parent = buf.get_u32();
            if type_byte == 0 {
                continue;
            }
            let kind = PtrMapKind::from_byte(type_byte).ok_or_else(|| {
                DbError::Corrupt(format!(
                    "pointer map page {}: invalid type {} for page {}",
                    map_page, type_byte, page
                ))
            })?;
            entries.push(PtrMapEntry { page, kind, parent });
        }
        map_page += per_map + 1;
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::build_db;

    #[test]
    fn plain_database_has_no_pointer_map() {
        let (_dir, path) = build_db(&["CREATE TABLE t (a)"]);
        let db = Database::open(&path).unwrap();
        assert!(read(&db).unwrap().is_empty());
        assert!(!is_ptrmap_page(&db, 2));
    }

    #[test]
    fn auto_vacuum_maps_root_pages() {
        let (_dir, path) = build_db(&[
            "PRAGMA auto_vacuum = FULL",
            "CREATE TABLE t (a INTEGER, b TEXT)",
            "INSERT INTO t VALUES (1, 'one')",
        ]);
        let db = Database::open(&path).unwrap();
        assert!(is_ptrmap_page(&db, 2));
        let entries = read(&db).unwrap();
        assert_eq!(
            entries,
            vec![PtrMapEntry {
                page: 3,
                kind: PtrMapKind::RootPage,
                parent: 0
            }]
        );
    }
}
