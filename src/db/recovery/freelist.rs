//! Walking the file-level freelist.

use std::collections::{HashSet, VecDeque};

use tracing::{debug, warn};

use crate::db::database::Database;
use crate::db::error::{DbError, Result};
use crate::db::page::{Page, PageKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreePageRole {
    Trunk,
    Leaf,
}

/// A page currently on the freelist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreePage {
    pub number: u32,
    pub role: FreePageRole,
}

/// Iterator over every page on the freelist: each trunk, then its leaves.
///
/// A bad leaf pointer is yielded as an `Err` and skipped. A bad trunk link
/// (out of range, cyclic or undecodable) ends the walk after its `Err`.
pub struct FreelistWalker<'a> {
    db: &'a Database,
    next_trunk: u32,
    leaves: VecDeque<u32>,
    visited: HashSet<u32>,
    done: bool,
}

/// Start at the header's first trunk page.
pub fn walk(db: &Database) -> FreelistWalker<'_> {
    FreelistWalker {
        db,
        next_trunk: db.header().first_freelist_trunk,
        leaves: VecDeque::new(),
        visited: HashSet::new(),
        done: false,
    }
}

impl FreelistWalker<'_> {
    fn check_link(&mut self, page: u32) -> Result<()> {
        if page == 0 || page > self.db.page_count() {
            return Err(DbError::PageOutOfRange {
                page,
                page_count: self.db.page_count(),
            });
        }
        if !self.visited.insert(page) {
            return Err(DbError::Corrupt(format!(
                "freelist page {} listed twice",
                page
            )));
        }
        Ok(())
    }

    fn leaf(&mut self, page: u32) -> Result<FreePage> {
        self.check_link(page)?;
        Ok(FreePage {
            number: page,
            role: FreePageRole::Leaf,
        })
    }

    fn trunk(&mut self, page: u32) -> Result<FreePage> {
        self.check_link(page)?;
        let trunk = Page::freelist_trunk(page, self.db.read_page(page)?, self.db.usable_size())?;
        if let PageKind::FreelistTrunk { next_trunk, leaves } = trunk.kind() {
            debug!(
                page,
                next_trunk = *next_trunk,
                leaves = leaves.len(),
                "visiting freelist trunk"
            );
            self.next_trunk = *next_trunk;
            self.leaves.extend(leaves.iter().copied());
        }
        Ok(FreePage {
            number: page,
            role: FreePageRole::Trunk,
        })
    }
}

impl Iterator for FreelistWalker<'_> {
    type Item = Result<FreePage>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if let Some(page) = self.leaves.pop_front() {
            let item = self.leaf(page);
            if let Err(e) = &item {
                warn!(page, error = %e, "skipping freelist leaf");
            }
            return Some(item);
        }
        if self.next_trunk == 0 {
            self.done = true;
            return None;
        }

        let page = self.next_trunk;
        self.next_trunk = 0;
        let item = self.trunk(page);
        if let Err(e) = &item {
            warn!(page, error = %e, "abandoning freelist trunk chain");
            self.done = true;
        }
        Some(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{build_db, build_db_with, fill_table};
    use std::fs::OpenOptions;
    use std::io::{Seek, SeekFrom, Write};

    fn freed_db() -> (tempfile::TempDir, std::path::PathBuf) {
        build_db_with(|conn| {
            conn.execute_batch("CREATE TABLE big (id INTEGER PRIMARY KEY, body TEXT)")
                .unwrap();
            fill_table(conn, "big", 300, 100);
            conn.execute_batch("DELETE FROM big").unwrap();
        })
    }

    #[test]
    fn empty_freelist() {
        let (_dir, path) = build_db(&["CREATE TABLE t (a)"]);
        let db = Database::open(&path).unwrap();
        assert_eq!(walk(&db).count(), 0);
    }

    #[test]
    fn yields_every_free_page_once() {
        let (_dir, path) = freed_db();
        let db = Database::open(&path).unwrap();
        let pages: Vec<FreePage> = walk(&db).map(Result::unwrap).collect();

        assert!(!pages.is_empty());
        assert_eq!(pages.len(), db.header().freelist_pages as usize);
        assert_eq!(pages[0].role, FreePageRole::Trunk);
        assert_eq!(pages[0].number, db.header().first_freelist_trunk);
        let unique: HashSet<u32> = pages.iter().map(|p| p.number).collect();
        assert_eq!(unique.len(), pages.len());
    }

    #[test]
    fn trunk_cycle_ends_the_walk() {
        let (_dir, path) = freed_db();
        let trunk = Database::open(&path).unwrap().header().first_freelist_trunk;
        {
            let mut file = OpenOptions::new().write(true).open(&path).unwrap();
            file.seek(SeekFrom::Start(u64::from(trunk - 1) * 4096))
                .unwrap();
            file.write_all(&trunk.to_be_bytes()).unwrap();
        }

        let db = Database::open(&path).unwrap();
        let items: Vec<_> = walk(&db).collect();
        let last = items.last().unwrap();
        assert!(matches!(last, Err(DbError::Corrupt(_))));
        assert_eq!(
            items.iter().filter(|i| i.is_ok()).count(),
            db.header().freelist_pages as usize
        );
    }

    #[test]
    fn out_of_range_leaf_is_skipped() {
        let (_dir, path) = freed_db();
        let trunk = Database::open(&path).unwrap().header().first_freelist_trunk;
        {
            let mut file = OpenOptions::new().write(true).open(&path).unwrap();
            file.seek(SeekFrom::Start(u64::from(trunk - 1) * 4096 + 8))
                .unwrap();
            file.write_all(&999_999u32.to_be_bytes()).unwrap();
        }

        let db = Database::open(&path).unwrap();
        let items: Vec<_> = walk(&db).collect();
        assert_eq!(items.len(), db.header().freelist_pages as usize);
        assert!(matches!(items[1], Err(DbError::PageOutOfRange { .. })));
        assert!(items[2..].iter().all(|i| i.is_ok()));
    }
}
