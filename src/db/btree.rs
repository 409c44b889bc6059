//! B-tree traversal.
//!
//! [`BTreeWalker`] visits a table or index b-tree from its root in key order.
//! Table b-trees keep data only in leaves; interior cells are routing keys.
//! Index b-trees keep full index records in interior and leaf cells, so an
//! interior cell's record is produced between its left subtree and the next
//! one.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::db::constants::MAX_BTREE_DEPTH;
use crate::db::database::Database;
use crate::db::error::{DbError, Result};
use crate::db::page::{Cell, CellPayload, Page, Record};

/// A live row or index entry.
#[derive(Debug, Clone, PartialEq)]
pub struct BTreeRow {
    pub page: u32,
    pub offset: usize,
    /// Rowid for table b-trees, `None` for index entries.
    pub rowid: Option<i64>,
    pub record: Record,
}

struct Frame {
    page: Page,
    offsets: Vec<usize>,
    next: usize,
    /// Index of an interior index cell whose record is due after its subtree.
    separator: Option<usize>,
    right_done: bool,
}

/// Lazy, finite, single-pass traversal of one b-tree.
///
/// Yields `Err` for each corrupt page or cell it abandons and keeps going with
/// the siblings; fatal I/O errors are yielded too and end the walk.
pub struct BTreeWalker<'a> {
    db: &'a Database,
    root: Option<u32>,
    stack: Vec<Frame>,
    visited: HashSet<u32>,
    pages: Vec<u32>,
    overflow_pages: Vec<u32>,
    done: bool,
}

impl<'a> BTreeWalker<'a> {
    pub fn new(db: &'a Database, root: u32) -> Self {
        Self {
            db,
            root: Some(root),
            stack: Vec::new(),
            visited: HashSet::new(),
            pages: Vec::new(),
            overflow_pages: Vec::new(),
            done: false,
        }
    }

    /// B-tree pages loaded so far, in visit order.
    pub fn pages(&self) -> &[u32] {
        &self.pages
    }

    /// Overflow pages read so far while assembling payloads.
    pub fn overflow_pages(&self) -> &[u32] {
        &self.overflow_pages
    }

    fn descend(&mut self, page_num: u32) -> Result<()> {
        if self.stack.len() >= MAX_BTREE_DEPTH {
            return Err(DbError::Corrupt(format!(
                "b-tree deeper than {} levels at page {}",
                MAX_BTREE_DEPTH, page_num
            )));
        }
        if !self.visited.insert(page_num) {
            return Err(DbError::Corrupt(format!(
                "page {} referenced twice in one b-tree",
                page_num
            )));
        }
        let page = self.db.btree_page(page_num)?;
        let offsets = page.cell_offsets()?;
        debug!(
            page = page_num,
            kind = page.kind().name(),
            cells = offsets.len(),
            "visiting b-tree page"
        );
        self.pages.push(page_num);
        self.stack.push(Frame {
            page,
            offsets,
            next: 0,
            separator: None,
            right_done: false,
        });
        Ok(())
    }

    fn payload_record(&mut self, page: &Page, payload: &CellPayload) -> Result<Record> {
        let mut chain = Vec::new();
        let db = self.db;
        let bytes = crate::db::page::overflow::read_payload(
            page.data(),
            payload,
            db.usable_size(),
            db.page_count(),
            |n| {
                chain.push(n);
                db.read_page(n)
            },
        )?;
        self.overflow_pages.extend(chain);
        let (record, _) = Record::decode(&bytes, db.header().text_encoding)?;
        Ok(record)
    }

    fn leaf_row(&mut self, page: &Page, offset: usize) -> Result<BTreeRow> {
        let cell = crate::db::page::parse_cell(page, offset, self.db.usable_size())?;
        let (rowid, payload) = match cell {
            Cell::TableLeaf { rowid, payload } => (Some(rowid), payload),
            Cell::IndexLeaf { payload } => (None, payload),
            _ => {
                return Err(DbError::Corrupt(format!(
                    "page {}: interior cell on a leaf page",
                    page.number()
                )));
            }
        };
        let record = self.payload_record(page, &payload)?;
        Ok(BTreeRow {
            page: page.number(),
            offset,
            rowid,
            record,
        })
    }

    fn separator_row(&mut self, page: &Page, offset: usize) -> Result<BTreeRow> {
        match crate::db::page::parse_cell(page, offset, self.db.usable_size())? {
            Cell::IndexInterior { payload, .. } => {
                let record = self.payload_record(page, &payload)?;
                Ok(BTreeRow {
                    page: page.number(),
                    offset,
                    rowid: None,
                    record,
                })
            }
            _ => Err(DbError::Corrupt(format!(
                "page {}: expected an interior index cell",
                page.number()
            ))),
        }
    }

    fn step(&mut self) -> Option<Result<BTreeRow>> {
        loop {
            if let Some(root) = self.root.take() {
                if let Err(e) = self.descend(root) {
                    return Some(Err(e));
                }
                continue;
            }

            let frame = self.stack.last_mut()?;
            let page = frame.page.clone();

            if let Some(i) = frame.separator.take() {
                let offset = frame.offsets[i];
                return Some(self.separator_row(&page, offset));
            }

            if frame.next < frame.offsets.len() {
                let i = frame.next;
                frame.next += 1;
                let offset = frame.offsets[i];

                if page.kind().is_leaf() {
                    return Some(self.leaf_row(&page, offset));
                }

                let child = match crate::db::page::parse_cell(&page, offset, self.db.usable_size())
                {
                    Ok(Cell::TableInterior { left_child, .. }) => left_child,
                    Ok(Cell::IndexInterior { left_child, .. }) => {
                        frame.separator = Some(i);
                        left_child
                    }
                    Ok(_) => {
                        return Some(Err(DbError::Corrupt(format!(
                            "page {}: leaf cell on an interior page",
                            page.number()
                        ))));
                    }
                    Err(e) => return Some(Err(e)),
                };
                if let Err(e) = self.descend(child) {
                    return Some(Err(e));
                }
                continue;
            }

            if !frame.right_done {
                frame.right_done = true;
                if let Some(right) = page.kind().right_child() {
                    if let Err(e) = self.descend(right) {
                        return Some(Err(e));
                    }
                    continue;
                }
            }

            self.stack.pop();
        }
    }
}

impl Iterator for BTreeWalker<'_> {
    type Item = Result<BTreeRow>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let item = self.step();
        match &item {
            None => self.done = true,
            Some(Err(e)) if e.is_fatal() => self.done = true,
            Some(Err(e)) => warn!(error = %e, "skipping corrupt b-tree region"),
            Some(Ok(_)) => {}
        }
        item
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::page::Value;
    use crate::db::test_support::{build_db, build_db_with, fill_table};
    use std::fs::OpenOptions;
    use std::io::{Seek, SeekFrom, Write};

    fn root_of(path: &std::path::Path, name: &str) -> u32 {
        let conn = rusqlite::Connection::open(path).unwrap();
        conn.query_row(
            "SELECT rootpage FROM sqlite_master WHERE name = ?1",
            [name],
            |row| row.get(0),
        )
        .unwrap()
    }

    #[test]
    fn walks_single_leaf_in_rowid_order() {
        let (_dir, path) = build_db(&[
            "CREATE TABLE t (a INTEGER, b TEXT)",
            "INSERT INTO t VALUES (10, 'x'), (20, 'y'), (30, 'z')",
        ]);
        let db = Database::open(&path).unwrap();
        let rows: Vec<_> = BTreeWalker::new(&db, 2).map(Result::unwrap).collect();
        assert_eq!(rows.len(), 3);
        assert_eq!(
            rows.iter().map(|r| r.rowid.unwrap()).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(
            rows[1].record.values,
            vec![Value::Integer(20), Value::Text("y".into())]
        );
    }

    #[test]
    fn multi_level_tree_is_complete_and_ordered() {
        let (_dir, path) = build_db_with(|conn| {
            conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, body TEXT)")
                .unwrap();
            fill_table(conn, "t", 2000, 20);
        });
        let db = Database::open(&path).unwrap();
        let mut walker = BTreeWalker::new(&db, root_of(&path, "t"));
        let rowids: Vec<i64> = walker
            .by_ref()
            .map(|row| row.unwrap().rowid.unwrap())
            .collect();
        assert_eq!(rowids.len(), 2000);
        assert!(rowids.windows(2).all(|w| w[0] < w[1]));
        assert!(walker.pages().len() > 2);
    }

    #[test]
    fn corrupt_subtree_is_skipped_and_siblings_are_walked() {
        let (_dir, path) = build_db_with(|conn| {
            conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, body TEXT)")
                .unwrap();
            fill_table(conn, "t", 2000, 20);
        });
        let root = root_of(&path, "t");
        let first_cell = {
            let db = Database::open(&path).unwrap();
            let page = db.btree_page(root).unwrap();
            assert!(page.kind().is_interior());
            page.cell_offsets().unwrap()[0]
        };
        {
            let mut file = OpenOptions::new().write(true).open(&path).unwrap();
            file.seek(SeekFrom::Start(u64::from(root - 1) * 4096 + first_cell as u64))
                .unwrap();
            file.write_all(&999_999u32.to_be_bytes()).unwrap();
        }

        let db = Database::open(&path).unwrap();
        let items: Vec<_> = BTreeWalker::new(&db, root).collect();
        assert!(matches!(
            items[0],
            Err(DbError::PageOutOfRange { page: 999_999, .. })
        ));
        assert_eq!(items.iter().filter(|i| i.is_err()).count(), 1);

        let rowids: Vec<i64> = items[1..]
            .iter()
            .map(|i| i.as_ref().unwrap().rowid.unwrap())
            .collect();
        assert!(!rowids.is_empty());
        assert!(rowids.len() < 2000);
        assert!(rowids[0] > 1);
        assert_eq!(*rowids.last().unwrap(), 2000);
        assert!(rowids.windows(2).all(|w| w[0] + 1 == w[1]));
    }

    #[test]
    fn index_entries_come_out_sorted() {
        let (_dir, path) = build_db_with(|conn| {
            conn.execute_batch(
                "CREATE TABLE t (id INTEGER PRIMARY KEY, body TEXT);
                 CREATE INDEX t_body ON t (body);",
            )
            .unwrap();
            fill_table(conn, "t", 800, 30);
        });
        let db = Database::open(&path).unwrap();
        let keys: Vec<String> = BTreeWalker::new(&db, root_of(&path, "t_body"))
            .map(|row| {
                let row = row.unwrap();
                assert_eq!(row.rowid, None);
                row.record.read_string(0).unwrap()
            })
            .collect();
        assert_eq!(keys.len(), 800);
        assert!(keys.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn overflow_payload_is_reassembled() {
        let big = "q".repeat(10_000);
        let (_dir, path) = build_db_with(|conn| {
            conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, body TEXT)")
                .unwrap();
            conn.execute("INSERT INTO t (body) VALUES (?1)", [&big]).unwrap();
        });
        let db = Database::open(&path).unwrap();
        let mut walker = BTreeWalker::new(&db, root_of(&path, "t"));
        let row = walker.next().unwrap().unwrap();
        assert_eq!(row.record.values[1], Value::Text(big.clone()));
        assert!(walker.next().is_none());
        assert_eq!(walker.overflow_pages().len(), 2);
    }

    #[test]
    fn bad_root_reports_error_and_ends() {
        let (_dir, path) = build_db(&["CREATE TABLE t (a)"]);
        let db = Database::open(&path).unwrap();
        let items: Vec<_> = BTreeWalker::new(&db, 99).collect();
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(DbError::PageOutOfRange { page: 99, .. })));
    }
}
