//! Recovery passes over the free space of a database.
//!
//! [`analyze_table`] gathers everything known about one table: its live rows,
//! the freeblocks and unallocated gaps of its pages, and the rows carved from
//! those regions, from pages on the freelist and from orphan leaf pages.
//! [`deleted_pages`] lists the freelist itself. Both keep going past local
//! corruption and record it.

mod carver;
pub mod freeblock;
pub mod freelist;
pub mod slack;

use std::collections::HashSet;
use std::sync::Arc;
#[cfg(test)]
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use tracing::{debug, warn};

use crate::db::btree::{BTreeRow, BTreeWalker};
use crate::db::constants::{FREELIST_TRUNK_HEADER_SIZE, PAGE_POINTER_SIZE};
use crate::db::database::Database;
use crate::db::error::{DbError, Result};
use crate::db::page::{Cell, Page, PageKind, Record, parse_cell};
use crate::db::ptrmap;
use crate::db::schema::{Catalog, SCHEMA_ROOT_PAGE, TableSchema};

pub use carver::{CarveOptions, Carver, Confidence, RecoveredRow, Region, RegionKind};
pub use freeblock::Freeblock;
pub use freelist::{FreePage, FreePageRole, FreelistWalker};

/// Shared stop request, checked between pages.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    flag: Arc<AtomicBool>,
    /// Polls left before the flag trips by itself.
    #[cfg(test)]
    trip_after: Option<Arc<AtomicUsize>>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        #[cfg(test)]
        self.count_poll();
        self.flag.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    fn tripping_after(polls: usize) -> Self {
        Self {
            flag: Arc::default(),
            trip_after: Some(Arc::new(AtomicUsize::new(polls))),
        }
    }

    #[cfg(test)]
    fn count_poll(&self) {
        if let Some(left) = &self.trip_after {
            let spent = left.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                n.checked_sub(1)
            });
            if spent.is_err() {
                self.cancel();
            }
        }
    }
}

/// A free region together with its bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRegion {
    pub region: Region,
    pub bytes: Bytes,
}

impl RawRegion {
    fn of(page: &Page, region: Region) -> Self {
        let bytes = page.bytes().slice(region.range.clone());
        Self { region, bytes }
    }
}

#[derive(Debug)]
pub struct TableReport {
    pub table: String,
    pub root_page: u32,
    /// B-tree pages of the table, in visit order.
    pub pages: Vec<u32>,
    pub overflow_pages: Vec<u32>,
    /// Leaf-table pages that nothing links to, in file order.
    pub orphan_pages: Vec<u32>,
    pub live_rows: Vec<BTreeRow>,
    pub freeblocks: Vec<RawRegion>,
    pub unallocated: Vec<RawRegion>,
    pub recovered: Vec<RecoveredRow>,
    /// Local corruption that was skipped.
    pub faults: Vec<DbError>,
    pub cancelled: bool,
}

impl TableReport {
    fn new(table: &TableSchema) -> Self {
        Self {
            table: table.name.clone(),
            root_page: table.root_page,
            pages: Vec::new(),
            overflow_pages: Vec::new(),
            orphan_pages: Vec::new(),
            live_rows: Vec::new(),
            freeblocks: Vec::new(),
            unallocated: Vec::new(),
            recovered: Vec::new(),
            faults: Vec::new(),
            cancelled: false,
        }
    }

    /// Number of corrupt regions that were skipped.
    pub fn skipped(&self) -> usize {
        self.faults.len()
    }
}

/// A page on the freelist with its raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletedPage {
    pub page: FreePage,
    pub bytes: Bytes,
}

#[derive(Debug, Default)]
pub struct FreelistReport {
    pub pages: Vec<DeletedPage>,
    pub faults: Vec<DbError>,
    pub cancelled: bool,
}

/// Keep a local fault, hand a fatal one back.
fn record_fault(faults: &mut Vec<DbError>, error: DbError) -> Result<()> {
    if error.is_fatal() {
        return Err(error);
    }
    warn!(error = %error, "skipping corrupt region");
    faults.push(error);
    Ok(())
}

/// Live rows, free regions and recovered rows of one table.
///
/// Passes run in order: the live tree, the free space of its pages, the
/// freelist, then orphan pages. Every other page of the file is an orphan if
/// no b-tree in the schema, no freelist entry and no pointer map claims it.
pub fn analyze_table(
    db: &Database,
    table: &TableSchema,
    options: CarveOptions,
    cancel: &CancelFlag,
) -> Result<TableReport> {
    let mut report = TableReport::new(table);
    let carver = Carver::new(Some(table), db.header().text_encoding, options);

    let mut walker = BTreeWalker::new(db, table.root_page);
    loop {
        if cancel.is_cancelled() {
            report.cancelled = true;
            break;
        }
        match walker.next() {
            None => break,
            Some(Ok(row)) => report.live_rows.push(row),
            Some(Err(e)) => record_fault(&mut report.faults, e)?,
        }
    }
    report.pages = walker.pages().to_vec();
    report.overflow_pages = walker.overflow_pages().to_vec();
    if report.cancelled {
        return Ok(report);
    }

    let pages = report.pages.clone();
    for number in pages {
        if cancel.is_cancelled() {
            report.cancelled = true;
            return Ok(report);
        }
        scan_tree_page(db, &carver, number, &mut report)?;
    }

    let mut claimed: HashSet<u32> = report
        .pages
        .iter()
        .chain(&report.overflow_pages)
        .copied()
        .collect();

    for free in freelist::walk(db) {
        if cancel.is_cancelled() {
            report.cancelled = true;
            return Ok(report);
        }
        let free = match free {
            Ok(free) => free,
            Err(e) => {
                record_fault(&mut report.faults, e)?;
                continue;
            }
        };
        claimed.insert(free.number);
        if ptrmap::is_ptrmap_page(db, free.number) {
            continue;
        }
        match db.read_page(free.number) {
            Ok(data) => {
                let rows = carve_free_page(db, &carver, free, data)?;
                report.recovered.extend(rows);
            }
            Err(e) => record_fault(&mut report.faults, e)?,
        }
    }

    if !claim_other_trees(db, table, cancel, &mut claimed)? {
        report.cancelled = true;
        return Ok(report);
    }
    for number in 1..=db.page_count() {
        if cancel.is_cancelled() {
            report.cancelled = true;
            return Ok(report);
        }
        if claimed.contains(&number) || ptrmap::is_ptrmap_page(db, number) {
            continue;
        }
        let data = match db.read_page(number) {
            Ok(data) => data,
            Err(e) => {
                record_fault(&mut report.faults, e)?;
                continue;
            }
        };
        match Page::btree(number, data) {
            Ok(page) if matches!(page.kind(), PageKind::LeafTable { .. }) => {
                debug!(page = number, "found orphan leaf page");
                report.orphan_pages.push(number);
                let rows = stale_leaf(db, &carver, &page, RegionKind::OrphanPage)?;
                report.recovered.extend(rows);
            }
            _ => {}
        }
    }

    debug!(
        table = %report.table,
        live = report.live_rows.len(),
        recovered = report.recovered.len(),
        orphans = report.orphan_pages.len(),
        skipped = report.skipped(),
        "analyzed table"
    );
    Ok(report)
}

/// Add the pages of every other b-tree in the schema to `claimed`.
///
/// Corruption in those trees is not this table's fault and is only logged.
/// Returns `false` if cancelled.
fn claim_other_trees(
    db: &Database,
    table: &TableSchema,
    cancel: &CancelFlag,
    claimed: &mut HashSet<u32>,
) -> Result<bool> {
    let catalog = Catalog::load(db)?;
    let roots = catalog
        .entries()
        .iter()
        .map(|entry| entry.rootpage)
        .filter(|&root| root != 0 && root != table.root_page);

    for root in std::iter::once(SCHEMA_ROOT_PAGE).chain(roots) {
        if cancel.is_cancelled() {
            return Ok(false);
        }
        let mut walker = BTreeWalker::new(db, root);
        for item in walker.by_ref() {
            match item {
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => debug!(root, error = %e, "ignoring corrupt region of another b-tree"),
                Ok(_) => {}
            }
        }
        claimed.extend(walker.pages());
        claimed.extend(walker.overflow_pages());
    }
    Ok(true)
}

fn scan_tree_page(
    db: &Database,
    carver: &Carver<'_>,
    number: u32,
    report: &mut TableReport,
) -> Result<()> {
    let page = match db.btree_page(number) {
        Ok(page) => page,
        Err(e) => return record_fault(&mut report.faults, e),
    };

    for block in freeblock::scan(&page) {
        match block {
            Ok(block) => {
                let region = Region {
                    page: number,
                    kind: RegionKind::Freeblock,
                    range: block.range(),
                };
                report.recovered.extend(carver.carve(page.data(), &region));
                report.freeblocks.push(RawRegion::of(&page, region));
            }
            Err(e) => record_fault(&mut report.faults, e)?,
        }
    }

    let range = slack::scan(&page);
    if !range.is_empty() {
        let region = Region {
            page: number,
            kind: RegionKind::Unallocated,
            range,
        };
        report.recovered.extend(carver.carve(page.data(), &region));
        report.unallocated.push(RawRegion::of(&page, region));
    }
    Ok(())
}

/// Carve one freelist page.
///
/// A former leaf-table page still carrying its header is read through its
/// stale cell pointers, then its freeblocks and gap are carved. Anything else
/// is carved whole, past the leaf array for trunks.
fn carve_free_page(
    db: &Database,
    carver: &Carver<'_>,
    free: FreePage,
    data: Bytes,
) -> Result<Vec<RecoveredRow>> {
    let end = db.usable_size().min(data.len());
    let start = match free.role {
        FreePageRole::Trunk => {
            match Page::freelist_trunk(free.number, data.clone(), db.usable_size()) {
                Ok(page) => match page.kind() {
                    PageKind::FreelistTrunk { leaves, .. } => {
                        FREELIST_TRUNK_HEADER_SIZE + leaves.len() * PAGE_POINTER_SIZE
                    }
                    _ => FREELIST_TRUNK_HEADER_SIZE,
                },
                Err(_) => FREELIST_TRUNK_HEADER_SIZE,
            }
        }
        FreePageRole::Leaf => match Page::btree(free.number, data.clone()) {
            Ok(page) if matches!(page.kind(), PageKind::LeafTable { .. }) => {
                return stale_leaf(db, carver, &page, RegionKind::FreelistPage);
            }
            _ => 0,
        },
    };

    let region = Region {
        page: free.number,
        kind: RegionKind::FreelistPage,
        range: start.min(end)..end,
    };
    Ok(carver.carve(&data, &region))
}

/// Read a detached leaf-table page: stale cells first, tagged `kind`, then its
/// freeblocks and gap.
fn stale_leaf(
    db: &Database,
    carver: &Carver<'_>,
    page: &Page,
    kind: RegionKind,
) -> Result<Vec<RecoveredRow>> {
    let mut rows = Vec::new();
    let offsets = page.cell_offsets().unwrap_or_default();
    debug!(
        page = page.number(),
        cells = offsets.len(),
        "reading stale cells of detached leaf"
    );

    for offset in offsets {
        match stale_cell(db, page, offset) {
            Ok((rowid, record)) => rows.extend(carver.accept(
                page.number(),
                offset,
                kind,
                Some(rowid),
                record,
            )),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => debug!(page = page.number(), offset, error = %e, "stale cell unreadable"),
        }
    }

    for block in freeblock::scan(page).filter_map(|b| b.ok()) {
        let region = Region {
            page: page.number(),
            kind: RegionKind::Freeblock,
            range: block.range(),
        };
        rows.extend(carver.carve(page.data(), &region));
    }
    let range = slack::scan(page);
    if !range.is_empty() {
        let region = Region {
            page: page.number(),
            kind: RegionKind::Unallocated,
            range,
        };
        rows.extend(carver.carve(page.data(), &region));
    }
    Ok(rows)
}

fn stale_cell(db: &Database, page: &Page, offset: usize) -> Result<(i64, Record)> {
    match parse_cell(page, offset, db.usable_size())? {
        Cell::TableLeaf { rowid, payload } => {
            let bytes = db.read_payload(page, &payload)?;
            let (record, _) = Record::decode(&bytes, db.header().text_encoding)?;
            Ok((rowid, record))
        }
        _ => Err(DbError::Corrupt(format!(
            "page {}: not a table leaf cell at {}",
            page.number(),
            offset
        ))),
    }
}

/// Every page on the freelist with its bytes.
pub fn deleted_pages(db: &Database, cancel: &CancelFlag) -> Result<FreelistReport> {
    let mut report = FreelistReport::default();
    for free in freelist::walk(db) {
        if cancel.is_cancelled() {
            report.cancelled = true;
            break;
        }
        match free.and_then(|page| Ok((page, db.read_page(page.number)?))) {
            Ok((page, bytes)) => report.pages.push(DeletedPage { page, bytes }),
            Err(e) => record_fault(&mut report.faults, e)?,
        }
    }
    debug!(
        pages = report.pages.len(),
        skipped = report.faults.len(),
        "listed freelist"
    );
    Ok(report)
}
