//! Heuristic recovery of deleted records from free byte ranges.
//!
//! Every offset of a region is tried as the start of a leaf-table cell and
//! then of a bare record. Candidates are filtered by the table's column count
//! and serial-type plausibility; accepted candidates never overlap, the one at
//! the lower offset wins and the scan resumes after its last byte.

use std::ops::Range;

use tracing::debug;

use crate::db::constants::FREEBLOCK_HEADER_SIZE;
use crate::db::header::TextEncoding;
use crate::db::page::{Record, Value, decode_value, get_column_size};
use crate::db::schema::TableSchema;
use crate::db::varint::read_varint;

/// Where a recovered row was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegionKind {
    Freeblock,
    Unallocated,
    FreelistPage,
    /// A leaf-table page that no b-tree and no freelist entry points to.
    OrphanPage,
}

impl RegionKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Freeblock => "freeblock",
            Self::Unallocated => "unallocated",
            Self::FreelistPage => "freelist page",
            Self::OrphanPage => "orphan page",
        }
    }
}

/// How well a candidate matches the table it is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Confidence {
    /// No schema to check against.
    Low,
    /// Column count matches, but serial types are implausible for the
    /// declared affinities or part of the record header was rebuilt.
    Medium,
    High,
}

impl Confidence {
    pub fn name(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// A candidate deleted row and its provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveredRow {
    pub page: u32,
    pub offset: usize,
    pub region: RegionKind,
    /// Known only when the cell header survived.
    pub rowid: Option<i64>,
    pub values: Vec<Value>,
    /// Leading columns whose serial types were overwritten by a freeblock header.
    pub lost_columns: usize,
    pub confidence: Confidence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CarveOptions {
    /// Fewest columns a candidate needs when no schema is supplied.
    pub min_columns: usize,
    /// Rebuild the record header at the start of each freeblock.
    pub reconstruct_freeblock_headers: bool,
}

impl Default for CarveOptions {
    fn default() -> Self {
        Self {
            min_columns: 2,
            reconstruct_freeblock_headers: true,
        }
    }
}

/// A byte range of one page to carve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    pub page: u32,
    pub kind: RegionKind,
    pub range: Range<usize>,
}

pub struct Carver<'a> {
    schema: Option<&'a TableSchema>,
    encoding: TextEncoding,
    options: CarveOptions,
}

impl<'a> Carver<'a> {
    /// A schema whose column list could not be parsed is treated as absent.
    pub fn new(
        schema: Option<&'a TableSchema>,
        encoding: TextEncoding,
        options: CarveOptions,
    ) -> Self {
        Self {
            schema: schema.filter(|s| s.column_count() > 0),
            encoding,
            options,
        }
    }

    /// Carve `region` of the page bytes `data`.
    pub fn carve(&self, data: &[u8], region: &Region) -> Vec<RecoveredRow> {
        let end = region.range.end.min(data.len());
        let start = region.range.start.min(end);
        let mut rows = Vec::new();
        let mut pos = start;

        if region.kind == RegionKind::Freeblock {
            if let Some((row, row_end)) = self.reconstruct(data, region.page, start..end) {
                rows.push(row);
                pos = row_end;
            }
            pos = pos.max(start + FREEBLOCK_HEADER_SIZE);
        }

        while pos < end {
            let window = &data[pos..end];
            let Some((rowid, record, consumed)) = self.intact(window) else {
                pos += 1;
                continue;
            };
            if let Some(row) = self.accept(region.page, pos, region.kind, rowid, record) {
                rows.push(row);
            }
            pos += consumed;
        }

        debug!(
            page = region.page,
            region = region.kind.name(),
            start,
            end,
            recovered = rows.len(),
            "carved region"
        );
        rows
    }

    /// Turn a decoded record into a row if it passes the column filter.
    pub fn accept(
        &self,
        page: u32,
        offset: usize,
        region: RegionKind,
        rowid: Option<i64>,
        record: Record,
    ) -> Option<RecoveredRow> {
        let confidence = self.assess(&record)?;
        Some(RecoveredRow {
            page,
            offset,
            region,
            rowid,
            values: record.values,
            lost_columns: 0,
            confidence,
        })
    }

    /// The first acceptable reading at the start of `window`, cell form first.
    fn intact(&self, window: &[u8]) -> Option<(Option<i64>, Record, usize)> {
        if let Some((rowid, record, consumed)) = cell_form(window, self.encoding) {
            if self.assess(&record).is_some() {
                return Some((Some(rowid), record, consumed));
            }
        }
        let (record, consumed) = Record::decode(window, self.encoding).ok()?;
        self.assess(&record)?;
        Some((None, record, consumed))
    }

    fn assess(&self, record: &Record) -> Option<Confidence> {
        if record.values.iter().all(|v| matches!(v, Value::Null)) {
            return None;
        }
        match self.schema {
            Some(schema) => {
                if record.column_count() != schema.column_count() {
                    return None;
                }
                if plausible(schema, &record.serial_types, 0) {
                    Some(Confidence::High)
                } else {
                    Some(Confidence::Medium)
                }
            }
            None => {
                (record.column_count() >= self.options.min_columns).then_some(Confidence::Low)
            }
        }
    }

    /// Rebuild a record whose first bytes were overwritten by the freeblock header.
    fn reconstruct(
        &self,
        data: &[u8],
        page: u32,
        block: Range<usize>,
    ) -> Option<(RecoveredRow, usize)> {
        if !self.options.reconstruct_freeblock_headers {
            return None;
        }
        let schema = self.schema?;
        let order: [usize; 2] = if schema.rowid_alias() == Some(0) {
            [1, 0]
        } else {
            [0, 1]
        };
        order
            .into_iter()
            .find_map(|lost| self.reconstruct_with(data, page, block.clone(), schema, lost))
    }

    fn reconstruct_with(
        &self,
        data: &[u8],
        page: u32,
        block: Range<usize>,
        schema: &TableSchema,
        lost: usize,
    ) -> Option<(RecoveredRow, usize)> {
        let count = schema.column_count();
        if lost >= count {
            return None;
        }
        let block_data = &data[..block.end];

        let mut pos = block.start + FREEBLOCK_HEADER_SIZE;
        let mut serial_types = Vec::with_capacity(count - lost);
        let mut body_len = 0usize;
        for _ in lost..count {
            let (serial_type, n) = read_varint(block_data, pos).ok()?;
            let serial_type = u64::try_from(serial_type).ok()?;
            body_len = body_len.checked_add(get_column_size(serial_type)?)?;
            serial_types.push(serial_type);
            pos += n;
        }
        if !plausible(schema, &serial_types, lost) {
            return None;
        }

        let mut values = Vec::with_capacity(count);
        let mut at = pos;
        if lost == 1 {
            if schema.rowid_alias() == Some(0) {
                values.push(Value::Null);
            } else {
                // The lost column's bytes are whatever the surviving columns leave over.
                let lost_len = block.end.checked_sub(pos)?.checked_sub(body_len)?;
                values.push(Value::Blob(block_data[pos..pos + lost_len].to_vec()));
                at += lost_len;
            }
        }
        for &serial_type in &serial_types {
            let size = get_column_size(serial_type)?;
            let end = at.checked_add(size).filter(|&end| end <= block.end)?;
            values.push(decode_value(serial_type, &block_data[at..end], self.encoding));
            at = end;
        }
        if values.iter().all(|v| matches!(v, Value::Null)) {
            return None;
        }

        debug!(page, offset = block.start, lost, "rebuilt freeblock record header");
        Some((
            RecoveredRow {
                page,
                offset: block.start,
                region: RegionKind::Freeblock,
                rowid: None,
                values,
                lost_columns: lost,
                confidence: Confidence::Medium,
            },
            at,
        ))
    }
}

/// Read `window` as a leaf-table cell: payload length, rowid, record.
///
/// The record must consume exactly the declared payload length.
fn cell_form(window: &[u8], encoding: TextEncoding) -> Option<(i64, Record, usize)> {
    let (payload_len, n) = read_varint(window, 0).ok()?;
    let payload_len = usize::try_from(payload_len).ok().filter(|&len| len > 0)?;
    let (rowid, m) = read_varint(window, n).ok()?;
    let start = n + m;
    let payload = window.get(start..start.checked_add(payload_len)?)?;
    let (record, consumed) = Record::decode(payload, encoding).ok()?;
    (consumed == payload_len).then_some((rowid, record, start + payload_len))
}

/// Whether each serial type fits its column, starting at column `first`.
/// A rowid alias column must be stored as NULL.
fn plausible(schema: &TableSchema, serial_types: &[u64], first: usize) -> bool {
    let alias = schema.rowid_alias();
    schema
        .columns()
        .iter()
        .enumerate()
        .skip(first)
        .zip(serial_types)
        .all(|((i, column), &serial_type)| {
            if alias == Some(i) {
                serial_type == 0
            } else {
                column.affinity.admits(serial_type)
            }
        })
}
