//! Cell layouts for the four b-tree page kinds.
//!
//! ```text
//! leaf table       payload-len varint | rowid varint | payload | [overflow u32]
//! interior table   left-child u32 | rowid varint
//! leaf index       payload-len varint | payload | [overflow u32]
//! interior index   left-child u32 | payload-len varint | payload | [overflow u32]
//! ```

use std::ops::Range;

use crate::db::constants::PAGE_POINTER_SIZE;
use crate::db::error::{DbError, Result};
use crate::db::varint::read_varint;

use super::page::{Page, PageKind};

/// Where a cell's payload lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellPayload {
    /// Declared payload length.
    pub total: usize,
    /// Bytes of the payload stored on this page.
    pub local: Range<usize>,
    /// First overflow page when the payload does not fit locally.
    pub overflow: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cell {
    TableLeaf { rowid: i64, payload: CellPayload },
    TableInterior { left_child: u32, rowid: i64 },
    IndexLeaf { payload: CellPayload },
    IndexInterior { left_child: u32, payload: CellPayload },
}

/// Largest payload stored entirely on the page.
///
/// - Table leaf pages: `U - 35`
/// - All other page types: `((U - 12) * 64 / 255) - 23`
pub fn max_local(usable_size: usize, table_leaf: bool) -> usize {
    if table_leaf {
        usable_size - 35
    } else {
        (usable_size - 12) * 64 / 255 - 23
    }
}

/// Smallest local portion once a payload spills: `((U - 12) * 32 / 255) - 23`.
pub fn min_local(usable_size: usize) -> usize {
    (usable_size - 12) * 32 / 255 - 23
}

/// Number of payload bytes kept on the page for a payload of `total` bytes.
///
/// ```text
/// local = M + ((P - M) % (U - 4))
/// if local > X: local = M
/// ```
pub fn local_payload_size(total: usize, usable_size: usize, table_leaf: bool) -> usize {
    let max = max_local(usable_size, table_leaf);
    if total <= max {
        return total;
    }
    let min = min_local(usable_size);
    let local = min + (total - min) % (usable_size - 4);
    if local > max { min } else { local }
}

/// Parse the cell at `offset` according to the page's kind.
pub fn parse_cell(page: &Page, offset: usize, usable_size: usize) -> Result<Cell> {
    let data = page.data();
    if offset < page.pointer_array_end() || offset >= data.len() {
        return Err(DbError::Corrupt(format!(
            "page {}: cell offset {} outside content area",
            page.number(),
            offset
        )));
    }

    match page.kind() {
        PageKind::LeafTable { .. } => {
            let (total, n) = read_payload_len(data, offset)?;
            let (rowid, m) = read_varint(data, offset + n)?;
            let payload = locate_payload(page, offset + n + m, total, usable_size, true)?;
            Ok(Cell::TableLeaf { rowid, payload })
        }
        PageKind::InteriorTable { .. } => {
            let left_child = read_u32(page, offset)?;
            let (rowid, _) = read_varint(data, offset + PAGE_POINTER_SIZE)?;
            Ok(Cell::TableInterior { left_child, rowid })
        }
        PageKind::LeafIndex { .. } => {
            let (total, n) = read_payload_len(data, offset)?;
            let payload = locate_payload(page, offset + n, total, usable_size, false)?;
            Ok(Cell::IndexLeaf { payload })
        }
        PageKind::InteriorIndex { .. } => {
            let left_child = read_u32(page, offset)?;
            let at = offset + PAGE_POINTER_SIZE;
            let (total, n) = read_payload_len(data, at)?;
            let payload = locate_payload(page, at + n, total, usable_size, false)?;
            Ok(Cell::IndexInterior {
                left_child,
                payload,
            })
        }
        PageKind::FreelistTrunk { .. } => Err(DbError::Corrupt(format!(
            "page {} is not a b-tree page",
            page.number()
        ))),
    }
}

fn read_payload_len(data: &[u8], pos: usize) -> Result<(usize, usize)> {
    let (total, n) = read_varint(data, pos)?;
    let total = usize::try_from(total)
        .map_err(|_| DbError::Corrupt(format!("negative payload length {}", total)))?;
    Ok((total, n))
}

fn read_u32(page: &Page, pos: usize) -> Result<u32> {
    page.data()
        .get(pos..pos + PAGE_POINTER_SIZE)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| {
            DbError::Truncated(format!(
                "page {}: page pointer at {} runs past the page end",
                page.number(),
                pos
            ))
        })
}

fn locate_payload(
    page: &Page,
    start: usize,
    total: usize,
    usable_size: usize,
    table_leaf: bool,
) -> Result<CellPayload> {
    let local = local_payload_size(total, usable_size, table_leaf);
    let end = start + local;
    if end > page.data().len() {
        return Err(DbError::Truncated(format!(
            "page {}: {}-byte local payload at {} runs past the page end",
            page.number(),
            local,
            start
        )));
    }
    let overflow = if local < total {
        Some(read_u32(page, end)?)
    } else {
        None
    };
    Ok(CellPayload {
        total,
        local: start..end,
        overflow,
    })
}
