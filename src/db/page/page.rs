//! Page parsing utilities for SQLite database format.

use bytes::{Buf, Bytes};

use crate::db::constants::{
    CELL_POINTER_SIZE, FREELIST_TRUNK_HEADER_SIZE, INTERIOR_HEADER_SIZE, INTERIOR_INDEX_FLAG,
    INTERIOR_TABLE_FLAG, LEAF_HEADER_SIZE, LEAF_INDEX_FLAG, LEAF_TABLE_FLAG, PAGE1_HEADER_OFFSET,
    PAGE_POINTER_SIZE,
};
use crate::db::error::{DbError, Result};

/// Fields shared by all four b-tree page headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BTreeHeader {
    /// Offset of the first freeblock, 0 if none.
    pub first_freeblock: u16,
    pub cell_count: u16,
    /// Start of the cell content area; a stored 0 means 65536.
    pub content_start: u32,
    pub fragmented_free_bytes: u8,
}

/// What a page is, decoded once when the page is loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageKind {
    InteriorIndex { header: BTreeHeader, right_child: u32 },
    InteriorTable { header: BTreeHeader, right_child: u32 },
    LeafIndex { header: BTreeHeader },
    LeafTable { header: BTreeHeader },
    FreelistTrunk { next_trunk: u32, leaves: Vec<u32> },
}

impl PageKind {
    pub fn btree_header(&self) -> Option<&BTreeHeader> {
        match self {
            Self::InteriorIndex { header, .. }
            | Self::InteriorTable { header, .. }
            | Self::LeafIndex { header }
            | Self::LeafTable { header } => Some(header),
            Self::FreelistTrunk { .. } => None,
        }
    }

    pub fn right_child(&self) -> Option<u32> {
        match self {
            Self::InteriorIndex { right_child, .. } | Self::InteriorTable { right_child, .. } => {
                Some(*right_child)
            }
            _ => None,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Self::LeafIndex { .. } | Self::LeafTable { .. })
    }

    pub fn is_interior(&self) -> bool {
        self.right_child().is_some()
    }

    /// Size of the b-tree page header, 0 for freelist pages.
    pub fn header_size(&self) -> usize {
        if self.is_interior() {
            INTERIOR_HEADER_SIZE
        } else if self.is_leaf() {
            LEAF_HEADER_SIZE
        } else {
            0
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::InteriorIndex { .. } => "interior index b-tree",
            Self::InteriorTable { .. } => "interior table b-tree",
            Self::LeafIndex { .. } => "leaf index b-tree",
            Self::LeafTable { .. } => "leaf table b-tree",
            Self::FreelistTrunk { .. } => "freelist trunk",
        }
    }
}

/// A SQLite database page.
#[derive(Debug, Clone)]
pub struct Page {
    number: u32,
    data: Bytes,
    kind: PageKind,
}

impl Page {
    /// Decode a page as a b-tree page.
    pub fn btree(number: u32, data: Bytes) -> Result<Self> {
        let header_offset = Self::header_offset_for(number);
        if data.len() < header_offset + LEAF_HEADER_SIZE {
            return Err(DbError::Truncated(format!(
                "page {} too small for a b-tree header",
                number
            )));
        }

        let mut buf = &data[header_offset..];
        let flag = buf.get_u8();
        let header = BTreeHeader {
            first_freeblock: buf.get_u16(),
            cell_count: buf.get_u16(),
            content_start: match buf.get_u16() {
                0 => 65536,
                n => u32::from(n),
            },
            fragmented_free_bytes: buf.get_u8(),
        };

        let kind = match flag {
            LEAF_TABLE_FLAG => PageKind::LeafTable { header },
            LEAF_INDEX_FLAG => PageKind::LeafIndex { header },
            INTERIOR_TABLE_FLAG | INTERIOR_INDEX_FLAG => {
                if buf.remaining() < PAGE_POINTER_SIZE {
                    return Err(DbError::Truncated(format!(
                        "page {} too small for an interior b-tree header",
                        number
                    )));
                }
                let right_child = buf.get_u32();
                if flag == INTERIOR_TABLE_FLAG {
                    PageKind::InteriorTable { header, right_child }
                } else {
                    PageKind::InteriorIndex { header, right_child }
                }
            }
            other => {
                return Err(DbError::Corrupt(format!(
                    "page {} has invalid b-tree page type {:#04x}",
                    number, other
                )));
            }
        };

        Ok(Self { number, data, kind })
    }

    /// Decode a freelist trunk page: next-trunk pointer, leaf count, leaf array.
    pub fn freelist_trunk(number: u32, data: Bytes, usable_size: usize) -> Result<Self> {
        if data.len() < FREELIST_TRUNK_HEADER_SIZE {
            return Err(DbError::Truncated(format!(
                "page {} too small for a freelist trunk",
                number
            )));
        }
        let mut buf = &data[..];
        let next_trunk = buf.get_u32();
        let count = buf.get_u32() as usize;
        let max_leaves = usable_size / PAGE_POINTER_SIZE - 2;
        if count > max_leaves {
            return Err(DbError::Corrupt(format!(
                "freelist trunk {} claims {} leaves, at most {} fit",
                number, count, max_leaves
            )));
        }
        let leaves = (0..count).map(|_| buf.get_u32()).collect();

        Ok(Self {
            number,
            data,
            kind: PageKind::FreelistTrunk { next_trunk, leaves },
        })
    }

    /// Page 1 has the database header at offset 0, so its page header starts at 100.
    /// Other pages have the page header at offset 0.
    pub fn header_offset_for(number: u32) -> usize {
        if number == 1 { PAGE1_HEADER_OFFSET } else { 0 }
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    /// Get the raw page data.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn bytes(&self) -> &Bytes {
        &self.data
    }

    pub fn kind(&self) -> &PageKind {
        &self.kind
    }

    pub fn header_offset(&self) -> usize {
        Self::header_offset_for(self.number)
    }

    /// Get the number of cells in this page.
    pub fn cell_count(&self) -> usize {
        self.kind
            .btree_header()
            .map_or(0, |header| usize::from(header.cell_count))
    }

    /// First byte after the cell pointer array.
    pub fn pointer_array_end(&self) -> usize {
        self.header_offset() + self.kind.header_size() + self.cell_count() * CELL_POINTER_SIZE
    }

    /// Get cell offsets from the cell pointer array, in pointer order.
    pub fn cell_offsets(&self) -> Result<Vec<usize>> {
        let end = self.pointer_array_end();
        if end > self.data.len() {
            return Err(DbError::Corrupt(format!(
                "page {}: {} cell pointers run past the page end",
                self.number,
                self.cell_count()
            )));
        }
        let start = self.header_offset() + self.kind.header_size();
        Ok(self.data[start..end]
            .chunks_exact(CELL_POINTER_SIZE)
            .map(|pair| usize::from(u16::from_be_bytes([pair[0], pair[1]])))
            .collect())
    }
}
