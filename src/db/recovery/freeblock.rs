//! Walking a page's freeblock list.

use std::ops::Range;

use crate::db::constants::FREEBLOCK_HEADER_SIZE;
use crate::db::error::{DbError, Result};
use crate::db::page::Page;

/// A linked free byte range inside a page's content area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Freeblock {
    pub offset: usize,
    /// Includes the 4-byte freeblock header.
    pub size: usize,
}

impl Freeblock {
    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.size
    }
}

/// Iterator over a page's freeblocks.
///
/// Stops after yielding one `Err` for a block that is too small, runs past
/// the page, or points back into territory already walked.
pub struct Freeblocks<'a> {
    page: &'a Page,
    next: usize,
    floor: usize,
    done: bool,
}

/// Walk the freeblock list starting at the page header's first-freeblock offset.
pub fn scan(page: &Page) -> Freeblocks<'_> {
    let next = page
        .kind()
        .btree_header()
        .map_or(0, |header| usize::from(header.first_freeblock));
    Freeblocks {
        page,
        next,
        floor: page.pointer_array_end(),
        done: false,
    }
}

impl Freeblocks<'_> {
    fn fail(&mut self, detail: String) -> Option<Result<Freeblock>> {
        self.done = true;
        Some(Err(DbError::Corrupt(format!(
            "page {}: {}",
            self.page.number(),
            detail
        ))))
    }
}

impl Iterator for Freeblocks<'_> {
    type Item = Result<Freeblock>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.next == 0 {
            self.done = true;
            return None;
        }
        let offset = self.next;
        let data = self.page.data();

        if offset < self.floor {
            return self.fail(format!(
                "freeblock at {} points back before offset {}",
                offset, self.floor
            ));
        }
        if offset + FREEBLOCK_HEADER_SIZE > data.len() {
            return self.fail(format!("freeblock header at {} past page end", offset));
        }

        let next = usize::from(u16::from_be_bytes([data[offset], data[offset + 1]]));
        let size = usize::from(u16::from_be_bytes([data[offset + 2], data[offset + 3]]));
        if size < FREEBLOCK_HEADER_SIZE {
            return self.fail(format!("freeblock at {} has size {}", offset, size));
        }
        if offset + size > data.len() {
            return self.fail(format!(
                "freeblock at {} of {} bytes runs past page end",
                offset, size
            ));
        }

        self.floor = offset + size;
        self.next = next;
        Some(Ok(Freeblock { offset, size }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::constants::LEAF_TABLE_FLAG;
    use crate::db::page::btree_page_bytes;
    use bytes::Bytes;

    fn put_block(data: &mut [u8], at: usize, next: u16, size: u16) {
        data[at..at + 2].copy_from_slice(&next.to_be_bytes());
        data[at + 2..at + 4].copy_from_slice(&size.to_be_bytes());
    }

    fn page_with(first: u16, blocks: &[(usize, u16, u16)]) -> Page {
        let mut data = btree_page_bytes(512, LEAF_TABLE_FLAG, &[], 100, first);
        for &(at, next, size) in blocks {
            put_block(&mut data, at, next, size);
        }
        Page::btree(2, Bytes::from(data)).unwrap()
    }

    #[test]
    fn no_freeblocks() {
        let page = page_with(0, &[]);
        assert_eq!(scan(&page).count(), 0);
    }

    #[test]
    fn follows_chain() {
        let page = page_with(200, &[(200, 300, 20), (300, 0, 12)]);
        let blocks: Vec<_> = scan(&page).map(Result::unwrap).collect();
        assert_eq!(
            blocks,
            vec![
                Freeblock { offset: 200, size: 20 },
                Freeblock { offset: 300, size: 12 }
            ]
        );
        assert_eq!(blocks[0].range(), 200..220);
    }

    #[test]
    fn cycle_stops_with_what_was_found() {
        let page = page_with(200, &[(200, 300, 20), (300, 200, 12)]);
        let items: Vec<_> = scan(&page).collect();
        assert_eq!(items.len(), 3);
        assert!(items[0].is_ok() && items[1].is_ok());
        assert!(matches!(items[2], Err(DbError::Corrupt(_))));
    }

    #[test]
    fn undersized_block_is_corrupt() {
        let page = page_with(200, &[(200, 0, 2)]);
        let items: Vec<_> = scan(&page).collect();
        assert_eq!(items.len(), 1);
        assert!(items[0].is_err());
    }

    #[test]
    fn block_past_page_end_is_corrupt() {
        let page = page_with(500, &[(500, 0, 40)]);
        assert!(scan(&page).next().unwrap().is_err());
    }
}
