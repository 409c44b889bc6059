//! The gap between a page's cell pointer array and its cell content area.

use std::ops::Range;

use tracing::warn;

use crate::db::page::Page;

/// Unallocated byte range of a b-tree page.
///
/// Empty when the page is fully packed, is not a b-tree page, or its header
/// fields contradict each other.
pub fn scan(page: &Page) -> Range<usize> {
    let len = page.data().len();
    let start = page.pointer_array_end().min(len);
    let Some(header) = page.kind().btree_header() else {
        return start..start;
    };

    let content_start = header.content_start as usize;
    if content_start > len || page.pointer_array_end() > content_start {
        warn!(
            page = page.number(),
            pointer_array_end = page.pointer_array_end(),
            content_start,
            "inconsistent page header, no unallocated region"
        );
        return start..start;
    }
    start..content_start
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::constants::{INTERIOR_TABLE_FLAG, LEAF_TABLE_FLAG};
    use crate::db::page::btree_page_bytes;
    use bytes::Bytes;

    fn page(flag: u8, pointers: &[u16], content_start: u16) -> Page {
        Page::btree(2, Bytes::from(btree_page_bytes(512, flag, pointers, content_start, 0)))
            .unwrap()
    }

    #[test]
    fn gap_between_pointers_and_content() {
        let range = scan(&page(LEAF_TABLE_FLAG, &[480, 500], 480));
        assert_eq!(range, 12..480);
        assert_eq!(range.len(), 480 - 12);
    }

    #[test]
    fn interior_header_is_longer() {
        assert_eq!(scan(&page(INTERIOR_TABLE_FLAG, &[500], 500)), 14..500);
    }

    #[test]
    fn packed_page_has_no_slack() {
        let pointers: Vec<u16> = (0..10).collect();
        let range = scan(&page(LEAF_TABLE_FLAG, &pointers, 28));
        assert!(range.is_empty());
        assert_eq!(range.start, 28);
    }

    #[test]
    fn content_start_past_page_is_empty() {
        let range = scan(&page(LEAF_TABLE_FLAG, &[], 0));
        assert!(range.is_empty());
    }

    #[test]
    fn overlapping_fields_are_empty() {
        let range = scan(&page(LEAF_TABLE_FLAG, &[500, 501, 502], 10));
        assert!(range.is_empty());
    }

    #[test]
    fn freelist_trunks_have_no_slack() {
        let p = Page::freelist_trunk(5, Bytes::from(vec![0u8; 512]), 512).unwrap();
        assert!(scan(&p).is_empty());
    }
}
