//! Overflow page chains.
//!
//! When a payload exceeds the local maximum for its page, the excess is stored
//! in a linked list of overflow pages. Each overflow page starts with the page
//! number of the next one (0 ends the chain); the rest is payload.

use std::collections::HashSet;

use bytes::Bytes;
use tracing::warn;

use crate::db::constants::PAGE_POINTER_SIZE;
use crate::db::error::{DbError, Result};

use super::cell::CellPayload;

/// Reassemble a complete payload from its local part and overflow chain.
///
/// `read_page` reads a raw page by number. Chain links outside
/// `[1, page_count]`, repeated pages and chains that end early all fail with
/// [`DbError::Truncated`].
pub fn read_payload<F>(
    page_data: &[u8],
    payload: &CellPayload,
    usable_size: usize,
    page_count: u32,
    mut read_page: F,
) -> Result<Vec<u8>>
where
    F: FnMut(u32) -> Result<Bytes>,
{
    let per_page = usable_size - PAGE_POINTER_SIZE;
    let spilled = payload.total.saturating_sub(payload.local.len());
    let reachable = (page_count as usize).saturating_mul(per_page);
    if spilled > reachable {
        warn!(
            declared_bytes = payload.total,
            reachable_bytes = reachable,
            "payload length exceeds the file"
        );
        return Err(DbError::Corrupt(format!(
            "payload of {} bytes cannot fit in {} pages",
            payload.total, page_count
        )));
    }

    let mut out = Vec::with_capacity(payload.local.len() + spilled);
    out.extend_from_slice(&page_data[payload.local.clone()]);

    let mut next = payload.overflow.unwrap_or(0);
    let mut visited = HashSet::new();

    while out.len() < payload.total {
        if next == 0 {
            warn!(
                expected_bytes = payload.total,
                got_bytes = out.len(),
                "overflow chain ended prematurely"
            );
            return Err(DbError::Truncated(format!(
                "overflow chain ended after {} of {} bytes",
                out.len(),
                payload.total
            )));
        }
        if next > page_count {
            return Err(DbError::Truncated(format!(
                "overflow pointer to page {} beyond last page {}",
                next, page_count
            )));
        }
        if !visited.insert(next) {
            warn!(page = next, "overflow chain revisits a page");
            return Err(DbError::Truncated(format!(
                "overflow chain cycles back to page {}",
                next
            )));
        }

        let data = read_page(next)?;
        if data.len() < PAGE_POINTER_SIZE {
            return Err(DbError::Truncated(format!(
                "overflow page {} is only {} bytes",
                next,
                data.len()
            )));
        }
        let following = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);

        let wanted = payload.total - out.len();
        let available = (data.len() - PAGE_POINTER_SIZE).min(per_page);
        let take = wanted.min(available);
        out.extend_from_slice(&data[PAGE_POINTER_SIZE..PAGE_POINTER_SIZE + take]);
        next = following;
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn overflow_page(next: u32, fill: u8, size: usize) -> Bytes {
        let mut data = vec![fill; size];
        data[..4].copy_from_slice(&next.to_be_bytes());
        Bytes::from(data)
    }

    fn spilled(total: usize, first: u32) -> CellPayload {
        CellPayload {
            total,
            local: 0..4,
            overflow: Some(first),
        }
    }

    #[test]
    fn follows_chain_to_declared_length() {
        let pages: HashMap<u32, Bytes> =
            [(2, overflow_page(3, 0xbb, 16)), (3, overflow_page(0, 0xcc, 16))].into();
        let local = [0xaa; 4];
        let out = read_payload(&local, &spilled(20, 2), 16, 3, |n| Ok(pages[&n].clone())).unwrap();
        assert_eq!(out.len(), 20);
        assert_eq!(&out[..4], &[0xaa; 4]);
        assert_eq!(&out[4..16], &[0xbb; 12]);
        assert_eq!(&out[16..], &[0xcc; 4]);
    }

    #[test]
    fn cycle_is_detected() {
        let pages: HashMap<u32, Bytes> =
            [(2, overflow_page(3, 0, 16)), (3, overflow_page(2, 0, 16))].into();
        let result = read_payload(&[0; 4], &spilled(100, 2), 16, 10, |n| Ok(pages[&n].clone()));
        assert!(matches!(result, Err(DbError::Truncated(_))));
    }

    #[test]
    fn pointer_past_last_page_is_rejected() {
        let result = read_payload(&[0; 4], &spilled(100, 9), 16, 8, |_| {
            panic!("must not read out-of-range page")
        });
        assert!(matches!(result, Err(DbError::Truncated(_))));
    }

    #[test]
    fn length_beyond_the_file_is_rejected_before_reading() {
        let huge = spilled(usize::MAX / 2, 2);
        let result = read_payload(&[0; 4], &huge, 16, 3, |_| {
            panic!("must not follow a chain that cannot fit")
        });
        assert!(matches!(result, Err(DbError::Corrupt(_))));
    }

    #[test]
    fn early_end_of_chain_is_truncation() {
        let pages: HashMap<u32, Bytes> = [(2, overflow_page(0, 0, 16))].into();
        let result = read_payload(&[0; 4], &spilled(100, 2), 16, 10, |n| Ok(pages[&n].clone()));
        assert!(matches!(result, Err(DbError::Truncated(_))));
    }
}
