//! Constants used throughout the SQLite database parsing.

/// Size of the database header (on page 1).
pub const DB_HEADER_SIZE: usize = 100;

/// Magic string at the start of every database file.
pub const SQLITE_SIGNATURE: &[u8; 16] = b"SQLite format 3\0";

/// Offset of page size in database header.
pub const PAGE_SIZE_OFFSET: usize = 16;

/// Page 1 carries the database header before its b-tree header.
pub const PAGE1_HEADER_OFFSET: usize = DB_HEADER_SIZE;

/// Smallest and largest legal page sizes.
pub const MIN_PAGE_SIZE: u32 = 512;
pub const MAX_PAGE_SIZE: u32 = 65536;

/// Smallest usable size (page size minus reserved bytes) the format allows.
pub const MIN_USABLE_SIZE: usize = 480;

/// B-tree page header sizes.
pub const LEAF_HEADER_SIZE: usize = 8;
pub const INTERIOR_HEADER_SIZE: usize = 12;

/// Each cell pointer is a 2-byte offset.
pub const CELL_POINTER_SIZE: usize = 2;

/// Page type flags (first byte of a b-tree page header).
pub const INTERIOR_INDEX_FLAG: u8 = 0x02;
pub const INTERIOR_TABLE_FLAG: u8 = 0x05;
pub const LEAF_INDEX_FLAG: u8 = 0x0A;
pub const LEAF_TABLE_FLAG: u8 = 0x0D;

/// Next-offset (2 bytes) plus size (2 bytes).
pub const FREEBLOCK_HEADER_SIZE: usize = 4;

/// Page numbers stored inside pages are 4-byte big-endian.
pub const PAGE_POINTER_SIZE: usize = 4;

/// Next-trunk pointer plus leaf count.
pub const FREELIST_TRUNK_HEADER_SIZE: usize = 8;

/// Type byte plus 4-byte parent page number.
pub const PTRMAP_ENTRY_SIZE: usize = 5;

/// SQLite refuses cursors deeper than this; deeper trees are corrupt.
pub const MAX_BTREE_DEPTH: usize = 20;

/// Varint constants.
pub const VARINT_MAX_BYTES: usize = 9;
pub const VARINT_CONTINUATION_BIT: u8 = 0x80;
pub const VARINT_DATA_MASK: u8 = 0x7F;
