//! Page, cell and record parsing for SQLite database format.

mod cell;
pub mod overflow;
mod page;
mod record;

pub use cell::{Cell, CellPayload, local_payload_size, max_local, min_local, parse_cell};
pub use page::{BTreeHeader, Page, PageKind};
pub use record::{Record, Value, decode_value, get_column_size};

#[cfg(test)]
pub(crate) use page::tests::btree_page_bytes;
