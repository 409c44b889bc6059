//! SQLite database file decoding and recovery.

pub mod btree;
pub mod constants;
mod database;
mod error;
pub mod header;
pub mod page;
pub mod ptrmap;
pub mod recovery;
pub mod schema;
pub mod varint;

#[cfg(test)]
mod test_support;

// Re-export public API
pub use btree::{BTreeRow, BTreeWalker};
pub use database::Database;
pub use error::{DbError, Result};
pub use header::{DatabaseHeader, TextEncoding};
pub use schema::{Catalog, TableSchema};
