//! Read-only decoder for SQLite database files that also recovers deleted
//! rows from freeblocks, unallocated page space and freelist pages.

pub mod db;
