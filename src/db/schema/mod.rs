//! Schema parsing for SQLite databases.

pub mod ddl;
mod schema;

pub use ddl::{Affinity, ColumnDef, TableDefinition, parse_create_table};
pub use schema::{Catalog, ObjectType, SCHEMA_ROOT_PAGE, SchemaEntry, TableSchema};
