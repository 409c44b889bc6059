//! SQLite schema table parsing.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::db::btree::BTreeWalker;
use crate::db::database::Database;
use crate::db::error::Result;
use crate::db::page::Record;

use super::ddl::{ColumnDef, TableDefinition, parse_create_table};

/// The schema table is always rooted at page 1.
pub const SCHEMA_ROOT_PAGE: u32 = 1;

/// Column indices in the sqlite_schema table.
const SCHEMA_TYPE_COLUMN: usize = 0;
const SCHEMA_NAME_COLUMN: usize = 1;
const SCHEMA_TBL_NAME_COLUMN: usize = 2;
const SCHEMA_ROOTPAGE_COLUMN: usize = 3;
const SCHEMA_SQL_COLUMN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    Table,
    Index,
    View,
    Trigger,
}

impl ObjectType {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "table" => Some(Self::Table),
            "index" => Some(Self::Index),
            "view" => Some(Self::View),
            "trigger" => Some(Self::Trigger),
            _ => None,
        }
    }
}

/// An entry from the sqlite_schema table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaEntry {
    pub entry_type: ObjectType,
    pub name: String,
    pub tbl_name: String,
    /// 0 for objects without a b-tree (views, triggers, virtual tables).
    pub rootpage: u32,
    pub sql: String,
}

impl SchemaEntry {
    /// Parse a schema entry from a record.
    fn from_record(record: &Record) -> Option<Self> {
        let entry_type = ObjectType::parse(&record.read_string(SCHEMA_TYPE_COLUMN)?)?;
        let name = record.read_string(SCHEMA_NAME_COLUMN)?;

        Some(Self {
            entry_type,
            name,
            tbl_name: record.read_string(SCHEMA_TBL_NAME_COLUMN).unwrap_or_default(),
            rootpage: record
                .read_int(SCHEMA_ROOTPAGE_COLUMN)
                .and_then(|n| u32::try_from(n).ok())
                .unwrap_or(0),
            sql: record.read_string(SCHEMA_SQL_COLUMN).unwrap_or_default(),
        })
    }

    /// Check if this is an internal sqlite_ object.
    pub fn is_internal(&self) -> bool {
        self.name.starts_with("sqlite_")
    }
}

/// A table with its root page and parsed column list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub name: String,
    pub root_page: u32,
    pub definition: TableDefinition,
    pub sql: String,
}

impl TableSchema {
    pub fn columns(&self) -> &[ColumnDef] {
        &self.definition.columns
    }

    pub fn column_count(&self) -> usize {
        self.definition.columns.len()
    }

    pub fn rowid_alias(&self) -> Option<usize> {
        self.definition.rowid_alias()
    }
}

/// Every object named in sqlite_schema, plus the tables that own a b-tree.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: Vec<SchemaEntry>,
    tables: BTreeMap<String, TableSchema>,
    skipped: usize,
}

impl Catalog {
    /// Read the schema b-tree rooted at page 1.
    ///
    /// Rows that fail to decode are skipped and counted; only fatal errors
    /// are returned.
    pub fn load(db: &Database) -> Result<Self> {
        let mut catalog = Self::default();

        for row in BTreeWalker::new(db, SCHEMA_ROOT_PAGE) {
            let row = match row {
                Ok(row) => row,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(error = %e, "skipping unreadable schema row");
                    catalog.skipped += 1;
                    continue;
                }
            };
            let Some(entry) = SchemaEntry::from_record(&row.record) else {
                catalog.skipped += 1;
                continue;
            };

            if entry.entry_type == ObjectType::Table && entry.rootpage != 0 {
                let definition = parse_create_table(&entry.sql).unwrap_or_default();
                debug!(
                    table = %entry.name,
                    root_page = entry.rootpage,
                    columns = definition.columns.len(),
                    "found table"
                );
                catalog.tables.insert(
                    entry.name.clone(),
                    TableSchema {
                        name: entry.name.clone(),
                        root_page: entry.rootpage,
                        definition,
                        sql: entry.sql.clone(),
                    },
                );
            }
            catalog.entries.push(entry);
        }

        Ok(catalog)
    }

    pub fn entries(&self) -> &[SchemaEntry] {
        &self.entries
    }

    /// Tables by name, in name order.
    pub fn tables(&self) -> impl Iterator<Item = &TableSchema> {
        self.tables.values()
    }

    /// Find a table's schema by name.
    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.get(name)
    }

    pub fn indexes(&self) -> impl Iterator<Item = &SchemaEntry> {
        self.entries
            .iter()
            .filter(|e| e.entry_type == ObjectType::Index)
    }

    /// Names of the tables that hold user data, in name order.
    pub fn user_table_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .entries
            .iter()
            .filter(|e| e.entry_type == ObjectType::Table && e.rootpage != 0)
            .filter(|e| !e.is_internal())
            .map(|e| e.name.as_str())
            .collect();
        names.sort_unstable();
        names
    }

    /// Schema rows that could not be decoded.
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}
