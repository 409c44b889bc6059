use anyhow::{Context, Result};
use sqlite_carver::db::page::Value;
use sqlite_carver::db::recovery::{self, CancelFlag, CarveOptions, RawRegion, TableReport};
use sqlite_carver::db::{Catalog, Database, ptrmap};

fn open(path: &str) -> Result<(Database, Catalog)> {
    let db = Database::open(path).with_context(|| format!("Failed to open {}", path))?;
    let catalog = Catalog::load(&db).context("Failed to read schema")?;
    Ok((db, catalog))
}

fn analyze(path: &str, table: &str) -> Result<TableReport> {
    let (db, catalog) = open(path)?;
    let schema = catalog
        .table(table)
        .with_context(|| format!("No such table: {}", table))?;
    let report = recovery::analyze_table(&db, schema, CarveOptions::default(), &CancelFlag::new())
        .with_context(|| format!("Failed to analyze table {}", table))?;
    if report.skipped() > 0 {
        eprintln!("skipped {} corrupt regions", report.skipped());
    }
    Ok(report)
}

fn join_values(values: &[Value]) -> String {
    values
        .iter()
        .map(Value::to_string)
        .collect::<Vec<_>>()
        .join("|")
}

/// Keep printable ASCII only.
fn printable(bytes: &[u8]) -> String {
    bytes
        .iter()
        .filter(|b| b.is_ascii_graphic() || **b == b' ')
        .map(|&b| char::from(b))
        .collect()
}

fn print_regions(regions: &[RawRegion]) {
    for raw in regions {
        println!(
            "page {} offset {} size {}: {}",
            raw.region.page,
            raw.region.range.start,
            raw.region.range.len(),
            printable(&raw.bytes)
        );
    }
}

pub fn dbinfo(path: &str) -> Result<()> {
    let (db, catalog) = open(path)?;
    let header = db.header();
    println!("database page size: {}", header.page_size);
    println!("write format: {}", header.write_version);
    println!("read format: {}", header.read_version);
    println!("reserved bytes: {}", header.reserved_space);
    println!("file change counter: {}", header.file_change_counter);
    println!("database page count: {}", header.database_size);
    println!("pages in file: {}", db.page_count());
    println!("freelist page count: {}", header.freelist_pages);
    println!("first freelist trunk: {}", header.first_freelist_trunk);
    println!("schema cookie: {}", header.schema_cookie);
    println!("schema format: {}", header.schema_format);
    println!("text encoding: {}", header.text_encoding.name());
    println!("user version: {}", header.user_version);
    println!("application id: {}", header.application_id);
    println!("software version: {}", header.sqlite_version);
    println!("number of tables: {}", catalog.tables().count());
    println!("number of indexes: {}", catalog.indexes().count());

    if header.is_auto_vacuum() {
        let entries = ptrmap::read(&db).context("Failed to read pointer map")?;
        println!("pointer map entries: {}", entries.len());
        for entry in entries {
            println!("  page {}: {:?} parent {}", entry.page, entry.kind, entry.parent);
        }
    }
    Ok(())
}

pub fn tables(path: &str) -> Result<()> {
    let (_, catalog) = open(path)?;
    println!("{}", catalog.user_table_names().join(" "));
    Ok(())
}

pub fn schema(path: &str) -> Result<()> {
    let (_, catalog) = open(path)?;
    for entry in catalog.entries() {
        if !entry.sql.is_empty() {
            println!("{};", entry.sql);
        }
    }
    Ok(())
}

pub fn rows(path: &str, table: &str) -> Result<()> {
    let report = analyze(path, table)?;
    for row in &report.live_rows {
        let rowid = row.rowid.map(|id| id.to_string()).unwrap_or_default();
        println!("{}|{}", rowid, join_values(&row.record.values));
    }
    Ok(())
}

pub fn freespace(path: &str, table: &str) -> Result<()> {
    let report = analyze(path, table)?;
    print_regions(&report.freeblocks);
    Ok(())
}

pub fn unallocated(path: &str, table: &str) -> Result<()> {
    let report = analyze(path, table)?;
    print_regions(&report.unallocated);
    Ok(())
}

pub fn freelist(path: &str) -> Result<()> {
    let db = Database::open(path).with_context(|| format!("Failed to open {}", path))?;
    let report = recovery::deleted_pages(&db, &CancelFlag::new())
        .context("Failed to read freelist")?;
    for deleted in &report.pages {
        println!(
            "page {} ({:?}): {}",
            deleted.page.number,
            deleted.page.role,
            printable(&deleted.bytes)
        );
    }
    if !report.faults.is_empty() {
        eprintln!("skipped {} corrupt freelist entries", report.faults.len());
    }
    Ok(())
}

pub fn carve(path: &str, table: &str) -> Result<()> {
    let report = analyze(path, table)?;
    for row in &report.recovered {
        let rowid = row.rowid.map(|id| id.to_string()).unwrap_or_default();
        println!(
            "page {} offset {} {} {}|{}|{}",
            row.page,
            row.offset,
            row.region.name(),
            row.confidence.name(),
            rowid,
            join_values(&row.values)
        );
    }
    Ok(())
}
