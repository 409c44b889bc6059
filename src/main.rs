use anyhow::{Result, bail};

mod commands;

fn table_arg(args: &[String]) -> Result<&str> {
    match args.get(3) {
        Some(table) => Ok(table.as_str()),
        None => bail!("{} needs a <table> argument", args[2]),
    }
}

fn main() -> Result<()> {
    // Parse arguments
    let args = std::env::args().collect::<Vec<_>>();
    match args.len() {
        0 | 1 => bail!("Missing <database path> and <command>"),
        2 => bail!("Missing <command>"),
        _ => {}
    }

    let path = &args[1];
    let command = &args[2];
    let table = || table_arg(&args);

    // Parse command and act accordingly
    match command.as_str() {
        ".dbinfo" => commands::dbinfo(path)?,
        ".tables" => commands::tables(path)?,
        ".schema" => commands::schema(path)?,
        ".rows" => commands::rows(path, table()?)?,
        ".freespace" => commands::freespace(path, table()?)?,
        ".unallocated" => commands::unallocated(path, table()?)?,
        ".freelist" => commands::freelist(path)?,
        ".carve" => commands::carve(path, table()?)?,
        _ => bail!("Missing or invalid command passed: {}", command),
    }

    Ok(())
}
