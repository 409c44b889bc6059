//! Fixture databases written by real SQLite.

use std::path::PathBuf;

use rusqlite::Connection;
use tempfile::TempDir;

/// Create a database with 4096-byte pages and deletions that leave bytes in place.
pub fn build_db_with(setup: impl FnOnce(&Connection)) -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fixture.db");
    {
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch("PRAGMA page_size = 4096; PRAGMA secure_delete = OFF;")
            .unwrap();
        setup(&conn);
    }
    (dir, path)
}

/// Create a database by running each statement in order.
pub fn build_db(statements: &[&str]) -> (TempDir, PathBuf) {
    build_db_with(|conn| {
        for sql in statements {
            conn.execute_batch(sql).unwrap();
        }
    })
}

/// Insert `count` rows of `(id, body)` where body is `width` copies of a digit.
pub fn fill_table(conn: &Connection, table: &str, count: i64, width: usize) {
    conn.execute_batch("BEGIN").unwrap();
    for id in 1..=count {
        let body = id.to_string().repeat(width);
        conn.execute(
            &format!("INSERT INTO {} (id, body) VALUES (?1, ?2)", table),
            rusqlite::params![id, body],
        )
        .unwrap();
    }
    conn.execute_batch("COMMIT").unwrap();
}
