//! Database connection management and schema definition.
//!
//! Each request-handling thread and each background worker opens its own
//! [`rusqlite::Connection`]; connections are never shared across threads.
//! The schema is created idempotently on open, so a fresh database file
//! is usable immediately.

pub mod schema;

use std::path::Path;

use regex::Regex;
use rusqlite::functions::FunctionFlags;
use rusqlite::Connection;
use tracing::debug;

use crate::core::Result;

/// Open (and initialize if necessary) the database at `path`.
///
/// Foreign keys are enforced, and a `REGEXP` SQL function backed by the
/// `regex` crate is registered so that `regex` relations in compiled
/// searches evaluate natively.
pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(path)?;
    configure(&conn)?;
    schema::initialize(&conn)?;
    debug!(path = %path.display(), "opened database connection");
    Ok(conn)
}

/// Open an in-memory database with the full schema. Used by tests.
pub fn connect_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    configure(&conn)?;
    schema::initialize(&conn)?;
    Ok(conn)
}

fn configure(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "foreign_keys", "ON")?;
    // Workers and request threads share the file; wait out row locks
    // instead of surfacing SQLITE_BUSY.
    conn.busy_timeout(std::time::Duration::from_secs(10))?;
    register_regexp(conn)?;
    Ok(())
}

/// Register `REGEXP` so that `x REGEXP y` works in compiled filters.
///
/// The pattern is recompiled per call; compiled-pattern caching is not
/// worth the bookkeeping at fieldwork database sizes.
fn register_regexp(conn: &Connection) -> Result<()> {
    conn.create_scalar_function(
        "regexp",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        move |ctx| {
            let pattern: String = ctx.get(0)?;
            let haystack: Option<String> = ctx.get(1)?;
            let re = Regex::new(&pattern).map_err(|e| {
                rusqlite::Error::UserFunctionError(Box::new(e))
            })?;
            Ok(match haystack {
                Some(h) => re.is_match(&h),
                None => false,
            })
        },
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_in_memory_creates_schema() {
        let conn = connect_in_memory().unwrap();
        let n: i64 = conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = 'form'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(n, 1);
    }

    #[test]
    fn test_regexp_function() {
        let conn = connect_in_memory().unwrap();
        let hit: bool = conn
            .query_row("SELECT 'chiens' REGEXP '^chien'", [], |row| row.get(0))
            .unwrap();
        assert!(hit);
        let miss: bool = conn
            .query_row("SELECT 'chat' REGEXP '^chien'", [], |row| row.get(0))
            .unwrap();
        assert!(!miss);
        // NULL columns never match
        let null: bool = conn
            .query_row("SELECT NULL REGEXP 'x'", [], |row| row.get(0))
            .unwrap();
        assert!(!null);
    }
}
