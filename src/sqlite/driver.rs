//! Apply driver over the local SQLite store.
//!
//! Owns the store handle exclusively. The replication applier is the only
//! caller, so there is no locking; rusqlite's `execute_batch` applies
//! multi-statement SQL and stops at the first failing statement.

use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use tracing::debug;

use crate::sqlite::generator::SqliteConfig;
use crate::sqlite::parser::Parser;
use crate::sqlite::types::Schema;
use crate::Result;

/// Table holding the last-applied position per (source, plugin, publication).
pub const POSITION_TABLE: &str = "postgres_pos";

pub struct SqliteDriver {
    conn: Connection,
    cfg: SqliteConfig,
}

impl SqliteDriver {
    pub fn new(cfg: SqliteConfig, conn: Connection) -> Self {
        Self { conn, cfg }
    }

    pub fn open(cfg: SqliteConfig, path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Ok(Self::new(cfg, conn))
    }

    /// Creates the position table. Idempotent.
    pub fn init_position_table(&self) -> Result<()> {
        self.conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {POSITION_TABLE} (
                source_db text,
                plugin text,
                publication text,
                pos text,
                PRIMARY KEY (source_db, plugin, publication)
            );"
        ))?;

        Ok(())
    }

    /// The stored position for the configured triple, or the empty string
    /// when no position has been recorded yet.
    pub fn position(&self) -> Result<String> {
        let pos = self
            .conn
            .query_row(
                &format!(
                    "SELECT pos FROM {POSITION_TABLE} \
                     WHERE source_db = ?1 AND plugin = ?2 AND publication = ?3"
                ),
                (
                    &self.cfg.source_db,
                    &self.cfg.plugin,
                    &self.cfg.publication,
                ),
                |row| row.get::<_, String>(0),
            )
            .optional()?;

        Ok(pos.unwrap_or_default())
    }

    /// Applies a multi-statement SQL string. Any engine error propagates and
    /// leaves the open transaction to be rolled back by the caller's exit.
    pub fn execute(&self, sql: &str) -> Result<()> {
        debug!(sql, "apply");
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    /// Reconstructs the live schema by parsing the stored CREATE TABLE
    /// statements. The position table and SQLite-internal tables are not
    /// part of the mirrored schema.
    pub fn current_schema(&self) -> Result<Schema> {
        let mut out = Schema::new();

        let mut stmt = self
            .conn
            .prepare("SELECT tbl_name, sql FROM sqlite_schema WHERE type = 'table'")?;

        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
        })?;

        for row in rows {
            let (name, sql) = row?;

            if name == POSITION_TABLE || name.starts_with("sqlite_") {
                continue;
            }

            let Some(sql) = sql else {
                continue;
            };

            let (table, cols) = Parser::new(&sql).parse()?;

            let current = cols.into_iter().map(|c| (c.name.clone(), c)).collect();
            out.insert(table, current);
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::types::ColType;

    fn test_driver() -> SqliteDriver {
        let cfg = SqliteConfig {
            source_db: "postgres".to_string(),
            plugin: "pgoutput".to_string(),
            publication: "sqledge".to_string(),
        };

        SqliteDriver::new(cfg, Connection::open_in_memory().unwrap())
    }

    #[test]
    fn test_position_empty_before_first_write() {
        let driver = test_driver();
        driver.init_position_table().unwrap();

        assert_eq!(driver.position().unwrap(), "");
    }

    #[test]
    fn test_position_round_trip() {
        let driver = test_driver();
        driver.init_position_table().unwrap();
        driver.init_position_table().unwrap(); // idempotent

        driver
            .execute(
                "INSERT OR REPLACE INTO postgres_pos (source_db, plugin, publication, pos) \
                 VALUES ('postgres', 'pgoutput', 'sqledge', '1/58C32800');",
            )
            .unwrap();

        assert_eq!(driver.position().unwrap(), "1/58C32800");

        driver
            .execute(
                "INSERT OR REPLACE INTO postgres_pos (source_db, plugin, publication, pos) \
                 VALUES ('postgres', 'pgoutput', 'sqledge', '1/58C32900');",
            )
            .unwrap();

        // One row per triple, latest position wins.
        assert_eq!(driver.position().unwrap(), "1/58C32900");
    }

    #[test]
    fn test_execute_propagates_engine_errors() {
        let driver = test_driver();

        assert!(driver.execute("INSERT INTO missing VALUES (1);").is_err());
    }

    #[test]
    fn test_current_schema_skips_position_table() {
        let driver = test_driver();
        driver.init_position_table().unwrap();

        driver
            .execute("CREATE TABLE IF NOT EXISTS names (id INTEGER, name TEXT, PRIMARY KEY (id));")
            .unwrap();

        let schema = driver.current_schema().unwrap();

        assert_eq!(schema.len(), 1);

        let names = &schema["names"];
        assert_eq!(names["id"].col_type, ColType::Integer);
        assert!(names["id"].primary_key);
        assert_eq!(names["name"].col_type, ColType::Text);
        assert!(!names["name"].primary_key);
    }

    #[test]
    fn test_on_disk_store_survives_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("mirror.db");

        let cfg = SqliteConfig {
            source_db: "postgres".to_string(),
            plugin: "pgoutput".to_string(),
            publication: "sqledge".to_string(),
        };

        {
            let driver = SqliteDriver::open(cfg.clone(), &path).unwrap();
            driver.init_position_table().unwrap();
            driver
                .execute(
                    "CREATE TABLE IF NOT EXISTS names (id INTEGER, name TEXT); \
                     INSERT OR REPLACE INTO postgres_pos (source_db, plugin, publication, pos) \
                     VALUES ('postgres', 'pgoutput', 'sqledge', '0/16B3748');",
                )
                .unwrap();
        }

        let driver = SqliteDriver::open(cfg, &path).unwrap();
        assert_eq!(driver.position().unwrap(), "0/16B3748");
        assert!(driver.current_schema().unwrap().contains_key("names"));
    }
}
