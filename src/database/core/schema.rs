//! Ledger schema management
//!
//! This module provides the schema definitions for the migration ledger's own
//! storage and the manager that builds and upgrades it. Ledger history is never
//! dropped: older or partially created ledgers are upgraded in place.

use anyhow::{anyhow, Result};
use rusqlite::{Connection, OptionalExtension};
use std::cmp::Ordering;

/// Current ledger schema version
/// Increment this when making schema changes
pub const SCHEMA_VERSION: u32 = 1;

/// Schema definitions for all ledger tables
pub struct SchemaDefinitions;

impl SchemaDefinitions {
    /// SQL for creating the meta table (tracks schema version)
    pub const META_TABLE: &'static str = r#"
        CREATE TABLE IF NOT EXISTS tidemark_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );
    "#;

    /// One row per migration run
    pub const VERSION_TABLE: &'static str = r#"
        CREATE TABLE IF NOT EXISTS tidemark_version (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            repository_path TEXT NOT NULL,
            version TEXT NOT NULL,
            entry_date INTEGER NOT NULL,
            entered_by TEXT NOT NULL
        );
    "#;

    /// One row per successful script execution
    pub const SCRIPTS_RUN_TABLE: &'static str = r#"
        CREATE TABLE IF NOT EXISTS tidemark_scripts_run (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            version_id INTEGER NOT NULL,
            script_name TEXT NOT NULL,
            text_of_script TEXT NOT NULL,
            text_hash TEXT NOT NULL,
            one_time_script INTEGER NOT NULL,
            entry_date INTEGER NOT NULL,
            entered_by TEXT NOT NULL
        );
    "#;

    /// One row per failed script execution
    pub const SCRIPTS_RUN_ERRORS_TABLE: &'static str = r#"
        CREATE TABLE IF NOT EXISTS tidemark_scripts_run_errors (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            repository_path TEXT NOT NULL,
            version TEXT NOT NULL,
            script_name TEXT NOT NULL,
            text_of_script TEXT NOT NULL,
            erroneous_part_of_script TEXT NOT NULL,
            error_message TEXT NOT NULL,
            entry_date INTEGER NOT NULL,
            entered_by TEXT NOT NULL
        );
    "#;

    pub const INDEXES: &'static [&'static str] = &[
        "CREATE INDEX IF NOT EXISTS idx_tidemark_scripts_run_name ON tidemark_scripts_run(script_name, id)",
        "CREATE INDEX IF NOT EXISTS idx_tidemark_version_path ON tidemark_version(repository_path, entry_date)",
    ];

    pub const REQUIRED_TABLES: &'static [&'static str] = &[
        "tidemark_meta",
        "tidemark_version",
        "tidemark_scripts_run",
        "tidemark_scripts_run_errors",
    ];

    /// Every statement needed to build the ledger, in order
    pub fn statements() -> Vec<&'static str> {
        let mut statements = vec![
            Self::META_TABLE,
            Self::VERSION_TABLE,
            Self::SCRIPTS_RUN_TABLE,
            Self::SCRIPTS_RUN_ERRORS_TABLE,
        ];
        statements.extend_from_slice(Self::INDEXES);
        statements
    }
}

/// Builds, checks, and upgrades the ledger tables on one connection
pub struct SchemaManager<'a> {
    conn: &'a Connection,
}

impl<'a> SchemaManager<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Create all ledger tables and indexes that are missing
    ///
    /// Existing rows are kept. Sets the schema version in the meta table.
    pub fn initialize(&self) -> Result<()> {
        for sql in SchemaDefinitions::statements() {
            self.conn
                .execute(sql, [])
                .map_err(|e| anyhow!("Failed to create ledger schema object: {}", e))?;
        }

        self.set_meta("schema_version", &SCHEMA_VERSION.to_string())?;
        Ok(())
    }

    /// Bring the ledger to the current schema, whatever state it is in
    pub fn ensure_current(&self) -> Result<SchemaStatus> {
        let status = self.check_status()?;
        match &status {
            SchemaStatus::Current => {}
            SchemaStatus::NotInitialized
            | SchemaStatus::Corrupted
            | SchemaStatus::NeedsMigration { .. } => self.initialize()?,
            SchemaStatus::Incompatible {
                database_version,
                required_version,
            } => {
                return Err(anyhow!(
                    "Ledger schema v{} is newer than supported v{}",
                    database_version,
                    required_version
                ));
            }
        }
        Ok(status)
    }

    /// Compare the stored schema with the one this build writes
    pub fn check_status(&self) -> Result<SchemaStatus> {
        if !self.table_exists("tidemark_meta")? {
            return Ok(SchemaStatus::NotInitialized);
        }

        let stored = self.get_schema_version()?;
        let status = match stored.cmp(&SCHEMA_VERSION) {
            Ordering::Less => SchemaStatus::NeedsMigration {
                from: stored,
                to: SCHEMA_VERSION,
            },
            Ordering::Greater => SchemaStatus::Incompatible {
                database_version: stored,
                required_version: SCHEMA_VERSION,
            },
            Ordering::Equal if self.missing_tables()?.is_empty() => SchemaStatus::Current,
            Ordering::Equal => SchemaStatus::Corrupted,
        };
        Ok(status)
    }

    /// Stored schema version, 0 when the meta table has none
    fn get_schema_version(&self) -> Result<u32> {
        match self.get_meta("schema_version")? {
            Some(version) => version
                .parse()
                .map_err(|e| anyhow!("Ledger schema version '{}' is not a number: {}", version, e)),
            None => Ok(0),
        }
    }

    fn missing_tables(&self) -> Result<Vec<&'static str>> {
        let mut missing = vec![];
        for table in SchemaDefinitions::REQUIRED_TABLES {
            if !self.table_exists(table)? {
                missing.push(*table);
            }
        }
        Ok(missing)
    }

    fn table_exists(&self, table_name: &str) -> Result<bool> {
        self.conn
            .query_row(
                "SELECT EXISTS (SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
                [table_name],
                |row| row.get(0),
            )
            .map_err(|e| anyhow!("Failed to look up ledger table {}: {}", table_name, e))
    }

    pub fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO tidemark_meta (key, value) VALUES (?1, ?2) \
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, \
                 updated_at = strftime('%s', 'now')",
                [key, value],
            )
            .map_err(|e| anyhow!("Failed to write ledger meta '{}': {}", key, e))?;
        Ok(())
    }

    pub fn get_meta(&self, key: &str) -> Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT value FROM tidemark_meta WHERE key = ?1",
                [key],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| anyhow!("Failed to read ledger meta '{}': {}", key, e))
    }
}

/// Status of the ledger schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaStatus {
    /// No meta table yet
    NotInitialized,
    Current,
    /// Written by an older build; upgraded in place
    NeedsMigration { from: u32, to: u32 },
    /// Written by a newer build
    Incompatible {
        database_version: u32,
        required_version: u32,
    },
    /// Version matches but tables are missing
    Corrupted,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn memory() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    #[test]
    fn test_fresh_ledger_builds_to_current() {
        let conn = memory();
        let manager = SchemaManager::new(&conn);
        assert_eq!(
            manager.check_status().unwrap(),
            SchemaStatus::NotInitialized
        );

        assert_eq!(
            manager.ensure_current().unwrap(),
            SchemaStatus::NotInitialized
        );
        assert_eq!(manager.check_status().unwrap(), SchemaStatus::Current);
        assert_eq!(manager.get_schema_version().unwrap(), SCHEMA_VERSION);
        assert!(manager.missing_tables().unwrap().is_empty());
    }

    #[test]
    fn test_corrupted_schema_is_repaired_without_losing_rows() {
        let conn = memory();
        let manager = SchemaManager::new(&conn);
        manager.initialize().unwrap();

        conn.execute(
            "INSERT INTO tidemark_version (repository_path, version, entry_date, entered_by) VALUES ('/repo', '1', 0, 'me')",
            [],
        )
        .unwrap();
        conn.execute("DROP TABLE tidemark_scripts_run_errors", [])
            .unwrap();
        assert_eq!(manager.check_status().unwrap(), SchemaStatus::Corrupted);

        manager.ensure_current().unwrap();
        assert_eq!(manager.check_status().unwrap(), SchemaStatus::Current);

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM tidemark_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_older_schema_needs_migration() {
        let conn = memory();
        let manager = SchemaManager::new(&conn);
        manager.initialize().unwrap();
        manager.set_meta("schema_version", "0").unwrap();

        assert_eq!(
            manager.check_status().unwrap(),
            SchemaStatus::NeedsMigration {
                from: 0,
                to: SCHEMA_VERSION
            }
        );
        manager.ensure_current().unwrap();
        assert_eq!(manager.check_status().unwrap(), SchemaStatus::Current);
    }

    #[test]
    fn test_newer_schema_is_refused() {
        let conn = memory();
        let manager = SchemaManager::new(&conn);
        manager.initialize().unwrap();
        manager
            .set_meta("schema_version", &(SCHEMA_VERSION + 1).to_string())
            .unwrap();

        assert!(manager.ensure_current().is_err());
    }

    #[test]
    fn test_meta_values_overwrite() {
        let conn = memory();
        let manager = SchemaManager::new(&conn);
        manager.initialize().unwrap();

        manager.set_meta("owner", "ops").unwrap();
        manager.set_meta("owner", "dba").unwrap();
        assert_eq!(manager.get_meta("owner").unwrap().as_deref(), Some("dba"));
        assert_eq!(manager.get_meta("absent").unwrap(), None);
    }
}
