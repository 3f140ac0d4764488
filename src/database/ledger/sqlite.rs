//! SQLite-backed migration repository
//!
//! The ledger lives in its own SQLite file. Keeping it apart from the target
//! database lets the ledger session commit independently of the operational
//! transaction without the two fighting over SQLite's write lock.

use super::{LedgerRecord, MigrationRepository, ScriptRun, ScriptRunError, Version};
use crate::database::core::SchemaManager;
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

struct LedgerSession {
    conn: Connection,
    transactional: bool,
}

/// Ledger repository stored in a SQLite file
pub struct SqliteLedgerRepository {
    path: PathBuf,
    session: Option<LedgerSession>,
}

impl SqliteLedgerRepository {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            session: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn in_session(&self) -> bool {
        self.session.is_some()
    }

    fn connect(&self) -> Result<Connection> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    anyhow!(
                        "Failed to create ledger directory '{}': {}",
                        parent.display(),
                        e
                    )
                })?;
            }
        }

        let conn = Connection::open(&self.path).map_err(|e| {
            anyhow!(
                "Failed to open ledger at '{}': {}",
                self.path.display(),
                e
            )
        })?;
        SchemaManager::new(&conn).ensure_current()?;
        Ok(conn)
    }

    /// Run `f` on the session connection, or on a short-lived one outside a session
    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        match &self.session {
            Some(session) => f(&session.conn),
            None => {
                let conn = self.connect()?;
                f(&conn)
            }
        }
    }

    fn end_session(&mut self, statement: &str) -> Result<()> {
        let session = match self.session.take() {
            Some(session) => session,
            None => return Ok(()),
        };

        if session.transactional {
            session
                .conn
                .execute_batch(statement)
                .map_err(|e| anyhow!("Failed to {} ledger session: {}", statement, e))?;
        }
        session
            .conn
            .close()
            .map_err(|(_, e)| anyhow!("Failed to close ledger: {}", e))
    }
}

impl MigrationRepository for SqliteLedgerRepository {
    fn start(&mut self, transactional: bool) -> Result<()> {
        if self.session.is_some() {
            debug!("Ledger session already open, finishing it first");
            self.end_session("COMMIT")?;
        }

        let conn = self.connect()?;
        if transactional {
            conn.execute_batch("BEGIN")
                .map_err(|e| anyhow!("Failed to begin ledger transaction: {}", e))?;
        }
        self.session = Some(LedgerSession {
            conn,
            transactional,
        });
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.end_session("COMMIT")
    }

    fn rollback(&mut self) -> Result<()> {
        self.end_session("ROLLBACK")
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.with_conn(|conn| {
            let status = SchemaManager::new(conn).ensure_current()?;
            info!("Ledger schema at {} is ready ({:?})", self.path.display(), status);
            Ok(())
        })
    }

    fn save(&mut self, record: LedgerRecord) -> Result<i64> {
        self.with_conn(|conn| {
            let inserted = match &record {
                LedgerRecord::ScriptRun(run) => conn.execute(
                    "INSERT INTO tidemark_scripts_run \
                     (version_id, script_name, text_of_script, text_hash, one_time_script, entry_date, entered_by) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        run.version_id,
                        run.script_name,
                        run.text_of_script,
                        run.text_hash,
                        run.one_time_script,
                        run.entry_date.timestamp_millis(),
                        run.entered_by,
                    ],
                ),
                LedgerRecord::ScriptRunError(err) => conn.execute(
                    "INSERT INTO tidemark_scripts_run_errors \
                     (repository_path, version, script_name, text_of_script, erroneous_part_of_script, error_message, entry_date, entered_by) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        err.repository_path,
                        err.version,
                        err.script_name,
                        err.text_of_script,
                        err.erroneous_part_of_script,
                        err.error_message,
                        err.entry_date.timestamp_millis(),
                        err.entered_by,
                    ],
                ),
                LedgerRecord::Version(version) => conn.execute(
                    "INSERT INTO tidemark_version (repository_path, version, entry_date, entered_by) \
                     VALUES (?1, ?2, ?3, ?4)",
                    params![
                        version.repository_path,
                        version.version,
                        version.entry_date.timestamp_millis(),
                        version.entered_by,
                    ],
                ),
            };
            inserted.map_err(|e| anyhow!("Failed to save {}: {}", record.kind(), e))?;

            Ok(conn.last_insert_rowid())
        })
    }

    fn all_script_runs(&self) -> Result<Vec<ScriptRun>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, version_id, script_name, text_of_script, text_hash, one_time_script, entry_date, entered_by \
                 FROM tidemark_scripts_run ORDER BY id",
            )?;
            let runs = stmt
                .query_map([], script_run_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(runs)
        })
    }

    fn latest_script_run(&self, script_name: &str) -> Result<Option<ScriptRun>> {
        self.with_conn(|conn| {
            let run = conn
                .query_row(
                    "SELECT id, version_id, script_name, text_of_script, text_hash, one_time_script, entry_date, entered_by \
                     FROM tidemark_scripts_run WHERE script_name = ?1 ORDER BY id DESC LIMIT 1",
                    [script_name],
                    script_run_from_row,
                )
                .optional()?;
            Ok(run)
        })
    }

    fn latest_version(&self, repository_path: &str) -> Result<Option<Version>> {
        self.with_conn(|conn| {
            let version = conn
                .query_row(
                    "SELECT id, repository_path, version, entry_date, entered_by \
                     FROM tidemark_version WHERE repository_path = ?1 \
                     ORDER BY entry_date DESC, id DESC LIMIT 1",
                    [repository_path],
                    |row| {
                        Ok(Version {
                            id: row.get(0)?,
                            repository_path: row.get(1)?,
                            version: row.get(2)?,
                            entry_date: from_millis(row.get(3)?),
                            entered_by: row.get(4)?,
                        })
                    },
                )
                .optional()?;
            Ok(version)
        })
    }

    fn all_script_run_errors(&self) -> Result<Vec<ScriptRunError>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, repository_path, version, script_name, text_of_script, erroneous_part_of_script, \
                 error_message, entry_date, entered_by \
                 FROM tidemark_scripts_run_errors ORDER BY id",
            )?;
            let errors = stmt
                .query_map([], |row| {
                    Ok(ScriptRunError {
                        id: row.get(0)?,
                        repository_path: row.get(1)?,
                        version: row.get(2)?,
                        script_name: row.get(3)?,
                        text_of_script: row.get(4)?,
                        erroneous_part_of_script: row.get(5)?,
                        error_message: row.get(6)?,
                        entry_date: from_millis(row.get(7)?),
                        entered_by: row.get(8)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(errors)
        })
    }
}

impl Drop for SqliteLedgerRepository {
    fn drop(&mut self) {
        // an abandoned session keeps nothing it did not commit
        if let Err(e) = self.end_session("ROLLBACK") {
            debug!("Failed to discard ledger session: {}", e);
        }
    }
}

fn script_run_from_row(row: &Row) -> rusqlite::Result<ScriptRun> {
    Ok(ScriptRun {
        id: row.get(0)?,
        version_id: row.get(1)?,
        script_name: row.get(2)?,
        text_of_script: row.get(3)?,
        text_hash: row.get(4)?,
        one_time_script: row.get(5)?,
        entry_date: from_millis(row.get(6)?),
        entered_by: row.get(7)?,
    })
}

fn from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}
