//! SQLite provider
//!
//! SQLite has no server to talk to, so the administrative connection is a
//! scratch connection (`:memory:` by default) and the administrative scripts
//! reach the target file by attaching it.

use super::{quote_literal, Provider};
use crate::config::TidemarkConfig;
use crate::database::core::{
    ConnectionState, DriverError, NativeConnection, ScalarValue, SqlCommand,
};
use crate::splitter;
use rusqlite::types::{ToSqlOutput, Value};
use rusqlite::{ffi, Connection, ToSql};
use std::path::Path;
use tracing::debug;

const ATTACH_ALIAS: &str = "tidemark_target";

/// Provider for SQLite databases backed by `rusqlite`
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteProvider;

impl SqliteProvider {
    fn attach(config: &TidemarkConfig) -> String {
        format!(
            "ATTACH DATABASE {} AS {}",
            quote_literal(&config.connection_string),
            ATTACH_ALIAS
        )
    }

    fn detach() -> String {
        format!("DETACH DATABASE {}", ATTACH_ALIAS)
    }

    fn is_in_memory(path: &str) -> bool {
        path == ":memory:" || path.starts_with("file::memory:")
    }
}

impl Provider for SqliteProvider {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn create_connection(&self, connection_string: &str) -> Box<dyn NativeConnection> {
        Box::new(SqliteConnection::new(connection_string))
    }

    fn is_transient(&self, error: &DriverError) -> bool {
        // extended result codes keep the primary code in the low byte
        error
            .code
            .map(|code| code & 0xff == ffi::SQLITE_BUSY)
            .unwrap_or(false)
    }

    fn create_database_script(&self, config: &TidemarkConfig) -> Option<String> {
        let target = config.connection_string.as_str();
        if Self::is_in_memory(target) || Path::new(target).exists() {
            return Some("SELECT 0;".to_string());
        }

        Some(format!(
            "{attach};\nCREATE TABLE {alias}.tidemark_created (id INTEGER);\nDROP TABLE {alias}.tidemark_created;\n{detach};\nSELECT 1;",
            attach = Self::attach(config),
            alias = ATTACH_ALIAS,
            detach = Self::detach(),
        ))
    }

    fn delete_database_script(&self, _config: &TidemarkConfig) -> Option<String> {
        None
    }

    fn set_recovery_mode_script(&self, config: &TidemarkConfig, simple: bool) -> Option<String> {
        let mode = if simple { "DELETE" } else { "WAL" };
        Some(format!(
            "{};\nPRAGMA {}.journal_mode = {};\n{};",
            Self::attach(config),
            ATTACH_ALIAS,
            mode,
            Self::detach()
        ))
    }

    fn backup_database_script(&self, config: &TidemarkConfig, output_dir: &str) -> Option<String> {
        let file_name = format!(
            "{}_{}.bak",
            config.database_name,
            chrono::Utc::now().format("%Y%m%d_%H%M%S")
        );
        let output = Path::new(output_dir).join(file_name);

        Some(format!(
            "{};\nVACUUM {} INTO {};\n{};",
            Self::attach(config),
            ATTACH_ALIAS,
            quote_literal(&output.to_string_lossy()),
            Self::detach()
        ))
    }

    fn restore_database_script(
        &self,
        _config: &TidemarkConfig,
        _restore_from_path: &str,
        _custom_restore_options: &str,
    ) -> Option<String> {
        None
    }
}

/// Native SQLite connection
///
/// The handle keeps its path so it can be closed and opened again. Closing an
/// in-memory database discards its contents.
pub struct SqliteConnection {
    path: String,
    conn: Option<Connection>,
}

impl SqliteConnection {
    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            conn: None,
        }
    }

    fn conn(&self) -> Result<&Connection, DriverError> {
        self.conn
            .as_ref()
            .ok_or_else(|| DriverError::new(format!("connection to '{}' is closed", self.path)))
    }

    fn prepare_for(&self, command: &SqlCommand) -> Result<&Connection, DriverError> {
        let conn = self.conn()?;
        conn.busy_timeout(command.timeout).map_err(driver_error)?;
        Ok(conn)
    }
}

impl NativeConnection for SqliteConnection {
    fn open(&mut self) -> Result<(), DriverError> {
        if self.conn.is_some() {
            return Ok(());
        }
        let conn = Connection::open(&self.path).map_err(driver_error)?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(driver_error)?;
        self.conn = Some(conn);
        Ok(())
    }

    fn close(&mut self) -> Result<(), DriverError> {
        match self.conn.take() {
            Some(conn) => conn.close().map_err(|(_, e)| driver_error(e)),
            None => Ok(()),
        }
    }

    fn state(&self) -> ConnectionState {
        if self.conn.is_some() {
            ConnectionState::Open
        } else {
            ConnectionState::Closed
        }
    }

    fn begin_transaction(&mut self) -> Result<(), DriverError> {
        self.conn()?.execute_batch("BEGIN").map_err(driver_error)
    }

    fn commit(&mut self) -> Result<(), DriverError> {
        self.conn()?.execute_batch("COMMIT").map_err(driver_error)
    }

    fn rollback(&mut self) -> Result<(), DriverError> {
        self.conn()?.execute_batch("ROLLBACK").map_err(driver_error)
    }

    fn execute_nonquery(&mut self, command: &SqlCommand) -> Result<usize, DriverError> {
        let conn = self.prepare_for(command)?;

        if command.parameters.is_empty() {
            conn.execute_batch(&command.sql).map_err(driver_error)?;
            return Ok(conn.changes() as usize);
        }

        let mut stmt = conn.prepare(&command.sql).map_err(driver_error)?;
        let names: Vec<String> = command
            .parameters
            .iter()
            .map(|p| parameter_name(&p.name))
            .collect();
        let bound: Vec<(&str, &dyn ToSql)> = names
            .iter()
            .zip(command.parameters.iter())
            .map(|(name, p)| (name.as_str(), &p.value as &dyn ToSql))
            .collect();
        stmt.execute(bound.as_slice()).map_err(driver_error)
    }

    fn execute_scalar(&mut self, command: &SqlCommand) -> Result<ScalarValue, DriverError> {
        let conn = self.prepare_for(command)?;

        // rusqlite prepares one statement at a time; run everything before the
        // final statement as a batch and read the value from the last one
        let mut statements = splitter::split(&command.sql, splitter::DEFAULT_STATEMENT_SEPARATOR);
        let last = match statements.pop() {
            Some(last) => last,
            None => return Ok(ScalarValue::Null),
        };
        for sql in &statements {
            conn.execute_batch(sql).map_err(driver_error)?;
        }

        let mut stmt = conn.prepare(&last).map_err(driver_error)?;
        for p in &command.parameters {
            let name = parameter_name(&p.name);
            if let Some(index) = stmt.parameter_index(&name).map_err(driver_error)? {
                stmt.raw_bind_parameter(index, &p.value)
                    .map_err(driver_error)?;
            }
        }

        let mut rows = stmt.raw_query();
        match rows.next().map_err(driver_error)? {
            Some(row) => row
                .get::<_, Value>(0)
                .map(scalar_from_value)
                .map_err(driver_error),
            None => Ok(ScalarValue::Null),
        }
    }
}

impl ToSql for ScalarValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let value = match self {
            ScalarValue::Null => Value::Null,
            ScalarValue::Integer(i) => Value::Integer(*i),
            ScalarValue::Real(r) => Value::Real(*r),
            ScalarValue::Text(s) => Value::Text(s.clone()),
            ScalarValue::Blob(b) => Value::Blob(b.clone()),
        };
        Ok(ToSqlOutput::Owned(value))
    }
}

fn scalar_from_value(value: Value) -> ScalarValue {
    match value {
        Value::Null => ScalarValue::Null,
        Value::Integer(i) => ScalarValue::Integer(i),
        Value::Real(r) => ScalarValue::Real(r),
        Value::Text(s) => ScalarValue::Text(s),
        Value::Blob(b) => ScalarValue::Blob(b),
    }
}

fn parameter_name(name: &str) -> String {
    if name.starts_with([':', '@', '$']) {
        name.to_string()
    } else {
        format!(":{}", name)
    }
}

fn driver_error(e: rusqlite::Error) -> DriverError {
    debug!("SQLite driver error: {}", e);
    match &e {
        rusqlite::Error::SqliteFailure(failure, _) => {
            DriverError::with_code(failure.extended_code, e.to_string())
        }
        _ => DriverError::new(e.to_string()),
    }
}
