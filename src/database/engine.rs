//! Migration database engine
//!
//! `Database` owns the administrative and operational connections, the
//! transaction bound to the operational connection, and the ledger. It is the
//! single entry point a migration run drives:
//!
//! ```rust,ignore
//! use tidemark::database::{ConnectionKind, Database};
//! use tidemark::TidemarkConfig;
//!
//! let mut db = Database::from_config(TidemarkConfig::new(&None)?)?;
//! db.open_connection(true)?;
//! db.create_or_update_ledger_tables()?;
//! db.run_sql("CREATE TABLE t (id INTEGER)", ConnectionKind::Operational)?;
//! db.close_connection()?;
//! ```

use super::core::{
    ConnectionKind, DatabaseConn, DriverError, NativeConnection, ScalarValue, SqlCommand,
    SqlParameter, TransactionHandle,
};
use super::error::ExecutionError;
use super::ledger::{Ledger, MigrationRepository, ScriptRun, ScriptRunError, SqliteLedgerRepository};
use super::provider::{provider_for, Provider};
use crate::config::TidemarkConfig;
use crate::splitter::StatementSplitter;
use crate::tokens::replace_tokens;
use anyhow::{anyhow, Result};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Connection lifecycle, SQL execution, rollback, and ledger access
pub struct Database {
    config: TidemarkConfig,
    provider: Box<dyn Provider>,
    admin: Option<DatabaseConn>,
    operational: Option<DatabaseConn>,
    transaction: Option<TransactionHandle>,
    next_transaction_id: u64,
    ledger: Ledger,
    admin_command_timeout: Duration,
    splitter: StatementSplitter,
}

impl Database {
    pub fn new(
        config: TidemarkConfig,
        provider: Box<dyn Provider>,
        repository: Box<dyn MigrationRepository>,
    ) -> Self {
        let ledger = Ledger::new(repository, &config.user_name);
        let splitter =
            StatementSplitter::new(&config.statement_separator, config.split_batch_statements);
        let admin_command_timeout = config.admin_command_timeout();

        Self {
            config,
            provider,
            admin: None,
            operational: None,
            transaction: None,
            next_transaction_id: 0,
            ledger,
            admin_command_timeout,
            splitter,
        }
    }

    /// Engine for the configured provider with the SQLite ledger
    pub fn from_config(config: TidemarkConfig) -> Result<Self> {
        let provider = provider_for(&config.provider)?;
        let repository = SqliteLedgerRepository::new(&config.ledger_connection_string);
        Ok(Self::new(config, provider, Box::new(repository)))
    }

    pub fn config(&self) -> &TidemarkConfig {
        &self.config
    }

    pub fn provider(&self) -> &dyn Provider {
        self.provider.as_ref()
    }

    pub fn splitter(&self) -> &StatementSplitter {
        &self.splitter
    }

    pub fn active_transaction(&self) -> Option<TransactionHandle> {
        self.transaction
    }

    pub fn is_open(&self, kind: ConnectionKind) -> bool {
        self.connection(kind).map(|c| c.is_open()).unwrap_or(false)
    }

    // ------------------------------------------------------------------
    // Connection lifecycle
    // ------------------------------------------------------------------

    pub fn open_admin_connection(&mut self) -> Result<()> {
        if self.is_open(ConnectionKind::Admin) {
            return Ok(());
        }
        if let Some(stale) = self.admin.take() {
            discard(stale);
        }

        let target = self.config.admin_connection_string.clone();
        let native = self.provider.create_connection(&target);
        let conn = DatabaseConn::open(ConnectionKind::Admin, &target, native)
            .map_err(|e| anyhow!("Failed to open admin connection to '{}': {}", target, e))?;
        self.admin = Some(conn);
        Ok(())
    }

    pub fn close_admin_connection(&mut self) -> Result<()> {
        match self.admin.take() {
            Some(conn) => conn
                .shutdown()
                .map_err(|e| anyhow!("Failed to close admin connection: {}", e)),
            None => Ok(()),
        }
    }

    /// Open the operational connection and start the ledger session
    ///
    /// An operational connection that is already open is closed (and its
    /// transaction committed) first.
    pub fn open_connection(&mut self, with_transaction: bool) -> Result<()> {
        if self.operational.is_some() {
            debug!("Operational connection already open, closing it first");
            self.close_connection()?;
        }

        let target = self.config.connection_string.clone();
        let native = self.provider.create_connection(&target);
        let mut conn = DatabaseConn::open(ConnectionKind::Operational, &target, native)
            .map_err(|e| anyhow!("Failed to open connection to '{}': {}", target, e))?;

        if with_transaction {
            conn.native()
                .begin_transaction()
                .map_err(|e| anyhow!("Failed to begin transaction: {}", e))?;
            self.transaction = Some(self.new_transaction());
        }
        self.operational = Some(conn);

        self.ledger.start(with_transaction)
    }

    /// Commit the active transaction, finish the ledger session, and close
    pub fn close_connection(&mut self) -> Result<()> {
        let Some(mut conn) = self.operational.take() else {
            return Ok(());
        };

        if let Some(tx) = self.transaction.take() {
            debug!("Committing transaction {}", tx.id());
            if let Err(e) = conn.native().commit() {
                discard(conn);
                return Err(anyhow!("Failed to commit transaction: {}", e));
            }
        }

        self.ledger.finish()?;
        conn.shutdown()
            .map_err(|e| anyhow!("Failed to close connection: {}", e))
    }

    /// Discard the active transaction and continue in a fresh one
    ///
    /// Without an active transaction only the ledger session is rolled back;
    /// statements that already ran stay applied.
    pub fn rollback(&mut self) -> Result<()> {
        self.ledger.rollback()?;

        let Some(old) = self.transaction.take() else {
            debug!("Rollback requested without an active transaction");
            return Ok(());
        };
        let Some(conn) = self.operational.as_mut() else {
            return Err(anyhow!("Transaction {} has no operational connection", old.id()));
        };

        debug!("Rolling back transaction {}", old.id());
        conn.native()
            .rollback()
            .map_err(|e| anyhow!("Failed to roll back transaction: {}", e))?;
        conn.reopen()
            .map_err(|e| anyhow!("Failed to reopen connection after rollback: {}", e))?;
        conn.native()
            .begin_transaction()
            .map_err(|e| anyhow!("Failed to begin transaction: {}", e))?;

        let tx = self.new_transaction();
        debug!("Continuing in transaction {}", tx.id());
        self.transaction = Some(tx);
        self.ledger.start(true)
    }

    fn new_transaction(&mut self) -> TransactionHandle {
        self.next_transaction_id += 1;
        TransactionHandle::new(self.next_transaction_id)
    }

    fn connection(&self, kind: ConnectionKind) -> Option<&DatabaseConn> {
        match kind {
            ConnectionKind::Admin => self.admin.as_ref(),
            ConnectionKind::Operational => self.operational.as_ref(),
        }
    }

    /// Reopen the connection a command needs if it is missing or dropped
    fn ensure_open(&mut self, kind: ConnectionKind) -> Result<(), ExecutionError> {
        if self.is_open(kind) {
            return Ok(());
        }

        debug!("{} connection is not open, opening it", kind);
        let opened = match kind {
            ConnectionKind::Admin => self.open_admin_connection(),
            ConnectionKind::Operational => {
                if let Some(stale) = self.operational.take() {
                    if let Some(tx) = self.transaction.take() {
                        warn!(
                            "Transaction {} was lost with its connection, discarding its ledger writes",
                            tx.id()
                        );
                        if let Err(e) = self.ledger.rollback() {
                            warn!("Failed to roll back ledger session: {}", e);
                        }
                    }
                    discard(stale);
                }
                self.open_connection(false)
            }
        };

        opened.map_err(|e| ExecutionError::Connect {
            kind,
            source: DriverError::new(format!("{:#}", e)),
        })
    }

    // ------------------------------------------------------------------
    // SQL execution
    // ------------------------------------------------------------------

    pub fn run_sql(&mut self, sql: &str, kind: ConnectionKind) -> Result<(), ExecutionError> {
        self.run_sql_with_params(sql, kind, &[]).map(|_| ())
    }

    /// Run a non-query command, returning the affected row count
    ///
    /// Blank SQL is a no-op.
    pub fn run_sql_with_params(
        &mut self,
        sql: &str,
        kind: ConnectionKind,
        parameters: &[SqlParameter],
    ) -> Result<usize, ExecutionError> {
        if sql.trim().is_empty() {
            return Ok(0);
        }
        self.execute(sql, kind, parameters, |native, command| {
            native.execute_nonquery(command)
        })
    }

    pub fn run_sql_scalar(
        &mut self,
        sql: &str,
        kind: ConnectionKind,
    ) -> Result<Option<ScalarValue>, ExecutionError> {
        self.run_sql_scalar_with_params(sql, kind, &[])
    }

    /// Run a scalar command
    ///
    /// Returns `None` for blank SQL without touching the connection.
    pub fn run_sql_scalar_with_params(
        &mut self,
        sql: &str,
        kind: ConnectionKind,
        parameters: &[SqlParameter],
    ) -> Result<Option<ScalarValue>, ExecutionError> {
        if sql.trim().is_empty() {
            return Ok(None);
        }
        self.execute(sql, kind, parameters, |native, command| {
            native.execute_scalar(command)
        })
        .map(Some)
    }

    /// Scalar read as a boolean, `None` when there is no boolean reading
    pub fn run_sql_scalar_boolean(
        &mut self,
        sql: &str,
        kind: ConnectionKind,
    ) -> Result<Option<bool>, ExecutionError> {
        Ok(self
            .run_sql_scalar(sql, kind)?
            .and_then(|value| value.as_bool()))
    }

    fn execute<T>(
        &mut self,
        sql: &str,
        kind: ConnectionKind,
        parameters: &[SqlParameter],
        run: impl Fn(&mut dyn NativeConnection, &SqlCommand) -> Result<T, DriverError>,
    ) -> Result<T, ExecutionError> {
        self.ensure_open(kind)?;

        let in_transaction = self.transaction.is_some();
        let command = SqlCommand {
            sql: sql.to_string(),
            timeout: match kind {
                ConnectionKind::Admin => self.admin_command_timeout,
                ConnectionKind::Operational => self.config.command_timeout(),
            },
            parameters: parameters.to_vec(),
            transactional: kind == ConnectionKind::Operational && in_transaction,
        };

        let conn = match kind {
            ConnectionKind::Admin => self.admin.as_mut(),
            ConnectionKind::Operational => self.operational.as_mut(),
        }
        .ok_or_else(|| ExecutionError::Connect {
            kind,
            source: DriverError::new("connection is not available"),
        })?;

        debug!("[SQL] Running (on connection '{}'): \n{}", kind, sql);

        let error = match run(conn.native(), &command) {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        let provider = self.provider.as_ref();
        let error = if !in_transaction && error.error_count == 1 && provider.is_transient(&error) {
            debug!(
                "Failure executing command, trying again. {}\n{}",
                error, sql
            );
            match run(conn.native(), &command) {
                Ok(value) => return Ok(value),
                Err(e) => e,
            }
        } else {
            error
        };

        if provider.is_transient(&error) {
            Err(ExecutionError::Transient {
                kind,
                source: error,
            })
        } else {
            Err(ExecutionError::Fatal {
                kind,
                source: error,
            })
        }
    }

    // ------------------------------------------------------------------
    // Administrative facilities
    // ------------------------------------------------------------------

    /// Create the target database unless it exists
    ///
    /// A non-blank `custom_script` replaces the provider's script. Returns
    /// whether the database was created; failures are logged and reported as
    /// `false`.
    pub fn create_database_if_it_doesnt_exist(&mut self, custom_script: &str) -> bool {
        let script = if !custom_script.trim().is_empty() {
            if self.config.disable_token_replacement {
                custom_script.to_string()
            } else {
                match replace_tokens(custom_script, &self.config) {
                    Ok(script) => script,
                    Err(e) => {
                        self.warn_no_facility("creating a database", &e.to_string());
                        return false;
                    }
                }
            }
        } else {
            match self.provider.create_database_script(&self.config) {
                Some(script) => script,
                None => {
                    self.warn_no_facility("creating a database", "no script for this provider");
                    return false;
                }
            }
        };

        let mut created = false;
        for statement in self.splitter.split(&script) {
            match self.run_sql_scalar_boolean(&statement, ConnectionKind::Admin) {
                Ok(Some(value)) => created = value,
                Ok(None) => {}
                Err(e) => {
                    self.warn_no_facility("creating a database", &e.to_string());
                    return false;
                }
            }
        }

        if created {
            info!("Created database {}", self.config.database_name);
        }
        created
    }

    pub fn set_recovery_mode(&mut self, simple: bool) {
        let script = self.provider.set_recovery_mode_script(&self.config, simple);
        self.run_admin_facility(script, "setting the recovery mode");
    }

    pub fn backup_database(&mut self, output_path: &str) {
        let script = self.provider.backup_database_script(&self.config, output_path);
        self.run_admin_facility(script, "backing up a database");
    }

    /// Restore with the admin timeout raised to the restore timeout
    pub fn restore_database(&mut self, restore_from_path: &str, custom_restore_options: &str) {
        let script = self.provider.restore_database_script(
            &self.config,
            restore_from_path,
            custom_restore_options,
        );

        let previous_timeout = self.admin_command_timeout;
        self.admin_command_timeout = self.config.restore_timeout();
        info!("Restoring {} from {}", self.config.database_name, restore_from_path);
        self.run_admin_facility(script, "restoring a database");
        self.admin_command_timeout = previous_timeout;
    }

    pub fn delete_database_if_it_exists(&mut self) -> Result<()> {
        let result = match self.provider.delete_database_script(&self.config) {
            Some(script) => self
                .run_sql(&script, ConnectionKind::Admin)
                .map_err(anyhow::Error::from),
            None => Err(anyhow!("no script for this provider")),
        };

        result.map_err(|e| {
            error!(
                "{} with provider {} does not provide a facility for deleting a database at this time.\n{}",
                self.config.database_name,
                self.provider.name(),
                e
            );
            e
        })
    }

    /// Build or upgrade the ledger's own storage
    pub fn create_or_update_ledger_tables(&mut self) -> Result<()> {
        self.ledger.ensure_storage()
    }

    fn run_admin_facility(&mut self, script: Option<String>, facility: &str) {
        let Some(script) = script else {
            self.warn_no_facility(facility, "no script for this provider");
            return;
        };
        if let Err(e) = self.run_sql(&script, ConnectionKind::Admin) {
            self.warn_no_facility(facility, &e.to_string());
        }
    }

    fn warn_no_facility(&self, facility: &str, reason: &str) {
        warn!(
            "{} with provider {} does not provide a facility for {} at this time.\n{}",
            self.config.database_name,
            self.provider.name(),
            facility,
            reason
        );
    }

    // ------------------------------------------------------------------
    // Ledger
    // ------------------------------------------------------------------

    pub fn has_run_script_already(&mut self, script_name: &str) -> Result<bool> {
        self.ledger.has_run(script_name)
    }

    pub fn get_current_script_hash(&mut self, script_name: &str) -> Option<String> {
        self.ledger.current_hash(script_name)
    }

    pub fn insert_script_run(
        &mut self,
        script_name: &str,
        sql: &str,
        hash: &str,
        run_once: bool,
        version_id: i64,
    ) -> Result<i64> {
        self.ledger
            .record_run(script_name, sql, hash, run_once, version_id)
    }

    pub fn insert_script_run_error(
        &mut self,
        script_name: &str,
        sql: &str,
        erroneous_part: &str,
        error_message: &str,
        version_label: &str,
        repository_path: &str,
    ) -> Result<i64> {
        self.ledger.record_error(
            script_name,
            sql,
            erroneous_part,
            error_message,
            version_label,
            repository_path,
        )
    }

    pub fn get_version(&self, repository_path: &str) -> String {
        self.ledger.get_version(repository_path)
    }

    pub fn insert_version_and_get_version_id(
        &mut self,
        repository_path: &str,
        version_label: &str,
    ) -> Result<i64> {
        self.ledger.insert_version(repository_path, version_label)
    }

    pub fn script_runs(&self) -> Result<Vec<ScriptRun>> {
        self.ledger.script_runs()
    }

    pub fn script_run_errors(&self) -> Result<Vec<ScriptRunError>> {
        self.ledger.script_run_errors()
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if let Some(tx) = self.transaction.take() {
            debug!("Discarding uncommitted transaction {}", tx.id());
        }
        if let Some(conn) = self.operational.take() {
            discard(conn);
        }
        if let Some(conn) = self.admin.take() {
            discard(conn);
        }
    }
}

fn discard(conn: DatabaseConn) {
    let kind = conn.kind();
    if let Err(e) = conn.shutdown() {
        debug!("Failed to close {} connection: {}", kind, e);
    }
}
