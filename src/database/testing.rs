//! Test doubles for the engine and the ledger
//!
//! `ScriptedProvider` hands out native connections that log every call and
//! replay queued failures. `MemoryRepository` keeps ledger records in memory and
//! counts queries so cache behaviour can be asserted.

use crate::config::TidemarkConfig;
use crate::database::core::{
    ConnectionState, DriverError, NativeConnection, ScalarValue, SqlCommand,
};
use crate::database::ledger::{
    LedgerRecord, MigrationRepository, ScriptRun, ScriptRunError, Version,
};
use crate::database::provider::Provider;
use anyhow::{anyhow, Result};
use chrono::Utc;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

/// Error code the scripted provider treats as a dropped connection
pub const TRANSIENT_CODE: i32 = 233;

pub fn transient_error() -> DriverError {
    DriverError::with_code(TRANSIENT_CODE, "transport-level error: connection was dropped")
}

pub fn fatal_error() -> DriverError {
    DriverError::with_code(102, "incorrect syntax")
}

#[derive(Default)]
struct ScriptedState {
    events: Vec<String>,
    executed: Vec<SqlCommand>,
    failures: VecDeque<Option<DriverError>>,
    scalars: VecDeque<ScalarValue>,
    generation: u64,
    fail_open: bool,
}

/// Provider whose connections are driven by the test
#[derive(Clone, Default)]
pub struct ScriptedProvider {
    state: Rc<RefCell<ScriptedState>>,
    no_ddl_transactions: bool,
    no_facilities: bool,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn without_ddl_transactions(mut self) -> Self {
        self.no_ddl_transactions = true;
        self
    }

    pub fn without_facilities(mut self) -> Self {
        self.no_facilities = true;
        self
    }

    /// Fail the next execute call with `error`
    pub fn fail_next(&self, error: DriverError) {
        self.state.borrow_mut().failures.push_back(Some(error));
    }

    /// Let the next execute call succeed before any queued failure
    pub fn pass_next(&self) {
        self.state.borrow_mut().failures.push_back(None);
    }

    pub fn return_scalar(&self, value: ScalarValue) {
        self.state.borrow_mut().scalars.push_back(value);
    }

    pub fn fail_open(&self, fail: bool) {
        self.state.borrow_mut().fail_open = fail;
    }

    /// Invalidate every open connection, as a server restart would
    pub fn drop_connections(&self) {
        self.state.borrow_mut().generation += 1;
    }

    pub fn events(&self) -> Vec<String> {
        self.state.borrow().events.clone()
    }

    pub fn clear_events(&self) {
        self.state.borrow_mut().events.clear();
    }

    pub fn executed(&self) -> Vec<SqlCommand> {
        self.state.borrow().executed.clone()
    }

    pub fn executed_sql(&self) -> Vec<String> {
        self.state
            .borrow()
            .executed
            .iter()
            .map(|c| c.sql.clone())
            .collect()
    }

    pub fn attempts(&self) -> usize {
        self.state.borrow().executed.len()
    }
}

impl Provider for ScriptedProvider {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn create_connection(&self, connection_string: &str) -> Box<dyn NativeConnection> {
        Box::new(ScriptedConnection {
            target: connection_string.to_string(),
            state: Rc::clone(&self.state),
            opened_at: None,
        })
    }

    fn is_transient(&self, error: &DriverError) -> bool {
        error.code == Some(TRANSIENT_CODE)
    }

    fn supports_ddl_transactions(&self) -> bool {
        !self.no_ddl_transactions
    }

    fn create_database_script(&self, config: &TidemarkConfig) -> Option<String> {
        (!self.no_facilities).then(|| format!("CREATE DATABASE {}", config.database_name))
    }

    fn delete_database_script(&self, config: &TidemarkConfig) -> Option<String> {
        (!self.no_facilities).then(|| format!("DROP DATABASE {}", config.database_name))
    }

    fn set_recovery_mode_script(&self, config: &TidemarkConfig, simple: bool) -> Option<String> {
        let mode = if simple { "SIMPLE" } else { "FULL" };
        (!self.no_facilities)
            .then(|| format!("ALTER DATABASE {} SET RECOVERY {}", config.database_name, mode))
    }

    fn backup_database_script(&self, config: &TidemarkConfig, output_dir: &str) -> Option<String> {
        (!self.no_facilities)
            .then(|| format!("BACKUP DATABASE {} TO '{}'", config.database_name, output_dir))
    }

    fn restore_database_script(
        &self,
        config: &TidemarkConfig,
        restore_from_path: &str,
        custom_restore_options: &str,
    ) -> Option<String> {
        (!self.no_facilities).then(|| {
            format!(
                "RESTORE DATABASE {} FROM '{}' {}",
                config.database_name, restore_from_path, custom_restore_options
            )
        })
    }
}

pub struct ScriptedConnection {
    target: String,
    state: Rc<RefCell<ScriptedState>>,
    opened_at: Option<u64>,
}

impl ScriptedConnection {
    fn log(&self, event: &str) {
        self.state
            .borrow_mut()
            .events
            .push(format!("{}:{}", event, self.target));
    }

    fn record(&self, command: &SqlCommand) -> Result<(), DriverError> {
        let mut state = self.state.borrow_mut();
        state.executed.push(command.clone());
        match state.failures.pop_front() {
            Some(Some(error)) => Err(error),
            _ => Ok(()),
        }
    }
}

impl NativeConnection for ScriptedConnection {
    fn open(&mut self) -> Result<(), DriverError> {
        if self.state.borrow().fail_open {
            return Err(DriverError::new(format!("cannot reach '{}'", self.target)));
        }
        self.opened_at = Some(self.state.borrow().generation);
        self.log("open");
        Ok(())
    }

    fn close(&mut self) -> Result<(), DriverError> {
        self.opened_at = None;
        self.log("close");
        Ok(())
    }

    fn clear_pool(&mut self) {
        self.log("clear_pool");
    }

    fn state(&self) -> ConnectionState {
        match self.opened_at {
            Some(generation) if generation == self.state.borrow().generation => {
                ConnectionState::Open
            }
            _ => ConnectionState::Closed,
        }
    }

    fn begin_transaction(&mut self) -> Result<(), DriverError> {
        self.log("begin");
        Ok(())
    }

    fn commit(&mut self) -> Result<(), DriverError> {
        self.log("commit");
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), DriverError> {
        self.log("rollback");
        Ok(())
    }

    fn execute_nonquery(&mut self, command: &SqlCommand) -> Result<usize, DriverError> {
        self.record(command)?;
        Ok(0)
    }

    fn execute_scalar(&mut self, command: &SqlCommand) -> Result<ScalarValue, DriverError> {
        self.record(command)?;
        Ok(self
            .state
            .borrow_mut()
            .scalars
            .pop_front()
            .unwrap_or(ScalarValue::Integer(1)))
    }
}

#[derive(Default, Clone)]
struct StoredRecords {
    script_runs: Vec<ScriptRun>,
    script_run_errors: Vec<ScriptRunError>,
    versions: Vec<Version>,
    next_id: i64,
}

#[derive(Default)]
struct MemoryState {
    records: StoredRecords,
    snapshot: Option<StoredRecords>,
    events: Vec<String>,
    all_script_runs_calls: usize,
    latest_script_run_calls: usize,
    fail_queries: bool,
    fail_saves: bool,
}

/// In-memory ledger repository; clones share their storage
#[derive(Clone, Default)]
pub struct MemoryRepository {
    state: Rc<RefCell<MemoryState>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a committed run directly, bypassing sessions and counters
    pub fn seed_script_run(&self, script_name: &str, hash: &str) {
        let mut state = self.state.borrow_mut();
        state.records.next_id += 1;
        let id = state.records.next_id;
        state.records.script_runs.push(ScriptRun {
            id,
            version_id: 1,
            script_name: script_name.to_string(),
            text_of_script: String::new(),
            text_hash: hash.to_string(),
            one_time_script: true,
            entry_date: Utc::now(),
            entered_by: "seed".to_string(),
        });
    }

    pub fn fail_queries(&self, fail: bool) {
        self.state.borrow_mut().fail_queries = fail;
    }

    pub fn fail_saves(&self, fail: bool) {
        self.state.borrow_mut().fail_saves = fail;
    }

    pub fn all_script_runs_calls(&self) -> usize {
        self.state.borrow().all_script_runs_calls
    }

    pub fn latest_script_run_calls(&self) -> usize {
        self.state.borrow().latest_script_run_calls
    }

    pub fn events(&self) -> Vec<String> {
        self.state.borrow().events.clone()
    }

    pub fn script_runs(&self) -> Vec<ScriptRun> {
        self.state.borrow().records.script_runs.clone()
    }

    pub fn script_run_errors(&self) -> Vec<ScriptRunError> {
        self.state.borrow().records.script_run_errors.clone()
    }

    pub fn versions(&self) -> Vec<Version> {
        self.state.borrow().records.versions.clone()
    }

    fn check_queries(&self) -> Result<()> {
        if self.state.borrow().fail_queries {
            return Err(anyhow!("ledger storage is unavailable"));
        }
        Ok(())
    }
}

impl MigrationRepository for MemoryRepository {
    fn start(&mut self, transactional: bool) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.events.push(format!("start({})", transactional));
        let snapshot = transactional.then(|| state.records.clone());
        state.snapshot = snapshot;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.events.push("finish".to_string());
        state.snapshot = None;
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.events.push("rollback".to_string());
        if let Some(snapshot) = state.snapshot.take() {
            state.records = snapshot;
        }
        Ok(())
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.state
            .borrow_mut()
            .events
            .push("ensure_schema".to_string());
        Ok(())
    }

    fn save(&mut self, record: LedgerRecord) -> Result<i64> {
        let mut state = self.state.borrow_mut();
        if state.fail_saves {
            return Err(anyhow!("ledger storage rejected the {}", record.kind()));
        }
        state.records.next_id += 1;
        let id = state.records.next_id;
        match record {
            LedgerRecord::ScriptRun(run) => state.records.script_runs.push(ScriptRun {
                id,
                version_id: run.version_id,
                script_name: run.script_name,
                text_of_script: run.text_of_script,
                text_hash: run.text_hash,
                one_time_script: run.one_time_script,
                entry_date: run.entry_date,
                entered_by: run.entered_by,
            }),
            LedgerRecord::ScriptRunError(err) => {
                state.records.script_run_errors.push(ScriptRunError {
                    id,
                    repository_path: err.repository_path,
                    version: err.version,
                    script_name: err.script_name,
                    text_of_script: err.text_of_script,
                    erroneous_part_of_script: err.erroneous_part_of_script,
                    error_message: err.error_message,
                    entry_date: err.entry_date,
                    entered_by: err.entered_by,
                })
            }
            LedgerRecord::Version(version) => state.records.versions.push(Version {
                id,
                repository_path: version.repository_path,
                version: version.version,
                entry_date: version.entry_date,
                entered_by: version.entered_by,
            }),
        }
        Ok(id)
    }

    fn all_script_runs(&self) -> Result<Vec<ScriptRun>> {
        self.check_queries()?;
        let mut state = self.state.borrow_mut();
        state.all_script_runs_calls += 1;
        Ok(state.records.script_runs.clone())
    }

    fn latest_script_run(&self, script_name: &str) -> Result<Option<ScriptRun>> {
        self.check_queries()?;
        let mut state = self.state.borrow_mut();
        state.latest_script_run_calls += 1;
        Ok(state
            .records
            .script_runs
            .iter()
            .filter(|r| r.script_name == script_name)
            .max_by_key(|r| r.id)
            .cloned())
    }

    fn latest_version(&self, repository_path: &str) -> Result<Option<Version>> {
        self.check_queries()?;
        Ok(self
            .state
            .borrow()
            .records
            .versions
            .iter()
            .filter(|v| v.repository_path == repository_path)
            .max_by_key(|v| (v.entry_date, v.id))
            .cloned())
    }

    fn all_script_run_errors(&self) -> Result<Vec<ScriptRunError>> {
        self.check_queries()?;
        Ok(self.state.borrow().records.script_run_errors.clone())
    }
}
