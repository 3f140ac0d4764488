//! Migration runs
//!
//! The [`Migrator`] drives a [`Database`] through one run: the optional
//! administrative phase, a new version row, then every script in the order it
//! was given, deciding per script whether it has to run.

use crate::database::{ConnectionKind, Database, ExecutionError};
use anyhow::{anyhow, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// When a script runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptKind {
    /// Runs once; later changes are refused
    RunOnce,
    /// Runs when new or changed
    AnyTime,
    /// Runs on every migration
    EveryTime,
}

impl fmt::Display for ScriptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptKind::RunOnce => write!(f, "up"),
            ScriptKind::AnyTime => write!(f, "anytime"),
            ScriptKind::EveryTime => write!(f, "everytime"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Script {
    pub name: String,
    pub text: String,
    pub kind: ScriptKind,
}

impl Script {
    pub fn new(name: &str, text: &str, kind: ScriptKind) -> Self {
        Self {
            name: name.to_string(),
            text: text.to_string(),
            kind,
        }
    }

    /// Load a script, naming it after its file
    pub fn from_file(path: &str, kind: ScriptKind) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("Failed to read script '{}': {}", path, e))?;
        let name = Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.to_string());
        Ok(Self { name, text, kind })
    }
}

/// Lowercase hex SHA-256 of the script text, line endings normalised to LF
pub fn hash_script(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.replace("\r\n", "\n").as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Restore source for the administrative phase
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RestoreRequest {
    pub path: String,
    pub options: String,
}

/// Everything one migration run does
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationPlan {
    pub scripts: Vec<Script>,
    /// Version label recorded for this run; empty keeps the current one
    pub version: String,
    pub repository_path: String,
    pub use_transaction: bool,
    pub drop_database: bool,
    pub create_database: bool,
    /// Replaces the provider's create script when not blank
    pub create_database_script: String,
    /// `Some(true)` for simple recovery, `Some(false)` for full
    pub recovery_mode: Option<bool>,
    pub backup_dir: Option<String>,
    pub restore: Option<RestoreRequest>,
}

impl Default for MigrationPlan {
    fn default() -> Self {
        Self {
            scripts: vec![],
            version: String::new(),
            repository_path: String::new(),
            use_transaction: true,
            drop_database: false,
            create_database: false,
            create_database_script: String::new(),
            recovery_mode: None,
            backup_dir: None,
            restore: None,
        }
    }
}

impl MigrationPlan {
    fn has_admin_phase(&self) -> bool {
        self.drop_database
            || self.create_database
            || self.recovery_mode.is_some()
            || self.backup_dir.is_some()
            || self.restore.is_some()
    }
}

/// Outcome of a successful run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MigrationReport {
    pub version_id: i64,
    pub previous_version: String,
    pub new_version: String,
    pub transactional: bool,
    pub database_created: bool,
    pub scripts_run: Vec<String>,
    pub scripts_skipped: Vec<String>,
}

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("{script_name} failed on statement:\n{statement}\n{source}")]
    ScriptFailed {
        script_name: String,
        statement: String,
        /// The connection dropped rather than the SQL being wrong
        transient: bool,
        #[source]
        source: ExecutionError,
    },

    #[error(
        "{script_name} is a one time script that has changed since it was run \
         (recorded hash {recorded_hash}, current hash {current_hash})"
    )]
    OneTimeScriptChanged {
        script_name: String,
        recorded_hash: String,
        current_hash: String,
    },
}

/// Runs a [`MigrationPlan`] against a database
pub struct Migrator<'a> {
    db: &'a mut Database,
    transactional: bool,
}

impl<'a> Migrator<'a> {
    pub fn new(db: &'a mut Database) -> Self {
        Self {
            db,
            transactional: false,
        }
    }

    pub fn run(&mut self, plan: &MigrationPlan) -> Result<MigrationReport> {
        let database_created = if plan.has_admin_phase() {
            self.run_admin_phase(plan)?
        } else {
            false
        };

        self.transactional = plan.use_transaction && self.db.provider().supports_ddl_transactions();
        if plan.use_transaction && !self.transactional {
            warn!(
                "Provider {} does not support transactional DDL, running without a transaction",
                self.db.provider().name()
            );
        }

        self.db.open_connection(self.transactional)?;
        if let Err(e) = self.db.create_or_update_ledger_tables() {
            return Err(self.abort(e, None));
        }

        let previous_version = self.db.get_version(&plan.repository_path);
        let new_version = if plan.version.trim().is_empty() {
            previous_version.clone()
        } else {
            plan.version.trim().to_string()
        };
        info!(
            "Migrating {} from version {} to {}",
            self.db.config().database_name,
            previous_version,
            new_version
        );

        let version_id = match self
            .db
            .insert_version_and_get_version_id(&plan.repository_path, &new_version)
        {
            Ok(id) => id,
            Err(e) => return Err(self.abort(e, None)),
        };

        let mut report = MigrationReport {
            version_id,
            previous_version,
            new_version,
            transactional: self.transactional,
            database_created,
            scripts_run: vec![],
            scripts_skipped: vec![],
        };

        for script in &plan.scripts {
            let hash = hash_script(&script.text);
            let should_run = match self.should_run(script, &hash) {
                Ok(should_run) => should_run,
                Err(e) => return Err(self.abort(e, None)),
            };

            if !should_run {
                debug!("Skipping {} ({}), it has not changed", script.name, script.kind);
                report.scripts_skipped.push(script.name.clone());
                continue;
            }

            info!("Running {} ({})", script.name, script.kind);
            self.run_script(script, &hash, &report, plan)?;
            report.scripts_run.push(script.name.clone());
        }

        self.db.close_connection()?;
        info!(
            "Migration to version {} finished: {} run, {} skipped",
            report.new_version,
            report.scripts_run.len(),
            report.scripts_skipped.len()
        );
        Ok(report)
    }

    fn run_admin_phase(&mut self, plan: &MigrationPlan) -> Result<bool> {
        if plan.drop_database {
            info!("Dropping database {}", self.db.config().database_name);
            self.db.delete_database_if_it_exists()?;
        }

        let mut created = false;
        if plan.create_database {
            created = self
                .db
                .create_database_if_it_doesnt_exist(&plan.create_database_script);
        }

        if let Some(simple) = plan.recovery_mode {
            self.db.set_recovery_mode(simple);
        }

        if let Some(dir) = &plan.backup_dir {
            self.db.backup_database(dir);
        }

        if let Some(restore) = &plan.restore {
            self.db.restore_database(&restore.path, &restore.options);
        }

        self.db.close_admin_connection()?;
        Ok(created)
    }

    fn should_run(&mut self, script: &Script, hash: &str) -> Result<bool> {
        if script.kind == ScriptKind::EveryTime {
            return Ok(true);
        }
        if !self.db.has_run_script_already(&script.name)? {
            return Ok(true);
        }

        let recorded = self.db.get_current_script_hash(&script.name);
        let changed = recorded.as_deref() != Some(hash);

        match script.kind {
            ScriptKind::AnyTime => Ok(changed),
            ScriptKind::RunOnce if changed => {
                let recorded_hash = recorded.unwrap_or_default();
                if self.db.config().warn_on_one_time_script_changes {
                    warn!(
                        "{} is a one time script that has changed since it was run, skipping it",
                        script.name
                    );
                    Ok(false)
                } else {
                    Err(MigrationError::OneTimeScriptChanged {
                        script_name: script.name.clone(),
                        recorded_hash,
                        current_hash: hash.to_string(),
                    }
                    .into())
                }
            }
            _ => Ok(false),
        }
    }

    fn run_script(
        &mut self,
        script: &Script,
        hash: &str,
        report: &MigrationReport,
        plan: &MigrationPlan,
    ) -> Result<()> {
        let statements = self.db.splitter().split(&script.text);
        for statement in statements {
            if let Err(e) = self.db.run_sql(&statement, ConnectionKind::Operational) {
                let failure = MigrationError::ScriptFailed {
                    script_name: script.name.clone(),
                    statement: statement.clone(),
                    transient: e.is_retryable(),
                    source: e.clone(),
                };
                let message = e.to_string();
                let record = FailedScript {
                    script,
                    statement: &statement,
                    message: &message,
                    version: &report.new_version,
                    repository_path: &plan.repository_path,
                };
                return Err(self.abort(failure.into(), Some(record)));
            }
        }

        let run_once = script.kind == ScriptKind::RunOnce;
        if let Err(e) =
            self.db
                .insert_script_run(&script.name, &script.text, hash, run_once, report.version_id)
        {
            return Err(self.abort(e, None));
        }
        Ok(())
    }

    /// Leave the database in a known state after a failure
    ///
    /// Rolls back the transaction, records the failed script, and closes the
    /// connection so the error record is committed. Returns `failure`.
    fn abort(&mut self, failure: anyhow::Error, record: Option<FailedScript>) -> anyhow::Error {
        error!("{:#}", failure);

        if self.transactional {
            if let Err(e) = self.db.rollback() {
                warn!("Failed to roll back after error: {}", e);
            }
        }

        if let Some(record) = record {
            if let Err(e) = self.db.insert_script_run_error(
                &record.script.name,
                &record.script.text,
                record.statement,
                record.message,
                record.version,
                record.repository_path,
            ) {
                error!("Failed to record error for {}: {}", record.script.name, e);
            }
        }

        if let Err(e) = self.db.close_connection() {
            warn!("Failed to close connection after error: {}", e);
        }
        failure
    }
}

struct FailedScript<'s> {
    script: &'s Script,
    statement: &'s str,
    message: &'s str,
    version: &'s str,
    repository_path: &'s str,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TidemarkConfig;
    use crate::database::testing::{
        fatal_error, transient_error, MemoryRepository, ScriptedProvider,
    };
    use crate::database::{ScalarValue, SqliteLedgerRepository, SqliteProvider};
    use tempfile::TempDir;

    fn scripted(config: TidemarkConfig) -> (ScriptedProvider, MemoryRepository, Database) {
        let provider = ScriptedProvider::new();
        let repository = MemoryRepository::new();
        let db = Database::new(
            config,
            Box::new(provider.clone()),
            Box::new(repository.clone()),
        );
        (provider, repository, db)
    }

    fn config() -> TidemarkConfig {
        TidemarkConfig::for_target("target", "ledger")
    }

    fn plan(scripts: Vec<Script>) -> MigrationPlan {
        MigrationPlan {
            scripts,
            version: "1.0".to_string(),
            repository_path: "/repo".to_string(),
            ..MigrationPlan::default()
        }
    }

    #[test]
    fn test_hash_script() {
        let hash = hash_script("SELECT 1;\n");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(hash, hash_script("SELECT 1;\r\n"));
        assert_ne!(hash, hash_script("SELECT 2;\n"));
    }

    #[test]
    fn test_script_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("0001_create.sql");
        std::fs::write(&path, "CREATE TABLE t (id INT);").unwrap();

        let script = Script::from_file(path.to_str().unwrap(), ScriptKind::RunOnce).unwrap();
        assert_eq!(script.name, "0001_create.sql");
        assert_eq!(script.text, "CREATE TABLE t (id INT);");
        assert!(Script::from_file("/nonexistent/x.sql", ScriptKind::AnyTime).is_err());
    }

    #[test]
    fn test_two_statements_one_run_record() {
        let (provider, repository, mut db) = scripted(config());
        let text = "CREATE TABLE t (id INT); INSERT INTO t VALUES (1)";
        let plan = plan(vec![Script::new("0001.sql", text, ScriptKind::RunOnce)]);

        let report = Migrator::new(&mut db).run(&plan).unwrap();

        assert_eq!(
            provider.executed_sql(),
            vec!["CREATE TABLE t (id INT)", "INSERT INTO t VALUES (1)"]
        );
        let runs = repository.script_runs();
        assert_eq!(runs.len(), 1);
        assert!(runs[0].one_time_script);
        assert_eq!(runs[0].text_hash, hash_script(text));
        assert_eq!(runs[0].version_id, report.version_id);
        assert_eq!(report.previous_version, "0");
        assert_eq!(report.new_version, "1.0");
        assert_eq!(report.scripts_run, vec!["0001.sql"]);
        assert!(report.transactional);
    }

    #[test]
    fn test_script_kinds_decide_reruns() {
        let (provider, repository, mut db) = scripted(config());
        repository.seed_script_run("once.sql", &hash_script("SELECT 1"));
        repository.seed_script_run("anytime_same.sql", &hash_script("SELECT 2"));
        repository.seed_script_run("anytime_changed.sql", "stale");
        repository.seed_script_run("every.sql", &hash_script("SELECT 4"));

        let plan = plan(vec![
            Script::new("once.sql", "SELECT 1", ScriptKind::RunOnce),
            Script::new("anytime_same.sql", "SELECT 2", ScriptKind::AnyTime),
            Script::new("anytime_changed.sql", "SELECT 3", ScriptKind::AnyTime),
            Script::new("every.sql", "SELECT 4", ScriptKind::EveryTime),
            Script::new("new.sql", "SELECT 5", ScriptKind::RunOnce),
        ]);
        let report = Migrator::new(&mut db).run(&plan).unwrap();

        assert_eq!(
            report.scripts_run,
            vec!["anytime_changed.sql", "every.sql", "new.sql"]
        );
        assert_eq!(report.scripts_skipped, vec!["once.sql", "anytime_same.sql"]);
        assert_eq!(provider.executed_sql(), vec!["SELECT 3", "SELECT 4", "SELECT 5"]);

        let every = repository
            .script_runs()
            .into_iter()
            .filter(|r| r.script_name == "every.sql")
            .count();
        assert_eq!(every, 2);
    }

    #[test]
    fn test_changed_one_time_script_is_refused() {
        let (provider, repository, mut db) = scripted(config());
        repository.seed_script_run("once.sql", "old");

        let plan = plan(vec![Script::new("once.sql", "SELECT 1", ScriptKind::RunOnce)]);
        let err = Migrator::new(&mut db).run(&plan).unwrap_err();

        assert!(matches!(
            err.downcast_ref::<MigrationError>(),
            Some(MigrationError::OneTimeScriptChanged { .. })
        ));
        assert_eq!(provider.attempts(), 0);
        assert!(!db.is_open(ConnectionKind::Operational));
    }

    #[test]
    fn test_changed_one_time_script_can_be_skipped_with_warning() {
        let mut config = config();
        config.warn_on_one_time_script_changes = true;
        let (provider, repository, mut db) = scripted(config);
        repository.seed_script_run("once.sql", "old");

        let plan = plan(vec![Script::new("once.sql", "SELECT 1", ScriptKind::RunOnce)]);
        let report = Migrator::new(&mut db).run(&plan).unwrap();

        assert_eq!(report.scripts_skipped, vec!["once.sql"]);
        assert_eq!(provider.attempts(), 0);
    }

    #[test]
    fn test_failure_rolls_back_and_records_error() {
        let (provider, repository, mut db) = scripted(config());
        let plan = plan(vec![
            Script::new("0001.sql", "SELEC 1", ScriptKind::RunOnce),
            Script::new("0002.sql", "SELECT 2", ScriptKind::RunOnce),
        ]);
        provider.fail_next(fatal_error());

        let err = Migrator::new(&mut db).run(&plan).unwrap_err();
        match err.downcast_ref::<MigrationError>() {
            Some(MigrationError::ScriptFailed {
                script_name,
                transient,
                ..
            }) => {
                assert_eq!(script_name, "0001.sql");
                assert!(!transient);
            }
            _ => panic!("expected a script failure, got {}", err),
        }

        let errors = repository.script_run_errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].script_name, "0001.sql");
        assert_eq!(errors[0].erroneous_part_of_script, "SELEC 1");
        assert_eq!(errors[0].version, "1.0");
        assert!(repository.script_runs().is_empty());
        assert_eq!(provider.executed_sql(), vec!["SELEC 1"]);
        assert!(provider.events().contains(&"rollback:target".to_string()));
        assert!(!db.is_open(ConnectionKind::Operational));
    }

    #[test]
    fn test_failure_in_later_statement_reports_that_statement() {
        let (provider, repository, mut db) = scripted(config());
        let plan = plan(vec![Script::new(
            "0002.sql",
            "SELECT 2; SELEC 3",
            ScriptKind::RunOnce,
        )]);
        provider.pass_next();
        provider.fail_next(fatal_error());

        assert!(Migrator::new(&mut db).run(&plan).is_err());

        let errors = repository.script_run_errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].erroneous_part_of_script, "SELEC 3");
        assert_eq!(errors[0].text_of_script, "SELECT 2; SELEC 3");
    }

    #[test]
    fn test_transient_failure_in_transaction_is_marked() {
        let (provider, _repository, mut db) = scripted(config());
        provider.fail_next(transient_error());

        let plan = plan(vec![Script::new("0001.sql", "SELECT 1", ScriptKind::RunOnce)]);
        let err = Migrator::new(&mut db).run(&plan).unwrap_err();

        match err.downcast_ref::<MigrationError>() {
            Some(MigrationError::ScriptFailed { transient, .. }) => assert!(*transient),
            _ => panic!("expected a script failure"),
        }
        assert_eq!(provider.attempts(), 1);
    }

    #[test]
    fn test_transient_failure_without_transaction_is_retried() {
        let (provider, repository, mut db) = scripted(config());
        provider.fail_next(transient_error());

        let mut plan = plan(vec![Script::new("0001.sql", "SELECT 1", ScriptKind::RunOnce)]);
        plan.use_transaction = false;
        let report = Migrator::new(&mut db).run(&plan).unwrap();

        assert!(!report.transactional);
        assert_eq!(provider.attempts(), 2);
        assert_eq!(repository.script_runs().len(), 1);
    }

    #[test]
    fn test_provider_without_ddl_transactions_runs_without_one() {
        let provider = ScriptedProvider::new().without_ddl_transactions();
        let mut db = Database::new(
            config(),
            Box::new(provider.clone()),
            Box::new(MemoryRepository::new()),
        );

        let plan = plan(vec![Script::new("0001.sql", "SELECT 1", ScriptKind::RunOnce)]);
        let report = Migrator::new(&mut db).run(&plan).unwrap();
        assert!(!report.transactional);
        assert!(!provider.events().iter().any(|e| e.starts_with("begin")));
    }

    #[test]
    fn test_admin_phase_runs_in_order_and_closes() {
        let mut config = config();
        config.admin_connection_string = "server".to_string();
        config.database_name = "orders".to_string();
        let (provider, _repository, mut db) = scripted(config);

        let plan = MigrationPlan {
            drop_database: true,
            create_database: true,
            recovery_mode: Some(true),
            backup_dir: Some("/backups".to_string()),
            restore: Some(RestoreRequest {
                path: "/backups/orders.bak".to_string(),
                options: String::new(),
            }),
            ..plan(vec![])
        };
        let report = Migrator::new(&mut db).run(&plan).unwrap();

        assert!(report.database_created);
        assert_eq!(
            provider.executed_sql(),
            vec![
                "DROP DATABASE orders",
                "CREATE DATABASE orders",
                "ALTER DATABASE orders SET RECOVERY SIMPLE",
                "BACKUP DATABASE orders TO '/backups'",
                "RESTORE DATABASE orders FROM '/backups/orders.bak' ",
            ]
        );
        assert!(!db.is_open(ConnectionKind::Admin));
    }

    #[test]
    fn test_empty_version_keeps_current() {
        let (_provider, _repository, mut db) = scripted(config());
        let mut first = plan(vec![]);
        first.version = "2.1".to_string();
        Migrator::new(&mut db).run(&first).unwrap();

        let mut second = plan(vec![]);
        second.version = String::new();
        let report = Migrator::new(&mut db).run(&second).unwrap();
        assert_eq!(report.previous_version, "2.1");
        assert_eq!(report.new_version, "2.1");
    }

    fn sqlite_db() -> (TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let config = TidemarkConfig::for_target(
            dir.path().join("app.sqlite3").to_str().unwrap(),
            dir.path().join("ledger.sqlite3").to_str().unwrap(),
        );
        let ledger = SqliteLedgerRepository::new(&config.ledger_connection_string);
        let db = Database::new(config, Box::new(SqliteProvider), Box::new(ledger));
        (dir, db)
    }

    #[test]
    fn test_sqlite_migration_end_to_end() {
        let (_dir, mut db) = sqlite_db();
        let plan = plan(vec![
            Script::new(
                "0001_create.sql",
                "CREATE TABLE t (id INTEGER, note TEXT);\nINSERT INTO t VALUES (1, 'a;b');",
                ScriptKind::RunOnce,
            ),
            Script::new(
                "view.sql",
                "DROP VIEW IF EXISTS v; CREATE VIEW v AS SELECT id FROM t;",
                ScriptKind::AnyTime,
            ),
        ]);

        let first = Migrator::new(&mut db).run(&plan).unwrap();
        assert_eq!(first.scripts_run.len(), 2);

        let second = Migrator::new(&mut db).run(&plan).unwrap();
        assert!(second.scripts_run.is_empty());
        assert_eq!(second.previous_version, "1.0");

        let note = db
            .run_sql_scalar("SELECT note FROM t WHERE id = 1", ConnectionKind::Operational)
            .unwrap();
        assert_eq!(note, Some(ScalarValue::Text("a;b".to_string())));
    }

    #[test]
    fn test_sqlite_failed_migration_leaves_no_partial_work() {
        let (_dir, mut db) = sqlite_db();
        let plan = plan(vec![
            Script::new("0001.sql", "CREATE TABLE t (id INTEGER);", ScriptKind::RunOnce),
            Script::new("0002.sql", "INSERT INTO missing VALUES (1);", ScriptKind::RunOnce),
        ]);

        assert!(Migrator::new(&mut db).run(&plan).is_err());

        let tables = db
            .run_sql_scalar(
                "SELECT COUNT(*) FROM sqlite_master WHERE name = 't'",
                ConnectionKind::Operational,
            )
            .unwrap();
        assert_eq!(tables, Some(ScalarValue::Integer(0)));

        let errors = db.script_run_errors().unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].script_name, "0002.sql");
        assert!(db.script_runs().unwrap().is_empty());
    }
}
