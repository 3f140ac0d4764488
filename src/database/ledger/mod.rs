//! Migration history ledger
//!
//! The ledger answers "has this script run, and with which hash" and records
//! runs, failures, and versions. Durable storage is delegated to a
//! [`MigrationRepository`]; the ledger adds a read-through cache on top.
//!
//! # Cache semantics
//!
//! On first lookup every script run is pulled from the repository and folded
//! by ascending id, so the newest run of each script wins. The cache is never
//! invalidated afterwards: once a script name is cached, its hash is
//! authoritative for the lifetime of the `Ledger`. Runs recorded by another
//! process during the same run are not observed for cached names. Runs recorded
//! through this ledger are not added to the cache either; lookups for names
//! missing from the cache fall through to the repository and see them.

mod records;
mod sqlite;

pub use records::{
    LedgerRecord, NewScriptRun, NewScriptRunError, NewVersion, ScriptRun, ScriptRunError,
    Version,
};
pub use sqlite::SqliteLedgerRepository;

use anyhow::Result;
use chrono::Utc;
use std::collections::HashMap;
use tracing::{debug, error, warn};

/// Version reported for a repository path that has never been migrated
pub const INITIAL_VERSION: &str = "0";

/// Persistence contract of the ledger
///
/// A repository works inside sessions: `start` opens one (optionally inside a
/// transaction), `finish` commits and ends it, `rollback` discards uncommitted
/// work and ends it.
pub trait MigrationRepository {
    fn start(&mut self, transactional: bool) -> Result<()>;

    fn finish(&mut self) -> Result<()>;

    fn rollback(&mut self) -> Result<()>;

    /// Build or upgrade the ledger's own storage
    fn ensure_schema(&mut self) -> Result<()>;

    /// Persist a record and return its surrogate id
    fn save(&mut self, record: LedgerRecord) -> Result<i64>;

    fn all_script_runs(&self) -> Result<Vec<ScriptRun>>;

    /// Newest run of the script by insertion order
    fn latest_script_run(&self, script_name: &str) -> Result<Option<ScriptRun>>;

    /// Newest version of the path by entry date
    fn latest_version(&self, repository_path: &str) -> Result<Option<Version>>;

    fn all_script_run_errors(&self) -> Result<Vec<ScriptRunError>>;
}

/// Idempotency cache and bookkeeping over a [`MigrationRepository`]
pub struct Ledger {
    repository: Box<dyn MigrationRepository>,
    cache: Option<HashMap<String, ScriptRun>>,
    entered_by: String,
}

impl Ledger {
    pub fn new(repository: Box<dyn MigrationRepository>, entered_by: &str) -> Self {
        Self {
            repository,
            cache: None,
            entered_by: entered_by.to_string(),
        }
    }

    pub fn start(&mut self, transactional: bool) -> Result<()> {
        debug!("Starting ledger session (transactional: {})", transactional);
        self.repository.start(transactional)
    }

    pub fn finish(&mut self) -> Result<()> {
        debug!("Finishing ledger session");
        self.repository.finish()
    }

    /// Discard ledger writes that are not yet durable
    ///
    /// The script cache only ever holds committed history, so it is kept.
    pub fn rollback(&mut self) -> Result<()> {
        debug!("Rolling back ledger session");
        self.repository.rollback()
    }

    pub fn ensure_storage(&mut self) -> Result<()> {
        self.repository.ensure_schema()
    }

    /// Whether the script has been recorded as run
    ///
    /// Storage errors are logged and returned.
    pub fn has_run(&mut self, script_name: &str) -> Result<bool> {
        let cached = self.cached(script_name).map(|run| run.is_some());
        let found = match cached {
            Ok(true) => Ok(true),
            Ok(false) => self
                .repository
                .latest_script_run(script_name)
                .map(|run| run.is_some()),
            Err(e) => Err(e),
        };

        found.map_err(|e| {
            error!(
                "Ledger does not provide a facility for determining if a script has run at this time. {}",
                e
            );
            e
        })
    }

    /// Hash recorded for the newest run of the script
    ///
    /// Returns `None` when the script never ran or the lookup failed.
    pub fn current_hash(&mut self, script_name: &str) -> Option<String> {
        match self.cached(script_name) {
            Ok(Some(run)) => return Some(run.text_hash.clone()),
            Ok(None) => {}
            Err(e) => {
                warn!(
                    "Ledger does not provide a facility for hashing (through recording scripts run) at this time. {}",
                    e
                );
                return None;
            }
        }

        match self.repository.latest_script_run(script_name) {
            Ok(run) => run.map(|r| r.text_hash),
            Err(e) => {
                warn!(
                    "Ledger does not provide a facility for hashing (through recording scripts run) at this time. {}",
                    e
                );
                None
            }
        }
    }

    pub fn record_run(
        &mut self,
        script_name: &str,
        sql: &str,
        hash: &str,
        run_once: bool,
        version_id: i64,
    ) -> Result<i64> {
        let record = LedgerRecord::ScriptRun(NewScriptRun {
            version_id,
            script_name: script_name.to_string(),
            text_of_script: sql.to_string(),
            text_hash: hash.to_string(),
            one_time_script: run_once,
            entry_date: Utc::now(),
            entered_by: self.entered_by.clone(),
        });

        self.save(record, "recording scripts run")
    }

    pub fn record_error(
        &mut self,
        script_name: &str,
        sql: &str,
        erroneous_part: &str,
        error_message: &str,
        version_label: &str,
        repository_path: &str,
    ) -> Result<i64> {
        let record = LedgerRecord::ScriptRunError(NewScriptRunError {
            repository_path: repository_path.to_string(),
            version: version_label.to_string(),
            script_name: script_name.to_string(),
            text_of_script: sql.to_string(),
            erroneous_part_of_script: erroneous_part.to_string(),
            error_message: error_message.to_string(),
            entry_date: Utc::now(),
            entered_by: self.entered_by.clone(),
        });

        self.save(record, "recording scripts run errors")
    }

    /// Newest version label of the path, `"0"` when unknown
    pub fn get_version(&self, repository_path: &str) -> String {
        match self.repository.latest_version(repository_path) {
            Ok(Some(version)) => version.version,
            Ok(None) => INITIAL_VERSION.to_string(),
            Err(e) => {
                warn!(
                    "Ledger does not provide a facility for retrieving versions at this time. {}",
                    e
                );
                INITIAL_VERSION.to_string()
            }
        }
    }

    pub fn insert_version(&mut self, repository_path: &str, version_label: &str) -> Result<i64> {
        let record = LedgerRecord::Version(NewVersion {
            repository_path: repository_path.to_string(),
            version: version_label.to_string(),
            entry_date: Utc::now(),
            entered_by: self.entered_by.clone(),
        });

        self.save(record, "inserting versions")
    }

    pub fn script_runs(&self) -> Result<Vec<ScriptRun>> {
        self.repository.all_script_runs()
    }

    pub fn script_run_errors(&self) -> Result<Vec<ScriptRunError>> {
        self.repository.all_script_run_errors()
    }

    fn save(&mut self, record: LedgerRecord, facility: &str) -> Result<i64> {
        let kind = record.kind();
        match self.repository.save(record) {
            Ok(id) => {
                debug!("Recorded {} with id {}", kind, id);
                Ok(id)
            }
            Err(e) => {
                error!(
                    "Ledger does not provide a facility for {} at this time. {}",
                    facility, e
                );
                Err(e)
            }
        }
    }

    fn cached(&mut self, script_name: &str) -> Result<Option<&ScriptRun>> {
        if self.cache.is_none() {
            let mut runs = self.repository.all_script_runs()?;
            runs.sort_by_key(|r| r.id);

            let mut cache = HashMap::new();
            for run in runs {
                cache.insert(run.script_name.clone(), run);
            }
            debug!("Loaded {} scripts into the ledger cache", cache.len());
            self.cache = Some(cache);
        }

        Ok(self.cache.as_ref().and_then(|c| c.get(script_name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::testing::MemoryRepository;

    fn ledger_with(repository: &MemoryRepository) -> Ledger {
        let mut ledger = Ledger::new(Box::new(repository.clone()), "tester");
        ledger.start(false).unwrap();
        ledger
    }

    #[test]
    fn test_has_run_false_for_unknown_script() {
        let repository = MemoryRepository::new();
        let mut ledger = ledger_with(&repository);

        assert!(!ledger.has_run("0001_create.sql").unwrap());
        assert_eq!(ledger.current_hash("0001_create.sql"), None);
    }

    #[test]
    fn test_recorded_run_is_visible_through_fallthrough() {
        let repository = MemoryRepository::new();
        let mut ledger = ledger_with(&repository);

        // cache is built empty here
        assert!(!ledger.has_run("a.sql").unwrap());

        let version_id = ledger.insert_version("/repo", "1").unwrap();
        ledger.record_run("a.sql", "SELECT 1", "H1", true, version_id).unwrap();

        assert!(ledger.has_run("a.sql").unwrap());
        assert!(ledger.has_run("a.sql").unwrap());
        assert_eq!(ledger.current_hash("a.sql"), Some("H1".to_string()));
    }

    #[test]
    fn test_cache_prefers_newest_run() {
        let repository = MemoryRepository::new();
        repository.seed_script_run("a.sql", "H1");
        repository.seed_script_run("b.sql", "B1");
        repository.seed_script_run("a.sql", "H2");

        let mut ledger = ledger_with(&repository);
        assert_eq!(ledger.current_hash("a.sql"), Some("H2".to_string()));
        assert_eq!(ledger.current_hash("b.sql"), Some("B1".to_string()));
    }

    #[test]
    fn test_current_hash_served_from_cache() {
        let repository = MemoryRepository::new();
        repository.seed_script_run("a.sql", "H1");
        let mut ledger = ledger_with(&repository);

        assert_eq!(ledger.current_hash("a.sql"), Some("H1".to_string()));
        assert_eq!(ledger.current_hash("a.sql"), Some("H1".to_string()));
        assert!(ledger.has_run("a.sql").unwrap());

        assert_eq!(repository.all_script_runs_calls(), 1);
        assert_eq!(repository.latest_script_run_calls(), 0);
    }

    #[test]
    fn test_cache_is_not_invalidated_by_new_runs() {
        let repository = MemoryRepository::new();
        repository.seed_script_run("anytime.sql", "H1");
        let mut ledger = ledger_with(&repository);

        assert_eq!(ledger.current_hash("anytime.sql"), Some("H1".to_string()));
        ledger.record_run("anytime.sql", "SELECT 2", "H2", false, 1).unwrap();

        assert_eq!(ledger.current_hash("anytime.sql"), Some("H1".to_string()));
    }

    #[test]
    fn test_get_version_defaults_to_zero() {
        let repository = MemoryRepository::new();
        let mut ledger = ledger_with(&repository);

        assert_eq!(ledger.get_version("/repo"), "0");

        ledger.insert_version("/repo", "1.0").unwrap();
        ledger.insert_version("/repo", "1.1").unwrap();
        ledger.insert_version("/other", "9").unwrap();
        assert_eq!(ledger.get_version("/repo"), "1.1");
    }

    #[test]
    fn test_get_version_swallows_storage_errors() {
        let repository = MemoryRepository::new();
        let ledger = ledger_with(&repository);
        repository.fail_queries(true);

        assert_eq!(ledger.get_version("/repo"), "0");
    }

    #[test]
    fn test_has_run_propagates_storage_errors() {
        let repository = MemoryRepository::new();
        let mut ledger = ledger_with(&repository);
        repository.fail_queries(true);

        assert!(ledger.has_run("a.sql").is_err());
        assert_eq!(ledger.current_hash("a.sql"), None);
    }

    #[test]
    fn test_failed_cache_build_is_retried_on_next_lookup() {
        let repository = MemoryRepository::new();
        let mut ledger = ledger_with(&repository);
        repository.fail_queries(true);

        assert!(ledger.has_run("a.sql").is_err());
        assert_eq!(repository.latest_script_run_calls(), 0);

        repository.fail_queries(false);
        repository.seed_script_run("a.sql", "H1");
        assert!(ledger.has_run("a.sql").unwrap());
        assert_eq!(repository.all_script_runs_calls(), 1);
    }

    #[test]
    fn test_write_errors_are_raised() {
        let repository = MemoryRepository::new();
        let mut ledger = ledger_with(&repository);
        repository.fail_saves(true);

        assert!(ledger.record_run("a.sql", "SELECT 1", "H", true, 1).is_err());
        assert!(ledger
            .record_error("a.sql", "SELECT 1", "SELECT 1", "boom", "1", "/repo")
            .is_err());
        assert!(ledger.insert_version("/repo", "1").is_err());
    }

    #[test]
    fn test_rollback_discards_uncommitted_records() {
        let repository = MemoryRepository::new();
        let mut ledger = Ledger::new(Box::new(repository.clone()), "tester");
        ledger.start(true).unwrap();
        ledger.record_run("a.sql", "SELECT 1", "H", true, 1).unwrap();
        ledger.rollback().unwrap();
        ledger.start(true).unwrap();

        assert!(!ledger.has_run("a.sql").unwrap());
        assert_eq!(
            repository.events(),
            vec!["start(true)", "rollback", "start(true)"]
        );
    }
}
