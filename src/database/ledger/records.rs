//! Ledger record types

use chrono::{DateTime, Utc};
use serde::Serialize;

/// A successful script execution
#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "display", derive(tabled::Tabled))]
pub struct ScriptRun {
    /// Strictly increasing with insertion order
    pub id: i64,
    pub version_id: i64,
    pub script_name: String,
    #[cfg_attr(feature = "display", tabled(skip))]
    pub text_of_script: String,
    pub text_hash: String,
    pub one_time_script: bool,
    pub entry_date: DateTime<Utc>,
    pub entered_by: String,
}

/// A failed script execution, kept for diagnostics
#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "display", derive(tabled::Tabled))]
pub struct ScriptRunError {
    pub id: i64,
    pub repository_path: String,
    pub version: String,
    pub script_name: String,
    #[cfg_attr(feature = "display", tabled(skip))]
    pub text_of_script: String,
    pub erroneous_part_of_script: String,
    pub error_message: String,
    pub entry_date: DateTime<Utc>,
    pub entered_by: String,
}

/// One migration run against a script repository
#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "display", derive(tabled::Tabled))]
pub struct Version {
    pub id: i64,
    pub repository_path: String,
    pub version: String,
    pub entry_date: DateTime<Utc>,
    pub entered_by: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewScriptRun {
    pub version_id: i64,
    pub script_name: String,
    pub text_of_script: String,
    pub text_hash: String,
    pub one_time_script: bool,
    pub entry_date: DateTime<Utc>,
    pub entered_by: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewScriptRunError {
    pub repository_path: String,
    pub version: String,
    pub script_name: String,
    pub text_of_script: String,
    pub erroneous_part_of_script: String,
    pub error_message: String,
    pub entry_date: DateTime<Utc>,
    pub entered_by: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewVersion {
    pub repository_path: String,
    pub version: String,
    pub entry_date: DateTime<Utc>,
    pub entered_by: String,
}

/// A record handed to the repository for persistence
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerRecord {
    ScriptRun(NewScriptRun),
    ScriptRunError(NewScriptRunError),
    Version(NewVersion),
}

impl LedgerRecord {
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerRecord::ScriptRun(_) => "script run",
            LedgerRecord::ScriptRunError(_) => "script run error",
            LedgerRecord::Version(_) => "version",
        }
    }
}
