#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

//! Tidemark - a schema-migration execution engine
//!
//! Tidemark applies ordered SQL change scripts to a target database, remembers
//! which scripts ran (and with which content hash) in a ledger, and recovers
//! deterministically when a script fails. It can be used as both a
//! command-line application and a library.
//!
//! # Feature Flags
//!
//! | Feature | Description | Key Dependencies |
//! |---------|-------------|------------------|
//! | `display` | Table formatting of ledger records | `tabled` |
//! | `cli` | The `tidemark` binary | `display` + `clap`, `tracing-subscriber` |
//!
//! ```toml
//! # Library only
//! tidemark = { version = "0.1", default-features = false }
//!
//! # Default (CLI binary)
//! tidemark = "0.1"
//! ```
//!
//! # Architecture
//!
//! - **[`splitter`]**: Splits scripts into statements, skipping separators in
//!   string literals and comments
//! - **[`database`]**: Connections, SQL execution with transient retry,
//!   rollback, providers, and the migration ledger
//! - **[`migrator`]**: Decides which scripts run and drives the database through
//!   one migration
//! - **[`config`]**: Configuration management
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use tidemark::{Database, MigrationPlan, Migrator, Script, ScriptKind, TidemarkConfig};
//!
//! let config = TidemarkConfig::new(&None)?;
//! let mut db = Database::from_config(config)?;
//!
//! let plan = MigrationPlan {
//!     scripts: vec![Script::from_file("up/0001_create.sql", ScriptKind::RunOnce)?],
//!     version: "1.0".to_string(),
//!     repository_path: "git@example.com:app/db.git".to_string(),
//!     ..MigrationPlan::default()
//! };
//!
//! let report = Migrator::new(&mut db).run(&plan)?;
//! println!("{} scripts run", report.scripts_run.len());
//! ```

pub mod config;
pub mod database;
pub mod migrator;
pub mod output;
pub mod splitter;
pub mod tokens;

// =============================================================================
// Configuration
// =============================================================================

pub use config::{format_size, get_ledger_info, LedgerInfo, TidemarkConfig};

// =============================================================================
// Database
// =============================================================================

pub use database::{
    ConnectionKind, Database, DriverError, ExecutionError, Ledger, MigrationRepository, Provider,
    ScalarValue, ScriptRun, ScriptRunError, SqlParameter, SqliteLedgerRepository, SqliteProvider,
    Version,
};

// =============================================================================
// Migration runs
// =============================================================================

pub use migrator::{
    hash_script, MigrationError, MigrationPlan, MigrationReport, Migrator, RestoreRequest, Script,
    ScriptKind,
};

pub use output::OutputFormat;
pub use splitter::{split, StatementSplitter, DEFAULT_STATEMENT_SEPARATOR};
