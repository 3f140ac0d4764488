//! Database module
//!
//! This module provides everything tidemark needs to talk to a target database
//! and to remember what it did there, organized into:
//!
//! - **core**: Native driver contract, connection wrapper, ledger schema
//! - **provider**: Per-vendor capabilities (SQLite)
//! - **ledger**: Migration history with its read-through script cache
//! - **engine**: The [`Database`] a migration run drives
//!
//! # Architecture
//!
//! ```text
//! database/
//! ├── core/           # Foundation
//! │   ├── driver      # NativeConnection trait, commands, scalars
//! │   ├── connection  # DatabaseConn wrapper, transaction handles
//! │   └── schema      # Ledger schema definitions and management
//! │
//! ├── provider/       # Vendor capability table
//! │   └── sqlite      # rusqlite-backed provider
//! │
//! ├── ledger/         # Migration history
//! │   ├── records     # ScriptRun, ScriptRunError, Version
//! │   └── sqlite      # SQLite repository
//! │
//! ├── error           # ExecutionError
//! └── engine          # Database
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use tidemark::database::{ConnectionKind, Database};
//!
//! let mut db = Database::from_config(config)?;
//! db.open_connection(true)?;
//! db.create_or_update_ledger_tables()?;
//!
//! if !db.has_run_script_already("0001_create.sql")? {
//!     db.run_sql("CREATE TABLE t (id INTEGER)", ConnectionKind::Operational)?;
//! }
//! db.close_connection()?;
//! ```

pub mod core;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod provider;

#[cfg(test)]
pub(crate) mod testing;

pub use core::{
    ConnectionKind, ConnectionState, DatabaseConn, DriverError, NativeConnection, ScalarValue,
    SchemaDefinitions, SchemaManager, SchemaStatus, SqlCommand, SqlParameter, TransactionHandle,
    SCHEMA_VERSION,
};

pub use engine::Database;
pub use error::ExecutionError;

pub use ledger::{
    Ledger, LedgerRecord, MigrationRepository, ScriptRun, ScriptRunError, SqliteLedgerRepository,
    Version, INITIAL_VERSION,
};

pub use provider::{provider_for, provider_names, Provider, SqliteConnection, SqliteProvider};

/// Ensure the data directory exists
pub fn ensure_data_dir(data_dir: &str) -> anyhow::Result<()> {
    std::fs::create_dir_all(data_dir)
        .map_err(|e| anyhow::anyhow!("Failed to create data directory '{}': {}", data_dir, e))
}
