//! Database connection management
//!
//! This module provides the connection wrapper the engine uses for both the
//! administrative and the operational connection.

use super::driver::{ConnectionState, DriverError, NativeConnection};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Which of the two logical connections a command runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionKind {
    /// Scoped above the target database (create, backup, restore, ...)
    Admin,
    /// Scoped to the target database, runs migration scripts
    Operational,
}

impl fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionKind::Admin => write!(f, "admin"),
            ConnectionKind::Operational => write!(f, "default"),
        }
    }
}

/// Core database connection wrapper
///
/// `DatabaseConn` owns exactly one native handle together with the connection
/// string it was created from.
pub struct DatabaseConn {
    kind: ConnectionKind,
    target: String,
    native: Box<dyn NativeConnection>,
}

impl DatabaseConn {
    /// Wrap a native handle and open it
    pub fn open(
        kind: ConnectionKind,
        target: &str,
        mut native: Box<dyn NativeConnection>,
    ) -> Result<Self, DriverError> {
        debug!("Opening {} connection to '{}'", kind, target);
        native.open()?;
        Ok(Self {
            kind,
            target: target.to_string(),
            native,
        })
    }

    pub fn kind(&self) -> ConnectionKind {
        self.kind
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn is_open(&self) -> bool {
        self.native.state() == ConnectionState::Open
    }

    /// Close the native handle and open it again on the same target
    pub fn reopen(&mut self) -> Result<(), DriverError> {
        debug!("Reopening {} connection to '{}'", self.kind, self.target);
        self.native.close()?;
        self.native.open()
    }

    /// Release the pool, close, and consume the connection
    pub fn shutdown(mut self) -> Result<(), DriverError> {
        debug!("Closing {} connection", self.kind);
        self.native.clear_pool();
        self.native.close()
    }

    pub fn native(&mut self) -> &mut dyn NativeConnection {
        self.native.as_mut()
    }
}

impl fmt::Debug for DatabaseConn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConn")
            .field("kind", &self.kind)
            .field("target", &self.target)
            .field("open", &self.is_open())
            .finish()
    }
}

/// Handle of the transaction bound to the operational connection
///
/// Every transaction begun by the engine gets a fresh id, so a transaction that
/// replaces a rolled back one is always distinguishable from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionHandle {
    id: u64,
}

impl TransactionHandle {
    pub(crate) fn new(id: u64) -> Self {
        Self { id }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}
