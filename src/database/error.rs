//! Execution errors
//!
//! Every failure of the SQL Execution Unit is classified here so the caller can
//! dispatch on it: a transient failure left over after the local retry, a fatal
//! driver failure, or a failure to (re)open the connection the command needed.

use crate::database::core::{ConnectionKind, DriverError};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExecutionError {
    /// Connection dropped underneath the command and was not recovered
    #[error("transient failure on {kind} connection: {source}")]
    Transient {
        kind: ConnectionKind,
        #[source]
        source: DriverError,
    },

    #[error("error running SQL on {kind} connection: {source}")]
    Fatal {
        kind: ConnectionKind,
        #[source]
        source: DriverError,
    },

    #[error("unable to open {kind} connection: {source}")]
    Connect {
        kind: ConnectionKind,
        #[source]
        source: DriverError,
    },
}

impl ExecutionError {
    /// Whether running the same command again may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExecutionError::Transient { .. })
    }

    pub fn kind(&self) -> ConnectionKind {
        match self {
            ExecutionError::Transient { kind, .. }
            | ExecutionError::Fatal { kind, .. }
            | ExecutionError::Connect { kind, .. } => *kind,
        }
    }

    /// The driver failure behind this error
    pub fn driver_error(&self) -> &DriverError {
        match self {
            ExecutionError::Transient { source, .. }
            | ExecutionError::Fatal { source, .. }
            | ExecutionError::Connect { source, .. } => source,
        }
    }
}
