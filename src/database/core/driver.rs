//! Native SQL driver contract
//!
//! Every supported vendor implements [`NativeConnection`] for its native handle.
//! The engine only ever talks to this trait, so the lifecycle, retry, and
//! rollback logic is shared across vendors.

use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Failure reported by a native driver
///
/// `error_count` is the number of errors the driver reported for the failing
/// call. Only a single transient error is ever retried.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{message}")]
pub struct DriverError {
    pub code: Option<i32>,
    pub error_count: usize,
    pub message: String,
}

impl DriverError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            error_count: 1,
            message: message.into(),
        }
    }

    pub fn with_code(code: i32, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            error_count: 1,
            message: message.into(),
        }
    }

    pub fn with_error_count(mut self, error_count: usize) -> Self {
        self.error_count = error_count;
        self
    }
}

/// State of a native connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    Open,
}

/// Value returned by a scalar command or bound as a parameter
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ScalarValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl ScalarValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ScalarValue::Null)
    }

    /// Interpret the value as a boolean
    ///
    /// Returns `None` for NULL and for values that have no boolean reading.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ScalarValue::Null => None,
            ScalarValue::Integer(i) => Some(*i != 0),
            ScalarValue::Real(r) => Some(*r != 0.0),
            ScalarValue::Text(s) => match s.trim().to_lowercase().as_str() {
                "true" | "1" | "yes" => Some(true),
                "false" | "0" | "no" => Some(false),
                _ => None,
            },
            ScalarValue::Blob(_) => None,
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Null => write!(f, "NULL"),
            ScalarValue::Integer(i) => write!(f, "{}", i),
            ScalarValue::Real(r) => write!(f, "{}", r),
            ScalarValue::Text(s) => write!(f, "{}", s),
            ScalarValue::Blob(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

impl From<i64> for ScalarValue {
    fn from(value: i64) -> Self {
        ScalarValue::Integer(value)
    }
}

impl From<&str> for ScalarValue {
    fn from(value: &str) -> Self {
        ScalarValue::Text(value.to_string())
    }
}

impl From<String> for ScalarValue {
    fn from(value: String) -> Self {
        ScalarValue::Text(value)
    }
}

/// Named parameter bound to a command
#[derive(Debug, Clone, PartialEq)]
pub struct SqlParameter {
    pub name: String,
    pub value: ScalarValue,
}

impl SqlParameter {
    pub fn new(name: impl Into<String>, value: impl Into<ScalarValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A command ready to be handed to the native driver
#[derive(Debug, Clone)]
pub struct SqlCommand {
    pub sql: String,
    pub timeout: Duration,
    pub parameters: Vec<SqlParameter>,
    /// Whether the command is bound to the active transaction
    pub transactional: bool,
}

/// Native connection handle for one vendor
///
/// A handle is created closed and may be opened and closed repeatedly.
pub trait NativeConnection {
    fn open(&mut self) -> Result<(), DriverError>;

    fn close(&mut self) -> Result<(), DriverError>;

    /// Release pooled resources held for this connection string
    fn clear_pool(&mut self) {}

    fn state(&self) -> ConnectionState;

    fn begin_transaction(&mut self) -> Result<(), DriverError>;

    fn commit(&mut self) -> Result<(), DriverError>;

    fn rollback(&mut self) -> Result<(), DriverError>;

    fn execute_nonquery(&mut self, command: &SqlCommand) -> Result<usize, DriverError>;

    fn execute_scalar(&mut self, command: &SqlCommand) -> Result<ScalarValue, DriverError>;
}
