//! Core database infrastructure
//!
//! This module provides the foundational database components used by the engine:
//! - `driver`: the native SQL driver contract every vendor implements
//! - `DatabaseConn`: connection wrapper owned by the engine
//! - `SchemaManager`: ledger schema initialization and upgrades

mod connection;
mod driver;
mod schema;

pub use connection::{ConnectionKind, DatabaseConn, TransactionHandle};
pub use driver::{
    ConnectionState, DriverError, NativeConnection, ScalarValue, SqlCommand, SqlParameter,
};
pub use schema::{SchemaDefinitions, SchemaManager, SchemaStatus, SCHEMA_VERSION};
