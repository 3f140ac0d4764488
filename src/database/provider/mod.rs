//! Database providers
//!
//! A provider bundles everything that differs between database vendors: how a
//! native connection is created, which driver errors count as transient, and
//! the administrative script templates. Providers are selected by name from a
//! static table.

mod sqlite;

pub use sqlite::{SqliteConnection, SqliteProvider};

use crate::config::TidemarkConfig;
use crate::database::core::{DriverError, NativeConnection};
use anyhow::{anyhow, Result};

/// Capability set of one database vendor
///
/// Script templates return `None` when the vendor has no facility for the
/// operation.
pub trait Provider {
    fn name(&self) -> &'static str;

    /// Create an unopened native connection for the given connection string
    fn create_connection(&self, connection_string: &str) -> Box<dyn NativeConnection>;

    /// Whether the error is a dropped-connection failure that may be retried
    fn is_transient(&self, error: &DriverError) -> bool;

    fn supports_ddl_transactions(&self) -> bool {
        true
    }

    fn create_database_script(&self, config: &TidemarkConfig) -> Option<String>;

    fn delete_database_script(&self, config: &TidemarkConfig) -> Option<String>;

    fn set_recovery_mode_script(&self, config: &TidemarkConfig, simple: bool) -> Option<String>;

    fn backup_database_script(&self, config: &TidemarkConfig, output_dir: &str) -> Option<String>;

    fn restore_database_script(
        &self,
        config: &TidemarkConfig,
        restore_from_path: &str,
        custom_restore_options: &str,
    ) -> Option<String>;
}

type ProviderFactory = fn() -> Box<dyn Provider>;

const PROVIDERS: &[(&str, ProviderFactory)] = &[("sqlite", sqlite), ("sqlite3", sqlite)];

fn sqlite() -> Box<dyn Provider> {
    Box::new(SqliteProvider)
}

/// Names accepted by [`provider_for`]
pub fn provider_names() -> Vec<&'static str> {
    PROVIDERS.iter().map(|(name, _)| *name).collect()
}

/// Look up a provider by name (case-insensitive)
pub fn provider_for(name: &str) -> Result<Box<dyn Provider>> {
    let wanted = name.trim().to_lowercase();
    PROVIDERS
        .iter()
        .find(|(n, _)| *n == wanted)
        .map(|(_, factory)| factory())
        .ok_or_else(|| {
            anyhow!(
                "Unknown database provider '{}'. Supported providers: {}",
                name,
                provider_names().join(", ")
            )
        })
}

/// Quote a value as a SQL string literal
pub(crate) fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
