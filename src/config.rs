use anyhow::{anyhow, Result};
use config::Config;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::splitter::DEFAULT_STATEMENT_SEPARATOR;

#[derive(Debug, Clone)]
pub struct TidemarkConfig {
    /// Path to the directory holding default database and ledger files
    pub data_dir: String,

    /// Name of the database provider, e.g. `sqlite`
    pub provider: String,

    pub server_name: String,
    pub database_name: String,

    /// Connection string of the target database
    pub connection_string: String,

    /// Connection string of the administrative (server-level) connection
    pub admin_connection_string: String,

    /// Connection string of the migration ledger store
    pub ledger_connection_string: String,

    pub command_timeout_secs: u64,
    pub admin_command_timeout_secs: u64,
    pub restore_timeout_secs: u64,

    /// Split scripts into statements at the statement separator
    pub split_batch_statements: bool,
    pub statement_separator: String,

    /// Recorded as `entered_by` on every ledger row
    pub user_name: String,

    /// Identifies the script repository the versions belong to
    pub repository_path: String,

    /// Leave `{{Token}}` placeholders in custom scripts untouched
    pub disable_token_replacement: bool,

    /// Warn about changed one-time scripts instead of failing the run
    pub warn_on_one_time_script_changes: bool,
}

const EMPTY_CONFIG: &str = r#"### tidemark configuration file

### directory for default database and ledger files
# data_dir = "~/.tidemark"

### target database
# provider = "sqlite"
# server_name = "localhost"
# database_name = "tidemark"
# connection_string = "~/.tidemark/tidemark.sqlite3"
# admin_connection_string = ":memory:"
# ledger_connection_string = "~/.tidemark/tidemark-ledger.sqlite3"

### command timeouts (in seconds)
# command_timeout_secs = 60
# admin_command_timeout_secs = 300
# restore_timeout_secs = 900

### script handling
# split_batch_statements = true
# statement_separator = ";"
# repository_path = ""
# disable_token_replacement = false
# warn_on_one_time_script_changes = false
"#;

const DEFAULT_DATABASE_NAME: &str = "tidemark";

impl Default for TidemarkConfig {
    fn default() -> Self {
        let home_dir = dirs::home_dir()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|| ".".to_string());

        Self::from_map(&HashMap::new(), &format!("{}/.tidemark", home_dir))
    }
}

impl TidemarkConfig {
    /// Function to create and initialize a new configuration
    pub fn new(path: &Option<String>) -> Result<TidemarkConfig> {
        let mut builder = Config::builder();

        // By default use $HOME/.tidemark/tidemark.toml as the configuration file path
        let home_dir = dirs::home_dir()
            .ok_or_else(|| anyhow!("Could not find home directory"))?
            .to_str()
            .ok_or_else(|| anyhow!("Could not convert home directory path to string"))?
            .to_owned();

        let tidemark_dir = format!("{}/.tidemark", home_dir.as_str());

        match path {
            Some(p) => {
                let path = Path::new(p.as_str());
                if path.exists() {
                    let path_str = path
                        .to_str()
                        .ok_or_else(|| anyhow!("Could not convert path to string"))?;
                    builder = builder.add_source(config::File::with_name(path_str));
                } else {
                    std::fs::write(p.as_str(), EMPTY_CONFIG)
                        .map_err(|e| anyhow!("Unable to create config file: {}", e))?;
                }
            }
            None => {
                std::fs::create_dir_all(tidemark_dir.as_str())
                    .map_err(|e| anyhow!("Unable to create tidemark directory: {}", e))?;
                let p = format!("{}/tidemark.toml", tidemark_dir.as_str());
                if Path::new(p.as_str()).exists() {
                    builder = builder.add_source(config::File::with_name(p.as_str()));
                } else {
                    std::fs::write(p.as_str(), EMPTY_CONFIG).map_err(|e| {
                        anyhow!("Unable to create config file {}: {}", p.as_str(), e)
                    })?;
                }
            }
        }

        // Add in settings from the environment (with a prefix of TIDEMARK)
        // E.g., `TIDEMARK_DATABASE_NAME=orders ./tidemark` would set the database name
        builder = builder.add_source(config::Environment::with_prefix("TIDEMARK"));

        let settings = builder
            .build()
            .map_err(|e| anyhow!("Failed to build configuration: {}", e))?;

        let config = settings
            .try_deserialize::<HashMap<String, String>>()
            .map_err(|e| anyhow!("Failed to deserialize configuration: {}", e))?;

        let tidemark = Self::from_map(&config, &tidemark_dir);
        std::fs::create_dir_all(tidemark.data_dir.as_str())
            .map_err(|e| anyhow!("Unable to create data directory: {}", e))?;

        Ok(tidemark)
    }

    /// Build a configuration from raw key/value settings
    ///
    /// Missing or unparsable values fall back to their defaults.
    pub fn from_map(config: &HashMap<String, String>, default_data_dir: &str) -> TidemarkConfig {
        let get = |key: &str| {
            config
                .get(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let get_u64 = |key: &str, default: u64| {
            get(key).and_then(|s| s.parse().ok()).unwrap_or(default)
        };
        let get_bool = |key: &str, default: bool| {
            get(key)
                .and_then(|s| s.to_lowercase().parse().ok())
                .unwrap_or(default)
        };

        let data_dir = get("data_dir")
            .unwrap_or_else(|| default_data_dir.to_string())
            .trim_end_matches('/')
            .to_string();
        let database_name = get("database_name").unwrap_or_else(|| DEFAULT_DATABASE_NAME.to_string());

        let connection_string = get("connection_string")
            .unwrap_or_else(|| format!("{}/{}.sqlite3", data_dir, database_name));
        let ledger_connection_string = get("ledger_connection_string")
            .unwrap_or_else(|| format!("{}/{}-ledger.sqlite3", data_dir, database_name));

        let user_name = get("user_name")
            .or_else(|| std::env::var("USER").ok())
            .or_else(|| std::env::var("USERNAME").ok())
            .unwrap_or_else(|| "tidemark".to_string());

        TidemarkConfig {
            data_dir,
            provider: get("provider").unwrap_or_else(|| "sqlite".to_string()),
            server_name: get("server_name").unwrap_or_else(|| "localhost".to_string()),
            database_name,
            connection_string,
            admin_connection_string: get("admin_connection_string")
                .unwrap_or_else(|| ":memory:".to_string()),
            ledger_connection_string,
            command_timeout_secs: get_u64("command_timeout_secs", 60),
            admin_command_timeout_secs: get_u64("admin_command_timeout_secs", 300),
            restore_timeout_secs: get_u64("restore_timeout_secs", 900),
            split_batch_statements: get_bool("split_batch_statements", true),
            statement_separator: get("statement_separator")
                .unwrap_or_else(|| DEFAULT_STATEMENT_SEPARATOR.to_string()),
            user_name,
            repository_path: get("repository_path").unwrap_or_default(),
            disable_token_replacement: get_bool("disable_token_replacement", false),
            warn_on_one_time_script_changes: get_bool("warn_on_one_time_script_changes", false),
        }
    }

    /// Configuration for a given target and ledger, everything else default
    pub fn for_target(connection_string: &str, ledger_connection_string: &str) -> TidemarkConfig {
        TidemarkConfig {
            connection_string: connection_string.to_string(),
            ledger_connection_string: ledger_connection_string.to_string(),
            ..TidemarkConfig::default()
        }
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn admin_command_timeout(&self) -> Duration {
        Duration::from_secs(self.admin_command_timeout_secs)
    }

    pub fn restore_timeout(&self) -> Duration {
        Duration::from_secs(self.restore_timeout_secs)
    }

    /// Display configuration summary
    pub fn summary(&self) -> String {
        let lines = [
            format!("Data Directory:     {}", self.data_dir),
            format!("Provider:           {}", self.provider),
            format!("Server Name:        {}", self.server_name),
            format!("Database Name:      {}", self.database_name),
            format!("Connection:         {}", self.connection_string),
            format!("Admin Connection:   {}", self.admin_connection_string),
            format!("Ledger Connection:  {}", self.ledger_connection_string),
            format!(
                "Timeouts:           command {}s, admin {}s, restore {}s",
                self.command_timeout_secs, self.admin_command_timeout_secs, self.restore_timeout_secs
            ),
            format!(
                "Batch Splitting:    {} (separator '{}')",
                if self.split_batch_statements { "on" } else { "off" },
                self.statement_separator
            ),
            format!("User Name:          {}", self.user_name),
            format!("Repository Path:    {}", self.repository_path),
        ];

        lines.join("\n")
    }

    /// Get the config file path
    pub fn config_file_path() -> String {
        let home_dir = dirs::home_dir()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|| "~".to_string());
        format!("{}/.tidemark/tidemark.toml", home_dir)
    }
}

/// Information about the ledger store
#[derive(Debug, Serialize, Clone)]
pub struct LedgerInfo {
    pub path: String,
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    pub schema_initialized: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scripts_run_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub versions_count: Option<u64>,
}

/// Get ledger store information without modifying it
pub fn get_ledger_info(config: &TidemarkConfig) -> LedgerInfo {
    use crate::database::{SchemaManager, SchemaStatus, SCHEMA_VERSION};

    let path = config.ledger_connection_string.clone();
    let exists = Path::new(&path).exists();
    let size_bytes = if exists {
        std::fs::metadata(&path).ok().map(|m| m.len())
    } else {
        None
    };

    let mut info = LedgerInfo {
        path,
        exists,
        size_bytes,
        schema_initialized: false,
        schema_version: None,
        scripts_run_count: None,
        versions_count: None,
    };
    if !exists {
        return info;
    }

    let conn = match rusqlite::Connection::open(&info.path) {
        Ok(conn) => conn,
        Err(_) => return info,
    };
    let manager = SchemaManager::new(&conn);
    let (initialized, version) = match manager.check_status() {
        Ok(SchemaStatus::Current) => (true, Some(SCHEMA_VERSION)),
        Ok(SchemaStatus::NeedsMigration { from, to: _ }) => (true, Some(from)),
        Ok(SchemaStatus::Incompatible {
            database_version,
            required_version: _,
        }) => (true, Some(database_version)),
        Ok(SchemaStatus::NotInitialized) | Ok(SchemaStatus::Corrupted) | Err(_) => (false, None),
    };

    info.schema_initialized = initialized;
    info.schema_version = version;
    if initialized {
        let count = |table: &str| -> Option<u64> {
            conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                row.get(0)
            })
            .ok()
        };
        info.scripts_run_count = count("tidemark_scripts_run");
        info.versions_count = count("tidemark_version");
    }

    info
}

/// Format a byte size as a human-readable string
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
