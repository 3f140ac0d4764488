use clap::{Args, Subcommand};
use serde::Serialize;
use tidemark::database::ensure_data_dir;
use tidemark::{OutputFormat, TidemarkConfig};

/// Arguments for the Database command
#[derive(Args)]
pub struct DatabaseArgs {
    #[clap(subcommand)]
    pub command: DatabaseCommands,
}

#[derive(Subcommand)]
pub enum DatabaseCommands {
    /// Create the database if it does not exist
    Create {
        /// Custom creation script; `{{Token}}` placeholders are replaced
        #[clap(long, value_name = "FILE")]
        script: Option<String>,
    },

    /// Drop the database if it exists
    Drop {
        /// Confirm dropping the database
        #[clap(long)]
        yes: bool,
    },

    /// Back the database up into a directory
    Backup {
        /// Output directory
        dir: String,
    },

    /// Restore the database from a backup
    Restore {
        /// Backup to restore from
        path: String,

        /// Extra provider options appended to the restore command
        #[clap(long, default_value = "")]
        options: String,
    },

    /// Set the recovery mode of the database
    Recovery {
        /// Use simple recovery instead of full
        #[clap(long)]
        simple: bool,
    },
}

#[derive(Debug, Serialize)]
struct AdminResult {
    operation: &'static str,
    database: String,
    provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    created: Option<bool>,
}

pub fn run(config: &TidemarkConfig, args: DatabaseArgs, output_format: OutputFormat) {
    let mut db = super::open_database(config);

    let mut result = AdminResult {
        operation: "",
        database: config.database_name.clone(),
        provider: db.provider().name().to_string(),
        created: None,
    };

    match args.command {
        DatabaseCommands::Create { script } => {
            let custom = match script {
                Some(path) => match std::fs::read_to_string(&path) {
                    Ok(text) => text,
                    Err(e) => {
                        eprintln!("ERROR: Failed to read '{}': {}", path, e);
                        std::process::exit(1);
                    }
                },
                None => String::new(),
            };
            result.operation = "create";
            result.created = Some(db.create_database_if_it_doesnt_exist(&custom));
        }
        DatabaseCommands::Drop { yes } => {
            if !yes {
                eprintln!(
                    "ERROR: Dropping {} cannot be undone, pass --yes to confirm",
                    config.database_name
                );
                std::process::exit(1);
            }
            result.operation = "drop";
            if let Err(e) = db.delete_database_if_it_exists() {
                eprintln!("ERROR: {}", e);
                std::process::exit(1);
            }
        }
        DatabaseCommands::Backup { dir } => {
            if let Err(e) = ensure_data_dir(&dir) {
                eprintln!("ERROR: {}", e);
                std::process::exit(1);
            }
            result.operation = "backup";
            db.backup_database(&dir);
        }
        DatabaseCommands::Restore { path, options } => {
            result.operation = "restore";
            db.restore_database(&path, &options);
        }
        DatabaseCommands::Recovery { simple } => {
            result.operation = if simple {
                "recovery simple"
            } else {
                "recovery full"
            };
            db.set_recovery_mode(simple);
        }
    }

    if let Err(e) = db.close_admin_connection() {
        eprintln!("ERROR: Failed to close admin connection: {}", e);
        std::process::exit(1);
    }

    if super::print_json(&result, output_format) {
        return;
    }
    match result.created {
        Some(true) => println!("Created database {}", result.database),
        Some(false) => println!("Database {} was not created", result.database),
        None => println!(
            "Finished {} on {} ({})",
            result.operation, result.database, result.provider
        ),
    }
}
