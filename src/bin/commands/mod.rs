pub mod config;
pub mod database;
pub mod history;
pub mod migrate;
pub mod split;
pub mod version;

use tidemark::{Database, TidemarkConfig};

/// Open the engine for the configured target, exiting on failure
pub(crate) fn open_database(config: &TidemarkConfig) -> Database {
    match Database::from_config(config.clone()) {
        Ok(db) => db,
        Err(e) => {
            eprintln!("ERROR: Failed to open database: {}", e);
            std::process::exit(1);
        }
    }
}

/// Print a serializable value for the JSON output formats
///
/// Returns false when the format is not a JSON variant.
pub(crate) fn print_json<T: serde::Serialize + ?Sized>(
    value: &T,
    output_format: tidemark::OutputFormat,
) -> bool {
    match output_format.to_json(value) {
        Some(Ok(json)) => {
            println!("{}", json);
            true
        }
        Some(Err(e)) => {
            eprintln!("ERROR: Failed to serialize to JSON: {}", e);
            true
        }
        None => false,
    }
}
