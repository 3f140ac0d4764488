use clap::Args;
use serde::Serialize;
use tidemark::{hash_script, OutputFormat, TidemarkConfig};

/// Arguments for the Version command
#[derive(Args)]
pub struct VersionArgs {
    /// Script repository to look up, defaults to the configured one
    #[clap(long)]
    pub repository_path: Option<String>,
}

/// Arguments for the Status command
#[derive(Args)]
pub struct StatusArgs {
    /// Script name as recorded in the ledger
    pub name: String,

    /// Compare the recorded hash with this file's content
    #[clap(long, value_name = "FILE")]
    pub file: Option<String>,
}

#[derive(Debug, Serialize)]
struct VersionInfo {
    repository_path: String,
    version: String,
}

#[derive(Debug, Serialize)]
struct ScriptStatus {
    script_name: String,
    has_run: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    recorded_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    file_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    changed: Option<bool>,
}

pub fn run(config: &TidemarkConfig, args: VersionArgs, output_format: OutputFormat) {
    let repository_path = args
        .repository_path
        .unwrap_or_else(|| config.repository_path.clone());

    let db = super::open_database(config);
    let info = VersionInfo {
        version: db.get_version(&repository_path),
        repository_path,
    };

    if super::print_json(&info, output_format) {
        return;
    }
    if info.repository_path.is_empty() {
        println!("{}", info.version);
    } else {
        println!("{}: {}", info.repository_path, info.version);
    }
}

pub fn run_status(config: &TidemarkConfig, args: StatusArgs, output_format: OutputFormat) {
    let StatusArgs { name, file } = args;

    let file_hash = match file {
        Some(path) => match std::fs::read_to_string(&path) {
            Ok(text) => Some(hash_script(&text)),
            Err(e) => {
                eprintln!("ERROR: Failed to read '{}': {}", path, e);
                std::process::exit(1);
            }
        },
        None => None,
    };

    let mut db = super::open_database(config);
    let has_run = match db.has_run_script_already(&name) {
        Ok(has_run) => has_run,
        Err(e) => {
            eprintln!("ERROR: Failed to look up {}: {}", name, e);
            std::process::exit(1);
        }
    };
    let recorded_hash = if has_run {
        db.get_current_script_hash(&name)
    } else {
        None
    };
    let changed = file_hash
        .as_ref()
        .filter(|_| has_run)
        .map(|hash| recorded_hash.as_ref() != Some(hash));

    let status = ScriptStatus {
        script_name: name,
        has_run,
        recorded_hash,
        file_hash,
        changed,
    };

    if super::print_json(&status, output_format) {
        return;
    }

    println!("Script:         {}", status.script_name);
    println!("Has run:        {}", if status.has_run { "yes" } else { "no" });
    if let Some(hash) = &status.recorded_hash {
        println!("Recorded hash:  {}", hash);
    }
    if let Some(hash) = &status.file_hash {
        println!("File hash:      {}", hash);
    }
    if let Some(changed) = status.changed {
        println!("Changed:        {}", if changed { "yes" } else { "no" });
    }
}
