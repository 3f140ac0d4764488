use clap::Args;
use serde::Serialize;
use tidemark::database::provider_names;
use tidemark::{format_size, get_ledger_info, LedgerInfo, OutputFormat, TidemarkConfig};

/// Arguments for the Config command
#[derive(Args)]
pub struct ConfigArgs {
    /// Also list the files in the data directory
    #[clap(short, long)]
    pub verbose: bool,
}

#[derive(Debug, Serialize)]
struct ConfigInfo {
    config_file: String,
    data_dir: String,
    provider: String,
    available_providers: Vec<&'static str>,
    database_name: String,
    connection_string: String,
    admin_connection_string: String,
    command_timeout_secs: u64,
    admin_command_timeout_secs: u64,
    restore_timeout_secs: u64,
    split_batch_statements: bool,
    statement_separator: String,
    user_name: String,
    repository_path: String,
    ledger: LedgerInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    files: Option<Vec<FileInfo>>,
}

#[derive(Debug, Serialize)]
struct FileInfo {
    name: String,
    size_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    modified: Option<String>,
}

pub fn run(config: &TidemarkConfig, args: ConfigArgs, output_format: OutputFormat) {
    let ConfigArgs { verbose } = args;

    let files = verbose.then(|| list_files(&config.data_dir));

    let config_info = ConfigInfo {
        config_file: TidemarkConfig::config_file_path(),
        data_dir: config.data_dir.clone(),
        provider: config.provider.clone(),
        available_providers: provider_names(),
        database_name: config.database_name.clone(),
        connection_string: config.connection_string.clone(),
        admin_connection_string: config.admin_connection_string.clone(),
        command_timeout_secs: config.command_timeout_secs,
        admin_command_timeout_secs: config.admin_command_timeout_secs,
        restore_timeout_secs: config.restore_timeout_secs,
        split_batch_statements: config.split_batch_statements,
        statement_separator: config.statement_separator.clone(),
        user_name: config.user_name.clone(),
        repository_path: config.repository_path.clone(),
        ledger: get_ledger_info(config),
        files,
    };

    if super::print_json(&config_info, output_format) {
        return;
    }

    // Table, Markdown, and PSV all use the same human-readable format
    println!("Tidemark Configuration");
    println!("======================\n");
    println!("Config File:        {}", config_info.config_file);
    println!("{}", config.summary());
    println!();
    print_ledger(&config_info.ledger);

    if let Some(files) = &config_info.files {
        println!();
        println!("Files:");
        if files.is_empty() {
            println!("  (none)");
        }
        for file in files {
            println!(
                "  {:<40} {:>12}  {}",
                file.name,
                format_size(file.size_bytes),
                file.modified.as_deref().unwrap_or("-")
            );
        }
    }
}

fn print_ledger(ledger: &LedgerInfo) {
    println!("Ledger:");
    println!("  Path:           {}", ledger.path);
    println!(
        "  Status:         {}",
        if ledger.exists { "exists" } else { "not created" }
    );
    if let Some(size) = ledger.size_bytes {
        println!("  Size:           {}", format_size(size));
    }
    match ledger.schema_version {
        Some(version) if ledger.schema_initialized => {
            println!("  Schema:         initialized (v{})", version)
        }
        _ => println!("  Schema:         not initialized"),
    }
    if let Some(count) = ledger.scripts_run_count {
        println!("  Scripts run:    {}", count);
    }
    if let Some(count) = ledger.versions_count {
        println!("  Versions:       {}", count);
    }
}

fn list_files(data_dir: &str) -> Vec<FileInfo> {
    let mut files = Vec::new();
    if let Ok(entries) = std::fs::read_dir(data_dir) {
        for entry in entries.flatten() {
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }
            let modified = metadata.modified().ok().map(|t| {
                let datetime: chrono::DateTime<chrono::Utc> = t.into();
                datetime.format("%Y-%m-%d %H:%M:%S UTC").to_string()
            });
            files.push(FileInfo {
                name: entry.file_name().to_string_lossy().to_string(),
                size_bytes: metadata.len(),
                modified,
            });
        }
    }
    files.sort_by(|a, b| a.name.cmp(&b.name));
    files
}
