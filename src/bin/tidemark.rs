use clap::{Parser, Subcommand};
use tidemark::*;
use tracing::Level;

mod commands;

use commands::config::ConfigArgs;
use commands::database::DatabaseArgs;
use commands::history::{ErrorsArgs, HistoryArgs};
use commands::migrate::MigrateArgs;
use commands::split::SplitArgs;
use commands::version::{StatusArgs, VersionArgs};

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    /// configuration file path, by default $HOME/.tidemark/tidemark.toml is used
    #[clap(short, long, global = true)]
    config: Option<String>,

    /// Print debug information
    #[clap(long, global = true)]
    debug: bool,

    /// Output format: table, markdown, json, json-pretty, json-line, psv
    #[clap(short, long, global = true, default_value = "table")]
    format: OutputFormat,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply migration scripts to the configured database
    Migrate(MigrateArgs),

    /// List scripts recorded as run
    History(HistoryArgs),

    /// List recorded script failures
    Errors(ErrorsArgs),

    /// Show the current version of a script repository
    Version(VersionArgs),

    /// Show whether a script has run and with which hash
    Status(StatusArgs),

    /// Split a script file into the statements tidemark would run
    Split(SplitArgs),

    /// Show the effective configuration and ledger status
    Config(ConfigArgs),

    /// Administrative database operations
    Database(DatabaseArgs),
}

fn main() {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let level = if cli.debug { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let config = match TidemarkConfig::new(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            std::process::exit(1);
        }
    };

    match cli.command {
        Commands::Migrate(args) => commands::migrate::run(&config, args, cli.format),
        Commands::History(args) => commands::history::run(&config, args, cli.format),
        Commands::Errors(args) => commands::history::run_errors(&config, args, cli.format),
        Commands::Version(args) => commands::version::run(&config, args, cli.format),
        Commands::Status(args) => commands::version::run_status(&config, args, cli.format),
        Commands::Split(args) => commands::split::run(&config, args, cli.format),
        Commands::Config(args) => commands::config::run(&config, args, cli.format),
        Commands::Database(args) => commands::database::run(&config, args, cli.format),
    }
}
