use clap::Args;
use tidemark::output::format_records;
use tidemark::{OutputFormat, TidemarkConfig};

/// Arguments for the History command
#[derive(Args)]
pub struct HistoryArgs {
    /// Only show runs of scripts whose name contains this text
    #[clap(short, long)]
    pub name: Option<String>,

    /// Only show runs recorded under this version id
    #[clap(long)]
    pub version_id: Option<i64>,
}

/// Arguments for the Errors command
#[derive(Args)]
pub struct ErrorsArgs {
    /// Only show failures of scripts whose name contains this text
    #[clap(short, long)]
    pub name: Option<String>,

    /// Print the failing statement of each error
    #[clap(long)]
    pub statements: bool,
}

pub fn run(config: &TidemarkConfig, args: HistoryArgs, output_format: OutputFormat) {
    let HistoryArgs { name, version_id } = args;

    let db = super::open_database(config);
    let runs = match db.script_runs() {
        Ok(runs) => runs,
        Err(e) => {
            eprintln!("ERROR: Failed to read script history: {}", e);
            std::process::exit(1);
        }
    };

    let runs: Vec<_> = runs
        .into_iter()
        .filter(|r| name.as_ref().is_none_or(|n| r.script_name.contains(n.as_str())))
        .filter(|r| version_id.is_none_or(|id| r.version_id == id))
        .collect();

    if runs.is_empty() && output_format.is_table() {
        println!("No scripts have been run");
        return;
    }

    match format_records(&runs, output_format) {
        Ok(output) => println!("{}", output),
        Err(e) => eprintln!("ERROR: {}", e),
    }
}

pub fn run_errors(config: &TidemarkConfig, args: ErrorsArgs, output_format: OutputFormat) {
    let ErrorsArgs { name, statements } = args;

    let db = super::open_database(config);
    let errors = match db.script_run_errors() {
        Ok(errors) => errors,
        Err(e) => {
            eprintln!("ERROR: Failed to read script errors: {}", e);
            std::process::exit(1);
        }
    };

    let errors: Vec<_> = errors
        .into_iter()
        .filter(|r| name.as_ref().is_none_or(|n| r.script_name.contains(n.as_str())))
        .collect();

    if errors.is_empty() && output_format.is_table() {
        println!("No script errors recorded");
        return;
    }

    match format_records(&errors, output_format) {
        Ok(output) => println!("{}", output),
        Err(e) => eprintln!("ERROR: {}", e),
    }

    if statements && !output_format.is_json() {
        for error in &errors {
            println!("\n-- {} ({})", error.script_name, error.entry_date);
            println!("{}", error.erroneous_part_of_script);
        }
    }
}
