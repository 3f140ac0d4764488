use clap::Args;
use serde::Serialize;
use tabled::Tabled;
use tidemark::output::format_records;
use tidemark::{OutputFormat, StatementSplitter, TidemarkConfig};

/// Arguments for the Split command
#[derive(Args)]
pub struct SplitArgs {
    /// Script file to split
    pub file: String,

    /// Statement separator, defaults to the configured one
    #[clap(short, long)]
    pub separator: Option<String>,
}

#[derive(Debug, Serialize, Tabled)]
struct StatementRow {
    index: usize,
    statement: String,
}

pub fn run(config: &TidemarkConfig, args: SplitArgs, output_format: OutputFormat) {
    let SplitArgs { file, separator } = args;

    let text = match std::fs::read_to_string(&file) {
        Ok(text) => text,
        Err(e) => {
            eprintln!("ERROR: Failed to read '{}': {}", file, e);
            std::process::exit(1);
        }
    };

    let separator = separator.unwrap_or_else(|| config.statement_separator.clone());
    let splitter = StatementSplitter::new(&separator, true);

    let rows: Vec<StatementRow> = splitter
        .split(&text)
        .into_iter()
        .enumerate()
        .map(|(i, statement)| StatementRow {
            index: i + 1,
            statement,
        })
        .collect();

    match format_records(&rows, output_format) {
        Ok(output) => println!("{}", output),
        Err(e) => eprintln!("ERROR: {}", e),
    }
}
