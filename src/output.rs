//! Output formatting shared by the CLI commands
//!
//! Ledger records render as tables (with the `display` feature), JSON, or
//! pipe-separated values.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How a command prints its result
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputFormat {
    /// Rounded table
    #[default]
    Table,
    Markdown,
    /// One compact JSON document
    Json,
    JsonPretty,
    /// One JSON document per record
    JsonLine,
    /// Pipe-separated with a header row
    Psv,
}

const FORMATS: [OutputFormat; 6] = [
    OutputFormat::Table,
    OutputFormat::Markdown,
    OutputFormat::Json,
    OutputFormat::JsonPretty,
    OutputFormat::JsonLine,
    OutputFormat::Psv,
];

impl OutputFormat {
    pub fn name(&self) -> &'static str {
        match self {
            OutputFormat::Table => "table",
            OutputFormat::Markdown => "markdown",
            OutputFormat::Json => "json",
            OutputFormat::JsonPretty => "json-pretty",
            OutputFormat::JsonLine => "json-line",
            OutputFormat::Psv => "psv",
        }
    }

    pub fn is_json(&self) -> bool {
        matches!(
            self,
            OutputFormat::Json | OutputFormat::JsonPretty | OutputFormat::JsonLine
        )
    }

    pub fn is_table(&self) -> bool {
        matches!(self, OutputFormat::Table | OutputFormat::Markdown)
    }

    /// Format names accepted on the command line
    pub fn all_names() -> Vec<&'static str> {
        FORMATS.iter().map(|f| f.name()).collect()
    }

    /// Serialize a single value for the JSON variants
    ///
    /// Returns `None` for non-JSON formats.
    pub fn to_json<T: Serialize + ?Sized>(&self, value: &T) -> Option<serde_json::Result<String>> {
        match self {
            OutputFormat::Json | OutputFormat::JsonLine => Some(serde_json::to_string(value)),
            OutputFormat::JsonPretty => Some(serde_json::to_string_pretty(value)),
            _ => None,
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_lowercase();
        let name = match name.as_str() {
            "md" => "markdown",
            "jsonl" => "json-line",
            "pipe" => "psv",
            other => other,
        };
        FORMATS
            .iter()
            .find(|f| f.name() == name)
            .copied()
            .ok_or_else(|| {
                format!(
                    "unknown output format '{}', expected one of: {}",
                    s,
                    Self::all_names().join(", ")
                )
            })
    }
}

/// Render a list of records in the requested format
#[cfg(feature = "display")]
pub fn format_records<T>(records: &[T], format: OutputFormat) -> anyhow::Result<String>
where
    T: Serialize + tabled::Tabled,
{
    use tabled::settings::Style;
    use tabled::Table;

    let output = match format {
        OutputFormat::Table => Table::new(records).with(Style::rounded()).to_string(),
        OutputFormat::Markdown => Table::new(records).with(Style::markdown()).to_string(),
        OutputFormat::Json => serde_json::to_string(records)?,
        OutputFormat::JsonPretty => serde_json::to_string_pretty(records)?,
        OutputFormat::JsonLine => records
            .iter()
            .map(serde_json::to_string)
            .collect::<Result<Vec<_>, _>>()?
            .join("\n"),
        OutputFormat::Psv => {
            let mut lines = vec![T::headers().join("|")];
            lines.extend(records.iter().map(|r| r.fields().join("|")));
            lines.join("\n")
        }
    };
    Ok(output)
}
