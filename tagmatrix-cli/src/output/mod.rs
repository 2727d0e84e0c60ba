//! Output formatting for tagmatrix commands.
//!
//! Commands build a serializable result and hand it to [`Output`], which
//! renders it as a table (human-readable), JSON, or CSV. Colors and
//! truncation follow whether stdout is a terminal.

use clap::ValueEnum;
use serde::Serialize;
use std::io::IsTerminal;
use std::str::FromStr;

mod csv;
mod json;
mod table;

pub use self::csv::CsvOutput;
pub use self::json::JsonOutput;
pub use self::table::TableOutput;

/// Output format for CLI results
#[derive(Debug, Clone, Copy, Default, ValueEnum, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable table format (default)
    #[default]
    Table,
    /// JSON format for machine consumption
    Json,
    /// CSV format for spreadsheet/data processing
    Csv,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" => Ok(OutputFormat::Table),
            "json" => Ok(OutputFormat::Json),
            "csv" => Ok(OutputFormat::Csv),
            _ => Err(format!("Unknown output format: '{}'", s)),
        }
    }
}

/// Configuration for output rendering
#[derive(Debug, Clone)]
pub struct OutputConfig {
    pub format: OutputFormat,
    /// Disable truncation of long values
    pub no_truncate: bool,
}

impl OutputConfig {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            no_truncate: false,
        }
    }

    /// Detect whether stdout is a terminal. Piped output is never truncated.
    pub fn auto_detect(format: OutputFormat) -> Self {
        let is_tty = std::io::stdout().is_terminal();
        Self {
            no_truncate: !is_tty,
            ..Self::new(format)
        }
    }

    /// Terminal width, or 120 columns when it cannot be detected.
    pub fn effective_width(&self) -> usize {
        terminal_size::terminal_size()
            .map(|(w, _)| w.0 as usize)
            .unwrap_or(120)
    }

    pub fn should_truncate(&self) -> bool {
        !self.no_truncate
    }
}

/// A command result that can be shown as a table.
///
/// JSON output serializes the value directly; CSV output defaults to the
/// tabular view produced by [`TableDisplay::to_rows`].
pub trait TableDisplay: Serialize {
    /// Human-readable rendering.
    fn to_table(&self, config: &OutputConfig) -> String;

    /// Header and rows for CSV export, if the result is tabular.
    fn to_rows(&self) -> Option<(Vec<String>, Vec<Vec<String>>)> {
        None
    }
}

impl<T: TableDisplay> TableDisplay for &T {
    fn to_table(&self, config: &OutputConfig) -> String {
        (**self).to_table(config)
    }

    fn to_rows(&self) -> Option<(Vec<String>, Vec<Vec<String>>)> {
        (**self).to_rows()
    }
}

/// Result wrapper that renders in the selected format
pub struct Output<T> {
    data: T,
    config: OutputConfig,
}

impl<T: TableDisplay> Output<T> {
    pub fn new(data: T, format: OutputFormat) -> Self {
        Self {
            data,
            config: OutputConfig::auto_detect(format),
        }
    }

    /// Render the output to stdout
    pub fn render(&self) -> anyhow::Result<()> {
        println!("{}", self.render_to_string());
        Ok(())
    }

    pub fn render_to_string(&self) -> String {
        match self.config.format {
            OutputFormat::Table => self.data.to_table(&self.config),
            OutputFormat::Json => JsonOutput::format(&self.data),
            OutputFormat::Csv => match self.data.to_rows() {
                Some((header, rows)) => CsvOutput::format_rows(&header, &rows),
                None => CsvOutput::format(&self.data),
            },
        }
    }
}

/// Truncate a string to `max_len` characters, adding an ellipsis.
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    if max_len <= 3 {
        return s.chars().take(max_len).collect();
    }
    let kept: String = s.chars().take(max_len - 3).collect();
    format!("{}...", kept)
}
