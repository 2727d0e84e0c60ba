//! Table output formatting using the `tabled` crate

use super::{truncate, OutputConfig};
use tabled::{
    builder::Builder,
    settings::{object::Columns, style::Style, Alignment, Modify, Width},
    Table,
};

/// Widest a single cell may get before it is cut with an ellipsis.
const MAX_CELL_WIDTH: usize = 48;

/// Table output formatter
pub struct TableOutput;

impl TableOutput {
    /// Two-column table of labels and values.
    pub fn format_key_value(pairs: &[(&str, String)], config: &OutputConfig) -> String {
        let mut builder = Builder::default();
        for (key, value) in pairs {
            builder.push_record([*key, value.as_str()]);
        }

        let mut table = builder.build();
        table.with(Style::rounded());
        table.with(Modify::new(Columns::first()).with(Alignment::right()));
        Self::fit(&mut table, config);
        table.to_string()
    }

    /// Table with a header row.
    pub fn from_rows(headers: &[&str], rows: &[Vec<String>], config: &OutputConfig) -> String {
        if rows.is_empty() {
            return "(no results)".to_string();
        }

        let mut builder = Builder::default();
        builder.push_record(headers.iter().copied());
        for row in rows {
            if config.should_truncate() {
                builder.push_record(row.iter().map(|s| truncate(s, MAX_CELL_WIDTH)));
            } else {
                builder.push_record(row.iter().cloned());
            }
        }

        let mut table = builder.build();
        table.with(Style::rounded());
        Self::fit(&mut table, config);
        table.to_string()
    }

    fn fit(table: &mut Table, config: &OutputConfig) {
        if config.should_truncate() {
            table.with(Width::wrap(config.effective_width()));
        }
    }
}
