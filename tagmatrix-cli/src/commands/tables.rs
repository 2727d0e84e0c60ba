//! Tables command - List groups and tables, or preview one table

use std::path::Path;

use anyhow::Result;
use colored::Colorize;
use serde::Serialize;

use tagmatrix_store::storage::{GroupStats, TableInfo, TablePreview};

use super::open_store_read_only;
use crate::output::{Output, OutputConfig, OutputFormat, TableDisplay, TableOutput};

#[derive(Debug, Serialize)]
pub struct StoreOverview {
    pub path: String,
    pub groups: Vec<GroupStats>,
    pub tables: Vec<TableInfo>,
}

impl TableDisplay for StoreOverview {
    fn to_table(&self, config: &OutputConfig) -> String {
        let mut output = format!("{} {}\n\n", "STORE:".cyan().bold(), self.path.yellow());

        output.push_str(&format!("{}\n", "Groups".bold()));
        let groups: Vec<Vec<String>> = self
            .groups
            .iter()
            .map(|g| {
                vec![
                    g.group.clone(),
                    g.records.to_string(),
                    g.distinct_digests.to_string(),
                    g.total_bytes.to_string(),
                ]
            })
            .collect();
        output.push_str(&TableOutput::from_rows(
            &["group", "records", "distinct", "bytes"],
            &groups,
            config,
        ));

        output.push_str(&format!("\n\n{}\n", "Tables".bold()));
        let tables: Vec<Vec<String>> = self
            .tables
            .iter()
            .map(|t| {
                vec![
                    t.name.clone(),
                    t.kind.to_string(),
                    t.columns.to_string(),
                    t.rows.to_string(),
                ]
            })
            .collect();
        output.push_str(&TableOutput::from_rows(
            &["table", "kind", "columns", "rows"],
            &tables,
            config,
        ));
        output
    }

    fn to_rows(&self) -> Option<(Vec<String>, Vec<Vec<String>>)> {
        let header = ["table", "kind", "columns", "rows"]
            .iter()
            .map(|h| h.to_string())
            .collect();
        let rows = self
            .tables
            .iter()
            .map(|t| {
                vec![
                    t.name.clone(),
                    t.kind.to_string(),
                    t.columns.to_string(),
                    t.rows.to_string(),
                ]
            })
            .collect();
        Some((header, rows))
    }
}

#[derive(Debug, Serialize)]
pub struct TableRows {
    pub table: String,
    pub total_rows: usize,
    #[serde(flatten)]
    pub preview: TablePreview,
}

impl TableRows {
    fn text_rows(&self) -> Vec<Vec<String>> {
        self.preview
            .rows
            .iter()
            .map(|row| row.iter().map(|v| v.clone().unwrap_or_default()).collect())
            .collect()
    }
}

impl TableDisplay for TableRows {
    fn to_table(&self, config: &OutputConfig) -> String {
        let mut output = format!(
            "{} {} ({} of {} rows)\n",
            "TABLE:".cyan().bold(),
            self.table.yellow(),
            self.preview.rows.len(),
            self.total_rows
        );
        let headers: Vec<&str> = self.preview.columns.iter().map(String::as_str).collect();
        output.push_str(&TableOutput::from_rows(&headers, &self.text_rows(), config));
        output
    }

    fn to_rows(&self) -> Option<(Vec<String>, Vec<Vec<String>>)> {
        Some((self.preview.columns.clone(), self.text_rows()))
    }
}

pub fn run(db: &Path, table: Option<&str>, limit: usize, format: OutputFormat) -> Result<()> {
    let store = open_store_read_only(db)?;

    match table {
        Some(table) => {
            let preview = store.preview(table, limit)?;
            let total_rows = store.row_count(table)?;
            let result = TableRows {
                table: table.to_string(),
                total_rows,
                preview,
            };
            Output::new(result, format).render()
        }
        None => {
            let result = StoreOverview {
                path: db.display().to_string(),
                groups: store.groups()?,
                tables: store.tables()?,
            };
            Output::new(result, format).render()
        }
    }
}
