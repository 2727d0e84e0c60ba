//! Compare command - Tag-by-tag diff of two records or two groups
//!
//! With two record files, prints the per-tag comparison directly. With
//! `--groups`, compares every record of the origin group against its
//! terminal counterpart in the store and writes the rows to a table.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use colored::Colorize;
use serde::Serialize;

use tagmatrix_core::interchange::{read_records, read_remap};
use tagmatrix_core::types::Record;
use tagmatrix_core::{
    CompareOptions, CompareReport, ComparisonBase, ComparisonRow, FetchStrategy, GroupComparer, GroupSpec,
    RecordComparer, WriteMode,
};

use super::{batch_progress_bar, ensure_complete, execution_pairs, failure_lines, open_store, progress_observer};
use crate::output::{Output, OutputConfig, OutputFormat, TableDisplay, TableOutput};

/// Record files to compare.
pub struct FileArgs<'a> {
    pub left: &'a Path,
    pub right: &'a Path,
    pub left_id: Option<&'a str>,
    pub right_id: Option<&'a str>,
    pub left_label: &'a str,
    pub right_label: &'a str,
    /// Include identical tags
    pub all: bool,
}

/// Stored groups to compare.
pub struct GroupArgs<'a> {
    pub db: &'a Path,
    pub origin: &'a str,
    pub terminal: &'a str,
    pub remap: Option<&'a Path>,
    pub options: CompareOptions,
    pub show_progress: bool,
}

#[derive(Debug, Serialize)]
pub struct FileComparison {
    pub left_label: String,
    pub right_label: String,
    pub left_id: Option<String>,
    pub right_id: Option<String>,
    pub tags: usize,
    pub differences: usize,
    pub rows: Vec<ComparisonRow>,
    #[serde(skip)]
    columns: Vec<String>,
}

impl TableDisplay for FileComparison {
    fn to_table(&self, config: &OutputConfig) -> String {
        let mut output = format!(
            "{} {} -> {}\n",
            "COMPARE:".cyan().bold(),
            self.left_id.as_deref().unwrap_or("-").yellow(),
            self.right_id.as_deref().unwrap_or("-").green()
        );
        output.push_str(&format!(
            "{} of {} tags differ\n",
            self.differences.to_string().red(),
            self.tags
        ));

        let headers = ["tag_path", "name", self.left_label.as_str(), self.right_label.as_str(), "diff"];
        let rows: Vec<Vec<String>> = self
            .rows
            .iter()
            .map(|row| {
                vec![
                    row.tag_path.clone(),
                    row.metadata.name.clone().unwrap_or_default(),
                    row.left_value.clone().unwrap_or_else(|| "-".to_string()),
                    row.right_value.clone().unwrap_or_else(|| "-".to_string()),
                    if row.is_different { "*".to_string() } else { String::new() },
                ]
            })
            .collect();
        output.push_str(&TableOutput::from_rows(&headers, &rows, config));
        output
    }

    fn to_rows(&self) -> Option<(Vec<String>, Vec<Vec<String>>)> {
        let rows: Vec<Vec<String>> = self
            .rows
            .iter()
            .map(|row| {
                row.to_text_row()
                    .into_iter()
                    .map(Option::unwrap_or_default)
                    .collect()
            })
            .collect();
        Some((self.columns.clone(), rows))
    }
}

#[derive(Debug, Serialize)]
pub struct GroupComparison {
    #[serde(flatten)]
    pub report: CompareReport,
    pub remap_entries: usize,
}

impl TableDisplay for GroupComparison {
    fn to_table(&self, config: &OutputConfig) -> String {
        let report = &self.report;
        let mut output = format!(
            "{} {} -> {} into {}\n",
            "COMPARED".green().bold(),
            report.origin.yellow(),
            report.terminal.green(),
            report.table.cyan()
        );
        let mut pairs = vec![
            ("Identifiers", report.identifiers.to_string()),
            ("Remap entries", self.remap_entries.to_string()),
            ("Missing counterparts", report.missing_counterparts.to_string()),
            ("Rows written", report.rows_written.to_string()),
        ];
        pairs.extend(execution_pairs(&report.execution));
        output.push_str(&TableOutput::format_key_value(&pairs, config));
        output.push_str(&failure_lines(&report.execution));
        output
    }
}

/// Pick one record from a file, by identifier or as its only record.
fn select_record(path: &Path, identifier: Option<&str>) -> Result<Record> {
    let records = read_records(path).with_context(|| format!("Failed to read {}", path.display()))?;
    match identifier {
        Some(id) => records
            .into_iter()
            .find(|r| r.identifier == id)
            .with_context(|| format!("No record with identifier {} in {}", id, path.display())),
        None => {
            if records.len() > 1 {
                anyhow::bail!(
                    "{} holds {} records; choose one with an identifier option",
                    path.display(),
                    records.len()
                );
            }
            records
                .into_iter()
                .next()
                .with_context(|| format!("No records in {}", path.display()))
        }
    }
}

pub fn run_files(args: FileArgs<'_>, format: OutputFormat) -> Result<()> {
    let left = select_record(args.left, args.left_id)?;
    let right = select_record(args.right, args.right_id)?;

    let base = ComparisonBase::from_records(Some(&left), Some(&right));
    let comparison = RecordComparer::compare(&base, Some(&left), args.left_label, Some(&right), args.right_label);
    let tags = comparison.rows.len();
    let differences = comparison.difference_count();
    tracing::info!("{} of {} tags differ", differences, tags);

    let columns = comparison.columns();
    let rows = if args.all {
        comparison.rows
    } else {
        comparison.rows.into_iter().filter(|r| r.is_different).collect()
    };

    let result = FileComparison {
        left_label: args.left_label.to_string(),
        right_label: args.right_label.to_string(),
        left_id: base.left_id().map(str::to_string),
        right_id: base.right_id().map(str::to_string),
        tags,
        differences,
        rows,
        columns,
    };
    Output::new(result, format).render()
}

pub fn run_groups(args: GroupArgs<'_>, format: OutputFormat) -> Result<()> {
    let remap = match args.remap {
        Some(path) => read_remap(path).with_context(|| format!("Failed to read remap {}", path.display()))?,
        None => Default::default(),
    };
    let remap_entries = remap.len();

    let store = Arc::new(open_store(args.db)?);
    let bar = batch_progress_bar(
        args.show_progress,
        &format!("Comparing {} -> {}", args.origin, args.terminal),
    );
    let comparer = GroupComparer::new(
        GroupSpec::new(args.origin),
        GroupSpec::new(args.terminal).with_remap(remap),
        store.clone(),
        store,
    )?
    .with_progress(progress_observer(&bar));
    bar.set_length(comparer.batch_count(&args.options)? as u64);

    let report = comparer.run(&args.options)?;
    bar.finish_and_clear();

    let result = GroupComparison { report, remap_entries };
    Output::new(&result, format).render()?;
    ensure_complete(&result.report.execution)
}

/// Comparison options from flags, config and defaults.
pub fn compare_options(
    table: String,
    batch_size: usize,
    parallelism: Option<usize>,
    fetch: FetchStrategy,
    overwrite: bool,
) -> CompareOptions {
    CompareOptions {
        table,
        batch_size,
        parallelism,
        fetch,
        write_mode: if overwrite { WriteMode::Overwrite } else { WriteMode::Append },
    }
}
