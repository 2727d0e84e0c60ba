//! Matrix command - Build a tag matrix across stored groups
//!
//! Groups are given as `label` or `label=remap.csv`; the first one is the
//! reference group whose identifiers the others are remapped onto.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use colored::Colorize;
use serde::Serialize;

use tagmatrix_core::interchange::read_remap;
use tagmatrix_core::{GroupSpec, MatrixOptions, MatrixReport, TagMatrixBuilder};

use super::{batch_progress_bar, ensure_complete, execution_pairs, failure_lines, open_store, progress_observer};
use crate::output::{Output, OutputConfig, OutputFormat, TableDisplay, TableOutput};

pub struct MatrixArgs<'a> {
    pub db: &'a Path,
    pub groups: &'a [String],
    pub options: MatrixOptions,
    pub show_progress: bool,
}

#[derive(Debug, Serialize)]
pub struct MatrixResult {
    #[serde(flatten)]
    pub report: MatrixReport,
    pub columns: Vec<String>,
}

impl TableDisplay for MatrixResult {
    fn to_table(&self, config: &OutputConfig) -> String {
        let report = &self.report;
        let mut output = format!(
            "{} {} across {}\n",
            "MATRIX".green().bold(),
            report.table.cyan(),
            report.groups.join(", ").yellow()
        );
        let mut pairs = vec![
            ("Identifiers", report.identifiers.to_string()),
            ("Rows written", report.rows_written.to_string()),
            ("Columns", self.columns.len().to_string()),
        ];
        pairs.extend(execution_pairs(&report.execution));
        output.push_str(&TableOutput::format_key_value(&pairs, config));
        output.push_str(&failure_lines(&report.execution));
        output
    }
}

/// Parse `label` or `label=remap-file` into a group spec.
pub fn parse_group_arg(arg: &str) -> Result<GroupSpec> {
    let (label, remap) = match arg.split_once('=') {
        Some((label, path)) => (label.trim(), Some(PathBuf::from(path.trim()))),
        None => (arg.trim(), None),
    };
    if label.is_empty() {
        anyhow::bail!("Empty group label in '{}'", arg);
    }

    let spec = GroupSpec::new(label);
    match remap {
        Some(path) => {
            let remap =
                read_remap(&path).with_context(|| format!("Failed to read remap {}", path.display()))?;
            tracing::debug!("Group {} remaps {} identifiers", label, remap.len());
            Ok(spec.with_remap(remap))
        }
        None => Ok(spec),
    }
}

pub fn run(args: MatrixArgs<'_>, format: OutputFormat) -> Result<()> {
    let specs = args
        .groups
        .iter()
        .map(|g| parse_group_arg(g))
        .collect::<Result<Vec<_>>>()?;

    let store = Arc::new(open_store(args.db)?);
    let bar = batch_progress_bar(args.show_progress, &format!("Building {}", args.options.table));
    let builder =
        TagMatrixBuilder::new(specs, store.clone(), store)?.with_progress(progress_observer(&bar));
    let columns = builder.columns();

    let report = builder.build(&args.options)?;
    bar.finish_and_clear();

    let result = MatrixResult { report, columns };
    Output::new(&result, format).render()?;
    ensure_complete(&result.report.execution)
}
