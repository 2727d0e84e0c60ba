//! Ingest command - Load record files into a group of the store
//!
//! Record files are read and serialized in parallel batches; each finished
//! batch is written to the `records` table as soon as it completes. Files
//! that fail to parse are skipped with a warning.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use colored::Colorize;
use serde::Serialize;

use tagmatrix_core::interchange::read_records;
use tagmatrix_core::{BatchExecutor, Concurrency, CoreError, ExecutionReport};
use tagmatrix_store::IngestRow;

use super::{batch_progress_bar, ensure_complete, execution_pairs, failure_lines, open_store, progress_observer};
use crate::output::{Output, OutputConfig, OutputFormat, TableDisplay, TableOutput};

const RECORD_EXTENSIONS: &[&str] = &["json", "jsonl", "ndjson"];

/// Options for one ingest run.
pub struct IngestArgs<'a> {
    pub db: &'a Path,
    pub group: &'a str,
    pub paths: &'a [PathBuf],
    pub batch_size: usize,
    pub parallelism: Option<usize>,
    pub show_progress: bool,
}

#[derive(Debug, Serialize)]
pub struct IngestResult {
    pub group: String,
    pub files: usize,
    pub skipped_files: Vec<String>,
    pub replaced: usize,
    pub records: usize,
    pub execution: ExecutionReport,
}

impl TableDisplay for IngestResult {
    fn to_table(&self, config: &OutputConfig) -> String {
        let mut output = format!(
            "{} {} record(s) into group {}\n",
            "INGESTED".green().bold(),
            self.records.to_string().cyan(),
            self.group.yellow()
        );

        let mut pairs = vec![
            ("Files", self.files.to_string()),
            ("Skipped files", self.skipped_files.len().to_string()),
            ("Replaced records", self.replaced.to_string()),
        ];
        pairs.extend(execution_pairs(&self.execution));
        output.push_str(&TableOutput::format_key_value(&pairs, config));

        if !self.skipped_files.is_empty() {
            output.push_str(&format!("\n{}\n", "Skipped:".yellow().bold()));
            for file in &self.skipped_files {
                output.push_str(&format!("  {}\n", file.dimmed()));
            }
        }
        output.push_str(&failure_lines(&self.execution));
        output
    }
}

/// Records read from one batch of files.
#[derive(Default)]
struct IngestBatch {
    rows: Vec<IngestRow>,
    skipped: Vec<String>,
}

fn read_batch(files: Vec<PathBuf>) -> tagmatrix_core::Result<IngestBatch> {
    let mut batch = IngestBatch::default();
    for file in files {
        let records = match read_records(&file) {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!("Skipping {}: {}", file.display(), e);
                batch.skipped.push(file.display().to_string());
                continue;
            }
        };
        for record in &records {
            let row = IngestRow::from_record(record).map_err(|e| CoreError::MalformedRecord {
                message: format!("{:#}", e),
            })?;
            batch.rows.push(row);
        }
    }
    Ok(batch)
}

/// Expand directories into the record files they contain, sorted.
pub fn collect_record_files(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            walk_dir(path, &mut files)?;
        } else if path.is_file() {
            files.push(path.clone());
        } else {
            anyhow::bail!("No such file or directory: {}", path.display());
        }
    }
    files.sort();
    files.dedup();
    Ok(files)
}

fn walk_dir(dir: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("Failed to read directory {}", dir.display()))?;
    for entry in entries {
        let path = entry?.path();
        if path.is_dir() {
            walk_dir(&path, files)?;
        } else if path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| RECORD_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        {
            files.push(path);
        }
    }
    Ok(())
}

pub fn run(args: IngestArgs<'_>, format: OutputFormat) -> Result<()> {
    let files = collect_record_files(args.paths)?;
    if files.is_empty() {
        anyhow::bail!("No record files found");
    }
    let file_count = files.len();

    let store = open_store(args.db)?;
    let replaced = store.delete_group(args.group)?;
    if replaced > 0 {
        tracing::info!("Replacing {} records of group {}", replaced, args.group);
    }

    let bar = batch_progress_bar(args.show_progress, &format!("Ingesting {}", args.group));
    let executor = BatchExecutor::new(args.batch_size, args.parallelism, Concurrency::Compute)?
        .with_progress(progress_observer(&bar));

    let mut records = 0usize;
    let mut skipped_files = Vec::new();
    let execution = executor.run(
        files,
        |_, files| read_batch(files),
        |batch_id, batch: IngestBatch| {
            skipped_files.extend(batch.skipped);
            let written = store
                .insert_records(args.group, &batch.rows)
                .map_err(|e| CoreError::sink("records", format!("{:#}", e)))?;
            tracing::debug!("Batch {} wrote {} records", batch_id, written);
            records += written;
            Ok(())
        },
    )?;
    bar.finish_and_clear();

    tracing::info!(
        "Ingested {} records into {} ({} of {} batches failed)",
        records,
        args.group,
        execution.failed(),
        execution.batches
    );

    let result = IngestResult {
        group: args.group.to_string(),
        files: file_count,
        skipped_files,
        replaced,
        records,
        execution,
    };
    Output::new(&result, format).render()?;
    ensure_complete(&result.execution)
}
