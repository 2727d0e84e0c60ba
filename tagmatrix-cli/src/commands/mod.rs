//! Command implementations for the tagmatrix CLI
//!
//! Each command module provides a `run` function that executes the command logic.

pub mod compare;
pub mod index;
pub mod ingest;
pub mod matrix;
pub mod tables;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};

use tagmatrix_core::executor::ProgressFn;
use tagmatrix_core::{BatchProgress, ExecutionReport};
use tagmatrix_store::RecordStore;

/// Open the store for writing, creating it if needed.
pub fn open_store(db: &Path) -> Result<RecordStore> {
    RecordStore::open(db).with_context(|| format!("Failed to open store at {}", db.display()))
}

/// Open an existing store for reading.
pub fn open_store_read_only(db: &Path) -> Result<RecordStore> {
    if !db.exists() {
        anyhow::bail!(
            "No store at {}. Run 'tagmatrix ingest' first.",
            db.display()
        );
    }
    RecordStore::open_read_only(db)
        .with_context(|| format!("Failed to open store at {}", db.display()))
}

/// Batch progress bar; hidden when `visible` is false.
pub fn batch_progress_bar(visible: bool, message: &str) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.cyan} {msg} [{bar:30.cyan/blue}] {pos}/{len} batches ({elapsed})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    bar.set_message(message.to_string());
    bar
}

/// Feed executor progress into `bar`.
pub fn progress_observer(bar: &ProgressBar) -> ProgressFn {
    let bar = bar.clone();
    Arc::new(move |progress: &BatchProgress| {
        if let Some(total) = progress.total {
            bar.set_length(total as u64);
        }
        bar.set_position(progress.completed as u64);
    })
}

/// Summary lines shared by every batched command.
pub fn execution_pairs(report: &ExecutionReport) -> Vec<(&'static str, String)> {
    let failed = if report.failed() > 0 {
        report.failed().to_string().red().to_string()
    } else {
        "0".to_string()
    };
    vec![
        ("Batches", report.batches.to_string()),
        ("Succeeded", report.succeeded.to_string()),
        ("Failed", failed),
        ("Elapsed", format!("{}ms", report.elapsed.as_millis())),
    ]
}

/// Render failed batches as indented lines.
pub fn failure_lines(report: &ExecutionReport) -> String {
    let mut output = String::new();
    if report.failures.is_empty() {
        return output;
    }
    output.push_str(&format!("\n{}\n", "Failed batches:".red().bold()));
    for failure in &report.failures {
        output.push_str(&format!(
            "  #{} [{:?}] {}\n",
            failure.batch,
            failure.stage,
            failure.message.dimmed()
        ));
    }
    output
}

/// Turn an incomplete run into a non-zero exit once results are printed.
pub fn ensure_complete(report: &ExecutionReport) -> Result<()> {
    if report.is_complete() {
        return Ok(());
    }
    anyhow::bail!(
        "{} of {} batches failed: {:?}",
        report.failed(),
        report.batches,
        report.failed_batches()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_counts_failed_batches_once() {
        let bar = batch_progress_bar(false, "test");
        let observe = progress_observer(&bar);

        observe(&BatchProgress {
            completed: 3,
            failed: 1,
            total: Some(4),
        });
        assert_eq!(bar.position(), 3);
        assert_eq!(bar.length(), Some(4));

        observe(&BatchProgress {
            completed: 4,
            failed: 2,
            total: Some(4),
        });
        assert_eq!(bar.position(), 4);
    }

    #[test]
    fn test_ensure_complete() {
        assert!(ensure_complete(&ExecutionReport::default()).is_ok());

        let report = ExecutionReport {
            batches: 2,
            succeeded: 1,
            failures: vec![tagmatrix_core::BatchFailure {
                batch: 1,
                stage: tagmatrix_core::FailureStage::Write,
                message: "disk full".to_string(),
            }],
            ..Default::default()
        };
        let err = ensure_complete(&report).unwrap_err();
        assert!(err.to_string().contains("1 of 2 batches failed"));
    }
}
