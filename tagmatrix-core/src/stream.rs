//! Batch streaming shared by matrix builds and group comparisons.
//!
//! Identifiers are split into batches. Each batch resolves the records of
//! every group, turns them into text rows, and the orchestrating thread
//! writes those rows to the sink as soon as the batch completes.

use std::sync::Arc;

use crate::error::Result;
use crate::executor::{partition, BatchExecutor, Concurrency, ExecutionReport, ProgressFn};
use crate::group::{BatchRecords, DrivingId, FetchStrategy, GroupResolver};
use crate::sink::{prepare_table, RecordSource, TableSink, TextRow, WriteMode};
use crate::types::Record;

/// Everything a streamed build needs besides its row emitter.
pub(crate) struct StreamJob {
    pub resolver: Arc<GroupResolver>,
    pub source: Arc<dyn RecordSource>,
    pub sink: Arc<dyn TableSink>,
    pub table: String,
    pub columns: Vec<String>,
    pub fetch: FetchStrategy,
    pub write_mode: WriteMode,
    pub batch_size: usize,
    pub parallelism: Option<usize>,
    pub progress: Option<ProgressFn>,
}

pub(crate) struct StreamOutcome {
    pub execution: ExecutionReport,
    pub rows_written: usize,
}

/// Run `emit` for every identifier and stream its rows into the job's table.
///
/// `emit` receives the identifier and the record of each group (in group
/// order, `None` when absent).
pub(crate) fn stream_rows<F>(job: StreamJob, identifiers: Vec<DrivingId>, emit: F) -> Result<StreamOutcome>
where
    F: Fn(&str, &[Option<&Record>]) -> Vec<TextRow> + Send + Sync + 'static,
{
    // Per-batch fetches block on the source; preloaded batches are pure compute.
    let concurrency = match job.fetch {
        FetchStrategy::PerBatch => Concurrency::Io,
        FetchStrategy::Preload => Concurrency::Compute,
    };
    let mut executor = BatchExecutor::new(job.batch_size, job.parallelism, concurrency)?;
    if let Some(progress) = job.progress.clone() {
        executor = executor.with_progress(progress);
    }

    prepare_table(job.sink.as_ref(), &job.table, &job.columns, job.write_mode)?;

    let preloaded = match job.fetch {
        FetchStrategy::Preload => Some(job.resolver.preload(job.source.as_ref())?),
        FetchStrategy::PerBatch => None,
    };

    // Preloaded slices are cut on this thread as batches are dispatched,
    // so workers never hold more than their own records.
    let slicer = Arc::clone(&job.resolver);
    let batches = partition(identifiers, job.batch_size)
        .into_iter()
        .map(move |ids| {
            let slice = preloaded
                .as_ref()
                .map(|groups| BatchRecords::slice(&slicer, groups, &ids));
            (ids, slice)
        });

    let resolver = Arc::clone(&job.resolver);
    let source = Arc::clone(&job.source);
    let worker = move |index: usize, (ids, slice): (Vec<DrivingId>, Option<BatchRecords>)| -> Result<Vec<TextRow>> {
        let records = match slice {
            Some(records) => records,
            None => BatchRecords::fetch(&resolver, source.as_ref(), &ids)?,
        };
        tracing::debug!(
            "Batch {}: {} identifiers, {} records",
            index,
            ids.len(),
            records.record_count()
        );

        let mut rows = Vec::new();
        for id in &ids {
            rows.extend(emit(&id.identifier, &records.resolve(&resolver, id)));
        }
        Ok(rows)
    };

    let sink = Arc::clone(&job.sink);
    let mut rows_written = 0usize;
    let execution = executor.run_batches(batches, worker, |index, rows: Vec<TextRow>| {
        if rows.is_empty() {
            return Ok(());
        }
        let written = sink.insert_rows(&job.table, &job.columns, &rows)?;
        tracing::debug!("Batch {}: wrote {} rows to {}", index, written, job.table);
        rows_written += written;
        Ok(())
    })?;

    Ok(StreamOutcome {
        execution,
        rows_written,
    })
}
