//! Origin vs terminal group comparison.
//!
//! Every identifier of the origin group is paired with its terminal
//! counterpart (through the terminal group's remap table) and compared tag
//! by tag. Rows stream to the comparison table batch by batch.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::differ::comparator::RecordComparer;
use crate::differ::rows::{ComparisonBase, ComparisonRow};
use crate::error::Result;
use crate::executor::{ExecutionReport, ProgressFn, DEFAULT_BATCH_SIZE};
use crate::group::{DrivingId, FetchStrategy, GroupResolver, GroupSpec, IdentifierPolicy};
use crate::indexer::TagIndexer;
use crate::sink::{RecordSource, TableSink, WriteMode};
use crate::stream::{stream_rows, StreamJob};

/// Default comparison table.
pub const DEFAULT_COMPARISON_TABLE: &str = "tag_comparison";

#[derive(Clone, Debug)]
pub struct CompareOptions {
    pub table: String,
    pub batch_size: usize,
    pub parallelism: Option<usize>,
    pub fetch: FetchStrategy,
    pub write_mode: WriteMode,
}

impl Default for CompareOptions {
    fn default() -> Self {
        Self {
            table: DEFAULT_COMPARISON_TABLE.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            parallelism: None,
            fetch: FetchStrategy::default(),
            write_mode: WriteMode::default(),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct CompareReport {
    pub table: String,
    pub origin: String,
    pub terminal: String,
    /// Origin identifiers compared.
    pub identifiers: usize,
    /// Origin records without a terminal counterpart.
    pub missing_counterparts: usize,
    pub rows_written: usize,
    pub execution: ExecutionReport,
}

pub struct GroupComparer {
    resolver: Arc<GroupResolver>,
    source: Arc<dyn RecordSource>,
    sink: Arc<dyn TableSink>,
    progress: Option<ProgressFn>,
}

impl GroupComparer {
    /// `terminal.remap` maps origin identifiers to terminal identifiers.
    pub fn new(
        origin: GroupSpec,
        terminal: GroupSpec,
        source: Arc<dyn RecordSource>,
        sink: Arc<dyn TableSink>,
    ) -> Result<Self> {
        let resolver = GroupResolver::new(vec![origin, terminal])?;
        resolver.check_source(source.as_ref())?;
        Ok(Self {
            resolver: Arc::new(resolver),
            source,
            sink,
            progress: None,
        })
    }

    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn origin(&self) -> &str {
        self.resolver.reference()
    }

    pub fn terminal(&self) -> &str {
        self.resolver.labels()[1]
    }

    pub fn columns(&self) -> Vec<String> {
        ComparisonRow::columns(self.origin(), self.terminal())
    }

    /// Number of batches a run with `options` will dispatch.
    pub fn batch_count(&self, options: &CompareOptions) -> Result<usize> {
        let identifiers = self
            .resolver
            .driving_identifiers(self.source.as_ref(), IdentifierPolicy::ReferenceOnly)?;
        Ok(identifiers.len().div_ceil(options.batch_size.max(1)))
    }

    pub fn run(&self, options: &CompareOptions) -> Result<CompareReport> {
        let identifiers: Vec<DrivingId> = self
            .resolver
            .driving_identifiers(self.source.as_ref(), IdentifierPolicy::ReferenceOnly)?
            .into_iter()
            .collect();
        let total = identifiers.len();

        tracing::info!(
            "Comparing {} records of {} against {} into {}",
            total,
            self.origin(),
            self.terminal(),
            options.table
        );

        let job = StreamJob {
            resolver: Arc::clone(&self.resolver),
            source: Arc::clone(&self.source),
            sink: Arc::clone(&self.sink),
            table: options.table.clone(),
            columns: self.columns(),
            fetch: options.fetch,
            write_mode: options.write_mode,
            batch_size: options.batch_size,
            parallelism: options.parallelism,
            progress: self.progress.clone(),
        };

        let missing = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&missing);
        let outcome = stream_rows(job, identifiers, move |_id, records| {
            let origin = records.first().copied().flatten();
            let terminal = records.get(1).copied().flatten();
            if terminal.is_none() {
                counter.fetch_add(1, Ordering::Relaxed);
            }

            let base = ComparisonBase::from_records(origin, terminal);
            let left = origin.map(TagIndexer::build).unwrap_or_default();
            let right = terminal.map(TagIndexer::build).unwrap_or_default();
            RecordComparer::compare_indexes(&base, &left, &right)
                .iter()
                .map(ComparisonRow::to_text_row)
                .collect()
        })?;

        let missing_counterparts = missing.load(Ordering::Relaxed);
        if missing_counterparts > 0 {
            tracing::info!(
                "{} of {} records have no counterpart in {}",
                missing_counterparts,
                total,
                self.terminal()
            );
        }

        Ok(CompareReport {
            table: options.table.clone(),
            origin: self.origin().to_string(),
            terminal: self.terminal().to_string(),
            identifiers: total,
            missing_counterparts,
            rows_written: outcome.rows_written,
            execution: outcome.execution,
        })
    }
}
