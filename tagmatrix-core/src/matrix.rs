//! Multi-group tag matrices.
//!
//! For every driving identifier, the record of each group is resolved and
//! indexed, and one row is emitted per tag path found in any of them, with
//! one value column per group. Batches of identifiers run in parallel and
//! their rows land in the sink as each batch completes, so a failed batch
//! only loses its own rows.

use std::sync::Arc;

use serde::Serialize;

use crate::differ::rows::{MatrixRow, TagMetadata};
use crate::error::Result;
use crate::executor::{ExecutionReport, ProgressFn, DEFAULT_BATCH_SIZE};
use crate::group::{DrivingId, FetchStrategy, GroupResolver, GroupSpec, IdentifierPolicy};
use crate::indexer::{union_paths, TagEntry, TagIndex, TagIndexer};
use crate::sink::{validate_table_name, RecordSource, TableSink, WriteMode};
use crate::stream::{stream_rows, StreamJob};
use crate::types::Record;

/// Default matrix table.
pub const DEFAULT_MATRIX_TABLE: &str = "tag_matrix";

/// Options for one matrix build.
#[derive(Clone, Debug)]
pub struct MatrixOptions {
    pub table: String,
    pub batch_size: usize,
    /// Batches in flight; defaults to the number of CPUs.
    pub parallelism: Option<usize>,
    pub policy: IdentifierPolicy,
    pub fetch: FetchStrategy,
    pub write_mode: WriteMode,
}

impl Default for MatrixOptions {
    fn default() -> Self {
        Self {
            table: DEFAULT_MATRIX_TABLE.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            parallelism: None,
            policy: IdentifierPolicy::default(),
            fetch: FetchStrategy::default(),
            write_mode: WriteMode::default(),
        }
    }
}

/// Summary of a finished build.
#[derive(Clone, Debug, Serialize)]
pub struct MatrixReport {
    pub table: String,
    pub groups: Vec<String>,
    pub identifiers: usize,
    pub rows_written: usize,
    pub execution: ExecutionReport,
}

/// Builds tag matrices across an ordered list of groups.
///
/// The first group is the reference group: remap tables of the other groups
/// are keyed by its identifiers.
pub struct TagMatrixBuilder {
    resolver: Arc<GroupResolver>,
    source: Arc<dyn RecordSource>,
    sink: Arc<dyn TableSink>,
    progress: Option<ProgressFn>,
}

impl TagMatrixBuilder {
    /// Validate the groups against the source.
    ///
    /// Fails on an empty group list, duplicate labels, or a reference
    /// group the source does not know.
    pub fn new(
        groups: Vec<GroupSpec>,
        source: Arc<dyn RecordSource>,
        sink: Arc<dyn TableSink>,
    ) -> Result<Self> {
        let resolver = GroupResolver::new(groups)?;
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

    pub fn labels(&self) -> Vec<&str> {
        self.resolver.labels()
    }

    /// Column layout of the matrix table.
    pub fn columns(&self) -> Vec<String> {
        MatrixRow::columns(&self.resolver.labels())
    }

    /// Sorted keys a build under `policy` iterates over.
    pub fn driving_identifiers(&self, policy: IdentifierPolicy) -> Result<Vec<DrivingId>> {
        Ok(self
            .resolver
            .driving_identifiers(self.source.as_ref(), policy)?
            .into_iter()
            .collect())
    }

    pub fn build(&self, options: &MatrixOptions) -> Result<MatrixReport> {
        validate_table_name(&options.table)?;

        let identifiers = self.driving_identifiers(options.policy)?;
        let total = identifiers.len();
        tracing::info!(
            "Building {} for {} identifiers across {} groups ({} policy, {} fetch)",
            options.table,
            total,
            self.resolver.len(),
            options.policy.as_str(),
            options.fetch.as_str()
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
        let outcome = stream_rows(job, identifiers, |id, records| {
            matrix_rows(id, records)
                .iter()
                .map(MatrixRow::to_text_row)
                .collect()
        })?;

        if outcome.execution.is_complete() {
            tracing::info!(
                "Wrote {} rows to {} in {:?}",
                outcome.rows_written,
                options.table,
                outcome.execution.elapsed
            );
        } else {
            tracing::warn!(
                "Wrote {} rows to {}; {} of {} batches failed: {:?}",
                outcome.rows_written,
                options.table,
                outcome.execution.failed(),
                outcome.execution.batches,
                outcome.execution.failed_batches()
            );
        }

        Ok(MatrixReport {
            table: options.table.clone(),
            groups: self.labels().iter().map(|l| l.to_string()).collect(),
            identifiers: total,
            rows_written: outcome.rows_written,
            execution: outcome.execution,
        })
    }
}

/// Matrix rows of one identifier, given each group's record in group order.
///
/// Metadata comes from the first group whose record has the path.
pub fn matrix_rows(identifier: &str, records: &[Option<&Record>]) -> Vec<MatrixRow> {
    let indexes: Vec<TagIndex<'_>> = records
        .iter()
        .map(|record| match record {
            Some(record) => TagIndexer::build(record),
            None => TagIndex::empty(),
        })
        .collect();
    let refs: Vec<&TagIndex<'_>> = indexes.iter().collect();

    union_paths(&refs)
        .into_iter()
        .map(|path| {
            let entries: Vec<Option<&TagEntry<'_>>> = indexes.iter().map(|i| i.get(path)).collect();
            MatrixRow {
                identifier: identifier.to_string(),
                tag_path: path.to_string(),
                metadata: TagMetadata::first_of(entries.iter().copied()),
                values: entries
                    .iter()
                    .map(|e| e.map(TagEntry::display_value))
                    .collect(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::Concurrency;
    use crate::indexer::REDACTED_MARKER;
    use crate::sink::MemoryStore;
    use crate::types::{AttributeNode, AttributeValue};

    #[test]
    fn test_matrix_rows_absent_group_is_null() {
        let a = Record::new("U", vec![AttributeNode::text(0x0010, 0x0020, "LO", "P1")]);
        let c = Record::new("U", vec![AttributeNode::text(0x0010, 0x0020, "LO", "P1")]);

        let rows = matrix_rows("U", &[Some(&a), None, Some(&c)]);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].values, vec![Some("<P1>".to_string()), None, Some("<P1>".to_string())]);
    }

    #[test]
    fn test_matrix_metadata_from_first_group_with_path() {
        let a = Record::new("U", vec![]);
        let b = Record::new(
            "U",
            vec![AttributeNode::text(0x0008, 0x0060, "CS", "CT").with_name("Modality", "Modality")],
        );

        let rows = matrix_rows("U", &[Some(&a), Some(&b)]);
        assert_eq!(rows[0].metadata.name.as_deref(), Some("Modality"));
        assert_eq!(rows[0].metadata.vr.as_deref(), Some("CS"));
        assert_eq!(rows[0].values[0], None);
    }

    #[test]
    fn test_matrix_rows_sequence_redacted() {
        let a = Record::new(
            "U",
            vec![AttributeNode::sequence(
                0x0008,
                0x1115,
                vec![vec![AttributeNode::new(0x0020, 0x0013, "IS", AttributeValue::Ints(vec![1]))]],
            )],
        );

        let rows = matrix_rows("U", &[Some(&a)]);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].values[0].as_deref(), Some(REDACTED_MARKER));
        assert_eq!(rows[1].values[0].as_deref(), Some("<1>"));
    }

    #[test]
    fn test_build_streams_all_batches() {
        let store = MemoryStore::new();
        store.insert_records(
            "a",
            (0..10).map(|i| {
                Record::new(&format!("{:02}", i), vec![AttributeNode::text(0x0010, 0x0020, "LO", "P")])
            }),
        );
        store.insert_records("b", vec![Record::new("03", vec![])]);

        let builder = TagMatrixBuilder::new(
            vec![GroupSpec::new("a"), GroupSpec::new("b")],
            Arc::new(store.clone()),
            Arc::new(store.clone()),
        )
        .unwrap();
        let options = MatrixOptions {
            batch_size: 3,
            parallelism: Some(2),
            ..Default::default()
        };

        let report = builder.build(&options).unwrap();
        assert_eq!(report.identifiers, 10);
        assert_eq!(report.execution.batches, 4);
        assert_eq!(report.rows_written, 10);
        assert_eq!(store.rows(DEFAULT_MATRIX_TABLE).len(), 10);
    }

    #[test]
    fn test_fetch_strategy_picks_pool() {
        let store = MemoryStore::new();
        store.insert_records("a", vec![Record::new("1", vec![]), Record::new("2", vec![])]);
        let builder =
            TagMatrixBuilder::new(vec![GroupSpec::new("a")], Arc::new(store.clone()), Arc::new(store))
                .unwrap();

        let per_batch = builder
            .build(&MatrixOptions {
                table: "per_batch".to_string(),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(per_batch.execution.concurrency, Concurrency::Io);

        let preload = builder
            .build(&MatrixOptions {
                table: "preload".to_string(),
                fetch: FetchStrategy::Preload,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(preload.execution.concurrency, Concurrency::Compute);
    }

    #[test]
    fn test_invalid_table_name_is_fatal() {
        let store = MemoryStore::new();
        store.insert_records("a", vec![Record::new("1", vec![])]);
        let builder =
            TagMatrixBuilder::new(vec![GroupSpec::new("a")], Arc::new(store.clone()), Arc::new(store))
                .unwrap();

        let options = MatrixOptions {
            table: "bad name".to_string(),
            ..Default::default()
        };
        assert!(builder.build(&options).unwrap_err().is_fatal());
    }
}
