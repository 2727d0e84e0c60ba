//! tagmatrix core - tag-path indexing, record diffing and tag matrices.
//!
//! This crate flattens parsed medical-record attribute trees into
//! path-addressed indexes and answers two questions over them: how two
//! records differ tag by tag, and what value each of N labeled groups holds
//! for every tag that appears in any of them.
//!
//! # Features
//!
//! - **Tag-path indexing**: collision-free paths for nested sequence items
//!   and private tags
//! - **Record diffing**: presence-aware per-tag comparison
//! - **Tag matrices**: union-driven multi-group joins with identifier remapping
//! - **Batched execution**: bounded rayon/tokio pools, results streamed to a
//!   sink as each batch completes, failed batches isolated
//!
//! # Usage
//!
//! ```
//! use std::sync::Arc;
//! use tagmatrix_core::{GroupSpec, MatrixOptions, MemoryStore, TagMatrixBuilder};
//! use tagmatrix_core::types::{AttributeNode, Record};
//!
//! let store = MemoryStore::new();
//! store.insert_records("origin", vec![Record::new("1", vec![AttributeNode::text(0x0008, 0x0060, "CS", "CT")])]);
//! store.insert_records("terminal", vec![Record::new("1", vec![])]);
//!
//! let builder = TagMatrixBuilder::new(
//!     vec![GroupSpec::new("origin"), GroupSpec::new("terminal")],
//!     Arc::new(store.clone()),
//!     Arc::new(store.clone()),
//! )?;
//! let report = builder.build(&MatrixOptions::default())?;
//! assert_eq!(report.rows_written, 1);
//! # Ok::<(), tagmatrix_core::CoreError>(())
//! ```

pub mod differ;
pub mod encoding;
pub mod error;
pub mod executor;
pub mod group;
pub mod indexer;
pub mod interchange;
pub mod matrix;
pub mod sink;
mod stream;
pub mod types;

pub use differ::{
    CompareOptions, CompareReport, ComparisonBase, ComparisonRow, GroupComparer, MatrixRow,
    RecordComparer, RecordComparison, TagMetadata,
};
pub use error::{CoreError, Result};
pub use executor::{BatchExecutor, BatchFailure, BatchProgress, Concurrency, ExecutionReport, FailureStage};
pub use group::{DrivingId, FetchStrategy, GroupResolver, GroupSpec, IdentifierPolicy};
pub use indexer::{TagEntry, TagIndex, TagIndexer, TagValue, EMPTY_MARKER, REDACTED_MARKER};
pub use matrix::{MatrixOptions, MatrixReport, TagMatrixBuilder};
pub use sink::{MemoryStore, RecordSource, TableSink, TextRow, WriteMode};
pub use types::{AttributeNode, AttributeValue, Record, RecordSummary, Tag};
