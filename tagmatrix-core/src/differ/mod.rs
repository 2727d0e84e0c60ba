//! Record and group diffing.
//!
//! # Features
//!
//! - **Tag-level diffing**: every tag path of two records, nested sequence
//!   items included, with a per-path `is_different` flag
//! - **Presence-aware**: a tag present on one side only is always different
//! - **Group comparison**: origin vs terminal groups with identifier
//!   remapping, streamed to a table batch by batch
//!
//! # Example
//!
//! ```
//! use tagmatrix_core::differ::{ComparisonBase, RecordComparer};
//! use tagmatrix_core::types::{AttributeNode, Record};
//!
//! let a = Record::new("1.2.3", vec![AttributeNode::text(0x0008, 0x0060, "CS", "CT")]);
//! let b = Record::new("1.2.3", vec![AttributeNode::text(0x0008, 0x0060, "CS", "MR")]);
//!
//! let base = ComparisonBase::from_records(Some(&a), Some(&b));
//! let result = RecordComparer::compare(&base, Some(&a), "origin", Some(&b), "terminal");
//! assert_eq!(result.difference_count(), 1);
//! ```

pub mod comparator;
pub mod groups;
pub mod rows;

pub use comparator::{RecordComparer, RecordComparison};
pub use groups::{CompareOptions, CompareReport, GroupComparer};
pub use rows::{ComparisonBase, ComparisonRow, MatrixRow, TagMetadata};
