//! Tag-by-tag comparison of two records.

use crate::differ::rows::{ComparisonBase, ComparisonRow, TagMetadata};
use crate::indexer::{union_paths, TagEntry, TagIndex, TagIndexer};
use crate::sink::TextRow;
use crate::types::Record;

/// Rows of one record comparison with the labels of both sides.
#[derive(Clone, Debug)]
pub struct RecordComparison {
    pub left_label: String,
    pub right_label: String,
    pub rows: Vec<ComparisonRow>,
}

impl RecordComparison {
    pub fn columns(&self) -> Vec<String> {
        ComparisonRow::columns(&self.left_label, &self.right_label)
    }

    pub fn text_rows(&self) -> Vec<TextRow> {
        self.rows.iter().map(ComparisonRow::to_text_row).collect()
    }

    /// Rows flagged as different.
    pub fn differences(&self) -> impl Iterator<Item = &ComparisonRow> {
        self.rows.iter().filter(|r| r.is_different)
    }

    pub fn difference_count(&self) -> usize {
        self.differences().count()
    }
}

/// Compares the tag indexes of two records.
pub struct RecordComparer;

impl RecordComparer {
    /// Compare two records; an absent side compares as an empty record.
    pub fn compare(
        base: &ComparisonBase,
        left: Option<&Record>,
        left_label: &str,
        right: Option<&Record>,
        right_label: &str,
    ) -> RecordComparison {
        let left_index = left.map(TagIndexer::build).unwrap_or_default();
        let right_index = right.map(TagIndexer::build).unwrap_or_default();

        RecordComparison {
            left_label: left_label.to_string(),
            right_label: right_label.to_string(),
            rows: Self::compare_indexes(base, &left_index, &right_index),
        }
    }

    /// One row per path in the sorted union of both indexes.
    pub fn compare_indexes(
        base: &ComparisonBase,
        left: &TagIndex<'_>,
        right: &TagIndex<'_>,
    ) -> Vec<ComparisonRow> {
        union_paths(&[left, right])
            .into_iter()
            .map(|path| {
                let a = left.get(path);
                let b = right.get(path);
                ComparisonRow {
                    base: base.clone(),
                    tag_path: path.to_string(),
                    metadata: TagMetadata::first_of([a, b]),
                    left_value: a.map(TagEntry::display_value),
                    right_value: b.map(TagEntry::display_value),
                    is_different: is_different(a, b),
                }
            })
            .collect()
    }
}

/// Stored values differ, or the tag exists on one side only.
///
/// Sequence entries store no value, so two sequences at the same path are
/// equal here whatever their items hold.
fn is_different(left: Option<&TagEntry<'_>>, right: Option<&TagEntry<'_>>) -> bool {
    match (left, right) {
        (Some(a), Some(b)) => a.value != b.value,
        _ => true,
    }
}
