//! Result row types for comparisons and tag matrices.
//!
//! Rows are written to sinks as all-text columns; `to_text_row` produces the
//! cells in the same order as the matching `columns` layout.

use serde::Serialize;

use crate::indexer::TagEntry;
use crate::sink::TextRow;
use crate::types::{Record, RecordSummary};

/// Lower-case a group label into something usable as a column prefix.
pub fn column_label(label: &str) -> String {
    label
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// `<label>_<suffix>` column name.
pub fn label_column(label: &str, suffix: &str) -> String {
    format!("{}_{}", column_label(label), suffix)
}

/// Tag metadata attached to a result row.
///
/// Every field is `None` when no side had an entry for the path.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TagMetadata {
    pub label: Option<String>,
    pub group: Option<u16>,
    pub element: Option<u16>,
    pub name: Option<String>,
    pub keyword: Option<String>,
    pub vr: Option<String>,
    pub vm: Option<u32>,
    pub is_private: Option<bool>,
    pub private_creator: Option<String>,
}

impl TagMetadata {
    pub fn from_entry(entry: &TagEntry<'_>) -> Self {
        let node = entry.node;
        Self {
            label: Some(entry.label.clone()),
            group: Some(node.tag.group),
            element: Some(node.tag.element),
            name: Some(node.name.clone()),
            keyword: Some(node.keyword.clone()),
            vr: Some(node.vr.clone()),
            vm: Some(entry.vm()),
            is_private: Some(node.is_private),
            private_creator: node.private_creator.clone(),
        }
    }

    /// Metadata from the first entry present, in order of preference.
    pub fn first_of<'e, 'a: 'e>(entries: impl IntoIterator<Item = Option<&'e TagEntry<'a>>>) -> Self {
        entries
            .into_iter()
            .flatten()
            .next()
            .map(Self::from_entry)
            .unwrap_or_default()
    }
}

/// Identifying fields of the two records being compared.
///
/// Each side carries the record's summary; an absent record leaves every
/// field of its side null.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ComparisonBase {
    pub left: Option<RecordSummary>,
    pub right: Option<RecordSummary>,
}

/// Per-side base columns, in table order.
const BASE_SUFFIXES: [&str; 8] = ["id", "class", "modality", "patient", "study", "series", "instance", "path"];

impl ComparisonBase {
    pub fn from_records(left: Option<&Record>, right: Option<&Record>) -> Self {
        Self {
            left: left.map(Record::summary),
            right: right.map(Record::summary),
        }
    }

    pub fn left_id(&self) -> Option<&str> {
        self.left.as_ref().map(|s| s.identifier.as_str())
    }

    pub fn right_id(&self) -> Option<&str> {
        self.right.as_ref().map(|s| s.identifier.as_str())
    }

    fn columns(left_label: &str, right_label: &str) -> Vec<String> {
        [left_label, right_label]
            .iter()
            .flat_map(|label| BASE_SUFFIXES.iter().map(move |suffix| label_column(label, suffix)))
            .collect()
    }

    fn cells(&self) -> TextRow {
        [&self.left, &self.right]
            .into_iter()
            .flat_map(|side| match side {
                Some(s) => vec![
                    Some(s.identifier.clone()),
                    s.sop_class_uid.clone(),
                    s.modality.clone(),
                    s.patient_id.clone(),
                    s.study_instance_uid.clone(),
                    s.series_instance_uid.clone(),
                    s.sop_instance_uid.clone(),
                    s.source_path.clone(),
                ],
                None => vec![None; BASE_SUFFIXES.len()],
            })
            .collect()
    }
}

/// One tag path of a two-record comparison.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ComparisonRow {
    pub base: ComparisonBase,
    pub tag_path: String,
    pub metadata: TagMetadata,
    pub left_value: Option<String>,
    pub right_value: Option<String>,
    pub is_different: bool,
}

impl ComparisonRow {
    /// Column layout of the comparison table for the two labels.
    pub fn columns(left_label: &str, right_label: &str) -> Vec<String> {
        let mut columns = ComparisonBase::columns(left_label, right_label);
        columns.extend(
            [
                "tag",
                "tag_path",
                "tag_group",
                "tag_element",
                "tag_name",
                "tag_keyword",
                "tag_vr",
                "tag_vm",
                "is_private",
                "private_creator",
            ]
            .iter()
            .map(|c| c.to_string()),
        );
        columns.push(label_column(left_label, "value"));
        columns.push(label_column(right_label, "value"));
        columns.push("is_different".to_string());
        columns
    }

    pub fn to_text_row(&self) -> TextRow {
        let m = &self.metadata;
        let mut row = self.base.cells();
        row.extend([
            m.label.clone(),
            Some(self.tag_path.clone()),
            m.group.map(|g| format!("{:04X}", g)),
            m.element.map(|e| format!("{:04X}", e)),
            m.name.clone(),
            m.keyword.clone(),
            m.vr.clone(),
            m.vm.map(|vm| vm.to_string()),
            m.is_private.map(|p| p.to_string()),
            m.private_creator.clone(),
            self.left_value.clone(),
            self.right_value.clone(),
            Some(self.is_different.to_string()),
        ]);
        row
    }
}

/// One tag path of one identifier across all groups of a matrix build.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MatrixRow {
    pub identifier: String,
    pub tag_path: String,
    pub metadata: TagMetadata,
    /// One value per group, in group order.
    pub values: Vec<Option<String>>,
}

impl MatrixRow {
    /// Column layout of the matrix table for the given group labels.
    pub fn columns<S: AsRef<str>>(labels: &[S]) -> Vec<String> {
        let mut columns: Vec<String> = [
            "identifier",
            "tag_path",
            "tag_label",
            "tag_name",
            "tag_vm",
            "tag_vr",
        ]
        .iter()
        .map(|c| c.to_string())
        .collect();
        columns.extend(labels.iter().map(|l| label_column(l.as_ref(), "value")));
        columns
    }

    pub fn to_text_row(&self) -> TextRow {
        let mut row = vec![
            Some(self.identifier.clone()),
            Some(self.tag_path.clone()),
            self.metadata.label.clone(),
            self.metadata.name.clone(),
            self.metadata.vm.map(|vm| vm.to_string()),
            self.metadata.vr.clone(),
        ];
        row.extend(self.values.iter().cloned());
        row
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AttributeNode;

    #[test]
    fn test_column_label_sanitizes() {
        assert_eq!(column_label("Site A"), "site_a");
        assert_eq!(column_label("posda-2024"), "posda_2024");
    }

    #[test]
    fn test_comparison_columns_default_labels() {
        let columns = ComparisonRow::columns("origin", "terminal");
        assert_eq!(
            &columns[..16],
            &[
                "origin_id",
                "origin_class",
                "origin_modality",
                "origin_patient",
                "origin_study",
                "origin_series",
                "origin_instance",
                "origin_path",
                "terminal_id",
                "terminal_class",
                "terminal_modality",
                "terminal_patient",
                "terminal_study",
                "terminal_series",
                "terminal_instance",
                "terminal_path",
            ]
        );
        assert_eq!(columns[16], "tag");
        assert_eq!(columns[columns.len() - 3], "origin_value");
        assert_eq!(columns[columns.len() - 2], "terminal_value");
        assert_eq!(columns.last().map(String::as_str), Some("is_different"));
        assert_eq!(columns.len(), 29);
    }

    #[test]
    fn test_base_cells_from_summaries() {
        let left = Record::new(
            "1.2.3",
            vec![
                AttributeNode::text(0x0008, 0x0016, "UI", "1.2.840.10008.5.1.4.1.1.2"),
                AttributeNode::text(0x0008, 0x0060, "CS", "CT"),
                AttributeNode::text(0x0010, 0x0020, "LO", "P1"),
                AttributeNode::text(0x0020, 0x000D, "UI", "1.2.3.4"),
            ],
        )
        .with_source_path("/data/a.dcm");
        let base = ComparisonBase::from_records(Some(&left), None);
        assert_eq!(base.left_id(), Some("1.2.3"));
        assert_eq!(base.right_id(), None);

        let cells = base.cells();
        let columns = ComparisonBase::columns("origin", "terminal");
        assert_eq!(cells.len(), columns.len());
        let cell = |name: &str| cells[columns.iter().position(|c| c == name).unwrap()].clone();
        assert_eq!(cell("origin_class").as_deref(), Some("1.2.840.10008.5.1.4.1.1.2"));
        assert_eq!(cell("origin_modality").as_deref(), Some("CT"));
        assert_eq!(cell("origin_patient").as_deref(), Some("P1"));
        assert_eq!(cell("origin_study").as_deref(), Some("1.2.3.4"));
        assert_eq!(cell("origin_series"), None);
        assert_eq!(cell("origin_path").as_deref(), Some("/data/a.dcm"));
        assert!(cells[8..].iter().all(Option::is_none));
    }

    #[test]
    fn test_matrix_columns_and_row_align() {
        let columns = MatrixRow::columns(&["a", "b", "c"]);
        assert_eq!(
            columns,
            vec![
                "identifier",
                "tag_path",
                "tag_label",
                "tag_name",
                "tag_vm",
                "tag_vr",
                "a_value",
                "b_value",
                "c_value"
            ]
        );

        let row = MatrixRow {
            identifier: "1.2.3".to_string(),
            tag_path: "<(0010,0020)>".to_string(),
            metadata: TagMetadata::default(),
            values: vec![Some("<P1>".to_string()), None, None],
        };
        assert_eq!(row.to_text_row().len(), columns.len());
    }

    #[test]
    fn test_comparison_row_align() {
        let row = ComparisonRow {
            base: ComparisonBase::default(),
            tag_path: "<(0010,0020)>".to_string(),
            metadata: TagMetadata::default(),
            left_value: Some("<5>".to_string()),
            right_value: None,
            is_different: true,
        };
        let text = row.to_text_row();
        assert_eq!(text.len(), ComparisonRow::columns("a", "b").len());
        assert_eq!(text.last().cloned().flatten().as_deref(), Some("true"));
    }
}
