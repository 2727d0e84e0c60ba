//! Data models for parsed attribute trees.
//!
//! These types mirror what the upstream format parser hands over: one
//! `Record` per instance, holding a tree of `AttributeNode`s. Sequence
//! attributes (VR `SQ`) carry a list of items, and every item is itself a
//! list of nodes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A (group, element) attribute tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Tag {
    pub group: u16,
    pub element: u16,
}

impl Tag {
    pub const fn new(group: u16, element: u16) -> Self {
        Self { group, element }
    }

    /// Odd groups are vendor-private.
    pub fn is_private_group(&self) -> bool {
        self.group % 2 == 1
    }

    /// Render the tag for use inside a tag path.
    ///
    /// Private tags with a known creator render as `(GGGG,"creator",EE)`,
    /// where `EE` is the low byte of the element: the high byte is only a
    /// block reservation and differs between files for the same attribute.
    pub fn render(&self, private_creator: Option<&str>) -> String {
        match private_creator {
            Some(creator) => format!(
                "({:04X},\"{}\",{:02X})",
                self.group,
                creator,
                self.element & 0x00FF
            ),
            None => self.to_string(),
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:04X},{:04X})", self.group, self.element)
    }
}

/// Well-known tags referenced by the indexer and record summaries.
pub mod tags {
    use super::Tag;

    pub const FILE_META_INFORMATION_VERSION: Tag = Tag::new(0x0002, 0x0001);
    pub const SOP_CLASS_UID: Tag = Tag::new(0x0008, 0x0016);
    pub const SOP_INSTANCE_UID: Tag = Tag::new(0x0008, 0x0018);
    pub const MODALITY: Tag = Tag::new(0x0008, 0x0060);
    pub const PATIENT_ID: Tag = Tag::new(0x0010, 0x0020);
    pub const STUDY_INSTANCE_UID: Tag = Tag::new(0x0020, 0x000D);
    pub const SERIES_INSTANCE_UID: Tag = Tag::new(0x0020, 0x000E);
    pub const PIXEL_DATA: Tag = Tag::new(0x7FE0, 0x0010);

    /// Overlay Data lives in the repeating groups 6000-60FF (even only).
    pub fn is_overlay_data(tag: Tag) -> bool {
        tag.group & 0xFF00 == 0x6000 && tag.element == 0x3000
    }

    /// Attributes whose payload is never rendered literally.
    pub fn is_bulk_payload(tag: Tag) -> bool {
        tag == PIXEL_DATA || tag == FILE_META_INFORMATION_VERSION || is_overlay_data(tag)
    }
}

/// Raw value of an attribute as produced by the parser.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    #[default]
    Empty,
    Text(String),
    Texts(Vec<String>),
    Ints(Vec<i64>),
    Floats(Vec<f64>),
    Bytes(Vec<u8>),
    Sequence(Vec<Item>),
}

impl AttributeValue {
    /// Whether the parser produced no payload at all.
    pub fn is_empty(&self) -> bool {
        match self {
            AttributeValue::Empty => true,
            AttributeValue::Text(s) => s.is_empty(),
            AttributeValue::Texts(v) => v.is_empty(),
            AttributeValue::Ints(v) => v.is_empty(),
            AttributeValue::Floats(v) => v.is_empty(),
            AttributeValue::Bytes(v) => v.is_empty(),
            AttributeValue::Sequence(v) => v.is_empty(),
        }
    }

    /// Number of values held, as reported when the parser omits VM.
    pub fn multiplicity(&self) -> u32 {
        let n = match self {
            AttributeValue::Empty => 0,
            AttributeValue::Text(s) if s.is_empty() => 0,
            AttributeValue::Text(_) | AttributeValue::Bytes(_) => 1,
            AttributeValue::Texts(v) => v.len(),
            AttributeValue::Ints(v) => v.len(),
            AttributeValue::Floats(v) => v.len(),
            AttributeValue::Sequence(v) => v.len(),
        };
        n as u32
    }
}

/// One item of a sequence attribute.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Item {
    pub attributes: Vec<AttributeNode>,
}

impl Item {
    pub fn new(attributes: Vec<AttributeNode>) -> Self {
        Self { attributes }
    }
}

/// A single attribute of a parsed record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttributeNode {
    #[serde(flatten)]
    pub tag: Tag,
    pub vr: String,
    #[serde(default)]
    pub vm: Option<u32>,
    #[serde(default)]
    pub value: AttributeValue,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub keyword: String,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default)]
    pub private_creator: Option<String>,
}

impl AttributeNode {
    pub fn new(group: u16, element: u16, vr: &str, value: AttributeValue) -> Self {
        let tag = Tag::new(group, element);
        Self {
            tag,
            vr: vr.to_string(),
            vm: None,
            value,
            name: String::new(),
            keyword: String::new(),
            is_private: tag.is_private_group(),
            private_creator: None,
        }
    }

    /// Single-valued text attribute.
    pub fn text(group: u16, element: u16, vr: &str, value: &str) -> Self {
        Self::new(group, element, vr, AttributeValue::Text(value.to_string()))
    }

    /// Sequence attribute holding the given items.
    pub fn sequence(group: u16, element: u16, items: Vec<Vec<AttributeNode>>) -> Self {
        Self::new(
            group,
            element,
            "SQ",
            AttributeValue::Sequence(items.into_iter().map(Item::new).collect()),
        )
    }

    /// Set the dictionary name and keyword.
    pub fn with_name(mut self, name: &str, keyword: &str) -> Self {
        self.name = name.to_string();
        self.keyword = keyword.to_string();
        self
    }

    /// Mark as a private attribute owned by `creator`.
    pub fn with_private_creator(mut self, creator: &str) -> Self {
        self.is_private = true;
        self.private_creator = Some(creator.to_string());
        self
    }

    pub fn is_sequence(&self) -> bool {
        self.vr == "SQ" || matches!(self.value, AttributeValue::Sequence(_))
    }

    /// Value multiplicity, falling back to the number of values held.
    pub fn multiplicity(&self) -> u32 {
        self.vm.unwrap_or_else(|| self.value.multiplicity())
    }

    /// Creator string to embed in the tag path, if this is an owned private tag.
    pub fn path_creator(&self) -> Option<&str> {
        if !self.is_private {
            return None;
        }
        self.private_creator.as_deref().filter(|c| !c.is_empty())
    }

    /// Items of a sequence attribute (empty for scalars).
    pub fn items(&self) -> &[Item] {
        match &self.value {
            AttributeValue::Sequence(items) => items,
            _ => &[],
        }
    }
}

/// A parsed record: one instance with its full attribute tree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Unique identifier within its group (usually the SOP Instance UID).
    pub identifier: String,
    /// Where the record was read from, if known.
    #[serde(default)]
    pub source_path: Option<String>,
    /// File meta information and dataset attributes, top level.
    #[serde(default)]
    pub attributes: Vec<AttributeNode>,
}

impl Record {
    pub fn new(identifier: &str, attributes: Vec<AttributeNode>) -> Self {
        Self {
            identifier: identifier.to_string(),
            source_path: None,
            attributes,
        }
    }

    pub fn with_source_path(mut self, path: &str) -> Self {
        self.source_path = Some(path.to_string());
        self
    }

    /// First top-level attribute with the given tag.
    pub fn attribute(&self, tag: Tag) -> Option<&AttributeNode> {
        self.attributes.iter().find(|a| a.tag == tag)
    }

    /// Trimmed single text value of a top-level attribute.
    pub fn text_value(&self, tag: Tag) -> Option<String> {
        let node = self.attribute(tag)?;
        let text = match &node.value {
            AttributeValue::Text(s) => s.as_str(),
            AttributeValue::Texts(v) => v.first()?.as_str(),
            _ => return None,
        };
        let trimmed = text.trim_matches(|c: char| c.is_whitespace() || c == '\0');
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    }

    /// Identifying summary used for record tables and comparison rows.
    pub fn summary(&self) -> RecordSummary {
        RecordSummary {
            identifier: self.identifier.clone(),
            source_path: self.source_path.clone(),
            sop_class_uid: self.text_value(tags::SOP_CLASS_UID),
            modality: self.text_value(tags::MODALITY),
            patient_id: self.text_value(tags::PATIENT_ID),
            study_instance_uid: self.text_value(tags::STUDY_INSTANCE_UID),
            series_instance_uid: self.text_value(tags::SERIES_INSTANCE_UID),
            sop_instance_uid: self.text_value(tags::SOP_INSTANCE_UID),
        }
    }
}

/// Identifying fields of a record.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSummary {
    pub identifier: String,
    pub source_path: Option<String>,
    pub sop_class_uid: Option<String>,
    pub modality: Option<String>,
    pub patient_id: Option<String>,
    pub study_instance_uid: Option<String>,
    pub series_instance_uid: Option<String>,
    pub sop_instance_uid: Option<String>,
}
