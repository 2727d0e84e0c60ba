//! Tag-path indexing of attribute trees.
//!
//! Flattens a record's nested attribute tree into a map keyed by tag path.
//! Paths are built depth-first:
//!
//! - top-level attribute: `<(0010,0010)>`
//! - attribute inside item `i` of the sequence at path `P`:
//!   `P[<000i>]<(0008,1150)>`
//! - private attribute with a known creator: `<(0029,"CREATOR",10)>`
//!
//! Sequence attributes get an entry of their own (with no stored value) and
//! every child gets its own path, so a difference deep inside a sequence
//! always surfaces on the child's row.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::encoding::{decode_bytes, Decoded};
use crate::types::{tags, AttributeNode, AttributeValue, Record};

/// Displayed in place of suppressed payloads and sequence values.
pub const REDACTED_MARKER: &str = "<REMOVED>";

/// Displayed for attributes without a value.
pub const EMPTY_MARKER: &str = "<>";

/// Normalized value of a non-sequence attribute.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TagValue {
    /// Rendered text, already wrapped in `<...>`.
    Text(String),
    /// Bytes no encoding would accept.
    Bytes(Vec<u8>),
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagValue::Text(s) => f.write_str(s),
            TagValue::Bytes(b) => write!(f, "<{}>", b.escape_ascii()),
        }
    }
}

/// One indexed attribute.
#[derive(Clone, Debug)]
pub struct TagEntry<'a> {
    /// `<tag>` as rendered in the path, without the nesting prefix.
    pub label: String,
    /// Normalized value; `None` for sequence attributes.
    pub value: Option<TagValue>,
    /// The attribute this entry was built from.
    pub node: &'a AttributeNode,
}

impl TagEntry<'_> {
    pub fn vr(&self) -> &str {
        &self.node.vr
    }

    pub fn vm(&self) -> u32 {
        self.node.multiplicity()
    }

    pub fn is_private(&self) -> bool {
        self.node.is_private
    }

    pub fn private_creator(&self) -> Option<&str> {
        self.node.private_creator.as_deref()
    }

    pub fn is_sequence(&self) -> bool {
        self.node.is_sequence()
    }

    /// Value as shown in result tables: sequences are always redacted.
    pub fn display_value(&self) -> String {
        match &self.value {
            Some(value) if !self.is_sequence() => value.to_string(),
            _ => REDACTED_MARKER.to_string(),
        }
    }
}

/// Path-addressed index of one record.
#[derive(Clone, Debug, Default)]
pub struct TagIndex<'a> {
    entries: BTreeMap<String, TagEntry<'a>>,
}

impl<'a> TagIndex<'a> {
    /// Index with no entries, used for an absent record.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<&TagEntry<'a>> {
        self.entries.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    /// Paths in lexicographic order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TagEntry<'a>)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Sorted union of the paths of several indexes.
pub fn union_paths<'i>(indexes: &[&'i TagIndex<'_>]) -> BTreeSet<&'i str> {
    let mut union = BTreeSet::new();
    for index in indexes {
        union.extend(index.paths());
    }
    union
}

/// Builds tag indexes from records.
pub struct TagIndexer;

impl TagIndexer {
    /// Index every attribute of `record`, nested ones included.
    pub fn build(record: &Record) -> TagIndex<'_> {
        Self::build_nodes(&record.attributes)
    }

    /// Index a bare list of top-level attributes.
    pub fn build_nodes(nodes: &[AttributeNode]) -> TagIndex<'_> {
        let mut index = TagIndex::empty();
        index_nodes(nodes, None, &mut index.entries);
        index
    }
}

fn index_nodes<'a>(
    nodes: &'a [AttributeNode],
    parent: Option<(&str, usize)>,
    entries: &mut BTreeMap<String, TagEntry<'a>>,
) {
    for node in nodes {
        let label = format!("<{}>", node.tag.render(node.path_creator()));
        let path = match parent {
            None => label.clone(),
            Some((parent_path, item)) => format!("{}[<{:04}>]{}", parent_path, item, label),
        };

        let value = (!node.is_sequence()).then(|| normalize_value(node));

        if entries.contains_key(&path) {
            // Two attributes with the same tag in one dataset: the parser
            // should have rejected this, keep the first one.
            tracing::warn!("Duplicate tag path {}, keeping first occurrence", path);
            continue;
        }
        entries.insert(path.clone(), TagEntry { label, value, node });

        for (i, item) in node.items().iter().enumerate() {
            index_nodes(&item.attributes, Some((&path, i)), entries);
        }
    }
}

/// Normalize a scalar attribute value for display and comparison.
fn normalize_value(node: &AttributeNode) -> TagValue {
    if tags::is_bulk_payload(node.tag) {
        let marker = if node.value.is_empty() {
            EMPTY_MARKER
        } else {
            REDACTED_MARKER
        };
        return TagValue::Text(marker.to_string());
    }

    let text = match &node.value {
        AttributeValue::Empty => return TagValue::Text(EMPTY_MARKER.to_string()),
        AttributeValue::Text(s) => s.clone(),
        AttributeValue::Texts(values) => values.join("\\"),
        AttributeValue::Ints(values) => join_display(values),
        AttributeValue::Floats(values) => join_display(values),
        AttributeValue::Bytes(bytes) => return byte_value(decode_bytes(bytes)),
        AttributeValue::Sequence(_) => return TagValue::Text(REDACTED_MARKER.to_string()),
    };

    wrap_text(&text)
}

/// Decoded text of a byte value, or the bytes themselves if none held.
fn byte_value(decoded: Decoded) -> TagValue {
    match decoded {
        Decoded::Text(text) => wrap_text(&text),
        Decoded::Raw(raw) => TagValue::Bytes(raw),
    }
}

fn wrap_text(text: &str) -> TagValue {
    TagValue::Text(format!("<{}>", trim_padding(text)))
}

fn join_display<T: fmt::Display>(values: &[T]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("\\")
}

/// Strip the space and NUL padding that fixed-length encodings add.
fn trim_padding(text: &str) -> &str {
    text.trim_matches(|c: char| c.is_whitespace() || c == '\0')
}
