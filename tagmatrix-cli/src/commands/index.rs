//! Index command - Show the tag-path index of a record file

use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;
use serde::Serialize;

use tagmatrix_core::interchange::read_records;
use tagmatrix_core::TagIndexer;

use crate::output::{Output, OutputConfig, OutputFormat, TableDisplay, TableOutput};

const HEADERS: [&str; 7] = ["identifier", "tag_path", "tag", "name", "vr", "vm", "value"];

#[derive(Debug, Serialize)]
pub struct IndexEntry {
    pub tag_path: String,
    pub tag: String,
    pub name: String,
    pub vr: String,
    pub vm: u32,
    pub value: String,
}

#[derive(Debug, Serialize)]
pub struct IndexedRecord {
    pub identifier: String,
    pub entries: Vec<IndexEntry>,
}

#[derive(Debug, Serialize)]
pub struct IndexResult {
    pub file: String,
    pub records: Vec<IndexedRecord>,
}

impl IndexResult {
    fn flat_rows(&self) -> Vec<Vec<String>> {
        self.records
            .iter()
            .flat_map(|record| {
                record.entries.iter().map(move |e| {
                    vec![
                        record.identifier.clone(),
                        e.tag_path.clone(),
                        e.tag.clone(),
                        e.name.clone(),
                        e.vr.clone(),
                        e.vm.to_string(),
                        e.value.clone(),
                    ]
                })
            })
            .collect()
    }
}

impl TableDisplay for IndexResult {
    fn to_table(&self, config: &OutputConfig) -> String {
        let paths: usize = self.records.iter().map(|r| r.entries.len()).sum();
        let mut output = format!(
            "{} {} ({} record(s), {} tag paths)\n",
            "INDEX:".cyan().bold(),
            self.file.yellow(),
            self.records.len(),
            paths
        );
        output.push_str(&TableOutput::from_rows(&HEADERS, &self.flat_rows(), config));
        output
    }

    fn to_rows(&self) -> Option<(Vec<String>, Vec<Vec<String>>)> {
        let header = HEADERS.iter().map(|h| h.to_string()).collect();
        Some((header, self.flat_rows()))
    }
}

pub fn run(file: &Path, identifier: Option<&str>, format: OutputFormat) -> Result<()> {
    let records = read_records(file).with_context(|| format!("Failed to read {}", file.display()))?;

    let selected: Vec<_> = records
        .iter()
        .filter(|r| identifier.map_or(true, |id| r.identifier == id))
        .collect();
    if let (Some(id), true) = (identifier, selected.is_empty()) {
        anyhow::bail!("No record with identifier {} in {}", id, file.display());
    }

    let indexed = selected
        .into_iter()
        .map(|record| {
            let index = TagIndexer::build(record);
            tracing::debug!("Indexed {} paths for {}", index.len(), record.identifier);
            IndexedRecord {
                identifier: record.identifier.clone(),
                entries: index
                    .iter()
                    .map(|(path, entry)| IndexEntry {
                        tag_path: path.to_string(),
                        tag: entry.label.clone(),
                        name: entry.node.name.clone(),
                        vr: entry.vr().to_string(),
                        vm: entry.vm(),
                        value: entry.display_value(),
                    })
                    .collect(),
            }
        })
        .collect();

    let result = IndexResult {
        file: file.display().to_string(),
        records: indexed,
    };
    Output::new(result, format).render()
}
