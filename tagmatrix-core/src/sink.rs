//! Record source and table sink contracts, plus an in-memory implementation.
//!
//! Builders only need a logical read/write contract: list and fetch records
//! of a group, and create/insert into all-text tables. The DuckDB store in
//! `tagmatrix-store` implements both traits; `MemoryStore` backs tests and
//! small in-process runs.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::types::Record;

/// One row of an all-text table. `None` is SQL NULL.
pub type TextRow = Vec<Option<String>>;

/// Read side: grouped records keyed by identifier.
pub trait RecordSource: Send + Sync {
    /// Whether the source knows a group with this label.
    fn has_group(&self, group: &str) -> Result<bool>;

    /// All identifiers of a group, sorted.
    fn identifiers(&self, group: &str) -> Result<BTreeSet<String>>;

    /// Records of `group` whose identifier is in `identifiers`.
    ///
    /// Unknown identifiers are simply missing from the result.
    fn fetch(&self, group: &str, identifiers: &[String]) -> Result<HashMap<String, Record>>;

    /// Every record of a group.
    fn fetch_all(&self, group: &str) -> Result<HashMap<String, Record>> {
        let identifiers: Vec<String> = self.identifiers(group)?.into_iter().collect();
        self.fetch(group, &identifiers)
    }
}

/// Write side: all-text tables.
pub trait TableSink: Send + Sync {
    fn drop_table_if_exists(&self, table: &str) -> Result<()>;

    /// Create `table` with the given TEXT columns.
    fn create_table(&self, table: &str, columns: &[String]) -> Result<()>;

    /// Column names of `table`, or `None` if it does not exist.
    fn table_columns(&self, table: &str) -> Result<Option<Vec<String>>>;

    /// Insert rows in one transaction, returning the number written.
    fn insert_rows(&self, table: &str, columns: &[String], rows: &[TextRow]) -> Result<usize>;
}

/// How a build treats an existing destination table.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// Create the table if missing; refuse a table with other columns.
    #[default]
    Append,
    /// Drop and recreate the table.
    Overwrite,
}

impl WriteMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteMode::Append => "append",
            WriteMode::Overwrite => "overwrite",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "append" => Some(WriteMode::Append),
            "overwrite" => Some(WriteMode::Overwrite),
            _ => None,
        }
    }
}

/// Table names are interpolated into DDL, so keep them to identifiers.
pub fn validate_table_name(table: &str) -> Result<()> {
    let mut chars = table.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(CoreError::config(format!("invalid table name '{}'", table)))
    }
}

/// Make `table` ready to receive rows with `columns`.
pub fn prepare_table(
    sink: &dyn TableSink,
    table: &str,
    columns: &[String],
    mode: WriteMode,
) -> Result<()> {
    validate_table_name(table)?;

    match mode {
        WriteMode::Overwrite => {
            tracing::info!("Recreating table {}", table);
            sink.drop_table_if_exists(table)?;
            sink.create_table(table, columns)
        }
        WriteMode::Append => match sink.table_columns(table)? {
            None => sink.create_table(table, columns),
            Some(existing) if existing.as_slice() == columns => {
                tracing::debug!("Appending to existing table {}", table);
                Ok(())
            }
            Some(existing) => Err(CoreError::SchemaConflict {
                table: table.to_string(),
                existing: existing.join(", "),
                expected: columns.join(", "),
            }),
        },
    }
}

#[derive(Debug, Default)]
struct MemoryTable {
    columns: Vec<String>,
    rows: Vec<TextRow>,
}

#[derive(Debug, Default)]
struct MemoryState {
    groups: BTreeMap<String, BTreeMap<String, Record>>,
    tables: BTreeMap<String, MemoryTable>,
}

/// In-process `RecordSource` + `TableSink`.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("Recovering from poisoned memory store mutex");
                poisoned.into_inner()
            }
        }
    }

    /// Add (or replace) records in a group, creating the group if needed.
    pub fn insert_records(&self, group: &str, records: impl IntoIterator<Item = Record>) {
        let mut state = self.lock();
        let entry = state.groups.entry(group.to_string()).or_default();
        for record in records {
            entry.insert(record.identifier.clone(), record);
        }
    }

    /// Rows written to a table so far.
    pub fn rows(&self, table: &str) -> Vec<TextRow> {
        self.lock()
            .tables
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    pub fn table_names(&self) -> Vec<String> {
        self.lock().tables.keys().cloned().collect()
    }
}

impl RecordSource for MemoryStore {
    fn has_group(&self, group: &str) -> Result<bool> {
        Ok(self.lock().groups.contains_key(group))
    }

    fn identifiers(&self, group: &str) -> Result<BTreeSet<String>> {
        Ok(self
            .lock()
            .groups
            .get(group)
            .map(|records| records.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn fetch(&self, group: &str, identifiers: &[String]) -> Result<HashMap<String, Record>> {
        let state = self.lock();
        let Some(records) = state.groups.get(group) else {
            return Ok(HashMap::new());
        };
        Ok(identifiers
            .iter()
            .filter_map(|id| records.get(id).map(|r| (id.clone(), r.clone())))
            .collect())
    }
}

impl TableSink for MemoryStore {
    fn drop_table_if_exists(&self, table: &str) -> Result<()> {
        self.lock().tables.remove(table);
        Ok(())
    }

    fn create_table(&self, table: &str, columns: &[String]) -> Result<()> {
        let mut state = self.lock();
        if state.tables.contains_key(table) {
            return Err(CoreError::sink(table, "table already exists"));
        }
        state.tables.insert(
            table.to_string(),
            MemoryTable {
                columns: columns.to_vec(),
                rows: Vec::new(),
            },
        );
        Ok(())
    }

    fn table_columns(&self, table: &str) -> Result<Option<Vec<String>>> {
        Ok(self.lock().tables.get(table).map(|t| t.columns.clone()))
    }

    fn insert_rows(&self, table: &str, columns: &[String], rows: &[TextRow]) -> Result<usize> {
        let mut state = self.lock();
        let target = state
            .tables
            .get_mut(table)
            .ok_or_else(|| CoreError::sink(table, "no such table"))?;

        if target.columns.as_slice() != columns {
            return Err(CoreError::sink(table, "column list does not match table"));
        }
        if let Some(bad) = rows.iter().find(|r| r.len() != columns.len()) {
            return Err(CoreError::sink(
                table,
                format!("row has {} cells, expected {}", bad.len(), columns.len()),
            ));
        }

        target.rows.extend_from_slice(rows);
        Ok(rows.len())
    }
}
