//! Database schema definitions for tagmatrix.
//!
//! Ingested records live in `records`; matrix and comparison tables are
//! created on demand by the builders, with all-TEXT columns.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Tables owned by the store itself; builders may not write to them.
pub const RESERVED_TABLES: &[&str] = &["records", "metadata"];

pub const SCHEMA_SQL: &str = r#"
-- Records table: one parsed attribute tree per (group, identifier)
CREATE TABLE IF NOT EXISTS records (
    group_name VARCHAR NOT NULL,
    identifier VARCHAR NOT NULL,
    source_path VARCHAR,
    sop_class_uid VARCHAR,
    modality VARCHAR,
    patient_id VARCHAR,
    study_instance_uid VARCHAR,
    series_instance_uid VARCHAR,
    record_json VARCHAR NOT NULL,
    record_digest VARCHAR NOT NULL,
    record_size BIGINT NOT NULL,
    ingested_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY (group_name, identifier)
);

-- Metadata table: version, build info
CREATE TABLE IF NOT EXISTS metadata (
    key VARCHAR PRIMARY KEY,
    value VARCHAR
);

CREATE INDEX IF NOT EXISTS idx_records_group ON records(group_name);
CREATE INDEX IF NOT EXISTS idx_records_digest ON records(record_digest);
"#;

pub const SCHEMA_VERSION: &str = "1.0.0";

/// Quote a table or column name for DuckDB.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// `CREATE TABLE` statement for an all-text result table.
pub fn create_text_table_sql(table: &str, columns: &[String]) -> String {
    let columns: Vec<String> = columns
        .iter()
        .map(|c| format!("{} VARCHAR", quote_identifier(c)))
        .collect();
    format!(
        "CREATE TABLE {} ({})",
        quote_identifier(table),
        columns.join(", ")
    )
}

/// Kind of table found in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableKind {
    /// Ingested records
    Records,
    /// Store bookkeeping
    Metadata,
    /// Matrix or comparison output
    Result,
}

impl TableKind {
    pub fn of(table: &str) -> Self {
        match table {
            "records" => TableKind::Records,
            "metadata" => TableKind::Metadata,
            _ => TableKind::Result,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TableKind::Records => "records",
            TableKind::Metadata => "metadata",
            TableKind::Result => "result",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "records" => Some(TableKind::Records),
            "metadata" => Some(TableKind::Metadata),
            "result" => Some(TableKind::Result),
            _ => None,
        }
    }
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
