//! Storage layer for tagmatrix.
//!
//! Provides DuckDB-based storage with:
//! - Schema management
//! - Record ingestion per group
//! - `RecordSource` / `TableSink` implementations for the builders
//! - Table listing and previews

mod record_store;
mod schema;

pub use record_store::{AccessMode, GroupStats, IngestRow, RecordStore, TableInfo, TablePreview};
pub use schema::{quote_identifier, TableKind, RESERVED_TABLES, SCHEMA_VERSION};
