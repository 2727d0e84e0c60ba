//! tagmatrix storage - DuckDB-backed records and result tables.
//!
//! This library provides:
//! - `RecordStore`, holding ingested records per group
//! - Sink support for matrix and comparison tables

pub mod storage;

pub use storage::{AccessMode, IngestRow, RecordStore};
