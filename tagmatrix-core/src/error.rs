//! Error types for tagmatrix-core.

use thiserror::Error;

/// Result type alias for tagmatrix-core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors that can occur while indexing, comparing or building matrices.
///
/// Only configuration problems abort a run. Per-record and per-batch
/// failures are logged and counted by the caller instead of propagated.
#[derive(Error, Debug)]
pub enum CoreError {
    /// A matrix or comparison build was started without any groups.
    #[error("No groups provided: at least one group is required")]
    NoGroups,

    /// Two groups share the same label.
    #[error("Duplicate group label: {label}")]
    DuplicateGroup {
        /// The repeated label.
        label: String,
    },

    /// The first group is not known to the record source.
    #[error("Reference group '{label}' is not known to the record source")]
    UnknownReferenceGroup {
        /// Label of the reference group.
        label: String,
    },

    /// Invalid build configuration (batch size, labels, table names).
    #[error("Invalid configuration: {message}")]
    Config {
        /// Description of the configuration problem.
        message: String,
    },

    /// Destination table exists with a different column layout.
    #[error("Table '{table}' exists with columns [{existing}], expected [{expected}]")]
    SchemaConflict {
        /// Destination table.
        table: String,
        /// Columns found in the sink.
        existing: String,
        /// Columns the build would write.
        expected: String,
    },

    /// The record source failed to list or fetch records.
    #[error("Record source error: {message}")]
    Source {
        /// Description of the source failure.
        message: String,
    },

    /// The table sink rejected an operation.
    #[error("Sink error on table '{table}': {message}")]
    Sink {
        /// Table the operation targeted.
        table: String,
        /// Description of the sink failure.
        message: String,
    },

    /// Record interchange data could not be understood.
    #[error("Malformed record: {message}")]
    MalformedRecord {
        /// Description of the problem.
        message: String,
    },

    /// A batch worker panicked.
    #[error("Worker panicked: {message}")]
    WorkerPanic {
        /// Panic payload, when it was a string.
        message: String,
    },

    /// The worker pool could not be created.
    #[error("Executor error: {message}")]
    Executor {
        /// Description of the pool failure.
        message: String,
    },

    /// IO error reading record files.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error for record files.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    pub fn config(message: impl Into<String>) -> Self {
        CoreError::Config {
            message: message.into(),
        }
    }

    pub fn record_source(message: impl std::fmt::Display) -> Self {
        CoreError::Source {
            message: message.to_string(),
        }
    }

    pub fn sink(table: &str, message: impl std::fmt::Display) -> Self {
        CoreError::Sink {
            table: table.to_string(),
            message: message.to_string(),
        }
    }

    /// Whether this error must abort the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CoreError::NoGroups
                | CoreError::DuplicateGroup { .. }
                | CoreError::UnknownReferenceGroup { .. }
                | CoreError::Config { .. }
                | CoreError::SchemaConflict { .. }
                | CoreError::Executor { .. }
        )
    }
}
