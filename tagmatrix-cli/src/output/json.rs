//! JSON output formatting for machine-readable output.

use serde::Serialize;

/// JSON output formatter
pub struct JsonOutput;

impl JsonOutput {
    /// Pretty-printed JSON.
    pub fn format<T: Serialize + ?Sized>(data: &T) -> String {
        serde_json::to_string_pretty(data)
            .unwrap_or_else(|e| format!("{{\n  \"error\": \"{}\"\n}}", e))
    }
}
