//! Configuration loading from `.tagmatrix.toml`.
//!
//! Every section is optional. Command-line flags take precedence over the
//! values read here.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use tagmatrix_core::{FetchStrategy, IdentifierPolicy};

pub const CONFIG_FILE: &str = ".tagmatrix.toml";
pub const DEFAULT_DB_PATH: &str = "tagmatrix.duckdb";

#[derive(Debug, Deserialize, Default)]
pub struct TagmatrixConfig {
    #[serde(default)]
    pub store: StoreSettings,

    #[serde(default)]
    pub execution: ExecutionSettings,

    #[serde(default)]
    pub matrix: MatrixSettings,

    #[serde(default)]
    pub compare: CompareSettings,

    #[serde(default)]
    pub output: OutputSettings,
}

#[derive(Debug, Deserialize, Default)]
pub struct StoreSettings {
    /// Path to the DuckDB database file
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ExecutionSettings {
    #[serde(default)]
    pub batch_size: Option<usize>,

    /// Worker count; defaults to the number of CPUs
    #[serde(default)]
    pub parallelism: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
pub struct MatrixSettings {
    #[serde(default)]
    pub table: Option<String>,

    /// `per_batch` or `preload`
    #[serde(default)]
    pub fetch: Option<String>,

    /// `union` or `reference_only`
    #[serde(default)]
    pub policy: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct CompareSettings {
    #[serde(default)]
    pub table: Option<String>,

    #[serde(default)]
    pub origin_label: Option<String>,

    #[serde(default)]
    pub terminal_label: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct OutputSettings {
    #[serde(default)]
    pub format: Option<String>,

    #[serde(default)]
    pub color: Option<bool>,
}

impl TagmatrixConfig {
    /// Load `.tagmatrix.toml` from `root`, falling back to defaults.
    pub fn load(root: &Path) -> Self {
        Self::load_file(&root.join(CONFIG_FILE))
    }

    /// Load a specific config file, falling back to defaults.
    pub fn load_file(config_path: &Path) -> Self {
        if !config_path.exists() {
            return Self::default();
        }
        match std::fs::read_to_string(config_path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => return config,
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {}", config_path.display(), e);
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read {}: {}", config_path.display(), e);
            }
        }
        Self::default()
    }

    /// Database path: the flag wins, then `[store] path`, then the default.
    pub fn db_path(&self, flag: Option<&Path>) -> PathBuf {
        flag.map(Path::to_path_buf)
            .or_else(|| self.store.path.as_ref().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH))
    }

    pub fn batch_size(&self, flag: Option<usize>) -> usize {
        flag.or(self.execution.batch_size)
            .unwrap_or(tagmatrix_core::executor::DEFAULT_BATCH_SIZE)
    }

    pub fn parallelism(&self, flag: Option<usize>) -> Option<usize> {
        flag.or(self.execution.parallelism)
    }

    pub fn fetch_strategy(&self) -> Option<FetchStrategy> {
        let value = self.matrix.fetch.as_deref()?;
        let parsed = FetchStrategy::parse(value);
        if parsed.is_none() {
            tracing::warn!("Unknown [matrix] fetch '{}' in config, ignoring", value);
        }
        parsed
    }

    pub fn identifier_policy(&self) -> Option<IdentifierPolicy> {
        let value = self.matrix.policy.as_deref()?;
        let parsed = IdentifierPolicy::parse(value);
        if parsed.is_none() {
            tracing::warn!("Unknown [matrix] policy '{}' in config, ignoring", value);
        }
        parsed
    }

    pub fn default_format(&self) -> Option<&str> {
        self.output.format.as_deref()
    }

    pub fn use_color(&self) -> Option<bool> {
        self.output.color
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = TagmatrixConfig::load(dir.path());
        assert!(config.store.path.is_none());
        assert_eq!(config.db_path(None), PathBuf::from(DEFAULT_DB_PATH));
        assert_eq!(config.batch_size(None), 100);
    }

    #[test]
    fn test_sections_parse() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            r#"
[store]
path = "data/records.duckdb"

[execution]
batch_size = 25
parallelism = 3

[matrix]
table = "wide"
fetch = "preload"
policy = "reference_only"

[compare]
origin_label = "before"
terminal_label = "after"

[output]
format = "json"
color = false
"#,
        )
        .unwrap();

        let config = TagmatrixConfig::load(dir.path());
        assert_eq!(config.db_path(None), PathBuf::from("data/records.duckdb"));
        assert_eq!(config.db_path(Some(Path::new("x.duckdb"))), PathBuf::from("x.duckdb"));
        assert_eq!(config.batch_size(None), 25);
        assert_eq!(config.batch_size(Some(7)), 7);
        assert_eq!(config.parallelism(None), Some(3));
        assert_eq!(config.fetch_strategy(), Some(FetchStrategy::Preload));
        assert_eq!(config.identifier_policy(), Some(IdentifierPolicy::ReferenceOnly));
        assert_eq!(config.compare.origin_label.as_deref(), Some("before"));
        assert_eq!(config.default_format(), Some("json"));
        assert_eq!(config.use_color(), Some(false));
    }

    #[test]
    fn test_malformed_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "[execution\nbatch_size = ").unwrap();
        let config = TagmatrixConfig::load(dir.path());
        assert!(config.execution.batch_size.is_none());
    }
}
