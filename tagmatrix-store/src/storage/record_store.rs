//! RecordStore - DuckDB-backed record source and result sink.

use anyhow::{Context, Result};
use duckdb::{appender_params_from_iter, params, params_from_iter, Config, Connection};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tagmatrix_core::sink::{RecordSource, TableSink, TextRow};
use tagmatrix_core::types::Record;
use tagmatrix_core::CoreError;

use super::schema::{create_text_table_sql, quote_identifier, TableKind, RESERVED_TABLES, SCHEMA_SQL, SCHEMA_VERSION};

/// Identifiers per filtered select; keeps parameter lists reasonable.
const FETCH_CHUNK: usize = 500;

/// Database access mode for concurrent access control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessMode {
    /// Read-write mode (exclusive lock, for ingestion and builds)
    #[default]
    ReadWrite,
    /// Read-only mode (shared access, for inspection)
    ReadOnly,
}

/// One record prepared for the `records` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestRow {
    pub identifier: String,
    pub source_path: Option<String>,
    pub sop_class_uid: Option<String>,
    pub modality: Option<String>,
    pub patient_id: Option<String>,
    pub study_instance_uid: Option<String>,
    pub series_instance_uid: Option<String>,
    pub record_json: String,
    /// blake3 of `record_json`, hex.
    pub record_digest: String,
    pub record_size: i64,
}

impl IngestRow {
    /// Serialize a record and compute its digest.
    pub fn from_record(record: &Record) -> Result<Self> {
        let record_json = serde_json::to_string(record)
            .with_context(|| format!("Failed to serialize record {}", record.identifier))?;
        let record_digest = blake3::hash(record_json.as_bytes()).to_hex().to_string();
        let summary = record.summary();

        Ok(Self {
            identifier: summary.identifier,
            source_path: summary.source_path,
            sop_class_uid: summary.sop_class_uid,
            modality: summary.modality,
            patient_id: summary.patient_id,
            study_instance_uid: summary.study_instance_uid,
            series_instance_uid: summary.series_instance_uid,
            record_size: record_json.len() as i64,
            record_json,
            record_digest,
        })
    }
}

/// Per-group statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupStats {
    pub group: String,
    pub records: usize,
    pub total_bytes: i64,
    pub distinct_digests: usize,
}

/// A table present in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableInfo {
    pub name: String,
    pub kind: TableKind,
    pub columns: usize,
    pub rows: usize,
}

/// First rows of a table, rendered as text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TablePreview {
    pub columns: Vec<String>,
    pub rows: Vec<TextRow>,
}

/// DuckDB-based storage for ingested records and result tables.
pub struct RecordStore {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
    mode: AccessMode,
}

impl RecordStore {
    /// Open or create a store in read-write mode.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_mode(path, AccessMode::ReadWrite)
    }

    /// Open a store in read-only mode.
    ///
    /// Multiple read-only handles can coexist; every write fails.
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_mode(path, AccessMode::ReadOnly)
    }

    pub fn open_with_mode(path: impl AsRef<Path>, mode: AccessMode) -> Result<Self> {
        let path = path.as_ref();

        let conn = match mode {
            AccessMode::ReadWrite => Connection::open(path)
                .with_context(|| format!("Failed to open database: {:?}", path))?,
            AccessMode::ReadOnly => {
                let config = Config::default()
                    .access_mode(duckdb::AccessMode::ReadOnly)
                    .map_err(|e| anyhow::anyhow!("Failed to set read-only mode: {}", e))?;
                Connection::open_with_flags(path, config).with_context(|| {
                    format!("Failed to open database in read-only mode: {:?}", path)
                })?
            }
        };

        Self::from_connection(conn, path.to_path_buf(), mode)
    }

    /// In-memory store, gone when dropped.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::from_connection(conn, PathBuf::from(":memory:"), AccessMode::ReadWrite)
    }

    fn from_connection(conn: Connection, path: PathBuf, mode: AccessMode) -> Result<Self> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
            mode,
        };

        // Only initialize schema in read-write mode
        if mode == AccessMode::ReadWrite {
            store.init_schema()?;
        }

        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    /// Acquire the database connection lock, handling PoisonError gracefully.
    fn acquire_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        match self.conn.lock() {
            Ok(guard) => Ok(guard),
            Err(poisoned) => {
                tracing::warn!("Recovering from poisoned database mutex");
                Ok(poisoned.into_inner())
            }
        }
    }

    /// Short-lived connection to the same database, for one batch.
    fn batch_conn(&self) -> Result<Connection> {
        self.acquire_conn()?
            .try_clone()
            .context("Failed to open batch connection")
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.acquire_conn()?;

        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to initialize schema")?;

        conn.execute(
            "INSERT OR REPLACE INTO metadata (key, value) VALUES ('schema_version', ?)",
            params![SCHEMA_VERSION],
        )
        .context("Failed to set schema version")?;

        Ok(())
    }

    /// Delete every record of a group, returning how many were removed.
    pub fn delete_group(&self, group: &str) -> Result<usize> {
        let conn = self.acquire_conn()?;
        let deleted = conn
            .execute("DELETE FROM records WHERE group_name = ?", params![group])
            .with_context(|| format!("Failed to delete group {}", group))?;
        tracing::debug!("Deleted {} records of group {}", deleted, group);
        Ok(deleted)
    }

    /// Insert (or replace) records of a group in one transaction.
    pub fn insert_records(&self, group: &str, rows: &[IngestRow]) -> Result<usize> {
        let mut conn = self.batch_conn()?;
        let tx = conn.transaction().context("Failed to begin transaction")?;
        {
            let mut stmt = tx.prepare(
                r#"INSERT OR REPLACE INTO records
                   (group_name, identifier, source_path, sop_class_uid, modality, patient_id,
                    study_instance_uid, series_instance_uid, record_json, record_digest, record_size)
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            )?;
            for row in rows {
                stmt.execute(params![
                    group,
                    row.identifier,
                    row.source_path,
                    row.sop_class_uid,
                    row.modality,
                    row.patient_id,
                    row.study_instance_uid,
                    row.series_instance_uid,
                    row.record_json,
                    row.record_digest,
                    row.record_size,
                ])
                .with_context(|| format!("Failed to insert record {}", row.identifier))?;
            }
        }
        tx.commit().context("Failed to commit records")?;
        Ok(rows.len())
    }

    /// Record counts per group.
    pub fn groups(&self) -> Result<Vec<GroupStats>> {
        let conn = self.acquire_conn()?;
        let mut stmt = conn.prepare(
            r#"SELECT group_name, COUNT(*), COALESCE(SUM(record_size), 0), COUNT(DISTINCT record_digest)
               FROM records GROUP BY group_name ORDER BY group_name"#,
        )?;
        let stats = stmt
            .query_map([], |row| {
                Ok(GroupStats {
                    group: row.get(0)?,
                    records: row.get::<_, i64>(1)? as usize,
                    total_bytes: row.get::<_, i64>(2)?,
                    distinct_digests: row.get::<_, i64>(3)? as usize,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("Failed to read group statistics")?;
        Ok(stats)
    }

    /// Every table in the main schema.
    pub fn tables(&self) -> Result<Vec<TableInfo>> {
        let names: Vec<String> = {
            let conn = self.acquire_conn()?;
            let mut stmt = conn.prepare(
                "SELECT table_name FROM information_schema.tables WHERE table_schema = 'main' ORDER BY table_name",
            )?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            names
        };

        let mut tables = Vec::with_capacity(names.len());
        for name in names {
            let columns = self.columns_of(&name)?.map(|c| c.len()).unwrap_or(0);
            let rows = self.row_count(&name)?;
            tables.push(TableInfo {
                kind: TableKind::of(&name),
                name,
                columns,
                rows,
            });
        }
        Ok(tables)
    }

    pub fn row_count(&self, table: &str) -> Result<usize> {
        let conn = self.acquire_conn()?;
        let count: i64 = conn
            .query_row(
                &format!("SELECT COUNT(*) FROM {}", quote_identifier(table)),
                [],
                |row| row.get(0),
            )
            .with_context(|| format!("Failed to count rows of {}", table))?;
        Ok(count as usize)
    }

    /// First `limit` rows of a table, every column cast to text.
    pub fn preview(&self, table: &str, limit: usize) -> Result<TablePreview> {
        let columns = self
            .columns_of(table)?
            .with_context(|| format!("No such table: {}", table))?;

        let select: Vec<String> = columns
            .iter()
            .map(|c| format!("CAST({} AS VARCHAR)", quote_identifier(c)))
            .collect();
        let sql = format!(
            "SELECT {} FROM {} LIMIT ?",
            select.join(", "),
            quote_identifier(table)
        );

        let conn = self.acquire_conn()?;
        let mut stmt = conn
            .prepare(&sql)
            .with_context(|| format!("Failed to prepare query: {}", sql))?;
        let width = columns.len();
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                (0..width)
                    .map(|i| row.get::<_, Option<String>>(i))
                    .collect::<std::result::Result<TextRow, _>>()
            })?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("Failed to read rows")?;

        Ok(TablePreview { columns, rows })
    }

    fn columns_of(&self, table: &str) -> Result<Option<Vec<String>>> {
        let conn = self.acquire_conn()?;
        let mut stmt = conn.prepare(
            r#"SELECT column_name FROM information_schema.columns
               WHERE table_schema = 'main' AND table_name = ?
               ORDER BY ordinal_position"#,
        )?;
        let columns = stmt
            .query_map(params![table], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .with_context(|| format!("Failed to read columns of {}", table))?;
        Ok((!columns.is_empty()).then_some(columns))
    }

    fn group_identifiers(&self, group: &str) -> Result<BTreeSet<String>> {
        let conn = self.batch_conn()?;
        let mut stmt =
            conn.prepare("SELECT identifier FROM records WHERE group_name = ? ORDER BY identifier")?;
        let ids = stmt
            .query_map(params![group], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<BTreeSet<_>, _>>()
            .with_context(|| format!("Failed to list identifiers of {}", group))?;
        Ok(ids)
    }

    fn fetch_records(&self, group: &str, identifiers: &[String]) -> Result<HashMap<String, Record>> {
        let conn = self.batch_conn()?;
        let mut records = HashMap::with_capacity(identifiers.len());

        for chunk in identifiers.chunks(FETCH_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "SELECT identifier, record_json FROM records WHERE group_name = ? AND identifier IN ({})",
                placeholders
            );
            let mut stmt = conn.prepare(&sql)?;
            let params = std::iter::once(group).chain(chunk.iter().map(String::as_str));
            let rows = stmt
                .query_map(params_from_iter(params), |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()
                .with_context(|| format!("Failed to fetch records of {}", group))?;

            for (identifier, json) in rows {
                match serde_json::from_str::<Record>(&json) {
                    Ok(record) => {
                        records.insert(identifier, record);
                    }
                    Err(e) => {
                        tracing::warn!("Skipping malformed stored record {}/{}: {}", group, identifier, e);
                    }
                }
            }
        }
        Ok(records)
    }

    fn insert_text_rows(&self, table: &str, columns: &[String], rows: &[TextRow]) -> Result<usize> {
        if let Some(bad) = rows.iter().find(|r| r.len() != columns.len()) {
            anyhow::bail!("row has {} cells, expected {}", bad.len(), columns.len());
        }

        let mut conn = self.batch_conn()?;
        let tx = conn.transaction().context("Failed to begin transaction")?;
        {
            let mut appender = tx
                .appender(table)
                .with_context(|| format!("Failed to create appender for {}", table))?;
            for row in rows {
                appender.append_row(appender_params_from_iter(row.iter()))?;
            }
            appender.flush()?;
        }
        tx.commit().context("Failed to commit rows")?;
        Ok(rows.len())
    }
}

fn check_writable(table: &str) -> tagmatrix_core::Result<()> {
    if RESERVED_TABLES.contains(&table) {
        Err(CoreError::sink(table, "table is reserved by the record store"))
    } else {
        Ok(())
    }
}

impl RecordSource for RecordStore {
    fn has_group(&self, group: &str) -> tagmatrix_core::Result<bool> {
        let conn = self.acquire_conn().map_err(|e| CoreError::record_source(format!("{:#}", e)))?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM records WHERE group_name = ?",
                params![group],
                |row| row.get(0),
            )
            .map_err(CoreError::record_source)?;
        Ok(count > 0)
    }

    fn identifiers(&self, group: &str) -> tagmatrix_core::Result<BTreeSet<String>> {
        self.group_identifiers(group)
            .map_err(|e| CoreError::record_source(format!("{:#}", e)))
    }

    fn fetch(&self, group: &str, identifiers: &[String]) -> tagmatrix_core::Result<HashMap<String, Record>> {
        self.fetch_records(group, identifiers)
            .map_err(|e| CoreError::record_source(format!("{:#}", e)))
    }
}

impl TableSink for RecordStore {
    fn drop_table_if_exists(&self, table: &str) -> tagmatrix_core::Result<()> {
        check_writable(table)?;
        let conn = self.acquire_conn().map_err(|e| CoreError::sink(table, format!("{:#}", e)))?;
        conn.execute_batch(&format!("DROP TABLE IF EXISTS {}", quote_identifier(table)))
            .map_err(|e| CoreError::sink(table, e))
    }

    fn create_table(&self, table: &str, columns: &[String]) -> tagmatrix_core::Result<()> {
        check_writable(table)?;
        let conn = self.acquire_conn().map_err(|e| CoreError::sink(table, format!("{:#}", e)))?;
        conn.execute_batch(&create_text_table_sql(table, columns))
            .map_err(|e| CoreError::sink(table, e))
    }

    fn table_columns(&self, table: &str) -> tagmatrix_core::Result<Option<Vec<String>>> {
        self.columns_of(table)
            .map_err(|e| CoreError::sink(table, format!("{:#}", e)))
    }

    fn insert_rows(&self, table: &str, columns: &[String], rows: &[TextRow]) -> tagmatrix_core::Result<usize> {
        check_writable(table)?;
        self.insert_text_rows(table, columns, rows)
            .map_err(|e| CoreError::sink(table, format!("{:#}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tagmatrix_core::types::AttributeNode;
    use tempfile::tempdir;

    fn create_test_store() -> RecordStore {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.duckdb");
        // Keep the dir alive by leaking it (ok for tests)
        std::mem::forget(dir);
        RecordStore::open(&db_path).unwrap()
    }

    fn record(id: &str) -> Record {
        Record::new(
            id,
            vec![
                AttributeNode::text(0x0008, 0x0060, "CS", "CT"),
                AttributeNode::text(0x0010, 0x0020, "LO", "PAT-01"),
            ],
        )
        .with_source_path(&format!("/data/{}.json", id))
    }

    fn ingest(store: &RecordStore, group: &str, ids: &[&str]) {
        let rows: Vec<IngestRow> = ids
            .iter()
            .map(|id| IngestRow::from_record(&record(id)).unwrap())
            .collect();
        store.insert_records(group, &rows).unwrap();
    }

    #[test]
    fn test_open_and_init() {
        let store = create_test_store();
        assert!(store.groups().unwrap().is_empty());
        let kinds: Vec<TableKind> = store.tables().unwrap().iter().map(|t| t.kind).collect();
        assert!(kinds.contains(&TableKind::Records));
    }

    #[test]
    fn test_ingest_row_digest() {
        let row = IngestRow::from_record(&record("1")).unwrap();
        assert_eq!(row.record_digest.len(), 64);
        assert_eq!(row.record_size as usize, row.record_json.len());
        assert_eq!(row.modality.as_deref(), Some("CT"));
        assert_eq!(row, IngestRow::from_record(&record("1")).unwrap());
    }

    #[test]
    fn test_ingest_and_fetch() {
        let store = create_test_store();
        ingest(&store, "origin", &["1", "2", "3"]);

        assert!(store.has_group("origin").unwrap());
        assert!(!store.has_group("terminal").unwrap());
        assert_eq!(store.identifiers("origin").unwrap().len(), 3);

        let fetched = store
            .fetch("origin", &["2".to_string(), "7".to_string()])
            .unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched["2"], record("2"));

        let stats = store.groups().unwrap();
        assert_eq!(stats[0].records, 3);
        assert_eq!(stats[0].distinct_digests, 3);
    }

    #[test]
    fn test_delete_group() {
        let store = create_test_store();
        ingest(&store, "a", &["1", "2"]);
        ingest(&store, "b", &["1"]);

        assert_eq!(store.delete_group("a").unwrap(), 2);
        assert!(!store.has_group("a").unwrap());
        assert!(store.has_group("b").unwrap());
    }

    #[test]
    fn test_result_table_roundtrip() {
        let store = create_test_store();
        let columns = vec!["identifier".to_string(), "a_value".to_string()];

        store.create_table("tag_matrix", &columns).unwrap();
        assert_eq!(store.table_columns("tag_matrix").unwrap(), Some(columns.clone()));
        assert_eq!(store.table_columns("missing").unwrap(), None);

        let rows = vec![
            vec![Some("1".to_string()), Some("<CT>".to_string())],
            vec![Some("2".to_string()), None],
        ];
        assert_eq!(store.insert_rows("tag_matrix", &columns, &rows).unwrap(), 2);

        let preview = store.preview("tag_matrix", 10).unwrap();
        assert_eq!(preview.columns, columns);
        assert_eq!(preview.rows.len(), 2);
        assert!(preview.rows.contains(&vec![Some("2".to_string()), None]));

        store.drop_table_if_exists("tag_matrix").unwrap();
        assert_eq!(store.table_columns("tag_matrix").unwrap(), None);
    }

    #[test]
    fn test_reserved_tables_not_writable() {
        let store = create_test_store();
        assert!(store.drop_table_if_exists("records").is_err());
        assert!(store.create_table("metadata", &["x".to_string()]).is_err());
        assert!(store.has_group("anything").is_ok());
    }

    #[test]
    fn test_in_memory_store() {
        let store = RecordStore::open_in_memory().unwrap();
        ingest(&store, "a", &["1"]);
        assert_eq!(store.fetch_all("a").unwrap().len(), 1);
    }
}
