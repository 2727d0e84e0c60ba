//! End-to-end matrix builds against the in-memory store.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tagmatrix_core::sink::TableSink;
use tagmatrix_core::types::{AttributeNode, AttributeValue, Record};
use tagmatrix_core::{
    CoreError, FetchStrategy, GroupSpec, IdentifierPolicy, MatrixOptions, MemoryStore,
    TagMatrixBuilder, TextRow, WriteMode,
};

fn record(id: &str, patient: &str) -> Record {
    Record::new(
        id,
        vec![
            AttributeNode::text(0x0008, 0x0060, "CS", "CT"),
            AttributeNode::text(0x0010, 0x0020, "LO", patient),
            AttributeNode::sequence(
                0x0008,
                0x1115,
                vec![vec![AttributeNode::new(
                    0x0020,
                    0x0013,
                    "IS",
                    AttributeValue::Ints(vec![1]),
                )]],
            ),
        ],
    )
}

fn identifiers(rows: &[TextRow]) -> BTreeSet<String> {
    rows.iter().filter_map(|r| r[0].clone()).collect()
}

/// Sink that refuses any batch containing `poison`.
struct FailingSink {
    inner: MemoryStore,
    poison: String,
}

impl TableSink for FailingSink {
    fn drop_table_if_exists(&self, table: &str) -> tagmatrix_core::Result<()> {
        self.inner.drop_table_if_exists(table)
    }

    fn create_table(&self, table: &str, columns: &[String]) -> tagmatrix_core::Result<()> {
        self.inner.create_table(table, columns)
    }

    fn table_columns(&self, table: &str) -> tagmatrix_core::Result<Option<Vec<String>>> {
        self.inner.table_columns(table)
    }

    fn insert_rows(&self, table: &str, columns: &[String], rows: &[TextRow]) -> tagmatrix_core::Result<usize> {
        if rows.iter().any(|r| r[0].as_deref() == Some(self.poison.as_str())) {
            return Err(CoreError::sink(table, "simulated write failure"));
        }
        self.inner.insert_rows(table, columns, rows)
    }
}

#[test]
fn test_absent_group_yields_null_column() {
    let store = MemoryStore::new();
    store.insert_records("g1", vec![record("U", "P1"), record("V", "P2")]);
    store.insert_records("g2", vec![record("V", "P2")]);
    store.insert_records("g3", vec![record("U", "P1")]);

    let builder = TagMatrixBuilder::new(
        vec![GroupSpec::new("g1"), GroupSpec::new("g2"), GroupSpec::new("g3")],
        Arc::new(store.clone()),
        Arc::new(store.clone()),
    )
    .unwrap();
    let columns = builder.columns();
    let g2 = columns.iter().position(|c| c == "g2_value").unwrap();
    let g3 = columns.iter().position(|c| c == "g3_value").unwrap();

    builder.build(&MatrixOptions::default()).unwrap();

    let rows = store.rows("tag_matrix");
    let u_rows: Vec<&TextRow> = rows.iter().filter(|r| r[0].as_deref() == Some("U")).collect();
    assert_eq!(u_rows.len(), 4);
    assert!(u_rows.iter().all(|r| r[g2].is_none()));
    assert!(u_rows.iter().all(|r| r[g3].is_some()));
}

#[test]
fn test_write_failure_on_one_batch_keeps_the_others() {
    let store = MemoryStore::new();
    store.insert_records("a", (1..=5).map(|i| record(&format!("id-{}", i), "P")));
    store.insert_records("b", (1..=5).map(|i| record(&format!("id-{}", i), "P")));

    let sink = FailingSink {
        inner: store.clone(),
        poison: "id-3".to_string(),
    };
    let builder = TagMatrixBuilder::new(
        vec![GroupSpec::new("a"), GroupSpec::new("b")],
        Arc::new(store.clone()),
        Arc::new(sink),
    )
    .unwrap();

    let options = MatrixOptions {
        batch_size: 1,
        parallelism: Some(3),
        ..Default::default()
    };
    let report = builder.build(&options).unwrap();

    assert_eq!(report.execution.batches, 5);
    assert_eq!(report.execution.succeeded, 4);
    assert_eq!(report.execution.failed_batches(), vec![2]);

    let written = identifiers(&store.rows("tag_matrix"));
    let expected: BTreeSet<String> = ["id-1", "id-2", "id-4", "id-5"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    assert_eq!(written, expected);
}

#[test]
fn test_union_covers_every_group() {
    let store = MemoryStore::new();
    store.insert_records("a", vec![record("1", "P"), record("2", "P")]);
    store.insert_records("b", vec![record("3", "P"), record("x4", "P")]);
    store.insert_records("c", vec![record("5", "P")]);

    let remap: HashMap<String, String> = [("4".to_string(), "x4".to_string())].into_iter().collect();
    let builder = TagMatrixBuilder::new(
        vec![
            GroupSpec::new("a"),
            GroupSpec::new("b").with_remap(remap),
            GroupSpec::new("c"),
        ],
        Arc::new(store.clone()),
        Arc::new(store.clone()),
    )
    .unwrap();

    let options = MatrixOptions {
        batch_size: 2,
        ..Default::default()
    };
    let report = builder.build(&options).unwrap();
    assert_eq!(report.identifiers, 5);

    let written = identifiers(&store.rows("tag_matrix"));
    let expected: BTreeSet<String> = ["1", "2", "3", "4", "5"].iter().map(|s| s.to_string()).collect();
    assert_eq!(written, expected);

    let reference_only = MatrixOptions {
        table: "reference_only".to_string(),
        policy: IdentifierPolicy::ReferenceOnly,
        ..Default::default()
    };
    builder.build(&reference_only).unwrap();
    assert_eq!(identifiers(&store.rows("reference_only")).len(), 2);
}

#[test]
fn test_union_keeps_record_hidden_by_own_remap_key() {
    let store = MemoryStore::new();
    store.insert_records("a", vec![record("1", "P1")]);
    store.insert_records("b", vec![record("2", "P2")]);

    // b's remap sends reference "2" elsewhere, but b's own "2" must still show.
    let remap: HashMap<String, String> = [("2".to_string(), "x2".to_string())].into_iter().collect();
    let builder = TagMatrixBuilder::new(
        vec![GroupSpec::new("a"), GroupSpec::new("b").with_remap(remap)],
        Arc::new(store.clone()),
        Arc::new(store.clone()),
    )
    .unwrap();

    for fetch in [FetchStrategy::PerBatch, FetchStrategy::Preload] {
        let table = format!("matrix_{}", fetch.as_str());
        let options = MatrixOptions {
            table: table.clone(),
            fetch,
            ..Default::default()
        };
        let report = builder.build(&options).unwrap();
        assert_eq!(report.identifiers, 2);

        let rows = store.rows(&table);
        let patient = rows
            .iter()
            .find(|r| r[0].as_deref() == Some("2") && r[1].as_deref() == Some("<(0010,0020)>"))
            .expect("record 2 of group b was dropped");
        assert_eq!(patient[6], None);
        assert_eq!(patient[7].as_deref(), Some("<P2>"));
    }
}

#[test]
fn test_fetch_strategies_agree() {
    let store = MemoryStore::new();
    store.insert_records("a", (0..7).map(|i| record(&i.to_string(), "P")));
    store.insert_records("b", (3..9).map(|i| record(&i.to_string(), "Q")));

    let builder = TagMatrixBuilder::new(
        vec![GroupSpec::new("a"), GroupSpec::new("b")],
        Arc::new(store.clone()),
        Arc::new(store.clone()),
    )
    .unwrap();

    for (table, fetch) in [("per_batch", FetchStrategy::PerBatch), ("preload", FetchStrategy::Preload)] {
        let options = MatrixOptions {
            table: table.to_string(),
            batch_size: 2,
            fetch,
            ..Default::default()
        };
        builder.build(&options).unwrap();
    }

    let mut a = store.rows("per_batch");
    let mut b = store.rows("preload");
    a.sort();
    b.sort();
    assert_eq!(a.len(), 9 * 4);
    assert_eq!(a, b);
}

#[test]
fn test_append_and_overwrite() {
    let store = MemoryStore::new();
    store.insert_records("a", vec![record("1", "P")]);

    let builder =
        TagMatrixBuilder::new(vec![GroupSpec::new("a")], Arc::new(store.clone()), Arc::new(store.clone()))
            .unwrap();

    builder.build(&MatrixOptions::default()).unwrap();
    builder.build(&MatrixOptions::default()).unwrap();
    assert_eq!(store.rows("tag_matrix").len(), 8);

    let overwrite = MatrixOptions {
        write_mode: WriteMode::Overwrite,
        ..Default::default()
    };
    builder.build(&overwrite).unwrap();
    assert_eq!(store.rows("tag_matrix").len(), 4);

    // Same table, different groups: a different column layout.
    store.insert_records("b", vec![record("1", "P")]);
    let wider = TagMatrixBuilder::new(
        vec![GroupSpec::new("a"), GroupSpec::new("b")],
        Arc::new(store.clone()),
        Arc::new(store.clone()),
    )
    .unwrap();
    let err = wider.build(&MatrixOptions::default()).unwrap_err();
    assert!(matches!(err, CoreError::SchemaConflict { .. }));
}

#[test]
fn test_configuration_errors_are_fatal() {
    let store = MemoryStore::new();
    store.insert_records("a", vec![record("1", "P")]);
    let source = Arc::new(store.clone());

    assert!(matches!(
        TagMatrixBuilder::new(vec![], source.clone(), source.clone()),
        Err(CoreError::NoGroups)
    ));
    assert!(matches!(
        TagMatrixBuilder::new(vec![GroupSpec::new("a"), GroupSpec::new("a")], source.clone(), source.clone()),
        Err(CoreError::DuplicateGroup { .. })
    ));
    assert!(matches!(
        TagMatrixBuilder::new(vec![GroupSpec::new("nope")], source.clone(), source.clone()),
        Err(CoreError::UnknownReferenceGroup { .. })
    ));

    let builder = TagMatrixBuilder::new(vec![GroupSpec::new("a")], source.clone(), source).unwrap();
    let zero = MatrixOptions {
        batch_size: 0,
        ..Default::default()
    };
    assert!(matches!(builder.build(&zero), Err(CoreError::Config { .. })));
}
