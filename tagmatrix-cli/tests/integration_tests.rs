//! Integration tests for the tagmatrix CLI
//!
//! Drives the built binary against record fixtures and a DuckDB store in
//! a temporary directory.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use serde_json::Value;
use tempfile::TempDir;

// ============================================================================
// Test Utilities
// ============================================================================

fn tagmatrix_binary() -> Command {
    Command::new(env!("CARGO_BIN_EXE_tagmatrix"))
}

/// Run tagmatrix in `dir` with the given args
fn run(dir: &Path, args: &[&str]) -> Output {
    tagmatrix_binary()
        .current_dir(dir)
        .env_remove("TAGMATRIX_DB")
        .env_remove("RUST_LOG")
        .args(args)
        .output()
        .expect("Failed to execute tagmatrix")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

/// Run with `--format json` and parse stdout.
fn run_json(dir: &Path, args: &[&str]) -> Value {
    let mut full = args.to_vec();
    full.extend(["--format", "json"]);
    let output = run(dir, &full);
    assert!(
        output.status.success(),
        "tagmatrix {:?} failed: {}",
        args,
        stderr(&output)
    );
    serde_json::from_str(&stdout(&output)).expect("stdout is not JSON")
}

fn record(identifier: &str, modality: &str, patient: &str) -> String {
    format!(
        r#"{{"identifier": "{}", "attributes": [
            {{"group": 8, "element": 96, "vr": "CS", "value": {{"Text": "{}"}}}},
            {{"group": 16, "element": 32, "vr": "LO", "value": {{"Text": "{}"}}}}
        ]}}"#,
        identifier, modality, patient
    )
}

/// Two groups: origin holds 1.2.3 and 4.5.6, terminal holds 9.9.9 which
/// is 1.2.3 under a new identifier with a changed modality.
fn setup_groups(dir: &Path) {
    fs::create_dir(dir.join("origin")).unwrap();
    fs::create_dir(dir.join("terminal")).unwrap();
    fs::write(
        dir.join("origin/records.jsonl"),
        format!(
            "{}\n{}\n",
            record("1.2.3", "CT", "P1").replace('\n', ""),
            record("4.5.6", "CT", "P2").replace('\n', "")
        ),
    )
    .unwrap();
    fs::write(dir.join("terminal/one.json"), record("9.9.9", "MR", "P1")).unwrap();
    fs::write(dir.join("map.csv"), "reference,local\n1.2.3,9.9.9\n").unwrap();
}

fn ingest(dir: &Path, group: &str) -> Value {
    run_json(dir, &["ingest", group, group, "--db", "store.duckdb"])
}

// ============================================================================
// Single-file commands
// ============================================================================

#[test]
fn test_no_command_prints_help() {
    let dir = TempDir::new().unwrap();
    let output = run(dir.path(), &[]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("Usage"));
}

#[test]
fn test_index_lists_tag_paths() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("r.json"), record("1.2.3", "CT", "P1")).unwrap();

    let json = run_json(dir.path(), &["index", "r.json"]);
    let entries = json["records"][0]["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["tag_path"], "<(0008,0060)>");
    assert_eq!(entries[1]["tag_path"], "<(0010,0020)>");
}

#[test]
fn test_index_unknown_identifier_fails() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("r.json"), record("1.2.3", "CT", "P1")).unwrap();

    let output = run(dir.path(), &["index", "r.json", "--identifier", "7.7.7"]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("7.7.7"));
}

#[test]
fn test_compare_files() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("a.json"), record("1.2.3", "CT", "P1")).unwrap();
    fs::write(dir.path().join("b.json"), record("9.9.9", "MR", "P1")).unwrap();

    let json = run_json(dir.path(), &["compare", "a.json", "b.json"]);
    assert_eq!(json["tags"], 2);
    assert_eq!(json["differences"], 1);
    assert_eq!(json["rows"].as_array().unwrap().len(), 1);
    assert_eq!(json["rows"][0]["tag_path"], "<(0008,0060)>");

    let all = run_json(dir.path(), &["compare", "a.json", "b.json", "--all"]);
    assert_eq!(all["rows"].as_array().unwrap().len(), 2);
}

#[test]
fn test_compare_files_csv_uses_comparison_layout() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("a.json"), record("1.2.3", "CT", "P1")).unwrap();
    fs::write(dir.path().join("b.json"), record("9.9.9", "MR", "P1")).unwrap();

    let output = run(dir.path(), &["compare", "a.json", "b.json", "--format", "csv"]);
    assert!(output.status.success(), "{}", stderr(&output));
    let text = stdout(&output);
    let header = text.lines().next().unwrap();
    assert!(header.starts_with("origin_id,origin_class,origin_modality,origin_patient,"));
    assert!(header.contains(",origin_path,terminal_id,"));
    assert!(header.contains(",terminal_path,tag,tag_path,"));
    assert!(header.ends_with("origin_value,terminal_value,is_different"));
    assert_eq!(header.split(',').count(), 29);
    assert_eq!(text.lines().count(), 2);

    let row: Vec<&str> = text.lines().nth(1).unwrap().split(',').collect();
    assert_eq!(row[0], "1.2.3");
    assert_eq!(row[2], "CT");
    assert_eq!(row[3], "P1");
    assert_eq!(row[8], "9.9.9");
    assert_eq!(row[10], "MR");
}

// ============================================================================
// Store-backed commands
// ============================================================================

#[test]
fn test_ingest_matrix_and_preview() {
    let dir = TempDir::new().unwrap();
    setup_groups(dir.path());

    let origin = ingest(dir.path(), "origin");
    assert_eq!(origin["records"], 2);
    assert_eq!(origin["execution"]["failures"].as_array().unwrap().len(), 0);
    assert_eq!(ingest(dir.path(), "terminal")["records"], 1);

    let matrix = run_json(
        dir.path(),
        &["matrix", "origin", "terminal=map.csv", "--db", "store.duckdb"],
    );
    assert_eq!(matrix["table"], "tag_matrix");
    assert_eq!(matrix["identifiers"], 2);
    assert_eq!(matrix["rows_written"], 4);

    let preview = run_json(dir.path(), &["tables", "tag_matrix", "--db", "store.duckdb"]);
    assert_eq!(preview["total_rows"], 4);
    let columns: Vec<&str> = preview["columns"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c.as_str().unwrap())
        .collect();
    assert_eq!(
        columns,
        vec![
            "identifier",
            "tag_path",
            "tag_label",
            "tag_name",
            "tag_vm",
            "tag_vr",
            "origin_value",
            "terminal_value"
        ]
    );

    let overview = run_json(dir.path(), &["tables", "--db", "store.duckdb"]);
    let groups: Vec<&str> = overview["groups"]
        .as_array()
        .unwrap()
        .iter()
        .map(|g| g["group"].as_str().unwrap())
        .collect();
    assert_eq!(groups, vec!["origin", "terminal"]);
}

#[test]
fn test_reingest_replaces_group() {
    let dir = TempDir::new().unwrap();
    setup_groups(dir.path());

    ingest(dir.path(), "origin");
    let again = ingest(dir.path(), "origin");
    assert_eq!(again["replaced"], 2);
    assert_eq!(again["records"], 2);
}

#[test]
fn test_compare_groups_with_remap() {
    let dir = TempDir::new().unwrap();
    setup_groups(dir.path());
    ingest(dir.path(), "origin");
    ingest(dir.path(), "terminal");

    let report = run_json(
        dir.path(),
        &[
            "compare",
            "--groups",
            "origin",
            "terminal",
            "--remap",
            "map.csv",
            "--db",
            "store.duckdb",
            "--batch-size",
            "1",
        ],
    );
    assert_eq!(report["table"], "tag_comparison");
    assert_eq!(report["identifiers"], 2);
    assert_eq!(report["missing_counterparts"], 1);
    assert_eq!(report["rows_written"], 4);
    assert_eq!(report["remap_entries"], 1);
    assert_eq!(report["execution"]["batches"], 2);
}

#[test]
fn test_matrix_unknown_reference_group_fails() {
    let dir = TempDir::new().unwrap();
    setup_groups(dir.path());
    ingest(dir.path(), "origin");

    let output = run(
        dir.path(),
        &["matrix", "nope", "origin", "--db", "store.duckdb"],
    );
    assert!(!output.status.success());
    assert!(stderr(&output).contains("nope"));
}

#[test]
fn test_config_file_sets_store_and_format() {
    let dir = TempDir::new().unwrap();
    setup_groups(dir.path());
    fs::write(
        dir.path().join(".tagmatrix.toml"),
        "[store]\npath = \"configured.duckdb\"\n\n[output]\nformat = \"json\"\n\n[matrix]\ntable = \"wide\"\n",
    )
    .unwrap();

    let output = run(dir.path(), &["ingest", "origin", "origin"]);
    assert!(output.status.success(), "{}", stderr(&output));
    let json: Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(json["records"], 2);
    assert!(dir.path().join("configured.duckdb").exists());

    let output = run(dir.path(), &["matrix", "origin"]);
    assert!(output.status.success(), "{}", stderr(&output));
    let json: Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(json["table"], "wide");
}

#[test]
fn test_tables_without_store_fails() {
    let dir = TempDir::new().unwrap();
    let output = run(dir.path(), &["tables", "--db", "missing.duckdb"]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("tagmatrix ingest"));
}
