//! Record and remap file formats.
//!
//! A record file holds parsed attribute trees as JSON: a single record
//! object, an array of records, or one record per line (JSON Lines).
//! A remap file maps reference identifiers to a group's local identifiers,
//! either as a JSON object or as `reference,local` lines.

use std::collections::HashMap;
use std::path::Path;

use crate::error::{CoreError, Result};
use crate::types::Record;

/// Parse every record in `text`.
pub fn parse_records(text: &str) -> Result<Vec<Record>> {
    let trimmed = text.trim_start();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    let records: Vec<Record> = if trimmed.starts_with('[') {
        serde_json::from_str(trimmed).map_err(malformed)?
    } else {
        // Handles a single object as well as JSON Lines.
        serde_json::Deserializer::from_str(trimmed)
            .into_iter::<Record>()
            .collect::<std::result::Result<_, _>>()
            .map_err(malformed)?
    };

    if let Some(pos) = records.iter().position(|r| r.identifier.trim().is_empty()) {
        return Err(CoreError::MalformedRecord {
            message: format!("record #{} has an empty identifier", pos + 1),
        });
    }
    Ok(records)
}

/// Read a record file, filling in `source_path` where the file omits it.
pub fn read_records(path: &Path) -> Result<Vec<Record>> {
    let text = std::fs::read_to_string(path)?;
    let display = path.display().to_string();
    let mut records = parse_records(&text).map_err(|e| match e {
        CoreError::MalformedRecord { message } => CoreError::MalformedRecord {
            message: format!("{}: {}", display, message),
        },
        other => other,
    })?;

    for record in &mut records {
        if record.source_path.is_none() {
            record.source_path = Some(display.clone());
        }
    }
    Ok(records)
}

/// Parse a remap table.
pub fn parse_remap(text: &str) -> Result<HashMap<String, String>> {
    let trimmed = text.trim_start();
    if trimmed.starts_with('{') {
        return serde_json::from_str(trimmed)
            .map_err(|e| CoreError::config(format!("invalid remap JSON: {}", e)));
    }

    let mut remap = HashMap::new();
    for (n, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((reference, local)) = line.split_once(',') else {
            return Err(CoreError::config(format!(
                "remap line {}: expected 'reference,local'",
                n + 1
            )));
        };
        let (reference, local) = (reference.trim(), local.trim());

        if n == 0 && reference.eq_ignore_ascii_case("reference") {
            continue;
        }
        if reference.is_empty() || local.is_empty() {
            return Err(CoreError::config(format!("remap line {}: empty identifier", n + 1)));
        }
        if let Some(previous) = remap.insert(reference.to_string(), local.to_string()) {
            tracing::warn!(
                "Remap entry for {} repeated, replacing {} with {}",
                reference,
                previous,
                local
            );
        }
    }
    Ok(remap)
}

pub fn read_remap(path: &Path) -> Result<HashMap<String, String>> {
    let text = std::fs::read_to_string(path)?;
    parse_remap(&text)
}

fn malformed(e: serde_json::Error) -> CoreError {
    CoreError::MalformedRecord {
        message: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AttributeValue, Tag};

    const RECORD: &str = r#"{"identifier": "1.2.3", "attributes": [
        {"group": 8, "element": 96, "vr": "CS", "value": {"Text": "CT"}},
        {"group": 8, "element": 4373, "vr": "SQ", "value": {"Sequence": [[
            {"group": 32, "element": 19, "vr": "IS", "value": {"Ints": [1]}}
        ]]}}
    ]}"#;

    #[test]
    fn test_single_object() {
        let records = parse_records(RECORD).unwrap();
        assert_eq!(records.len(), 1);
        let seq = records[0].attribute(Tag::new(0x0008, 0x1115)).unwrap();
        assert_eq!(seq.items().len(), 1);
        assert_eq!(
            seq.items()[0].attributes[0].value,
            AttributeValue::Ints(vec![1])
        );
    }

    #[test]
    fn test_array_and_lines() {
        let array = r#"[{"identifier": "a"}, {"identifier": "b"}]"#;
        assert_eq!(parse_records(array).unwrap().len(), 2);

        let lines = "{\"identifier\": \"a\"}\n{\"identifier\": \"b\"}\n\n{\"identifier\": \"c\"}\n";
        let ids: Vec<String> = parse_records(lines)
            .unwrap()
            .into_iter()
            .map(|r| r.identifier)
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_malformed_records() {
        assert!(matches!(
            parse_records("{\"identifier\": "),
            Err(CoreError::MalformedRecord { .. })
        ));
        assert!(matches!(
            parse_records("{\"identifier\": \" \"}"),
            Err(CoreError::MalformedRecord { .. })
        ));
        assert!(parse_records("  \n").unwrap().is_empty());
    }

    #[test]
    fn test_read_records_sets_source_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("one.json");
        std::fs::write(&path, RECORD).unwrap();

        let records = read_records(&path).unwrap();
        assert_eq!(records[0].source_path.as_deref(), Some(path.display().to_string().as_str()));
    }

    #[test]
    fn test_remap_csv() {
        let text = "reference,local\n# comment\n1.2.3, 9.9.9\n\n4.5.6,7.7.7\n";
        let remap = parse_remap(text).unwrap();
        assert_eq!(remap.len(), 2);
        assert_eq!(remap["1.2.3"], "9.9.9");
    }

    #[test]
    fn test_remap_json() {
        let remap = parse_remap(r#"{"1.2.3": "9.9.9"}"#).unwrap();
        assert_eq!(remap["1.2.3"], "9.9.9");
    }

    #[test]
    fn test_remap_bad_line() {
        assert!(parse_remap("1.2.3\n").is_err());
        assert!(parse_remap("1.2.3,\n").is_err());
    }
}
