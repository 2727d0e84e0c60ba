//! CSV output for spreadsheet export.

use serde::Serialize;

/// CSV output formatter
pub struct CsvOutput;

impl CsvOutput {
    /// Header line followed by one line per row.
    pub fn format_rows(header: &[String], rows: &[Vec<String>]) -> String {
        let mut lines = Vec::with_capacity(rows.len() + 1);
        lines.push(Self::line(header));
        lines.extend(rows.iter().map(|row| Self::line(row)));
        lines.join("\n")
    }

    /// Format any serializable value. Objects become a two-line CSV and
    /// arrays of objects one line per element.
    pub fn format<T: Serialize + ?Sized>(data: &T) -> String {
        match serde_json::to_value(data) {
            Ok(serde_json::Value::Array(items)) => Self::format_array_value(&items),
            Ok(serde_json::Value::Object(obj)) => {
                let header: Vec<String> = obj.keys().cloned().collect();
                let values: Vec<String> = obj.values().map(Self::value_to_cell).collect();
                Self::format_rows(&header, &[values])
            }
            Ok(other) => Self::escape_value(&Self::value_to_cell(&other)),
            Err(_) => String::new(),
        }
    }

    fn format_array_value(items: &[serde_json::Value]) -> String {
        let Some(serde_json::Value::Object(first)) = items.first() else {
            return items
                .iter()
                .map(|v| Self::escape_value(&Self::value_to_cell(v)))
                .collect::<Vec<_>>()
                .join("\n");
        };
        let header: Vec<String> = first.keys().cloned().collect();
        let rows: Vec<Vec<String>> = items
            .iter()
            .filter_map(|item| item.as_object())
            .map(|obj| {
                header
                    .iter()
                    .map(|h| obj.get(h).map(Self::value_to_cell).unwrap_or_default())
                    .collect()
            })
            .collect();
        Self::format_rows(&header, &rows)
    }

    fn line(cells: &[String]) -> String {
        cells
            .iter()
            .map(|c| Self::escape_value(c))
            .collect::<Vec<_>>()
            .join(",")
    }

    fn value_to_cell(value: &serde_json::Value) -> String {
        match value {
            serde_json::Value::Null => String::new(),
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Array(arr) => format!("[{} items]", arr.len()),
            serde_json::Value::Object(obj) => format!("{{{} fields}}", obj.len()),
            other => other.to_string(),
        }
    }

    /// Quote values holding a comma, quote or line break.
    fn escape_value(s: &str) -> String {
        if s.contains(',') || s.contains('\n') || s.contains('\r') || s.contains('"') {
            format!("\"{}\"", s.replace('"', "\"\""))
        } else {
            s.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct GroupLine {
        group: String,
        records: usize,
    }

    #[test]
    fn test_format_rows_escapes() {
        let header = vec!["tag_path".to_string(), "value".to_string()];
        let rows = vec![vec!["<(0008,0060)>".to_string(), "a,b".to_string()]];
        assert_eq!(
            CsvOutput::format_rows(&header, &rows),
            "tag_path,value\n<(0008,0060)>,\"a,b\""
        );
    }

    #[test]
    fn test_format_array() {
        let data = vec![
            GroupLine {
                group: "origin".to_string(),
                records: 2,
            },
            GroupLine {
                group: "terminal".to_string(),
                records: 3,
            },
        ];
        let output = CsvOutput::format(&data);
        let lines: Vec<_> = output.lines().collect();
        assert_eq!(lines, vec!["group,records", "origin,2", "terminal,3"]);
    }

    #[test]
    fn test_escape_special_chars() {
        assert_eq!(CsvOutput::escape_value("hello"), "hello");
        assert_eq!(CsvOutput::escape_value("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(CsvOutput::escape_value("a\nb"), "\"a\nb\"");
    }
}
