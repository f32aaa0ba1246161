//! Import kind detection and data-table parsing.
//!
//! File IO lives in the loader; this module holds the pure pieces: deciding
//! what an imported path compiles to and turning CSV text into row-objects.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

use crate::definition::{ApiDefinition, TestDefinition};

static TYPE_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?m)^\s*["']?type["']?\s*:\s*["']?(\w+)"#).unwrap());

/// What an imported file compiles to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportKind {
    /// An API-calling routine.
    Api,
    /// A nested test routine.
    Test,
    /// A literal data table.
    Csv,
}

/// Infer an import's kind from its path extension plus the internal
/// `type:` marker in the file text.
pub fn detect_kind(path: &str, contents: &str) -> ImportKind {
    if path.rsplit('.').next().is_some_and(|ext| ext.eq_ignore_ascii_case("csv")) {
        return ImportKind::Csv;
    }

    match TYPE_MARKER.captures(contents).map(|caps| caps[1].to_ascii_lowercase()) {
        Some(kind) if kind == "api" => ImportKind::Api,
        Some(kind) if kind == "csv" => ImportKind::Csv,
        _ => ImportKind::Test,
    }
}

/// Parse CSV text into row-objects keyed by the header line.
///
/// Plain comma split; no quoting or escaping support. Blank lines are
/// skipped; short rows leave trailing columns absent, long rows drop the
/// extra fields.
pub fn parse_csv_table(text: &str) -> Vec<serde_json::Value> {
    let mut lines = text.lines().filter(|line| !line.trim().is_empty());

    let Some(header) = lines.next() else {
        return Vec::new();
    };
    let columns: Vec<&str> = header.split(',').map(str::trim).collect();

    lines
        .map(|line| {
            let mut row = serde_json::Map::new();
            for (column, field) in columns.iter().zip(line.split(',')) {
                row.insert(
                    column.to_string(),
                    serde_json::Value::String(field.trim().to_string()),
                );
            }
            serde_json::Value::Object(row)
        })
        .collect()
}

/// A loaded, not-yet-compiled import.
#[derive(Debug, Clone)]
pub enum ImportSource {
    Api(ApiDefinition),
    Test {
        definition: TestDefinition,
        imports: HashMap<String, ImportSource>,
    },
    Table(Vec<serde_json::Value>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csv_extension_wins() {
        assert_eq!(detect_kind("data/users.csv", "whatever"), ImportKind::Csv);
        assert_eq!(detect_kind("users.CSV", ""), ImportKind::Csv);
    }

    #[test]
    fn test_type_marker_detection() {
        assert_eq!(
            detect_kind("get_user.yaml", "type: api\nurl: http://x\n"),
            ImportKind::Api
        );
        assert_eq!(
            detect_kind("suite.yaml", "title: x\ntype: test\nsteps: []\n"),
            ImportKind::Test
        );
        // No marker defaults to a nested test routine.
        assert_eq!(detect_kind("suite.yaml", "title: x\n"), ImportKind::Test);
    }

    #[test]
    fn test_csv_rows_keyed_by_header() {
        let rows = parse_csv_table("name,age\njohn,20\njane,30\n");
        assert_eq!(
            rows,
            vec![
                serde_json::json!({"name": "john", "age": "20"}),
                serde_json::json!({"name": "jane", "age": "30"}),
            ]
        );
    }

    #[test]
    fn test_csv_no_quoting_support() {
        // A quoted field with an embedded comma splits anyway.
        let rows = parse_csv_table("name,city\n\"Doe, John\",Oslo\n");
        assert_eq!(
            rows,
            vec![serde_json::json!({"name": "\"Doe", "city": "John\""})]
        );
    }

    #[test]
    fn test_csv_blank_lines_and_short_rows() {
        let rows = parse_csv_table("a,b,c\n\n1,2\n");
        assert_eq!(rows, vec![serde_json::json!({"a": "1", "b": "2"})]);
    }

    #[test]
    fn test_csv_empty_text() {
        assert!(parse_csv_table("").is_empty());
    }
}
