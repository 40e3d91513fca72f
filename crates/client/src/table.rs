//! JSON-native table containers.
//!
//! The control plane never interprets cell values; rows travel as JSON
//! objects ("json-row" format) straight through to tool responses.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
}

/// Size and shape of a table, fetched without moving any row data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableInfo {
    pub row_count: u64,
    pub columns: Vec<ColumnSpec>,
}

impl TableInfo {
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }
}

/// A snapshot of table rows in json-row format.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TableSnapshot {
    #[serde(default)]
    pub columns: Vec<ColumnSpec>,
    #[serde(default)]
    pub rows: Vec<Map<String, Value>>,
}

impl TableSnapshot {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// The value of `column` in the first row, if present.
    pub fn first_value(&self, column: &str) -> Option<&Value> {
        self.rows.first().and_then(|row| row.get(column))
    }

    /// String values of `column` across all rows (non-strings skipped).
    pub fn column_strings(&self, column: &str) -> Vec<String> {
        self.rows
            .iter()
            .filter_map(|row| row.get(column).and_then(Value::as_str))
            .map(str::to_string)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot() -> TableSnapshot {
        serde_json::from_value(json!({
            "columns": [
                {"name": "Package", "type": "string"},
                {"name": "Version", "type": "string"}
            ],
            "rows": [
                {"Package": "numpy", "Version": "2.0.0"},
                {"Package": "pandas", "Version": "2.2.1"}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn accessors_read_rows() {
        let snap = snapshot();
        assert_eq!(snap.row_count(), 2);
        assert_eq!(snap.first_value("Package"), Some(&json!("numpy")));
        assert_eq!(
            snap.column_strings("Version"),
            vec!["2.0.0".to_string(), "2.2.1".to_string()]
        );
    }

    #[test]
    fn missing_column_yields_empty() {
        let snap = snapshot();
        assert!(snap.column_strings("License").is_empty());
        assert!(snap.first_value("License").is_none());
    }
}
