//! Normalized query results.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One result row: column name -> scalar, in column order.
pub type Row = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
}

/// Rows returned by a backend, independent of the engine that produced them.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<ColumnInfo>,
    pub rows: Vec<Row>,
    pub row_count: usize,
    /// More rows existed than the configured maximum.
    pub truncated: bool,
}

impl QueryResult {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// First column of every row, rendered as text.
    pub fn first_column_strings(&self) -> Vec<String> {
        self.rows
            .iter()
            .filter_map(|row| row.values().next())
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect()
    }
}

/// Schema and a sample of one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDescription {
    /// Name as resolved by the backend.
    pub name: String,
    pub columns: Vec<ColumnInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample: Option<QueryResult>,
}

/// Makes column names unique so they can key a row map.
///
/// A repeated name gets a `_<n>` suffix, e.g. two `subject_id` columns from a
/// join become `subject_id` and `subject_id_2`.
pub(crate) fn unique_column_names(names: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(names.len());
    for name in names {
        if !out.contains(&name) {
            out.push(name);
            continue;
        }
        let mut n = 2;
        while out.contains(&format!("{name}_{n}")) {
            n += 1;
        }
        out.push(format!("{name}_{n}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_column_names() {
        let names = unique_column_names(vec![
            "subject_id".into(),
            "hadm_id".into(),
            "subject_id".into(),
            "subject_id".into(),
        ]);
        assert_eq!(names, vec!["subject_id", "hadm_id", "subject_id_2", "subject_id_3"]);
    }
}
