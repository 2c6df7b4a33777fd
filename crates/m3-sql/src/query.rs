//! Queries cleared for execution.

use serde::Serialize;

/// A value bound to a query parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum QueryParam {
    Int(i64),
    Text(String),
}

impl QueryParam {
    /// BigQuery parameter type name.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Int(_) => "INT64",
            Self::Text(_) => "STRING",
        }
    }

    /// Value as its string form, the way REST APIs transport parameters.
    pub fn to_wire_string(&self) -> String {
        match self {
            Self::Int(v) => v.to_string(),
            Self::Text(v) => v.clone(),
        }
    }
}

impl From<i64> for QueryParam {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u32> for QueryParam {
    fn from(v: u32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<String> for QueryParam {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&str> for QueryParam {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

/// SQL text that passed validation, or was rendered from a constant template.
///
/// There is no public constructor: backends only ever run values produced by
/// [`crate::SqlValidator`] or [`crate::SqlTemplate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedQuery {
    sql: String,
    params: Vec<(String, QueryParam)>,
}

impl ValidatedQuery {
    pub(crate) fn new(sql: String, params: Vec<(String, QueryParam)>) -> Self {
        Self { sql, params }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Bound parameters by name, in placeholder order for positional dialects.
    pub fn params(&self) -> &[(String, QueryParam)] {
        &self.params
    }

    pub fn has_params(&self) -> bool {
        !self.params.is_empty()
    }
}

impl std::fmt::Display for ValidatedQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.sql)
    }
}
