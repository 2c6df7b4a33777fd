//! # m3-sql
//!
//! Read-only SQL validation for m3.
//!
//! Agents send free-form SQL. Before anything reaches a backend it must pass
//! [`SqlValidator::validate`], which returns either a [`ValidatedQuery`] or a
//! [`Rejection`] explaining why the text cannot be run.
//!
//! The checks run on the `sqlparser` token stream first, so comments, string
//! literals and quoted identifiers can never smuggle a keyword past them, and
//! then on the parsed statement:
//!
//! ```sql
//! SELECT subject_id FROM hosp_patients LIMIT 5      -- accepted
//! SELECT 'update' AS note                           -- accepted, literal
//! SELECT 1; DROP TABLE hosp_patients                -- rejected
//! SELECT * FROM read_csv('/etc/passwd')             -- rejected
//! ```
//!
//! Queries built by m3 itself use [`SqlTemplate`]: constant text with named
//! parameter slots, rendered through the target backend's placeholder syntax.

pub mod error;
pub mod query;
pub mod template;
pub mod validator;

pub use error::Rejection;
pub use query::{QueryParam, ValidatedQuery};
pub use template::{SqlTarget, SqlTemplate, TemplateError};
pub use validator::SqlValidator;

use serde::{Deserialize, Serialize};

/// SQL dialect family of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlFlavor {
    DuckDb,
    BigQuery,
}

impl SqlFlavor {
    /// Placeholder for a bound parameter.
    ///
    /// DuckDB binds positionally; BigQuery binds by name.
    pub fn placeholder(&self, name: &str) -> String {
        match self {
            Self::DuckDb => "?".to_string(),
            Self::BigQuery => format!("@{name}"),
        }
    }

    /// Whether parameters are bound by position, in order of appearance.
    pub fn positional_params(&self) -> bool {
        matches!(self, Self::DuckDb)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DuckDb => "duckdb",
            Self::BigQuery => "bigquery",
        }
    }
}

impl From<m3_core::BackendKind> for SqlFlavor {
    fn from(kind: m3_core::BackendKind) -> Self {
        match kind {
            m3_core::BackendKind::DuckDb => Self::DuckDb,
            m3_core::BackendKind::BigQuery => Self::BigQuery,
        }
    }
}

impl std::fmt::Display for SqlFlavor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
