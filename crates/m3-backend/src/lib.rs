//! # m3-backend
//!
//! Interchangeable query engines behind one trait.
//!
//! | Backend | Storage | Parameters |
//! |---------|---------|------------|
//! | [`DuckDbBackend`] | local catalog of views over Parquet, opened read-only | positional `?` |
//! | [`BigQueryBackend`] | BigQuery REST API | named `@name` |
//!
//! Both return the same [`QueryResult`] shape and map failures into the same
//! [`BackendError`] taxonomy, so the gateway never branches on the engine.
//! [`BackendFactory`] picks the variant once at startup.

pub mod bigquery;
pub mod embedded;
pub mod error;
pub mod factory;
pub mod result;

pub use bigquery::{AmbientTokenProvider, BigQueryBackend, StaticTokenProvider, TokenProvider};
pub use embedded::DuckDbBackend;
pub use error::{BackendError, Redactor};
pub use factory::{ActiveSelection, BackendFactory};
pub use result::{ColumnInfo, QueryResult, Row, TableDescription};

use async_trait::async_trait;
use m3_sql::{SqlTarget, ValidatedQuery};

/// A read-only query engine.
///
/// Naming helpers (`flavor`, `table_ref`, `placeholder`) come from
/// [`SqlTarget`] so templates render without knowing the concrete backend.
#[async_trait]
pub trait Backend: SqlTarget + Send + Sync {
    /// Short label for responses and logs, e.g. `duckdb (mimic-iv-demo)`.
    fn label(&self) -> &str;

    /// Names of every queryable table.
    async fn describe_schema(&self) -> Result<Vec<String>, BackendError>;

    /// Columns of `table`, plus up to `sample_rows` rows when non-zero.
    async fn describe_table(
        &self,
        table: &str,
        sample_rows: usize,
    ) -> Result<TableDescription, BackendError>;

    /// Execute a validated query.
    async fn run_query(&self, query: &ValidatedQuery) -> Result<QueryResult, BackendError>;
}
