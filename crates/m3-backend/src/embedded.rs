//! Embedded DuckDB backend.
//!
//! The catalog file only holds views over Parquet files. Every call opens it
//! read-only on a blocking thread, so a running `init` can rebuild the
//! catalog and swap it in without coordinating with open handles.
//!
//! Connections are sandboxed: file access is limited to the Parquet
//! directory the catalog views read from, and a query that outlives its
//! timeout is interrupted rather than left running.

use crate::Backend;
use crate::error::{BackendError, Redactor};
use crate::result::{ColumnInfo, QueryResult, Row, TableDescription, unique_column_names};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};
use duckdb::types::{TimeUnit, Value};
use duckdb::{AccessMode, Config, Connection, InterruptHandle, ToSql, params_from_iter};
use m3_sql::{QueryParam, SqlFlavor, SqlTarget, ValidatedQuery};
use serde_json::Value as Json;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// How often a timed-out query is re-interrupted until its worker returns.
const INTERRUPT_INTERVAL: Duration = Duration::from_millis(100);

/// DuckDB catalog opened read-only per call.
pub struct DuckDbBackend {
    catalog: PathBuf,
    allowed_dirs: Vec<PathBuf>,
    label: String,
    timeout: Duration,
    max_rows: usize,
    redactor: Redactor,
}

impl DuckDbBackend {
    /// Views may read from `<data dir>/parquet` when the catalog sits in
    /// `<data dir>/databases`; see [`Self::with_allowed_directory`].
    pub fn new(catalog: impl Into<PathBuf>) -> Self {
        let catalog = catalog.into();
        let allowed_dirs = catalog
            .parent()
            .and_then(Path::parent)
            .map(|root| vec![root.join("parquet")])
            .unwrap_or_default();
        Self {
            catalog,
            allowed_dirs,
            label: "duckdb".to_string(),
            timeout: Duration::from_secs(60),
            max_rows: 1000,
            redactor: Redactor::default(),
        }
    }

    pub fn with_dataset(mut self, dataset: &str) -> Self {
        self.label = format!("duckdb ({dataset})");
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Replace the directories queries may read files from.
    pub fn with_allowed_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.allowed_dirs = vec![dir.into()];
        self
    }

    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = max_rows;
        self
    }

    pub fn with_redactor(mut self, redactor: Redactor) -> Self {
        self.redactor = redactor;
        self
    }

    pub fn catalog_path(&self) -> &Path {
        &self.catalog
    }

    /// Run `work` against a fresh read-only connection on the blocking pool.
    ///
    /// On timeout the query is interrupted and awaited, so no worker keeps
    /// the catalog open once this returns.
    async fn with_connection<T, F>(&self, work: F) -> Result<T, BackendError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, BackendError> + Send + 'static,
    {
        let path = self.catalog.clone();
        let allowed = self.allowed_dirs.clone();
        let slot = Arc::new(Mutex::new(InterruptSlot::default()));
        let worker_slot = slot.clone();
        let mut task = tokio::task::spawn_blocking(move || {
            let conn = open_read_only(&path, &allowed)?;
            {
                let mut slot = worker_slot.lock().unwrap_or_else(PoisonError::into_inner);
                if slot.cancelled {
                    return Err(BackendError::BackendUnavailable(
                        "query was cancelled before it started".to_string(),
                    ));
                }
                slot.handle = Some(conn.interrupt_handle());
            }
            work(&conn)
        });

        let result = match tokio::time::timeout(self.timeout, &mut task).await {
            Err(_) => {
                tracing::warn!(
                    backend = %self.label,
                    timeout_secs = self.timeout.as_secs(),
                    "Interrupting query past its timeout"
                );
                loop {
                    slot.lock().unwrap_or_else(PoisonError::into_inner).cancel();
                    if tokio::time::timeout(INTERRUPT_INTERVAL, &mut task).await.is_ok() {
                        break;
                    }
                }
                Err(BackendError::BackendUnavailable(format!(
                    "query did not finish within {}s",
                    self.timeout.as_secs()
                )))
            }
            Ok(Err(join)) if join.is_panic() => Err(BackendError::ExecutionError(
                "query worker panicked".to_string(),
            )),
            Ok(Err(_)) => Err(BackendError::ExecutionError(
                "query worker was cancelled".to_string(),
            )),
            Ok(Ok(result)) => result,
        };
        result.map_err(|e| e.redacted(&self.redactor))
    }
}

/// Shared between a query worker and the task waiting on it.
#[derive(Default)]
struct InterruptSlot {
    cancelled: bool,
    handle: Option<Arc<InterruptHandle>>,
}

impl InterruptSlot {
    fn cancel(&mut self) {
        self.cancelled = true;
        if let Some(handle) = &self.handle {
            handle.interrupt();
        }
    }
}

impl SqlTarget for DuckDbBackend {
    fn flavor(&self) -> SqlFlavor {
        SqlFlavor::DuckDb
    }

    /// Catalog views are named `<module>_<table>`.
    fn table_ref(&self, module: &str, table: &str) -> String {
        format!("{}_{}", module.to_lowercase(), table.to_lowercase())
    }
}

#[async_trait]
impl Backend for DuckDbBackend {
    fn label(&self) -> &str {
        &self.label
    }

    async fn describe_schema(&self) -> Result<Vec<String>, BackendError> {
        let result = self
            .with_connection(|conn| {
                execute(
                    conn,
                    "SELECT table_name FROM information_schema.tables \
                     WHERE table_schema = 'main' ORDER BY table_name",
                    &[],
                    usize::MAX,
                )
            })
            .await?;
        Ok(result.first_column_strings())
    }

    async fn describe_table(
        &self,
        table: &str,
        sample_rows: usize,
    ) -> Result<TableDescription, BackendError> {
        let requested = table.trim().to_string();
        let sample_rows = sample_rows.min(self.max_rows);

        self.with_connection(move |conn| {
            let params = vec![("table".to_string(), QueryParam::Text(requested.clone()))];
            let columns = execute(
                conn,
                "SELECT table_name, column_name, data_type FROM information_schema.columns \
                 WHERE table_schema = 'main' AND lower(table_name) = lower(?) \
                 ORDER BY ordinal_position",
                &params,
                usize::MAX,
            )?;

            let Some(first) = columns.rows.first() else {
                return Err(BackendError::NotFound(format!("table '{requested}' does not exist")));
            };
            let name = first
                .get("table_name")
                .and_then(Json::as_str)
                .unwrap_or(requested.as_str())
                .to_string();

            let columns = columns
                .rows
                .iter()
                .map(|row| ColumnInfo {
                    name: text_field(row, "column_name"),
                    data_type: text_field(row, "data_type"),
                })
                .collect();

            let sample = if sample_rows > 0 {
                let sql = format!("SELECT * FROM {} LIMIT {sample_rows}", quote_identifier(&name));
                Some(execute(conn, &sql, &[], sample_rows)?)
            } else {
                None
            };

            Ok(TableDescription {
                name,
                columns,
                sample,
            })
        })
        .await
    }

    async fn run_query(&self, query: &ValidatedQuery) -> Result<QueryResult, BackendError> {
        let sql = query.sql().to_string();
        let params = query.params().to_vec();
        let max_rows = self.max_rows;

        tracing::debug!(backend = %self.label, params = params.len(), "Running query");
        self.with_connection(move |conn| execute(conn, &sql, &params, max_rows))
            .await
    }
}

fn open_read_only(path: &Path, allowed_dirs: &[PathBuf]) -> Result<Connection, BackendError> {
    if !path.is_file() {
        return Err(BackendError::NotFound(format!(
            "catalog {} does not exist; run `m3 init` first",
            path.display()
        )));
    }
    let config = Config::default()
        .access_mode(AccessMode::ReadOnly)
        .map_err(map_duckdb_error)?;
    let conn = Connection::open_with_flags(path, config).map_err(|e| {
        BackendError::BackendUnavailable(format!("cannot open catalog {}: {e}", path.display()))
    })?;

    // Order matters: the allow list is frozen once external access is off.
    let allowed = allowed_dirs
        .iter()
        .map(|dir| {
            let mut dir = dir.to_string_lossy().into_owned();
            if !dir.ends_with(std::path::MAIN_SEPARATOR) {
                dir.push(std::path::MAIN_SEPARATOR);
            }
            string_literal(&dir)
        })
        .collect::<Vec<_>>()
        .join(", ");
    conn.execute_batch(&format!(
        "SET allowed_directories = [{allowed}]; SET enable_external_access = false;"
    ))
    .map_err(|e| BackendError::BackendUnavailable(format!("cannot restrict catalog access: {e}")))?;
    Ok(conn)
}

/// Prepare, bind positionally and materialize at most `max_rows` rows.
pub(crate) fn execute(
    conn: &Connection,
    sql: &str,
    params: &[(String, QueryParam)],
    max_rows: usize,
) -> Result<QueryResult, BackendError> {
    let mut stmt = conn.prepare(sql).map_err(map_duckdb_error)?;
    let values: Vec<Box<dyn ToSql>> = params
        .iter()
        .map(|(_, param)| -> Box<dyn ToSql> {
            match param {
                QueryParam::Int(v) => Box::new(*v),
                QueryParam::Text(v) => Box::new(v.clone()),
            }
        })
        .collect();

    let mut rows = stmt
        .query(params_from_iter(values.iter()))
        .map_err(map_duckdb_error)?;

    let (names, columns) = match rows.as_ref() {
        Some(stmt) => {
            let names = unique_column_names(stmt.column_names());
            let columns = names
                .iter()
                .enumerate()
                .map(|(i, name)| ColumnInfo {
                    name: name.clone(),
                    data_type: stmt.column_type(i).to_string(),
                })
                .collect::<Vec<_>>();
            (names, columns)
        }
        None => (Vec::new(), Vec::new()),
    };

    let mut out = Vec::new();
    let mut truncated = false;
    while let Some(row) = rows.next().map_err(map_duckdb_error)? {
        if out.len() >= max_rows {
            truncated = true;
            break;
        }
        let mut map = Row::new();
        for (i, name) in names.iter().enumerate() {
            let value: Value = row.get(i).map_err(map_duckdb_error)?;
            map.insert(name.clone(), value_to_json(value));
        }
        out.push(map);
    }

    Ok(QueryResult {
        columns,
        row_count: out.len(),
        rows: out,
        truncated,
    })
}

/// Classify a DuckDB failure by its error class prefix.
pub(crate) fn map_duckdb_error(err: duckdb::Error) -> BackendError {
    classify_message(err.to_string())
}

fn classify_message(message: String) -> BackendError {
    if message.contains("Catalog Error") && message.contains("does not exist") {
        BackendError::NotFound(message)
    } else if message.contains("Parser Error")
        || message.contains("Binder Error")
        || message.contains("Catalog Error")
    {
        BackendError::InvalidQuery(message)
    } else if message.contains("IO Error") || message.contains("INTERRUPT") {
        BackendError::BackendUnavailable(message)
    } else {
        BackendError::ExecutionError(message)
    }
}

/// Convert a DuckDB value to the JSON scalar agents see.
pub(crate) fn value_to_json(value: Value) -> Json {
    match value {
        Value::Null => Json::Null,
        Value::Boolean(v) => Json::Bool(v),
        Value::TinyInt(v) => Json::from(v),
        Value::SmallInt(v) => Json::from(v),
        Value::Int(v) => Json::from(v),
        Value::BigInt(v) => Json::from(v),
        Value::UTinyInt(v) => Json::from(v),
        Value::USmallInt(v) => Json::from(v),
        Value::UInt(v) => Json::from(v),
        Value::UBigInt(v) => Json::from(v),
        Value::HugeInt(v) => i64::try_from(v)
            .map(Json::from)
            .unwrap_or_else(|_| Json::String(v.to_string())),
        Value::Float(v) => float_json(f64::from(v)),
        Value::Double(v) => float_json(v),
        Value::Decimal(v) => {
            let text = v.to_string();
            text.parse::<f64>()
                .map(float_json)
                .unwrap_or(Json::String(text))
        }
        Value::Text(v) | Value::Enum(v) => Json::String(v),
        Value::Timestamp(unit, v) => timestamp_json(unit, v),
        Value::Date32(days) => NaiveDate::from_num_days_from_ce_opt(days + 719_163)
            .map(|d| Json::String(d.to_string()))
            .unwrap_or(Json::Null),
        Value::Blob(bytes) => Json::String(format!("<{} bytes>", bytes.len())),
        Value::List(items) => Json::Array(items.into_iter().map(value_to_json).collect()),
        other => Json::String(format!("{other:?}")),
    }
}

fn float_json(v: f64) -> Json {
    serde_json::Number::from_f64(v)
        .map(Json::Number)
        .unwrap_or(Json::Null)
}

fn timestamp_json(unit: TimeUnit, value: i64) -> Json {
    let micros = match unit {
        TimeUnit::Second => value.saturating_mul(1_000_000),
        TimeUnit::Millisecond => value.saturating_mul(1_000),
        TimeUnit::Microsecond => value,
        TimeUnit::Nanosecond => value / 1_000,
    };
    DateTime::from_timestamp_micros(micros)
        .map(|ts| Json::String(ts.to_rfc3339()))
        .unwrap_or(Json::Null)
}

fn text_field(row: &Row, key: &str) -> String {
    row.get(key)
        .and_then(Json::as_str)
        .unwrap_or_default()
        .to_string()
}

fn string_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use m3_sql::{SqlTemplate, SqlValidator};
    use pretty_assertions::assert_eq;

    fn fixture() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.duckdb");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE hosp_admissions AS SELECT * FROM (VALUES \
               (20001, 10006, 'WHITE'), (20002, 10006, 'WHITE'), (20003, 10011, 'ASIAN') \
             ) t(hadm_id, subject_id, race);",
        )
        .unwrap();
        drop(conn);
        (dir, path)
    }

    #[tokio::test]
    async fn test_schema_and_describe() {
        let (_dir, path) = fixture();
        let backend = DuckDbBackend::new(&path);

        assert_eq!(backend.describe_schema().await.unwrap(), vec!["hosp_admissions"]);

        let table = backend.describe_table("HOSP_ADMISSIONS", 2).await.unwrap();
        assert_eq!(table.name, "hosp_admissions");
        assert_eq!(
            table.columns.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
            vec!["hadm_id", "subject_id", "race"]
        );
        assert_eq!(table.sample.unwrap().row_count, 2);
    }

    #[tokio::test]
    async fn test_missing_table_is_not_found() {
        let (_dir, path) = fixture();
        let backend = DuckDbBackend::new(&path);
        let err = backend.describe_table("nope", 5).await.unwrap_err();
        assert!(matches!(err, BackendError::NotFound(_)));

        let query = SqlValidator::new(SqlFlavor::DuckDb)
            .validate("SELECT * FROM nope")
            .unwrap();
        let err = backend.run_query(&query).await.unwrap_err();
        assert!(matches!(err, BackendError::NotFound(_)), "{err:?}");
    }

    #[tokio::test]
    async fn test_bound_parameters_and_truncation() {
        let (_dir, path) = fixture();
        let backend = DuckDbBackend::new(&path).with_max_rows(1);
        let query = SqlTemplate::new("SELECT hadm_id FROM {hosp.admissions} WHERE subject_id = {@id}")
            .bind("id", 10006i64)
            .render(&backend)
            .unwrap();

        let result = backend.run_query(&query).await.unwrap();
        assert_eq!(result.row_count, 1);
        assert!(result.truncated);
        assert_eq!(result.rows[0]["hadm_id"], Json::from(20001));
    }

    #[tokio::test]
    async fn test_read_only_connection_refuses_writes() {
        let (_dir, path) = fixture();
        let backend = DuckDbBackend::new(&path);
        // Bypass the validator to prove the connection itself is read-only.
        let result = backend
            .with_connection(|conn| execute(conn, "CREATE TABLE x (a INT)", &[], 10))
            .await;
        assert!(result.is_err());
    }

    /// `<dir>/databases/catalog.duckdb` with a view over `<dir>/parquet/admissions.parquet`.
    fn parquet_fixture() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let parquet = dir.path().join("parquet").join("admissions.parquet");
        std::fs::create_dir_all(parquet.parent().unwrap()).unwrap();
        std::fs::create_dir_all(dir.path().join("databases")).unwrap();
        std::fs::write(dir.path().join("secret.csv"), "token\nhunter2\n").unwrap();

        let scratch = Connection::open_in_memory().unwrap();
        scratch
            .execute_batch(&format!(
                "COPY (SELECT range AS hadm_id FROM range(5)) TO {} (FORMAT PARQUET)",
                string_literal(&parquet.to_string_lossy())
            ))
            .unwrap();

        let path = dir.path().join("databases").join("catalog.duckdb");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(&format!(
            "CREATE VIEW hosp_admissions AS SELECT * FROM read_parquet({})",
            string_literal(&parquet.to_string_lossy())
        ))
        .unwrap();
        drop(conn);
        (dir, path)
    }

    #[tokio::test]
    async fn test_views_read_inside_allowed_directory() {
        let (_dir, path) = parquet_fixture();
        let backend = DuckDbBackend::new(&path);
        let query = SqlValidator::new(SqlFlavor::DuckDb)
            .validate("SELECT COUNT(*) AS n FROM hosp_admissions")
            .unwrap();
        let result = backend.run_query(&query).await.unwrap();
        assert_eq!(result.rows[0]["n"], Json::from(5));
    }

    #[tokio::test]
    async fn test_engine_refuses_files_outside_allowed_directory() {
        let (dir, path) = parquet_fixture();
        let backend = DuckDbBackend::new(&path);
        let secret = dir.path().join("secret.csv");

        // Bypass the validator to prove the connection itself is sandboxed.
        for sql in [
            format!("SELECT * FROM read_csv({})", string_literal(&secret.to_string_lossy())),
            format!("SELECT * FROM sniff_csv({})", string_literal(&secret.to_string_lossy())),
            format!("SELECT * FROM read_text({})", string_literal(&secret.to_string_lossy())),
        ] {
            let result = backend
                .with_connection(move |conn| execute(conn, &sql, &[], 10))
                .await;
            assert!(result.is_err(), "{result:?}");
        }

        let result = backend
            .with_connection(|conn| execute(conn, "SET enable_external_access = true", &[], 10))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_timeout_interrupts_running_query() {
        let (_dir, path) = fixture();
        let backend = DuckDbBackend::new(&path).with_timeout(Duration::from_millis(200));

        let started = std::time::Instant::now();
        let result = backend
            .with_connection(|conn| {
                execute(
                    conn,
                    "SELECT count(*) FROM range(10000000000) a, range(10) b",
                    &[],
                    10,
                )
            })
            .await;
        assert!(matches!(result, Err(BackendError::BackendUnavailable(_))), "{result:?}");
        assert!(started.elapsed() < Duration::from_secs(10), "{:?}", started.elapsed());

        // The interrupted worker released its connection; the catalog is usable.
        let backend = backend.with_timeout(Duration::from_secs(30));
        assert_eq!(backend.describe_schema().await.unwrap(), vec!["hosp_admissions"]);
    }

    #[tokio::test]
    async fn test_missing_catalog() {
        let backend = DuckDbBackend::new("/definitely/not/here.duckdb");
        let err = backend.describe_schema().await.unwrap_err();
        assert!(matches!(err, BackendError::NotFound(_)));
    }

    #[test]
    fn test_classify_messages() {
        assert!(matches!(
            classify_message("Parser Error: syntax error at or near \"FRM\"".into()),
            BackendError::InvalidQuery(_)
        ));
        assert!(matches!(
            classify_message("Catalog Error: Table with name foo does not exist!".into()),
            BackendError::NotFound(_)
        ));
        assert!(matches!(
            classify_message("IO Error: No files found".into()),
            BackendError::BackendUnavailable(_)
        ));
        assert!(matches!(
            classify_message("Conversion Error: Could not convert".into()),
            BackendError::ExecutionError(_)
        ));
    }
}
