//! The query gateway: one method per tool.
//!
//! Typed operations (`execute_query`, `get_icu_stays`, ...) return
//! `Result<ToolOutput, GatewayError>` and can be called directly. [`QueryGateway::call`]
//! is the boundary used by the MCP server: it dispatches by tool name, never
//! panics, audits the call and always produces a [`ToolResponse`].

use crate::error::GatewayError;
use crate::params::{
    IcuStaysArgs, LabResultsArgs, NoArgs, QueryArgs, RaceDistributionArgs, TableInfoArgs,
    check_limit, check_patient_id, parse_args, sanitize_lab_item,
};
use crate::templates;
use crate::tools::Tool;
use futures::FutureExt;
use m3_audit::{AuditEvent, AuditEventType, AuditLogger};
use m3_backend::{Backend, ColumnInfo, QueryResult, Row, TableDescription};
use m3_catalog::CatalogLocks;
use m3_core::{ErrorKind, GatewayConfig};
use m3_sql::{SqlTemplate, SqlValidator, ValidatedQuery};
use serde::Serialize;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::OwnedRwLockReadGuard;
use tracing::Instrument;
use uuid::Uuid;

/// Rows returned to the agent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolOutput {
    /// Backend label, e.g. `duckdb (mimic-iv-demo)`.
    pub backend: String,

    /// Set by `get_table_info`: the table as the backend resolved it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,

    #[serde(flatten)]
    pub result: QueryResult,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample: Option<QueryResult>,

    /// SQL that produced the rows. Audited, never sent to the agent.
    #[serde(skip)]
    pub sql: Option<String>,
}

impl ToolOutput {
    fn rows(backend: &str, result: QueryResult, sql: &str) -> Self {
        Self {
            backend: backend.to_string(),
            table: None,
            result,
            sample: None,
            sql: Some(sql.to_string()),
        }
    }

    fn tables(backend: &str, tables: Vec<String>) -> Self {
        let rows = tables
            .into_iter()
            .map(|name| single_field_row("table_name", Value::String(name)))
            .collect();
        Self {
            backend: backend.to_string(),
            table: None,
            result: text_result(&["table_name"], rows),
            sample: None,
            sql: None,
        }
    }

    fn table(backend: &str, description: TableDescription) -> Self {
        let rows = description
            .columns
            .into_iter()
            .map(|column| {
                let mut row = single_field_row("column_name", Value::String(column.name));
                row.insert("data_type".to_string(), Value::String(column.data_type));
                row
            })
            .collect();
        Self {
            backend: backend.to_string(),
            table: Some(description.name),
            result: text_result(&["column_name", "data_type"], rows),
            sample: description.sample,
            sql: None,
        }
    }

    pub fn row_count(&self) -> usize {
        self.result.row_count
    }
}

fn single_field_row(name: &str, value: Value) -> Row {
    let mut row = Row::new();
    row.insert(name.to_string(), value);
    row
}

fn text_result(columns: &[&str], rows: Vec<Row>) -> QueryResult {
    QueryResult {
        columns: columns
            .iter()
            .map(|name| ColumnInfo {
                name: name.to_string(),
                data_type: "VARCHAR".to_string(),
            })
            .collect(),
        row_count: rows.len(),
        rows,
        truncated: false,
    }
}

/// Structured error returned to the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolFailure {
    pub kind: ErrorKind,
    pub message: String,
}

/// What a tool call returns across the MCP boundary.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ToolResponse {
    Success(ToolOutput),
    Error { error: ToolFailure },
}

impl ToolResponse {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Success(_) => None,
            Self::Error { error } => Some(error.kind),
        }
    }

    pub fn output(&self) -> Option<&ToolOutput> {
        match self {
            Self::Success(output) => Some(output),
            Self::Error { .. } => None,
        }
    }

    /// JSON text carried in the MCP `content` block.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|e| {
            serde_json::json!({
                "error": {
                    "kind": ErrorKind::ExecutionError,
                    "message": format!("cannot encode response: {e}"),
                }
            })
            .to_string()
        })
    }
}

impl From<Result<ToolOutput, GatewayError>> for ToolResponse {
    fn from(result: Result<ToolOutput, GatewayError>) -> Self {
        match result {
            Ok(output) => Self::Success(output),
            Err(e) => Self::Error {
                error: ToolFailure {
                    kind: e.kind(),
                    message: e.message(),
                },
            },
        }
    }
}

/// Validates, dispatches and shapes every tool call.
pub struct QueryGateway {
    backend: Arc<dyn Backend>,
    validator: SqlValidator,
    limits: GatewayConfig,
    audit: AuditLogger,
    locks: Option<(CatalogLocks, String)>,
}

impl QueryGateway {
    /// Gateway over `backend`; the validator follows the backend's dialect.
    pub fn new(backend: Arc<dyn Backend>, limits: GatewayConfig) -> Self {
        Self {
            validator: SqlValidator::new(backend.flavor()),
            backend,
            limits,
            audit: AuditLogger::disabled(),
            locks: None,
        }
    }

    pub fn with_audit(mut self, audit: AuditLogger) -> Self {
        self.audit = audit;
        self
    }

    /// Hold a read guard on `dataset` for each backend round trip.
    pub fn with_locks(mut self, locks: CatalogLocks, dataset: impl Into<String>) -> Self {
        self.locks = Some((locks, dataset.into()));
        self
    }

    pub fn backend_label(&self) -> &str {
        self.backend.label()
    }

    pub fn limits(&self) -> &GatewayConfig {
        &self.limits
    }

    pub fn audit(&self) -> &AuditLogger {
        &self.audit
    }

    async fn read_guard(&self) -> Option<OwnedRwLockReadGuard<()>> {
        match &self.locks {
            Some((locks, dataset)) => Some(locks.read(dataset).await),
            None => None,
        }
    }

    // ===== Operations =====

    pub async fn get_database_schema(&self) -> Result<ToolOutput, GatewayError> {
        let _read = self.read_guard().await;
        let tables = self.backend.describe_schema().await?;
        Ok(ToolOutput::tables(self.backend.label(), tables))
    }

    pub async fn get_table_info(
        &self,
        table_name: &str,
        show_sample: bool,
    ) -> Result<ToolOutput, GatewayError> {
        let table_name = table_name.trim();
        if table_name.is_empty() {
            return Err(GatewayError::invalid("table_name must not be empty"));
        }
        let sample_rows = if show_sample { self.limits.sample_rows } else { 0 };

        let _read = self.read_guard().await;
        let description = self.backend.describe_table(table_name, sample_rows).await?;
        Ok(ToolOutput::table(self.backend.label(), description))
    }

    pub async fn execute_query(&self, sql: &str) -> Result<ToolOutput, GatewayError> {
        let query = self.validator.validate(sql)?;
        self.run(&query).await
    }

    pub async fn get_icu_stays(
        &self,
        patient_id: Option<i64>,
        limit: i64,
    ) -> Result<ToolOutput, GatewayError> {
        let patient_id = check_patient_id(patient_id, self.limits.max_patient_id)?;
        let limit = check_limit(limit, self.limits.max_limit)?;
        self.run_template(templates::icu_stays(patient_id, limit))
            .await
    }

    pub async fn get_lab_results(
        &self,
        patient_id: Option<i64>,
        lab_item: Option<&str>,
        limit: i64,
    ) -> Result<ToolOutput, GatewayError> {
        let patient_id = check_patient_id(patient_id, self.limits.max_patient_id)?;
        let limit = check_limit(limit, self.limits.max_limit)?;
        let lab_item = sanitize_lab_item(lab_item);
        self.run_template(templates::lab_results(patient_id, lab_item.as_deref(), limit))
            .await
    }

    pub async fn get_race_distribution(&self, limit: i64) -> Result<ToolOutput, GatewayError> {
        let limit = check_limit(limit, self.limits.max_limit)?;
        self.run_template(templates::race_distribution(limit)).await
    }

    async fn run_template(&self, template: SqlTemplate) -> Result<ToolOutput, GatewayError> {
        let query = template.render(self.backend.as_ref())?;
        self.run(&query).await
    }

    async fn run(&self, query: &ValidatedQuery) -> Result<ToolOutput, GatewayError> {
        let _read = self.read_guard().await;
        let result = self.backend.run_query(query).await?;
        Ok(ToolOutput::rows(self.backend.label(), result, query.sql()))
    }

    // ===== MCP boundary =====

    /// Run tool `name` for `subject`. Never fails and never panics.
    pub async fn call(&self, name: &str, arguments: Value, subject: &str) -> ToolResponse {
        let correlation_id = Uuid::new_v4().to_string();
        let span = tracing::info_span!(
            "tool_call",
            tool = %name,
            subject = %subject,
            correlation_id = %correlation_id,
        );
        self.call_audited(name, arguments, subject, &correlation_id)
            .instrument(span)
            .await
    }

    async fn call_audited(
        &self,
        name: &str,
        arguments: Value,
        subject: &str,
        correlation_id: &str,
    ) -> ToolResponse {
        self.audit
            .record(
                AuditEvent::builder(AuditEventType::ToolCalled, subject, name)
                    .arguments(arguments.clone())
                    .correlation_id(correlation_id)
                    .build(),
            )
            .await;

        let submitted_sql = sql_argument(&arguments);
        let started = Instant::now();
        let result = match AssertUnwindSafe(self.dispatch(name, arguments))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(_) => {
                tracing::error!("Tool body panicked");
                Err(GatewayError::Panicked {
                    tool: name.to_string(),
                })
            }
        };
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let event = match &result {
            Ok(output) => {
                tracing::info!(rows = output.row_count(), duration_ms, "Tool call succeeded");
                let mut builder = AuditEvent::builder(AuditEventType::QueryExecuted, subject, name)
                    .backend(self.backend.label())
                    .row_count(output.row_count() as u64)
                    .duration_ms(duration_ms);
                if let Some(sql) = &output.sql {
                    builder = builder.sql(sql);
                }
                builder
            }
            Err(e) => {
                let event_type = if is_rejection(e) {
                    tracing::warn!(kind = %e.kind(), error = %e, "Tool call rejected");
                    AuditEventType::QueryRejected
                } else {
                    tracing::warn!(kind = %e.kind(), error = %e, duration_ms, "Tool call failed");
                    AuditEventType::QueryFailed
                };
                let mut builder = AuditEvent::builder(event_type, subject, name)
                    .backend(self.backend.label())
                    .duration_ms(duration_ms)
                    .error(e.kind(), e.message());
                if let Some(sql) = &submitted_sql {
                    builder = builder.sql(sql);
                }
                builder
            }
        };
        self.audit
            .record(event.correlation_id(correlation_id).build())
            .await;

        result.into()
    }

    async fn dispatch(&self, name: &str, arguments: Value) -> Result<ToolOutput, GatewayError> {
        let tool =
            Tool::from_name(name).ok_or_else(|| GatewayError::UnknownTool(name.to_string()))?;

        match tool {
            Tool::GetDatabaseSchema => {
                let NoArgs {} = parse_args(tool, arguments)?;
                self.get_database_schema().await
            }
            Tool::GetTableInfo => {
                let args: TableInfoArgs = parse_args(tool, arguments)?;
                self.get_table_info(&args.table_name, args.show_sample)
                    .await
            }
            Tool::ExecuteQuery => {
                let args: QueryArgs = parse_args(tool, arguments)?;
                self.execute_query(&args.sql).await
            }
            Tool::GetIcuStays => {
                let args: IcuStaysArgs = parse_args(tool, arguments)?;
                self.get_icu_stays(args.patient_id, args.limit).await
            }
            Tool::GetLabResults => {
                let args: LabResultsArgs = parse_args(tool, arguments)?;
                self.get_lab_results(args.patient_id, args.lab_item.as_deref(), args.limit)
                    .await
            }
            Tool::GetRaceDistribution => {
                let args: RaceDistributionArgs = parse_args(tool, arguments)?;
                self.get_race_distribution(args.limit).await
            }
        }
    }
}

/// Refused before any backend round trip.
fn is_rejection(error: &GatewayError) -> bool {
    matches!(
        error,
        GatewayError::Rejected(_) | GatewayError::InvalidArgument(_) | GatewayError::UnknownTool(_)
    )
}

/// Agent supplied SQL, for the audit trail of failed `execute_query` calls.
fn sql_argument(arguments: &Value) -> Option<String> {
    ["sql", "sql_query"]
        .iter()
        .find_map(|key| arguments.get(*key))
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use m3_audit::{AuditFilter, MemoryStorage};
    use m3_backend::BackendError;
    use m3_core::AuditConfig;
    use m3_sql::{SqlFlavor, SqlTarget};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Mutex;

    /// Records the SQL it receives; panics on a marker query.
    #[derive(Default)]
    struct Recording {
        seen: Mutex<Vec<ValidatedQuery>>,
    }

    impl SqlTarget for Recording {
        fn flavor(&self) -> SqlFlavor {
            SqlFlavor::DuckDb
        }

        fn table_ref(&self, module: &str, table: &str) -> String {
            format!("{module}_{table}")
        }
    }

    #[async_trait]
    impl Backend for Recording {
        fn label(&self) -> &str {
            "recording"
        }

        async fn describe_schema(&self) -> Result<Vec<String>, BackendError> {
            Ok(vec!["hosp_admissions".into(), "icu_icustays".into()])
        }

        async fn describe_table(
            &self,
            table: &str,
            _sample_rows: usize,
        ) -> Result<TableDescription, BackendError> {
            Err(BackendError::NotFound(format!("table '{table}' does not exist")))
        }

        async fn run_query(&self, query: &ValidatedQuery) -> Result<QueryResult, BackendError> {
            if query.sql().contains("boom") {
                panic!("driver exploded");
            }
            self.seen.lock().unwrap().push(query.clone());
            Ok(QueryResult::default())
        }
    }

    fn gateway() -> (QueryGateway, Arc<Recording>, Arc<MemoryStorage>) {
        let backend = Arc::new(Recording::default());
        let storage = Arc::new(MemoryStorage::new());
        let gateway = QueryGateway::new(backend.clone(), GatewayConfig::default())
            .with_audit(AuditLogger::with_storage(AuditConfig::default(), storage.clone()));
        (gateway, backend, storage)
    }

    #[tokio::test]
    async fn test_rejected_sql_never_reaches_backend() {
        let (gateway, backend, _) = gateway();
        let response = gateway
            .call("execute_query", json!({"sql": "DROP TABLE hosp_admissions"}), "local")
            .await;
        assert_eq!(response.error_kind(), Some(ErrorKind::UnsafeQuery));
        assert!(backend.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_panic_becomes_execution_error() {
        let (gateway, _, _) = gateway();
        let response = gateway
            .call("execute_query", json!({"sql": "SELECT 'boom' AS x"}), "local")
            .await;
        let ToolResponse::Error { error } = response else {
            panic!("expected an error response");
        };
        assert_eq!(error.kind, ErrorKind::ExecutionError);
        assert_eq!(error.message, "internal error while running execute_query");
    }

    #[tokio::test]
    async fn test_unknown_tool_is_not_found() {
        let (gateway, _, _) = gateway();
        let response = gateway.call("drop_database", json!({}), "local").await;
        assert_eq!(response.error_kind(), Some(ErrorKind::NotFound));
    }

    #[tokio::test]
    async fn test_invalid_limit_is_invalid_query() {
        let (gateway, backend, _) = gateway();
        let response = gateway
            .call("get_race_distribution", json!({"limit": 0}), "local")
            .await;
        assert_eq!(response.error_kind(), Some(ErrorKind::InvalidQuery));
        assert!(backend.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_convenience_tool_binds_parameters() {
        let (gateway, backend, _) = gateway();
        let response = gateway
            .call(
                "get_lab_results",
                json!({"patient_id": 10006, "lab_item": "x' OR '1'='1"}),
                "local",
            )
            .await;
        assert!(!response.is_error());

        let seen = backend.seen.lock().unwrap();
        assert_eq!(
            seen[0].sql(),
            "SELECT * FROM hosp_labevents WHERE subject_id = ? AND value LIKE ? LIMIT ?"
        );
        assert!(!seen[0].sql().contains("OR"));
    }

    #[tokio::test]
    async fn test_call_is_audited_with_correlation() {
        let (gateway, _, storage) = gateway();
        gateway
            .call("execute_mimic_query", json!({"sql_query": "SELECT 1"}), "alice")
            .await;

        let events = storage.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, AuditEventType::ToolCalled);
        assert_eq!(events[1].event_type, AuditEventType::QueryExecuted);
        assert_eq!(events[1].sql.as_deref(), Some("SELECT 1"));
        assert_eq!(events[0].correlation_id, events[1].correlation_id);

        let rejected = gateway
            .audit()
            .query(AuditFilter {
                event_type: Some(AuditEventType::QueryRejected),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(rejected.is_empty());
    }

    #[tokio::test]
    async fn test_schema_is_returned_as_rows() {
        let (gateway, _, _) = gateway();
        let output = gateway.get_database_schema().await.unwrap();
        assert_eq!(output.result.column_names(), vec!["table_name"]);
        assert_eq!(output.row_count(), 2);
        assert_eq!(output.result.rows[1]["table_name"], "icu_icustays");
    }

    #[test]
    fn test_error_response_shape() {
        let response: ToolResponse =
            Err(GatewayError::invalid("Invalid limit. Must be a positive integer between 1 and 1000.")).into();
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({"error": {
                "kind": "invalid_query",
                "message": "Invalid limit. Must be a positive integer between 1 and 1000."
            }})
        );
    }
}
