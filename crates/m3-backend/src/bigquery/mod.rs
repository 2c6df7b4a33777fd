//! BigQuery backend over the REST API.
//!
//! Queries go through `jobs.query`, then `jobs.getQueryResults` is polled
//! until the job completes or the deadline passes. Schema calls are
//! idempotent and retried on transient failures; `run_query` is not.

mod auth;
pub mod wire;

pub use auth::{AmbientTokenProvider, StaticTokenProvider, TokenProvider};

use crate::Backend;
use crate::error::{BackendError, Redactor};
use crate::result::{ColumnInfo, QueryResult, Row, TableDescription, unique_column_names};
use async_trait::async_trait;
use chrono::DateTime;
use m3_sql::{QueryParam, SqlFlavor, SqlTarget, ValidatedQuery};
use reqwest::{Client, RequestBuilder};
use serde_json::Value as Json;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use wire::{ErrorEnvelope, FieldSchema, QueryRequest, QueryResponse, WireParameter, WireRow};

/// Rows per page requested from the API.
const PAGE_SIZE: usize = 10_000;

/// Upper bound on a single long-poll; the overall deadline still applies.
const POLL_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest query deadline honoured, whatever the configured timeout.
const MAX_DEADLINE: Duration = Duration::from_secs(24 * 60 * 60);

/// Longest sleep between retries.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

pub struct BigQueryBackend {
    client: Client,
    base_url: String,
    project: String,
    datasets: Vec<String>,
    location: Option<String>,
    tokens: Arc<dyn TokenProvider>,
    label: String,
    timeout: Duration,
    retries: u32,
    max_rows: usize,
    redactor: Redactor,
}

impl BigQueryBackend {
    pub fn new(
        project: impl Into<String>,
        datasets: Vec<String>,
        tokens: Arc<dyn TokenProvider>,
    ) -> Result<Self, BackendError> {
        let project = project.into();
        if !is_project_id(&project) {
            return Err(BackendError::InvalidQuery(format!(
                "invalid BigQuery project id '{project}'"
            )));
        }
        if datasets.is_empty() {
            return Err(BackendError::BackendUnavailable(
                "no BigQuery datasets configured".to_string(),
            ));
        }
        if let Some(bad) = datasets.iter().find(|d| !is_name_part(d)) {
            return Err(BackendError::InvalidQuery(format!(
                "invalid BigQuery dataset id '{bad}'"
            )));
        }

        let client = Client::builder()
            .user_agent(concat!("m3/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| BackendError::BackendUnavailable(format!("cannot build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: "https://bigquery.googleapis.com/bigquery/v2".to_string(),
            label: format!("bigquery ({project})"),
            project,
            datasets,
            location: None,
            tokens,
            timeout: Duration::from_secs(60),
            retries: 2,
            max_rows: 1000,
            redactor: Redactor::default(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_location(mut self, location: Option<String>) -> Self {
        self.location = location;
        self
    }

    pub fn with_dataset(mut self, dataset: &str) -> Self {
        self.label = format!("bigquery ({dataset})");
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
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

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn datasets(&self) -> &[String] {
        &self.datasets
    }

    /// Dataset id holding `module`, matched by `_<module>` suffix.
    fn dataset_for(&self, module: &str) -> String {
        let suffix = format!("_{}", module.to_lowercase());
        self.datasets
            .iter()
            .find(|d| d.to_lowercase().ends_with(&suffix))
            .cloned()
            .unwrap_or_else(|| module.to_string())
    }

    async fn query(
        &self,
        sql: &str,
        params: &[(String, QueryParam)],
        max_rows: usize,
    ) -> Result<QueryResult, BackendError> {
        let deadline = deadline_after(Instant::now(), self.timeout);
        let token = self.tokens.access_token().await?;

        let request = QueryRequest {
            query: sql.to_string(),
            use_legacy_sql: false,
            parameter_mode: (!params.is_empty()).then_some("NAMED"),
            query_parameters: params
                .iter()
                .map(|(name, value)| WireParameter::new(name, value))
                .collect(),
            timeout_ms: millis(POLL_TIMEOUT.min(self.timeout)),
            max_results: page_size(max_rows),
            location: self.location.clone(),
        };

        let url = format!("{}/projects/{}/queries", self.base_url, self.project);
        let mut response = self
            .send(self.client.post(&url).bearer_auth(&token).json(&request), deadline)
            .await?;

        while !response.job_complete {
            if Instant::now() >= deadline {
                return Err(self.deadline_error());
            }
            let page = self.results_page(&response, &token, None, max_rows, deadline).await?;
            response = page;
        }
        check_job_errors(&response)?;

        let fields = response
            .schema
            .as_ref()
            .map(|s| s.fields.clone())
            .unwrap_or_default();
        let total_rows = response
            .total_rows
            .as_deref()
            .and_then(|t| t.parse::<usize>().ok());
        let mut rows: Vec<WireRow> = std::mem::take(&mut response.rows);
        let mut page_token = response.page_token.take();

        while rows.len() <= max_rows {
            let Some(token_value) = page_token.take() else { break };
            if Instant::now() >= deadline {
                return Err(self.deadline_error());
            }
            let mut page = self
                .results_page(&response, &token, Some(token_value), max_rows, deadline)
                .await?;
            check_job_errors(&page)?;
            rows.append(&mut page.rows);
            page_token = page.page_token.take();
        }

        let truncated = rows.len() > max_rows || total_rows.is_some_and(|t| t > max_rows);
        rows.truncate(max_rows);
        Ok(normalize(&fields, rows, truncated))
    }

    async fn results_page(
        &self,
        previous: &QueryResponse,
        token: &str,
        page_token: Option<String>,
        max_rows: usize,
        deadline: Instant,
    ) -> Result<QueryResponse, BackendError> {
        let job = previous.job_reference.as_ref().ok_or_else(|| {
            BackendError::ExecutionError("BigQuery returned no job reference".to_string())
        })?;
        let url = format!(
            "{}/projects/{}/queries/{}",
            self.base_url, job.project_id, job.job_id
        );

        let mut query: Vec<(&str, String)> = vec![
            ("timeoutMs", millis(POLL_TIMEOUT.min(self.timeout)).to_string()),
            ("maxResults", page_size(max_rows).to_string()),
        ];
        if let Some(location) = job.location.as_ref().or(self.location.as_ref()) {
            query.push(("location", location.clone()));
        }
        if let Some(page_token) = page_token {
            query.push(("pageToken", page_token));
        }

        self.send(self.client.get(&url).bearer_auth(token).query(&query), deadline)
            .await
    }

    async fn send(
        &self,
        request: RequestBuilder,
        deadline: Instant,
    ) -> Result<QueryResponse, BackendError> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(self.deadline_error());
        }

        let response = request
            .timeout(remaining)
            .send()
            .await
            .map_err(map_transport_error)?;
        let status = response.status();

        if status.is_success() {
            response.json::<QueryResponse>().await.map_err(|e| {
                BackendError::ExecutionError(format!("unexpected BigQuery response: {e}"))
            })
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(map_api_error(status.as_u16(), &body))
        }
    }

    fn deadline_error(&self) -> BackendError {
        BackendError::BackendUnavailable(format!(
            "query did not finish within {}s",
            self.timeout.as_secs()
        ))
    }

    /// Retry an idempotent call on transient failures with exponential backoff.
    async fn retrying<T, F, Fut>(&self, what: &str, op: F) -> Result<T, BackendError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Err(e) if e.is_transient() && attempt < self.retries => {
                    attempt += 1;
                    let delay = backoff(attempt);
                    tracing::warn!(
                        operation = what,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying BigQuery call"
                    );
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }

    async fn columns_of(
        &self,
        project: &str,
        dataset: &str,
        table: &str,
    ) -> Result<QueryResult, BackendError> {
        let sql = format!(
            "SELECT column_name, data_type FROM `{project}.{dataset}.INFORMATION_SCHEMA.COLUMNS` \
             WHERE table_name = @table ORDER BY ordinal_position"
        );
        let params = vec![("table".to_string(), QueryParam::Text(table.to_string()))];
        self.retrying("describe_table", || self.query(&sql, &params, PAGE_SIZE))
            .await
    }
}

impl SqlTarget for BigQueryBackend {
    fn flavor(&self) -> SqlFlavor {
        SqlFlavor::BigQuery
    }

    fn table_ref(&self, module: &str, table: &str) -> String {
        format!("`{}.{}.{}`", self.project, self.dataset_for(module), table)
    }
}

#[async_trait]
impl Backend for BigQueryBackend {
    fn label(&self) -> &str {
        &self.label
    }

    async fn describe_schema(&self) -> Result<Vec<String>, BackendError> {
        let mut tables = Vec::new();
        for dataset in &self.datasets {
            let sql = format!(
                "SELECT table_name FROM `{}.{}.INFORMATION_SCHEMA.TABLES` ORDER BY table_name",
                self.project, dataset
            );
            let result = self
                .retrying("describe_schema", || self.query(&sql, &[], PAGE_SIZE))
                .await
                .map_err(|e| e.redacted(&self.redactor))?;
            tables.extend(
                result
                    .first_column_strings()
                    .into_iter()
                    .map(|t| format!("{}.{}.{}", self.project, dataset, t)),
            );
        }
        Ok(tables)
    }

    async fn describe_table(
        &self,
        table: &str,
        sample_rows: usize,
    ) -> Result<TableDescription, BackendError> {
        let parts: Vec<&str> = table.trim().trim_matches('`').split('.').collect();
        let candidates: Vec<(String, String, String)> = match parts.as_slice() {
            [t] if is_name_part(t) => self
                .datasets
                .iter()
                .map(|d| (self.project.clone(), d.clone(), t.to_string()))
                .collect(),
            [d, t] if is_name_part(d) && is_name_part(t) => {
                vec![(self.project.clone(), d.to_string(), t.to_string())]
            }
            [p, d, t] if is_project_id(p) && is_name_part(d) && is_name_part(t) => {
                vec![(p.to_string(), d.to_string(), t.to_string())]
            }
            _ => return Err(BackendError::InvalidQuery(format!("invalid table name '{table}'"))),
        };

        for (project, dataset, name) in candidates {
            let columns = self
                .columns_of(&project, &dataset, &name)
                .await
                .map_err(|e| e.redacted(&self.redactor))?;
            if columns.is_empty() {
                continue;
            }

            let columns = columns
                .rows
                .iter()
                .map(|row| ColumnInfo {
                    name: text_field(row, "column_name"),
                    data_type: text_field(row, "data_type"),
                })
                .collect();

            let sample_rows = sample_rows.min(self.max_rows);
            let sample = if sample_rows > 0 {
                let sql = format!("SELECT * FROM `{project}.{dataset}.{name}` LIMIT {sample_rows}");
                Some(
                    self.retrying("sample", || self.query(&sql, &[], sample_rows))
                        .await
                        .map_err(|e| e.redacted(&self.redactor))?,
                )
            } else {
                None
            };

            return Ok(TableDescription {
                name: format!("{project}.{dataset}.{name}"),
                columns,
                sample,
            });
        }

        Err(BackendError::NotFound(format!("table '{table}' does not exist")))
    }

    async fn run_query(&self, query: &ValidatedQuery) -> Result<QueryResult, BackendError> {
        tracing::debug!(backend = %self.label, params = query.params().len(), "Running query");
        self.query(query.sql(), query.params(), self.max_rows)
            .await
            .map_err(|e| e.redacted(&self.redactor))
    }
}

fn deadline_after(now: Instant, timeout: Duration) -> Instant {
    now.checked_add(timeout.min(MAX_DEADLINE)).unwrap_or(now)
}

/// Delay before retry number `attempt` (1-based): 400ms, 800ms, ... capped.
fn backoff(attempt: u32) -> Duration {
    let factor = 2u64.checked_pow(attempt).unwrap_or(u64::MAX);
    Duration::from_millis(200u64.saturating_mul(factor)).min(MAX_BACKOFF)
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn page_size(max_rows: usize) -> u64 {
    max_rows.saturating_add(1).min(PAGE_SIZE) as u64
}

fn is_name_part(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Project ids may carry a domain prefix, e.g. `example.com:project`.
fn is_project_id(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
}

fn text_field(row: &Row, key: &str) -> String {
    row.get(key)
        .and_then(Json::as_str)
        .unwrap_or_default()
        .to_string()
}

fn check_job_errors(response: &QueryResponse) -> Result<(), BackendError> {
    match response.errors.first() {
        Some(err) if response.job_complete && response.rows.is_empty() => {
            Err(classify(&err.reason, 0, err.message.clone()))
        }
        _ => Ok(()),
    }
}

fn map_transport_error(err: reqwest::Error) -> BackendError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        BackendError::BackendUnavailable(format!("BigQuery is unreachable: {err}"))
    } else {
        BackendError::ExecutionError(format!("BigQuery request failed: {err}"))
    }
}

/// Map an HTTP error body into the shared taxonomy.
pub(crate) fn map_api_error(status: u16, body: &str) -> BackendError {
    let envelope: ErrorEnvelope = serde_json::from_str(body).unwrap_or_default();
    let reason = envelope
        .error
        .errors
        .first()
        .map(|e| e.reason.clone())
        .unwrap_or_default();
    let message = if envelope.error.message.is_empty() {
        format!("HTTP {status}")
    } else {
        envelope.error.message
    };
    classify(&reason, status, message)
}

fn classify(reason: &str, status: u16, message: String) -> BackendError {
    match (reason, status) {
        ("invalidQuery" | "invalid", _) => BackendError::InvalidQuery(message),
        ("notFound", _) => BackendError::NotFound(message),
        (
            "accessDenied" | "quotaExceeded" | "rateLimitExceeded" | "backendError"
            | "internalError" | "responseTooLarge",
            _,
        ) => BackendError::BackendUnavailable(message),
        (_, 400) => BackendError::InvalidQuery(message),
        (_, 404) => BackendError::NotFound(message),
        (_, 401 | 403 | 429 | 500..=599) => BackendError::BackendUnavailable(message),
        _ => BackendError::ExecutionError(message),
    }
}

fn normalize(fields: &[FieldSchema], rows: Vec<WireRow>, truncated: bool) -> QueryResult {
    let names = unique_column_names(fields.iter().map(|f| f.name.clone()).collect());
    let columns = names
        .iter()
        .zip(fields)
        .map(|(name, field)| ColumnInfo {
            name: name.clone(),
            data_type: field.display_type(),
        })
        .collect();

    let rows: Vec<Row> = rows
        .into_iter()
        .map(|row| {
            names
                .iter()
                .zip(fields)
                .zip(row.f)
                .map(|((name, field), cell)| (name.clone(), normalize_value(field, &cell.v)))
                .collect()
        })
        .collect();

    QueryResult {
        columns,
        row_count: rows.len(),
        rows,
        truncated,
    }
}

/// Convert a wire cell (strings for scalars) to a typed JSON value.
pub(crate) fn normalize_value(field: &FieldSchema, value: &Json) -> Json {
    if value.is_null() {
        return Json::Null;
    }
    if field.is_repeated() {
        let scalar = FieldSchema {
            mode: None,
            ..field.clone()
        };
        return match value.as_array() {
            Some(items) => Json::Array(
                items
                    .iter()
                    .map(|item| normalize_value(&scalar, item.get("v").unwrap_or(&Json::Null)))
                    .collect(),
            ),
            None => value.clone(),
        };
    }

    let text = value.as_str();
    match field.field_type.as_str() {
        "INTEGER" | "INT64" => text
            .and_then(|t| t.parse::<i64>().ok())
            .map(Json::from)
            .unwrap_or_else(|| value.clone()),
        "FLOAT" | "FLOAT64" | "NUMERIC" | "BIGNUMERIC" => text
            .and_then(|t| t.parse::<f64>().ok())
            .and_then(serde_json::Number::from_f64)
            .map(Json::Number)
            .unwrap_or_else(|| value.clone()),
        "BOOLEAN" | "BOOL" => match text {
            Some("true") => Json::Bool(true),
            Some("false") => Json::Bool(false),
            _ => value.clone(),
        },
        "TIMESTAMP" => text
            .and_then(|t| t.parse::<f64>().ok())
            .and_then(|secs| DateTime::from_timestamp_micros((secs * 1_000_000.0).round() as i64))
            .map(|ts| Json::String(ts.to_rfc3339()))
            .unwrap_or_else(|| value.clone()),
        "RECORD" | "STRUCT" => {
            let cells = value.get("f").and_then(Json::as_array);
            match cells {
                Some(cells) => Json::Object(
                    field
                        .fields
                        .iter()
                        .zip(cells)
                        .map(|(sub, cell)| {
                            (
                                sub.name.clone(),
                                normalize_value(sub, cell.get("v").unwrap_or(&Json::Null)),
                            )
                        })
                        .collect(),
                ),
                None => value.clone(),
            }
        }
        _ => value.clone(),
    }
}
