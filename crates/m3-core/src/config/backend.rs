//! Backend selection configuration.

use super::{ConfigError, parse_number, split_list};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

/// Which backend variant serves queries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Local DuckDB catalog of Parquet views.
    #[default]
    #[serde(alias = "duck", alias = "embedded")]
    DuckDb,
    /// Google BigQuery.
    #[serde(alias = "bq", alias = "warehouse")]
    BigQuery,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DuckDb => "duckdb",
            Self::BigQuery => "bigquery",
        }
    }
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "duckdb" | "duck" | "embedded" => Ok(Self::DuckDb),
            "bigquery" | "bq" | "warehouse" => Ok(Self::BigQuery),
            other => Err(ConfigError::Config(format!("unsupported backend: '{other}'"))),
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration of the query backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default)]
    pub kind: BackendKind,

    /// Explicit DuckDB catalog path. Overrides the active dataset's catalog.
    #[serde(default)]
    pub catalog_path: Option<PathBuf>,

    /// BigQuery billing/data project. Falls back to the dataset definition.
    #[serde(default)]
    pub project_id: Option<String>,

    /// BigQuery dataset ids. Falls back to the dataset definition.
    #[serde(default)]
    pub dataset_ids: Vec<String>,

    /// BigQuery location (e.g. `US`), used when polling jobs.
    #[serde(default)]
    pub location: Option<String>,

    /// Base URL of the BigQuery REST API.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Upper bound for a single backend call.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Retries for idempotent schema calls. Never applied to queries.
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Maximum rows materialized per query.
    #[serde(default = "default_max_rows")]
    pub max_rows: usize,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::default(),
            catalog_path: None,
            project_id: None,
            dataset_ids: Vec::new(),
            location: None,
            api_base_url: default_api_base_url(),
            timeout_secs: default_timeout_secs(),
            retries: default_retries(),
            max_rows: default_max_rows(),
        }
    }
}

impl BackendConfig {
    pub(crate) fn apply_env<F>(&mut self, env: &F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = env("M3_BACKEND") {
            self.kind = v.parse()?;
        }
        if let Some(v) = env("M3_DB_PATH") {
            self.catalog_path = Some(PathBuf::from(v));
        }
        if let Some(v) = env("M3_PROJECT_ID") {
            self.project_id = Some(v);
        }
        if let Some(v) = env("M3_BIGQUERY_DATASETS") {
            self.dataset_ids = split_list(&v);
        }
        if let Some(v) = env("M3_QUERY_TIMEOUT_SECS") {
            self.timeout_secs = parse_number("M3_QUERY_TIMEOUT_SECS", &v)?;
        }
        Ok(())
    }
}

fn default_api_base_url() -> String {
    "https://bigquery.googleapis.com/bigquery/v2".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_retries() -> u32 {
    2
}

fn default_max_rows() -> usize {
    1000
}
