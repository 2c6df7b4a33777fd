//! BigQuery REST payloads (`jobs.query`, `jobs.getQueryResults`).

use m3_sql::QueryParam;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub query: String,
    pub use_legacy_sql: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameter_mode: Option<&'static str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub query_parameters: Vec<WireParameter>,
    pub timeout_ms: u64,
    pub max_results: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WireParameter {
    pub name: String,
    pub parameter_type: ParameterType,
    pub parameter_value: ParameterValue,
}

#[derive(Debug, Serialize)]
pub struct ParameterType {
    #[serde(rename = "type")]
    pub type_name: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ParameterValue {
    pub value: String,
}

impl WireParameter {
    pub fn new(name: &str, param: &QueryParam) -> Self {
        Self {
            name: name.to_string(),
            parameter_type: ParameterType {
                type_name: param.type_name(),
            },
            parameter_value: ParameterValue {
                value: param.to_wire_string(),
            },
        }
    }
}

/// Response of both `jobs.query` and `jobs.getQueryResults`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryResponse {
    pub job_complete: bool,
    pub job_reference: Option<JobReference>,
    pub schema: Option<TableSchema>,
    pub rows: Vec<WireRow>,
    pub total_rows: Option<String>,
    pub page_token: Option<String>,
    pub errors: Vec<ErrorProto>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JobReference {
    pub project_id: String,
    pub job_id: String,
    pub location: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TableSchema {
    pub fields: Vec<FieldSchema>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FieldSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    pub mode: Option<String>,
    pub fields: Vec<FieldSchema>,
}

impl FieldSchema {
    pub fn is_repeated(&self) -> bool {
        self.mode.as_deref() == Some("REPEATED")
    }

    /// Declared type as shown to agents, e.g. `ARRAY<STRING>`.
    pub fn display_type(&self) -> String {
        if self.is_repeated() {
            format!("ARRAY<{}>", self.field_type)
        } else {
            self.field_type.clone()
        }
    }
}

/// `{"f": [{"v": ...}, ...]}`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WireRow {
    pub f: Vec<WireCell>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WireCell {
    pub v: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ErrorProto {
    pub reason: String,
    pub message: String,
}

/// `{"error": {...}}` body of a failed call.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ErrorBody {
    pub code: u16,
    pub message: String,
    pub errors: Vec<ErrorProto>,
}
