//! Tool arguments and their validation.
//!
//! Arguments arrive as untyped JSON. Each tool deserializes into its own
//! struct, then the numeric ranges are checked against [`GatewayConfig`]
//! before any SQL is rendered.
//!
//! [`GatewayConfig`]: m3_core::GatewayConfig

use crate::error::GatewayError;
use crate::tools::Tool;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Longest `lab_item` kept after sanitizing.
pub const MAX_LAB_ITEM_CHARS: usize = 100;

pub const DEFAULT_ICU_STAYS_LIMIT: i64 = 10;
pub const DEFAULT_LAB_RESULTS_LIMIT: i64 = 20;
pub const DEFAULT_RACE_LIMIT: i64 = 10;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NoArgs {}

#[derive(Debug, Clone, Deserialize)]
pub struct TableInfoArgs {
    pub table_name: String,
    #[serde(default = "default_show_sample")]
    pub show_sample: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryArgs {
    #[serde(alias = "sql_query")]
    pub sql: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IcuStaysArgs {
    #[serde(default)]
    pub patient_id: Option<i64>,
    #[serde(default = "default_icu_stays_limit")]
    pub limit: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LabResultsArgs {
    #[serde(default)]
    pub patient_id: Option<i64>,
    #[serde(default)]
    pub lab_item: Option<String>,
    #[serde(default = "default_lab_results_limit")]
    pub limit: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RaceDistributionArgs {
    #[serde(default = "default_race_limit")]
    pub limit: i64,
}

fn default_show_sample() -> bool {
    true
}

fn default_icu_stays_limit() -> i64 {
    DEFAULT_ICU_STAYS_LIMIT
}

fn default_lab_results_limit() -> i64 {
    DEFAULT_LAB_RESULTS_LIMIT
}

fn default_race_limit() -> i64 {
    DEFAULT_RACE_LIMIT
}

/// Deserialize the arguments of `tool`; `null` counts as `{}`.
pub fn parse_args<T: DeserializeOwned>(tool: Tool, arguments: Value) -> Result<T, GatewayError> {
    let arguments = match arguments {
        Value::Null => Value::Object(Default::default()),
        other => other,
    };
    serde_json::from_value(arguments).map_err(|e| {
        GatewayError::invalid(format!("Invalid arguments for {}: {e}", tool.name()))
    })
}

/// `0 < patient_id < max`, when present.
pub fn check_patient_id(patient_id: Option<i64>, max: i64) -> Result<Option<i64>, GatewayError> {
    match patient_id {
        Some(id) if id <= 0 || id >= max => Err(GatewayError::invalid(format!(
            "Invalid patient_id. Must be a positive integer less than {max}."
        ))),
        other => Ok(other),
    }
}

/// `1 <= limit <= max`.
pub fn check_limit(limit: i64, max: u32) -> Result<i64, GatewayError> {
    if limit < 1 || limit > i64::from(max) {
        return Err(GatewayError::invalid(format!(
            "Invalid limit. Must be a positive integer between 1 and {max}."
        )));
    }
    Ok(limit)
}

/// Keep ASCII letters, digits, spaces, `_` and `-`; cap the length.
///
/// Returns `None` when nothing is left, so an all-punctuation filter is
/// dropped rather than matching every row.
pub fn sanitize_lab_item(item: Option<&str>) -> Option<String> {
    let kept: String = item?
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '_' | '-'))
        .take(MAX_LAB_ITEM_CHARS)
        .collect();
    let trimmed = kept.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
