//! Query gateway limits.

use serde::{Deserialize, Serialize};

/// Limits applied by the tool layer before anything reaches a backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Largest `limit` a convenience tool accepts.
    #[serde(default = "default_max_limit")]
    pub max_limit: u32,

    /// Sample rows returned by `get_table_info`.
    #[serde(default = "default_sample_rows")]
    pub sample_rows: usize,

    /// Upper bound (exclusive) for `patient_id` arguments.
    #[serde(default = "default_max_patient_id")]
    pub max_patient_id: i64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_limit: default_max_limit(),
            sample_rows: default_sample_rows(),
            max_patient_id: default_max_patient_id(),
        }
    }
}

fn default_max_limit() -> u32 {
    1000
}

fn default_sample_rows() -> usize {
    5
}

fn default_max_patient_id() -> i64 {
    999_999_999
}
