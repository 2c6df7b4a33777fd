//! Audit logging configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Audit trail of tool calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Whether audit logging is enabled.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Directory for JSONL audit files. Defaults to `<data_dir>/audit`.
    #[serde(default)]
    pub directory: Option<PathBuf>,

    /// Also mirror events to stderr. stdout carries the protocol.
    #[serde(default)]
    pub stderr: bool,

    /// Record the SQL text of queries.
    #[serde(default = "default_log_queries")]
    pub log_queries: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            directory: None,
            stderr: false,
            log_queries: default_log_queries(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_log_queries() -> bool {
    true
}
