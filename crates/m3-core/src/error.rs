//! Stable error taxonomy shared across the gateway, backends and pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Machine readable error kind.
///
/// The serialized form (`snake_case`) is part of the tool contract and must
/// not change between releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The validator rejected the input; it never reached a backend.
    UnsafeQuery,
    /// The backend (or parameter validation) reported a semantic problem.
    InvalidQuery,
    /// A table, dataset or file does not exist.
    NotFound,
    /// The backend failed while executing.
    ExecutionError,
    /// Connectivity, credential or timeout failure reaching the backend.
    BackendUnavailable,
    /// Conversion or cataloging failed.
    PipelineError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnsafeQuery => "unsafe_query",
            Self::InvalidQuery => "invalid_query",
            Self::NotFound => "not_found",
            Self::ExecutionError => "execution_error",
            Self::BackendUnavailable => "backend_unavailable",
            Self::PipelineError => "pipeline_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
