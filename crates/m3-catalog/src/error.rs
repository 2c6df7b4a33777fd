//! Catalog and pipeline errors.

use crate::state::DatasetState;
use m3_core::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    /// Unknown dataset, or a catalog that has not been built.
    #[error("not found: {0}")]
    NotFound(String),

    /// `init` stopped before the dataset became active.
    #[error("pipeline failed for '{dataset}': {}", .failures.join("; "))]
    Pipeline {
        dataset: String,
        failures: Vec<String>,
    },

    #[error("fetch error: {0}")]
    Fetch(String),

    #[error("engine error: {0}")]
    Engine(String),

    #[error("invalid state transition {from} -> {to}")]
    InvalidTransition {
        from: DatasetState,
        to: DatasetState,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CatalogError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            _ => ErrorKind::PipelineError,
        }
    }

    pub(crate) fn pipeline(dataset: &str, failure: impl Into<String>) -> Self {
        Self::Pipeline {
            dataset: dataset.to_string(),
            failures: vec![failure.into()],
        }
    }
}

impl From<duckdb::Error> for CatalogError {
    fn from(e: duckdb::Error) -> Self {
        Self::Engine(e.to_string())
    }
}

impl From<reqwest::Error> for CatalogError {
    fn from(e: reqwest::Error) -> Self {
        Self::Fetch(e.to_string())
    }
}
