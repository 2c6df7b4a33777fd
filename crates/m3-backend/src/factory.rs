//! Backend selection.

use crate::Backend;
use crate::bigquery::{AmbientTokenProvider, BigQueryBackend, TokenProvider};
use crate::embedded::DuckDbBackend;
use crate::error::{BackendError, Redactor};
use m3_core::{BackendKind, DatasetDefinition, M3Config};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// The dataset a process serves, as resolved by the catalog.
#[derive(Debug, Clone, Default)]
pub struct ActiveSelection {
    pub dataset: Option<DatasetDefinition>,
    /// Catalog file of the dataset, when it has been initialized locally.
    pub catalog_path: Option<PathBuf>,
}

impl ActiveSelection {
    pub fn new(dataset: DatasetDefinition, catalog_path: Option<PathBuf>) -> Self {
        Self {
            dataset: Some(dataset),
            catalog_path,
        }
    }

    pub fn dataset_name(&self) -> Option<&str> {
        self.dataset.as_ref().map(|d| d.name.as_str())
    }
}

/// Builds the single backend a process uses.
pub struct BackendFactory;

impl BackendFactory {
    /// Build from configuration, with ambient Google credentials.
    pub fn from_config(
        config: &M3Config,
        selection: &ActiveSelection,
    ) -> Result<Arc<dyn Backend>, BackendError> {
        Self::build(config, selection, Arc::new(AmbientTokenProvider::new()))
    }

    /// Build with an explicit token provider for the warehouse variant.
    pub fn build(
        config: &M3Config,
        selection: &ActiveSelection,
        tokens: Arc<dyn TokenProvider>,
    ) -> Result<Arc<dyn Backend>, BackendError> {
        let settings = &config.backend;
        let redactor = Redactor::new(config.layout().root());
        let timeout = Duration::from_secs(settings.timeout_secs.max(1));

        match settings.kind {
            BackendKind::DuckDb => {
                let catalog = settings
                    .catalog_path
                    .clone()
                    .or_else(|| selection.catalog_path.clone())
                    .ok_or_else(|| {
                        BackendError::BackendUnavailable(
                            "no active dataset; run `m3 init <dataset>` or set M3_DB_PATH"
                                .to_string(),
                        )
                    })?;

                let mut backend = DuckDbBackend::new(catalog)
                    .with_allowed_directory(config.layout().parquet_dir())
                    .with_timeout(timeout)
                    .with_max_rows(settings.max_rows)
                    .with_redactor(redactor);
                if let Some(name) = selection.dataset_name() {
                    backend = backend.with_dataset(name);
                }
                tracing::info!(
                    backend = "duckdb",
                    catalog = %config.layout().display_path(backend.catalog_path()),
                    "Selected backend"
                );
                Ok(Arc::new(backend))
            }
            BackendKind::BigQuery => {
                let definition = selection.dataset.as_ref();
                let project = settings
                    .project_id
                    .clone()
                    .or_else(|| definition.and_then(|d| d.bigquery_project_id.clone()))
                    .ok_or_else(|| {
                        BackendError::BackendUnavailable(
                            "no BigQuery project configured; set M3_PROJECT_ID".to_string(),
                        )
                    })?;
                let datasets = if settings.dataset_ids.is_empty() {
                    definition
                        .map(|d| d.bigquery_dataset_ids.clone())
                        .unwrap_or_default()
                } else {
                    settings.dataset_ids.clone()
                };

                let mut backend = BigQueryBackend::new(project, datasets, tokens)?
                    .with_base_url(settings.api_base_url.clone())
                    .with_location(settings.location.clone())
                    .with_timeout(timeout)
                    .with_retries(settings.retries)
                    .with_max_rows(settings.max_rows)
                    .with_redactor(redactor);
                if let Some(name) = selection.dataset_name() {
                    backend = backend.with_dataset(name);
                }
                tracing::info!(
                    backend = "bigquery",
                    project = %backend.project(),
                    datasets = ?backend.datasets(),
                    "Selected backend"
                );
                Ok(Arc::new(backend))
            }
        }
    }
}
