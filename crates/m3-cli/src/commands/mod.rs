//! `m3` subcommands.

pub mod datasets;
pub mod init;
pub mod query;
pub mod serve;

use anyhow::{Context, Result};
use m3_audit::AuditLogger;
use m3_backend::{ActiveSelection, BackendFactory};
use m3_catalog::DatasetCatalog;
use m3_core::M3Config;
use m3_mcp::QueryGateway;
use std::path::Path;
use std::sync::Arc;

/// Resolved configuration plus the catalog every command works through.
pub struct AppContext {
    pub config: M3Config,
    pub catalog: DatasetCatalog,
}

impl AppContext {
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let config = M3Config::load(config_path, |key| std::env::var(key).ok())
            .context("Failed to load configuration")?;
        let catalog = DatasetCatalog::from_config(&config)?;
        tracing::debug!(
            data_dir = %config.layout().root().display(),
            backend = config.backend.kind.as_str(),
            "Configuration loaded"
        );
        Ok(Self { config, catalog })
    }

    pub fn audit(&self) -> Result<AuditLogger> {
        AuditLogger::new(self.config.audit.clone(), &self.config.layout())
            .context("Failed to open audit log")
    }

    /// Gateway over the configured backend and the active dataset.
    pub fn gateway(&self) -> Result<QueryGateway> {
        let active = self.catalog.resolve_active()?;
        let selection = match &active {
            Some(active) => {
                tracing::info!(
                    dataset = %active.definition.name,
                    source = ?active.source,
                    "Active dataset"
                );
                ActiveSelection::new(active.definition.clone(), Some(active.catalog_path.clone()))
            }
            None => ActiveSelection::default(),
        };

        let backend = BackendFactory::from_config(&self.config, &selection)?;
        let mut gateway = QueryGateway::new(backend, self.config.gateway.clone())
            .with_audit(self.audit()?);
        if let Some(active) = active {
            gateway = gateway.with_locks(self.catalog.locks().clone(), active.definition.name);
        }
        Ok(gateway)
    }

    pub fn shared_gateway(&self) -> Result<Arc<QueryGateway>> {
        self.gateway().map(Arc::new)
    }
}
