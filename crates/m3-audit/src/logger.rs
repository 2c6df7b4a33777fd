//! Where tool calls and dataset changes are recorded.
//!
//! The gateway builds its own events per tool call; the dataset lifecycle
//! helpers are used by the CLI.

use m3_core::{AuditConfig, DataLayout};
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::AuditError;
use crate::event::{AuditEvent, AuditEventType};
use crate::storage::{AuditStorage, DualStorage, FileStorage, NullStorage};

/// Cheap to clone; every clone shares one storage.
#[derive(Clone)]
pub struct AuditLogger {
    config: AuditConfig,
    storage: Arc<dyn AuditStorage>,
}

impl AuditLogger {
    /// Create a logger writing to `<directory>/audit.log`.
    pub fn new(config: AuditConfig, layout: &DataLayout) -> Result<Self, AuditError> {
        let storage: Arc<dyn AuditStorage> = if !config.enabled {
            Arc::new(NullStorage::new())
        } else {
            let file_path = Self::resolve_log_path(&config, layout);
            if config.stderr {
                Arc::new(DualStorage::new(&file_path)?)
            } else {
                Arc::new(FileStorage::new(&file_path)?)
            }
        };

        Ok(Self { config, storage })
    }

    /// Logger over an explicit storage, e.g. [`crate::MemoryStorage`] in tests.
    pub fn with_storage(config: AuditConfig, storage: Arc<dyn AuditStorage>) -> Self {
        Self { config, storage }
    }

    /// Records nothing. The gateway default until an audit logger is attached.
    pub fn disabled() -> Self {
        Self {
            config: AuditConfig {
                enabled: false,
                ..Default::default()
            },
            storage: Arc::new(NullStorage::new()),
        }
    }

    fn resolve_log_path(config: &AuditConfig, layout: &DataLayout) -> PathBuf {
        config
            .directory
            .clone()
            .unwrap_or_else(|| layout.audit_dir())
            .join("audit.log")
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Log an audit event.
    pub async fn log(&self, mut event: AuditEvent) -> Result<(), AuditError> {
        if !self.config.enabled {
            return Ok(());
        }
        if !self.config.log_queries {
            event.sql = None;
        }

        tracing::debug!(
            event_id = %event.event_id,
            event_type = %event.event_type,
            subject = %event.subject,
            action = %event.action,
            "Audit event"
        );

        self.storage.store(event).await
    }

    /// Log, and report a storage failure through `tracing` instead of the
    /// caller. Tool calls must not fail because the audit file is unwritable.
    pub async fn record(&self, event: AuditEvent) {
        if let Err(e) = self.log(event).await {
            tracing::warn!(error = %e, "Failed to write audit event");
        }
    }

    /// Log a completed `init`.
    pub async fn log_dataset_initialized(
        &self,
        dataset: &str,
        views: usize,
        failed_files: usize,
        duration_ms: u64,
    ) -> Result<(), AuditError> {
        let event = AuditEvent::builder(AuditEventType::DatasetInitialized, "local", "init")
            .dataset(dataset)
            .duration_ms(duration_ms)
            .meta(serde_json::json!({ "views": views, "failed_files": failed_files }))
            .build();
        self.log(event).await
    }

    /// Log an active dataset switch.
    pub async fn log_dataset_activated(&self, dataset: &str) -> Result<(), AuditError> {
        let event = AuditEvent::builder(AuditEventType::DatasetActivated, "local", "use")
            .dataset(dataset)
            .build();
        self.log(event).await
    }

    /// Stored events matching `filter`, oldest first.
    pub async fn query(&self, filter: AuditFilter) -> Result<Vec<AuditEvent>, AuditError> {
        self.storage.query(filter).await
    }
}

/// Criteria for [`AuditLogger::query`]; unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub subject: Option<String>,
    /// Filter by tool or command name.
    pub action: Option<String>,
    pub event_type: Option<AuditEventType>,
    pub start_time: Option<chrono::DateTime<chrono::Utc>>,
    pub end_time: Option<chrono::DateTime<chrono::Utc>>,
    /// Keep only the newest `limit` matches.
    pub limit: Option<usize>,
}

impl AuditFilter {
    pub fn matches(&self, event: &AuditEvent) -> bool {
        if let Some(ref subject) = self.subject {
            if &event.subject != subject {
                return false;
            }
        }
        if let Some(ref action) = self.action {
            if &event.action != action {
                return false;
            }
        }
        if let Some(event_type) = self.event_type {
            if event.event_type != event_type {
                return false;
            }
        }
        if let Some(start) = self.start_time {
            if event.occurred_at < start {
                return false;
            }
        }
        if let Some(end) = self.end_time {
            if event.occurred_at > end {
                return false;
            }
        }
        true
    }

    pub(crate) fn apply(&self, events: Vec<AuditEvent>) -> Vec<AuditEvent> {
        let mut results: Vec<_> = events.into_iter().filter(|e| self.matches(e)).collect();
        if let Some(limit) = self.limit {
            let skip = results.len().saturating_sub(limit);
            results.drain(..skip);
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use m3_core::ErrorKind;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_disabled_logger() {
        let logger = AuditLogger::disabled();
        assert!(!logger.is_enabled());

        // Should not error even when logging
        logger
            .log(AuditEvent::new(AuditEventType::ToolCalled, "local", "get_database_schema"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_sql_is_dropped_when_queries_are_not_logged() {
        let storage = Arc::new(MemoryStorage::new());
        let config = AuditConfig {
            log_queries: false,
            ..Default::default()
        };
        let logger = AuditLogger::with_storage(config, storage.clone());

        logger
            .record(
                AuditEvent::builder(AuditEventType::QueryExecuted, "local", "execute_query")
                    .backend("duckdb")
                    .sql("SELECT 1")
                    .row_count(1)
                    .duration_ms(2)
                    .build(),
            )
            .await;

        let events = storage.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].sql, None);
        assert_eq!(events[0].row_count, Some(1));
    }

    #[tokio::test]
    async fn test_file_logger_defaults_to_layout_audit_dir() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DataLayout::new(dir.path());
        let logger = AuditLogger::new(AuditConfig::default(), &layout).unwrap();

        logger.log_dataset_activated("mimic-iv-demo").await.unwrap();
        logger
            .log(
                AuditEvent::builder(AuditEventType::QueryRejected, "local", "execute_query")
                    .sql("DELETE FROM hosp_admissions")
                    .error(ErrorKind::UnsafeQuery, "write operation not permitted")
                    .build(),
            )
            .await
            .unwrap();

        assert!(layout.audit_dir().join("audit.log").is_file());
        let rejected = logger
            .query(AuditFilter {
                event_type: Some(AuditEventType::QueryRejected),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].error_kind, Some(ErrorKind::UnsafeQuery));
    }

    #[test]
    fn test_filter_limit_keeps_newest() {
        let events: Vec<_> = (0..5)
            .map(|i| AuditEvent::new(AuditEventType::ToolCalled, "local", format!("tool{i}")))
            .collect();
        let filter = AuditFilter {
            limit: Some(2),
            ..Default::default()
        };
        let kept: Vec<_> = filter.apply(events).into_iter().map(|e| e.action).collect();
        assert_eq!(kept, vec!["tool3", "tool4"]);
    }
}
