//! Audit event types.
//!
//! One event per tool call outcome or dataset lifecycle change. Events are
//! written as JSON Lines and can be rendered as a single human readable line.

use chrono::{DateTime, Utc};
use m3_core::ErrorKind;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Type of audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    // ===== Tool/Query events =====
    /// A tool was called (before validation).
    ToolCalled,
    /// Query ran and returned rows.
    QueryExecuted,
    /// The validator or parameter checks refused the call.
    QueryRejected,
    /// The backend failed.
    QueryFailed,

    // ===== Auth events =====
    /// The auth gate refused the call.
    AuthDenied,

    // ===== Dataset lifecycle =====
    /// `init` completed and the dataset became active.
    DatasetInitialized,
    /// `use` switched the active dataset.
    DatasetActivated,
}

impl std::fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ToolCalled => write!(f, "TOOL_CALLED"),
            Self::QueryExecuted => write!(f, "QUERY_EXECUTED"),
            Self::QueryRejected => write!(f, "QUERY_REJECTED"),
            Self::QueryFailed => write!(f, "QUERY_FAILED"),
            Self::AuthDenied => write!(f, "AUTH_DENIED"),
            Self::DatasetInitialized => write!(f, "DATASET_INITIALIZED"),
            Self::DatasetActivated => write!(f, "DATASET_ACTIVATED"),
        }
    }
}

/// An audit event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event ID.
    pub event_id: Uuid,

    /// When the event occurred.
    pub occurred_at: DateTime<Utc>,

    pub event_type: AuditEventType,

    /// Authenticated subject, or `local` on the unauthenticated transport.
    pub subject: String,

    /// Tool name or CLI command (e.g. `execute_query`, `init`).
    pub action: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub dataset: Option<String>,

    /// Backend label, e.g. `duckdb (mimic-iv-demo)`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,

    /// SQL sent to the backend (omitted when `log_queries` is off).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,

    // ===== Execution details =====
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_count: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Tool arguments provided in the request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<serde_json::Value>,

    /// Groups the events of one call (`ToolCalled` + its outcome).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,

    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub meta: serde_json::Value,
}

impl AuditEvent {
    pub fn new(
        event_type: AuditEventType,
        subject: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            event_type,
            subject: subject.into(),
            action: action.into(),
            dataset: None,
            backend: None,
            sql: None,
            row_count: None,
            duration_ms: None,
            error_kind: None,
            error: None,
            arguments: None,
            correlation_id: None,
            meta: serde_json::Value::Null,
        }
    }

    pub fn builder(
        event_type: AuditEventType,
        subject: impl Into<String>,
        action: impl Into<String>,
    ) -> AuditEventBuilder {
        AuditEventBuilder::new(event_type, subject, action)
    }

    /// Format the event as a human-readable log line.
    ///
    /// Format: `[timestamp] EVENT_TYPE subject=... action=... [dataset=...] [sql=...]`
    pub fn to_log_line(&self) -> String {
        let mut line = format!(
            "[{}] {} subject={} action={}",
            self.occurred_at.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            self.event_type,
            self.subject,
            self.action,
        );

        if let Some(ref dataset) = self.dataset {
            line.push_str(&format!(" dataset={}", dataset));
        }

        if let Some(ref sql) = self.sql {
            // Truncate long SQL for console output
            let sql_preview: String = if sql.chars().count() > 100 {
                format!("{}...", sql.chars().take(100).collect::<String>())
            } else {
                sql.clone()
            };
            line.push_str(&format!(" sql=\"{}\"", sql_preview.replace('\n', " ")));
        }

        if let Some(row_count) = self.row_count {
            line.push_str(&format!(" rows={}", row_count));
        }

        if let Some(duration) = self.duration_ms {
            line.push_str(&format!(" duration_ms={}", duration));
        }

        if let Some(kind) = self.error_kind {
            line.push_str(&format!(" kind={}", kind));
        }

        if let Some(ref error) = self.error {
            line.push_str(&format!(" error=\"{}\"", error.replace('"', "'")));
        }

        line
    }
}

/// Builder for creating audit events.
#[derive(Debug)]
pub struct AuditEventBuilder {
    event: AuditEvent,
}

impl AuditEventBuilder {
    pub fn new(
        event_type: AuditEventType,
        subject: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            event: AuditEvent::new(event_type, subject, action),
        }
    }

    pub fn dataset(mut self, dataset: impl Into<String>) -> Self {
        self.event.dataset = Some(dataset.into());
        self
    }

    pub fn backend(mut self, backend: impl Into<String>) -> Self {
        self.event.backend = Some(backend.into());
        self
    }

    pub fn sql(mut self, sql: impl Into<String>) -> Self {
        self.event.sql = Some(sql.into());
        self
    }

    pub fn row_count(mut self, count: u64) -> Self {
        self.event.row_count = Some(count);
        self
    }

    pub fn duration_ms(mut self, duration: u64) -> Self {
        self.event.duration_ms = Some(duration);
        self
    }

    /// Set the error kind and message.
    pub fn error(mut self, kind: ErrorKind, message: impl Into<String>) -> Self {
        self.event.error_kind = Some(kind);
        self.event.error = Some(message.into());
        self
    }

    /// Set a message without an error kind (e.g. an auth refusal).
    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.event.error = Some(reason.into());
        self
    }

    pub fn arguments(mut self, args: serde_json::Value) -> Self {
        self.event.arguments = Some(args);
        self
    }

    pub fn correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.event.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn meta(mut self, meta: serde_json::Value) -> Self {
        self.event.meta = meta;
        self
    }

    pub fn build(self) -> AuditEvent {
        self.event
    }
}
