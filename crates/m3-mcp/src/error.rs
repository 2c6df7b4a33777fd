//! Error types for the MCP crate.

use m3_backend::BackendError;
use m3_core::ErrorKind;
use m3_sql::{Rejection, TemplateError};
use thiserror::Error;

/// Why a gateway operation did not produce rows.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// The validator refused the SQL; nothing reached the backend.
    #[error(transparent)]
    Rejected(#[from] Rejection),

    /// A tool argument is missing, mistyped or out of range.
    #[error("{0}")]
    InvalidArgument(String),

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error(transparent)]
    Backend(#[from] BackendError),

    /// A built-in template failed to render.
    #[error("cannot build query: {0}")]
    Template(#[from] TemplateError),

    /// The tool body panicked.
    #[error("internal error while running {tool}")]
    Panicked { tool: String },
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Rejected(rejection) => rejection.kind(),
            Self::InvalidArgument(_) => ErrorKind::InvalidQuery,
            Self::UnknownTool(_) => ErrorKind::NotFound,
            Self::Backend(e) => e.kind(),
            Self::Template(e) => e.kind(),
            Self::Panicked { .. } => ErrorKind::ExecutionError,
        }
    }

    /// Message shown to the agent, without the kind prefix.
    pub fn message(&self) -> String {
        match self {
            Self::Backend(e) => e.message().to_string(),
            other => other.to_string(),
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }
}

/// Errors that stop the MCP server itself.
#[derive(Debug, Error)]
pub enum McpError {
    /// Failed to start the server.
    #[error("failed to start MCP server: {0}")]
    StartupFailed(String),

    /// Transport error.
    #[error("transport error: {0}")]
    TransportError(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_kinds() {
        let rejected: GatewayError = Rejection::StackedStatements.into();
        assert_eq!(rejected.kind(), ErrorKind::UnsafeQuery);
        assert_eq!(
            GatewayError::invalid("Invalid limit").kind(),
            ErrorKind::InvalidQuery
        );
        assert_eq!(
            GatewayError::Panicked {
                tool: "execute_query".into()
            }
            .kind(),
            ErrorKind::ExecutionError
        );
    }

    #[test]
    fn test_backend_message_has_no_prefix() {
        let err: GatewayError = BackendError::NotFound("table 'x' does not exist".into()).into();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.message(), "table 'x' does not exist");
    }
}
