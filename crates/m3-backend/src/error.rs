//! Backend error taxonomy and message redaction.

use m3_core::ErrorKind;
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;
use thiserror::Error;

/// Failure of a backend call, classified for agents.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The engine refused the SQL (syntax, unknown column, type mismatch).
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// A referenced table or catalog does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The query ran and failed.
    #[error("execution error: {0}")]
    ExecutionError(String),

    /// The engine could not be reached, authorized, or answered too late.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),
}

impl BackendError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidQuery(_) => ErrorKind::InvalidQuery,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::ExecutionError(_) => ErrorKind::ExecutionError,
            Self::BackendUnavailable(_) => ErrorKind::BackendUnavailable,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::InvalidQuery(m)
            | Self::NotFound(m)
            | Self::ExecutionError(m)
            | Self::BackendUnavailable(m) => m,
        }
    }

    /// Whether an idempotent call may be retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::BackendUnavailable(_))
    }

    /// Same variant with the message passed through `redactor`.
    pub fn redacted(self, redactor: &Redactor) -> Self {
        match self {
            Self::InvalidQuery(m) => Self::InvalidQuery(redactor.redact(&m)),
            Self::NotFound(m) => Self::NotFound(redactor.redact(&m)),
            Self::ExecutionError(m) => Self::ExecutionError(redactor.redact(&m)),
            Self::BackendUnavailable(m) => Self::BackendUnavailable(redactor.redact(&m)),
        }
    }
}

const MAX_MESSAGE_LEN: usize = 1000;

/// Scrubs host paths and credentials out of messages returned to agents.
#[derive(Debug, Clone, Default)]
pub struct Redactor {
    data_dir: Option<String>,
}

impl Redactor {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            data_dir: Some(data_dir.to_string_lossy().trim_end_matches('/').to_string())
                .filter(|s| !s.is_empty()),
        }
    }

    pub fn redact(&self, message: &str) -> String {
        let mut out = match &self.data_dir {
            Some(dir) => message.replace(dir.as_str(), "$M3_DATA"),
            None => message.to_string(),
        };
        for (pattern, replacement) in SECRET_PATTERNS.iter() {
            out = pattern.replace_all(&out, *replacement).into_owned();
        }
        if out.len() > MAX_MESSAGE_LEN {
            let mut cut = MAX_MESSAGE_LEN;
            while !out.is_char_boundary(cut) {
                cut -= 1;
            }
            out.truncate(cut);
            out.push_str("...");
        }
        out
    }
}

static SECRET_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"(?i)bearer\s+[A-Za-z0-9._~+/=-]+", "Bearer [redacted]"),
        (r"ya29\.[A-Za-z0-9._-]+", "[redacted]"),
    ]
    .into_iter()
    .filter_map(|(pattern, replacement)| Regex::new(pattern).ok().map(|re| (re, replacement)))
    .collect()
});

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_redacts_data_dir() {
        let redactor = Redactor::new(Path::new("/home/alice/m3_data"));
        assert_eq!(
            redactor.redact("IO Error: No files found that match the pattern \"/home/alice/m3_data/parquet/x.parquet\""),
            "IO Error: No files found that match the pattern \"$M3_DATA/parquet/x.parquet\""
        );
    }

    #[test]
    fn test_redacts_tokens() {
        let redactor = Redactor::default();
        assert_eq!(
            redactor.redact("401 for Authorization: Bearer abc.def-123"),
            "401 for Authorization: Bearer [redacted]"
        );
        assert_eq!(redactor.redact("token ya29.a0AfH6SM"), "token [redacted]");
    }

    #[test]
    fn test_long_messages_are_capped() {
        let redactor = Redactor::default();
        let message = "é".repeat(800);
        let out = redactor.redact(&message);
        assert!(out.len() <= MAX_MESSAGE_LEN + 3);
        assert!(out.ends_with("..."));
    }

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            BackendError::BackendUnavailable("x".into()).kind(),
            ErrorKind::BackendUnavailable
        );
        assert!(BackendError::BackendUnavailable("x".into()).is_transient());
        assert!(!BackendError::NotFound("x".into()).is_transient());
    }
}
