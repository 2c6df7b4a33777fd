//! Rejection reasons.

use m3_core::ErrorKind;
use thiserror::Error;

/// Why a piece of SQL was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    /// The text could not be tokenized or parsed.
    #[error("malformed SQL: {0}")]
    Malformed(String),

    /// Nothing but whitespace and comments.
    #[error("empty query")]
    Empty,

    /// A write or DDL keyword appears outside literals and quoted identifiers.
    #[error("write operation not permitted")]
    WriteOperation { keyword: String },

    /// A table function or path literal that reads from the filesystem or network.
    #[error("file access not permitted: {function}")]
    FileAccess { function: String },

    /// A `;` followed by another statement.
    #[error("multiple statements not permitted")]
    StackedStatements,

    /// The parser found more than one statement.
    #[error("multiple statements not permitted")]
    MultipleStatements,

    /// The statement is not a read-only query.
    #[error("only read-only queries are permitted (found {leading})")]
    NotReadOnly { leading: String },

    /// A PRAGMA outside the introspection allow-list.
    #[error("PRAGMA {name} is not permitted")]
    DisallowedPragma { name: String },
}

impl Rejection {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::UnsafeQuery
    }

    /// Short machine label of the rejected rule, used in logs and audit events.
    pub fn rule(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "malformed",
            Self::Empty => "empty",
            Self::WriteOperation { .. } => "write_operation",
            Self::FileAccess { .. } => "file_access",
            Self::StackedStatements => "stacked_statements",
            Self::MultipleStatements => "multiple_statements",
            Self::NotReadOnly { .. } => "not_read_only",
            Self::DisallowedPragma { .. } => "disallowed_pragma",
        }
    }
}
