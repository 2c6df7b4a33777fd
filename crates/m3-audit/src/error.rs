//! Audit errors. The gateway never fails a call because of one; they are
//! logged and dropped by [`crate::AuditLogger::record`].

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("cannot create audit directory {path}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A writer panicked while holding the storage lock.
    #[error("audit storage lock poisoned")]
    Poisoned,

    #[error("cannot encode audit event: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("audit log I/O failed: {0}")]
    Io(#[from] std::io::Error),
}
