//! Audit storage backends.

use crate::error::AuditError;
use crate::event::AuditEvent;
use crate::logger::AuditFilter;
use async_trait::async_trait;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Trait for audit storage backends.
#[async_trait]
pub trait AuditStorage: Send + Sync {
    /// Store an audit event.
    async fn store(&self, event: AuditEvent) -> Result<(), AuditError>;

    /// Query audit events with filters, oldest first.
    async fn query(&self, filter: AuditFilter) -> Result<Vec<AuditEvent>, AuditError>;
}

/// Discards everything.
#[derive(Debug, Default)]
pub struct NullStorage;

impl NullStorage {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AuditStorage for NullStorage {
    async fn store(&self, _event: AuditEvent) -> Result<(), AuditError> {
        Ok(())
    }

    async fn query(&self, _filter: AuditFilter) -> Result<Vec<AuditEvent>, AuditError> {
        Ok(vec![])
    }
}

/// Human readable lines on stderr; stdout belongs to the MCP transport.
#[derive(Debug, Default)]
pub struct ConsoleStorage;

impl ConsoleStorage {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AuditStorage for ConsoleStorage {
    async fn store(&self, event: AuditEvent) -> Result<(), AuditError> {
        eprintln!("{}", event.to_log_line());
        Ok(())
    }

    async fn query(&self, _filter: AuditFilter) -> Result<Vec<AuditEvent>, AuditError> {
        // Console storage doesn't support querying
        Ok(vec![])
    }
}

/// Keeps events in memory. Used by tests and short-lived processes.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored event.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl AuditStorage for MemoryStorage {
    async fn store(&self, event: AuditEvent) -> Result<(), AuditError> {
        let mut events = self
            .events
            .lock()
            .map_err(|_| AuditError::Poisoned)?;
        events.push(event);
        Ok(())
    }

    async fn query(&self, filter: AuditFilter) -> Result<Vec<AuditEvent>, AuditError> {
        Ok(filter.apply(self.events()))
    }
}

/// JSON Lines file, appended to and re-read on query.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStorage {
    /// Create the storage; the parent directory is created if needed.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, AuditError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| AuditError::Directory {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AuditStorage for FileStorage {
    async fn store(&self, event: AuditEvent) -> Result<(), AuditError> {
        let mut json = serde_json::to_string(&event)?;
        json.push('\n');

        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| AuditError::Poisoned)?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }

    async fn query(&self, filter: AuditFilter) -> Result<Vec<AuditEvent>, AuditError> {
        let file = match std::fs::File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(e.into()),
        };

        let mut events = Vec::new();
        for (number, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AuditEvent>(&line) {
                Ok(event) => events.push(event),
                Err(e) => tracing::warn!(
                    file = %self.path.display(),
                    line = number + 1,
                    error = %e,
                    "Skipping unreadable audit line"
                ),
            }
        }
        Ok(filter.apply(events))
    }
}

/// File plus console.
pub struct DualStorage {
    file: FileStorage,
    console: ConsoleStorage,
}

impl DualStorage {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, AuditError> {
        Ok(Self {
            file: FileStorage::new(path)?,
            console: ConsoleStorage::new(),
        })
    }
}

#[async_trait]
impl AuditStorage for DualStorage {
    async fn store(&self, event: AuditEvent) -> Result<(), AuditError> {
        self.console.store(event.clone()).await?;
        self.file.store(event).await
    }

    async fn query(&self, filter: AuditFilter) -> Result<Vec<AuditEvent>, AuditError> {
        self.file.query(filter).await
    }
}
