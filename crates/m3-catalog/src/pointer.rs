//! Persisted active dataset pointer (`<data_dir>/config.json`).

use crate::error::CatalogError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivePointer {
    #[serde(default)]
    pub active_dataset: Option<String>,

    /// Catalog built for each dataset by its last successful `init`.
    #[serde(default, alias = "duckdb_paths")]
    pub catalog_paths: BTreeMap<String, PathBuf>,
}

impl ActivePointer {
    pub fn catalog_path(&self, dataset: &str) -> Option<&Path> {
        self.catalog_paths
            .get(&dataset.to_lowercase())
            .map(PathBuf::as_path)
    }
}

/// Reads and atomically rewrites the pointer file.
#[derive(Debug, Clone)]
pub struct PointerStore {
    path: PathBuf,
}

impl PointerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current pointer. A missing or unreadable file means no active dataset.
    pub fn load(&self) -> ActivePointer {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return ActivePointer::default(),
            Err(e) => {
                tracing::warn!(file = %self.path.display(), error = %e, "Cannot read active dataset pointer");
                return ActivePointer::default();
            }
        };
        match serde_json::from_str(&content) {
            Ok(pointer) => pointer,
            Err(e) => {
                tracing::warn!(file = %self.path.display(), error = %e, "Ignoring malformed active dataset pointer");
                ActivePointer::default()
            }
        }
    }

    /// Read-modify-write. The new content replaces the file in one rename.
    pub fn update<F>(&self, f: F) -> Result<ActivePointer, CatalogError>
    where
        F: FnOnce(&mut ActivePointer),
    {
        let mut pointer = self.load();
        f(&mut pointer);
        self.write(&pointer)?;
        Ok(pointer)
    }

    fn write(&self, pointer: &ActivePointer) -> Result<(), CatalogError> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut tmp, pointer)?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| CatalogError::Io(e.error))?;

        tracing::debug!(
            file = %self.path.display(),
            active = ?pointer.active_dataset,
            "Wrote active dataset pointer"
        );
        Ok(())
    }
}
