//! On-disk layout of the m3 data directory.

use crate::dataset::DatasetDefinition;
use std::path::{Path, PathBuf};

/// Resolves every persisted path from a single data directory root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    /// A relative `root` is resolved against the current directory, so
    /// catalogs never embed paths that depend on where a process starts.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let root = std::path::absolute(&root).unwrap_or(root);
        Self { root }
    }

    /// `$HOME/m3_data`, or `./m3_data` when no home directory is known.
    pub fn default_root() -> PathBuf {
        std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("m3_data")
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File holding the active dataset pointer.
    pub fn pointer_file(&self) -> PathBuf {
        self.root.join("config.json")
    }

    /// Optional configuration file picked up when `--config` is not given.
    pub fn config_file(&self) -> PathBuf {
        self.root.join("m3.yaml")
    }

    pub fn datasets_dir(&self) -> PathBuf {
        self.root.join("datasets")
    }

    pub fn databases_dir(&self) -> PathBuf {
        self.root.join("databases")
    }

    pub fn audit_dir(&self) -> PathBuf {
        self.root.join("audit")
    }

    pub fn raw_root(&self, dataset: &str) -> PathBuf {
        self.root.join("raw_files").join(dataset.to_lowercase())
    }

    /// Parent of every dataset's Parquet tables.
    pub fn parquet_dir(&self) -> PathBuf {
        self.root.join("parquet")
    }

    pub fn parquet_root(&self, dataset: &str) -> PathBuf {
        self.parquet_dir().join(dataset.to_lowercase())
    }

    pub fn default_catalog_path(&self, definition: &DatasetDefinition) -> PathBuf {
        self.databases_dir().join(definition.catalog_filename())
    }

    /// Rewrite `path` relative to the data directory for user-facing output.
    ///
    /// Paths outside the data directory collapse to their file name.
    pub fn display_path(&self, path: &Path) -> String {
        match path.strip_prefix(&self.root) {
            Ok(rel) => format!("$M3_DATA/{}", rel.display()),
            Err(_) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dataset_paths_are_lowercased() {
        let layout = DataLayout::new("/data");
        assert_eq!(
            layout.parquet_root("MIMIC-IV-Demo"),
            PathBuf::from("/data/parquet/mimic-iv-demo")
        );
        assert_eq!(
            layout.raw_root("mimic-iv-demo"),
            PathBuf::from("/data/raw_files/mimic-iv-demo")
        );
    }

    #[test]
    fn test_relative_root_is_made_absolute() {
        let layout = DataLayout::new("m3_data");
        assert!(layout.root().is_absolute());
        assert!(layout.root().ends_with("m3_data"));
        assert!(layout.parquet_root("toy").is_absolute());
    }

    #[test]
    fn test_display_path_hides_prefix() {
        let layout = DataLayout::new("/home/someone/m3_data");
        assert_eq!(
            layout.display_path(Path::new("/home/someone/m3_data/databases/x.duckdb")),
            "$M3_DATA/databases/x.duckdb"
        );
        assert_eq!(layout.display_path(Path::new("/etc/secret/file.db")), "file.db");
    }
}
