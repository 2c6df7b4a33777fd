//! Read-only view of what is on disk.
//!
//! Nothing here fails: problems are collected as strings so `m3 status` can
//! always print something useful.

use crate::catalog;
use crate::manager::{ActiveSource, DatasetCatalog, discover_raw_files};
use crate::naming::view_name;
use crate::pointer::ActivePointer;
use crate::state::DatasetState;
use m3_core::DatasetDefinition;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub data_dir: String,
    pub active_dataset: Option<String>,
    pub active_source: Option<ActiveSource>,
    pub active_catalog: Option<String>,
    pub datasets: Vec<DatasetStatus>,
    pub problems: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatasetStatus {
    pub name: String,
    pub state: DatasetState,
    pub catalog_path: String,
    pub catalog_bytes: Option<u64>,
    pub raw_files: usize,
    pub parquet_files: usize,
    pub parquet_bytes: u64,
    /// Views implied by the converted tables on disk.
    pub expected_views: Vec<String>,
    pub views: Vec<ViewStatus>,
    pub missing_views: Vec<String>,
    pub problems: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ViewStatus {
    pub name: String,
    pub rows: Option<u64>,
}

/// Local availability of one dataset.
#[derive(Debug, Clone, Serialize)]
pub struct DatasetAvailability {
    pub name: String,
    pub description: String,
    pub version: String,
    pub requires_authentication: bool,
    pub supports_bigquery: bool,
    pub raw_present: bool,
    pub parquet_present: bool,
    pub catalog_present: bool,
    pub active: bool,
}

impl DatasetCatalog {
    pub fn status(&self) -> StatusReport {
        let pointer = self.pointer();
        let mut problems = Vec::new();

        let active = match self.resolve_active() {
            Ok(active) => active,
            Err(e) => {
                problems.push(self.redact(&e.to_string()));
                None
            }
        };
        let active_name = active.as_ref().map(|a| a.definition.key());

        let datasets: Vec<DatasetStatus> = self
            .registry()
            .list()
            .into_iter()
            .map(|def| {
                let is_active = active_name.as_deref() == Some(def.key().as_str());
                self.dataset_status(def, &pointer, is_active)
            })
            .collect();

        if let Some(active) = &active {
            if !active.catalog_path.is_file() {
                problems.push(format!(
                    "active dataset '{}' has no catalog at {}",
                    active.definition.name,
                    self.layout().display_path(&active.catalog_path)
                ));
            }
        }

        StatusReport {
            data_dir: self.layout().root().display().to_string(),
            active_dataset: active.as_ref().map(|a| a.definition.name.clone()),
            active_source: active.as_ref().map(|a| a.source),
            active_catalog: active
                .as_ref()
                .map(|a| self.layout().display_path(&a.catalog_path)),
            datasets,
            problems,
        }
    }

    /// Definitions plus what exists locally for each.
    pub fn list_datasets(&self) -> Vec<DatasetAvailability> {
        let pointer = self.pointer();
        let active = self
            .resolve_active()
            .ok()
            .flatten()
            .map(|a| a.definition.key());

        self.registry()
            .list()
            .into_iter()
            .map(|def| DatasetAvailability {
                name: def.name.clone(),
                description: def.description.clone(),
                version: def.version.clone(),
                requires_authentication: def.requires_authentication,
                supports_bigquery: def.supports_bigquery(),
                raw_present: !discover_raw_files(
                    &self.layout().raw_root(&def.name),
                    &def.subdirectories_to_scan,
                )
                .is_empty(),
                parquet_present: !discover_parquet(&self.layout().parquet_root(&def.name))
                    .is_empty(),
                catalog_present: self.catalog_path_for(def, &pointer).is_file(),
                active: active.as_deref() == Some(def.key().as_str()),
            })
            .collect()
    }

    fn dataset_status(
        &self,
        def: &DatasetDefinition,
        pointer: &ActivePointer,
        is_active: bool,
    ) -> DatasetStatus {
        let layout = self.layout();
        let catalog_path = self.catalog_path_for(def, pointer);
        let raw_files =
            discover_raw_files(&layout.raw_root(&def.name), &def.subdirectories_to_scan).len();
        let parquet = discover_parquet(&layout.parquet_root(&def.name));
        let parquet_bytes = parquet.iter().map(|p| p.bytes).sum();
        let expected: BTreeSet<String> = parquet.iter().map(|p| p.view.clone()).collect();

        let mut problems = Vec::new();
        let catalog_bytes = fs::metadata(&catalog_path).ok().map(|m| m.len());
        let mut views = Vec::new();
        if catalog_bytes.is_some() {
            match self.read_views(&catalog_path) {
                Ok(found) => views = found,
                Err(e) => problems.push(self.redact(&e)),
            }
        }

        let present: BTreeSet<&str> = views.iter().map(|v| v.name.as_str()).collect();
        let missing_views: Vec<String> = expected
            .iter()
            .filter(|v| !present.contains(v.as_str()))
            .cloned()
            .collect();
        for view in views.iter().filter(|v| v.rows.is_none()) {
            problems.push(format!("view '{}' is not readable", view.name));
        }

        let primary = def.primary_verification_table.to_lowercase();
        let cataloged = views
            .iter()
            .any(|v| v.name == primary && v.rows.unwrap_or(0) > 0);
        let state = if cataloged && is_active {
            DatasetState::Active
        } else if cataloged {
            DatasetState::Cataloged
        } else if !parquet.is_empty() {
            DatasetState::Converting
        } else if raw_files > 0 {
            DatasetState::Downloading
        } else {
            DatasetState::Unknown
        };
        if is_active && !cataloged {
            problems.push(format!("primary view '{primary}' is missing or empty"));
        }

        DatasetStatus {
            name: def.name.clone(),
            state,
            catalog_path: layout.display_path(&catalog_path),
            catalog_bytes,
            raw_files,
            parquet_files: parquet.len(),
            parquet_bytes,
            expected_views: expected.into_iter().collect(),
            views,
            missing_views,
            problems,
        }
    }

    fn read_views(&self, catalog_path: &Path) -> Result<Vec<ViewStatus>, String> {
        let conn = catalog::open_read_only(catalog_path).map_err(|e| e.to_string())?;
        let names = catalog::list_views(&conn).map_err(|e| e.to_string())?;
        Ok(names
            .into_iter()
            .map(|name| ViewStatus {
                rows: catalog::count_rows(&conn, &name).ok(),
                name,
            })
            .collect())
    }
}

#[derive(Debug, Clone)]
struct ParquetFile {
    view: String,
    bytes: u64,
}

/// Converted tables under `root`, with the view each one maps to.
fn discover_parquet(root: &Path) -> Vec<ParquetFile> {
    let mut found = Vec::new();
    let mut pending: Vec<PathBuf> = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let Ok(entries) = fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            if meta.is_dir() {
                pending.push(path);
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.to_ascii_lowercase().ends_with(".parquet") {
                continue;
            }
            let subdir = path
                .parent()
                .and_then(|p| p.strip_prefix(root).ok())
                .map(|rel| {
                    rel.components()
                        .map(|c| c.as_os_str().to_string_lossy().into_owned())
                        .collect::<Vec<_>>()
                        .join("_")
                })
                .unwrap_or_default();
            found.push(ParquetFile {
                view: view_name(&subdir, &name),
                bytes: meta.len(),
            });
        }
    }
    found.sort_by(|a, b| a.view.cmp(&b.view));
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discover_parquet_maps_views() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("hosp")).unwrap();
        fs::create_dir_all(root.join("icu")).unwrap();
        fs::write(root.join("hosp").join("admissions.parquet"), b"1234").unwrap();
        fs::write(root.join("hosp").join("admissions.parquet.tmp"), b"1").unwrap();
        fs::write(root.join("icu").join("icustays.parquet"), b"12").unwrap();

        let found = discover_parquet(root);
        let views: Vec<_> = found.iter().map(|p| p.view.as_str()).collect();
        assert_eq!(views, vec!["hosp_admissions", "icu_icustays"]);
        assert_eq!(found.iter().map(|p| p.bytes).sum::<u64>(), 6);
    }

    #[test]
    fn test_missing_root_is_empty() {
        assert!(discover_parquet(Path::new("/definitely/not/here")).is_empty());
    }
}
