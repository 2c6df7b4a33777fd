//! Dataset definitions.
//!
//! A [`DatasetDefinition`] describes where the raw files of a dataset live,
//! which subdirectories to scan, and which table proves a successful
//! initialization. Definitions are immutable once loaded: the two built-in
//! MIMIC-IV datasets are always present, and user definitions are read from
//! `*.json` / `*.yaml` files in the datasets directory.

use crate::config::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Static description of one logical dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetDefinition {
    /// Unique, case-insensitive dataset name (e.g. `mimic-iv-demo`).
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default = "default_version")]
    pub version: String,

    /// Remote directory listing holding one subdirectory per module.
    #[serde(default)]
    pub file_listing_url: Option<String>,

    /// Subdirectories (modules) to scan for raw files, e.g. `hosp`, `icu`.
    #[serde(default)]
    pub subdirectories_to_scan: Vec<String>,

    /// View whose non-empty row count signals a successful `init`.
    pub primary_verification_table: String,

    /// Catalog filename under `databases/`. Derived from the name when absent.
    #[serde(default, alias = "default_duckdb_filename")]
    pub default_catalog_filename: Option<String>,

    #[serde(default)]
    pub tags: Vec<String>,

    /// Raw files sit behind credentialed access and must be placed locally.
    #[serde(default)]
    pub requires_authentication: bool,

    #[serde(default)]
    pub bigquery_project_id: Option<String>,

    #[serde(default)]
    pub bigquery_dataset_ids: Vec<String>,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl DatasetDefinition {
    /// Load a definition from a JSON or YAML file, chosen by extension.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let definition: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&content)?,
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)?,
            other => {
                return Err(ConfigError::Config(format!(
                    "unsupported dataset definition extension: {:?}",
                    other
                )));
            }
        };
        definition.validate()?;
        Ok(definition)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::Config("dataset name must not be empty".into()));
        }
        if self.primary_verification_table.trim().is_empty() {
            return Err(ConfigError::Config(format!(
                "dataset '{}' has no primary_verification_table",
                self.name
            )));
        }
        Ok(())
    }

    /// Name of the catalog file for this dataset.
    pub fn catalog_filename(&self) -> String {
        self.default_catalog_filename
            .clone()
            .unwrap_or_else(|| format!("{}.duckdb", self.name.to_lowercase().replace('-', "_")))
    }

    /// Registry key.
    pub fn key(&self) -> String {
        self.name.to_lowercase()
    }

    /// Whether the cloud warehouse backend can serve this dataset.
    pub fn supports_bigquery(&self) -> bool {
        self.bigquery_project_id.is_some() && !self.bigquery_dataset_ids.is_empty()
    }

    /// BigQuery dataset id holding a module, e.g. `icu` -> `mimiciv_3_1_icu`.
    pub fn bigquery_dataset_for(&self, module: &str) -> Option<&str> {
        let suffix = format!("_{}", module.to_lowercase());
        self.bigquery_dataset_ids
            .iter()
            .find(|id| id.to_lowercase().ends_with(&suffix))
            .map(String::as_str)
    }

    pub fn mimic_iv_demo() -> Self {
        Self {
            name: "mimic-iv-demo".to_string(),
            description: "MIMIC-IV Clinical Database Demo".to_string(),
            version: "2.2".to_string(),
            file_listing_url: Some("https://physionet.org/files/mimic-iv-demo/2.2/".to_string()),
            subdirectories_to_scan: vec!["hosp".to_string(), "icu".to_string()],
            primary_verification_table: "hosp_admissions".to_string(),
            default_catalog_filename: None,
            tags: vec!["mimic".into(), "clinical".into(), "demo".into()],
            requires_authentication: false,
            bigquery_project_id: None,
            bigquery_dataset_ids: Vec::new(),
        }
    }

    pub fn mimic_iv_full() -> Self {
        Self {
            name: "mimic-iv-full".to_string(),
            description: "MIMIC-IV Clinical Database (Full)".to_string(),
            version: "3.1".to_string(),
            file_listing_url: Some("https://physionet.org/files/mimiciv/3.1/".to_string()),
            subdirectories_to_scan: vec!["hosp".to_string(), "icu".to_string()],
            primary_verification_table: "hosp_admissions".to_string(),
            default_catalog_filename: None,
            tags: vec!["mimic".into(), "clinical".into(), "full".into()],
            requires_authentication: true,
            bigquery_project_id: Some("physionet-data".to_string()),
            bigquery_dataset_ids: vec![
                "mimiciv_3_1_hosp".to_string(),
                "mimiciv_3_1_icu".to_string(),
            ],
        }
    }
}

/// Loaded dataset definitions, keyed by lower-cased name.
#[derive(Debug, Clone, Default)]
pub struct DatasetRegistry {
    datasets: BTreeMap<String, DatasetDefinition>,
}

impl DatasetRegistry {
    /// Registry holding only the built-in datasets.
    pub fn with_builtins() -> Self {
        let mut registry = Self::default();
        registry.register(DatasetDefinition::mimic_iv_demo());
        registry.register(DatasetDefinition::mimic_iv_full());
        registry
    }

    /// Built-ins plus every readable definition in `dir`.
    ///
    /// Malformed files are skipped with a warning. A missing directory is
    /// not an error.
    pub fn load(dir: impl AsRef<Path>) -> Self {
        let mut registry = Self::with_builtins();
        registry.load_dir(dir.as_ref());
        registry
    }

    /// Register every definition found in `dir`; returns the files skipped.
    pub fn load_dir(&mut self, dir: &Path) -> Vec<PathBuf> {
        let mut skipped = Vec::new();
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!(dir = %dir.display(), error = %e, "No custom dataset directory");
                return skipped;
            }
        };

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .map(|e| e == "json" || e == "yaml" || e == "yml")
                    .unwrap_or(false)
            })
            .collect();
        paths.sort();

        for path in paths {
            match DatasetDefinition::from_file(&path) {
                Ok(definition) => {
                    tracing::debug!(dataset = %definition.name, file = %path.display(), "Loaded custom dataset");
                    self.register(definition);
                }
                Err(e) => {
                    tracing::warn!(file = %path.display(), error = %e, "Skipping invalid dataset definition");
                    skipped.push(path);
                }
            }
        }
        skipped
    }

    /// Add or replace a definition.
    pub fn register(&mut self, definition: DatasetDefinition) {
        self.datasets.insert(definition.key(), definition);
    }

    pub fn get(&self, name: &str) -> Option<&DatasetDefinition> {
        self.datasets.get(&name.to_lowercase())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Definitions sorted by name.
    pub fn list(&self) -> Vec<&DatasetDefinition> {
        self.datasets.values().collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.datasets.values().map(|d| d.name.as_str()).collect()
    }
}
