//! Configuration for m3.
//!
//! Configuration is layered:
//!
//! 1. Built-in defaults (every field has a `serde` default)
//! 2. `m3.yaml` from `--config`, or from the data directory when present
//! 3. Environment variables (`M3_*`), applied last
//!
//! Environment lookups go through a caller supplied function so tests never
//! have to mutate the process environment.

pub mod audit;
pub mod auth;
pub mod backend;
pub mod etl;
pub mod gateway;

use crate::layout::DataLayout;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub use audit::AuditConfig;
pub use auth::AuthConfig;
pub use backend::{BackendConfig, BackendKind};
pub use etl::EtlConfig;
pub use gateway::GatewayConfig;

/// Complete m3 configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct M3Config {
    /// Root of all persisted state. Defaults to `$HOME/m3_data`.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    /// Directory of user dataset definitions. Defaults to `<data_dir>/datasets`.
    #[serde(default)]
    pub datasets_dir: Option<PathBuf>,

    #[serde(default)]
    pub backend: BackendConfig,

    #[serde(default)]
    pub etl: EtlConfig,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub audit: AuditConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    /// Dataset forced for this process (`M3_DATASET`); never persisted.
    #[serde(skip)]
    pub dataset_override: Option<String>,
}

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl M3Config {
    /// Load configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML content.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(ConfigError::from)
    }

    /// Resolve the full configuration.
    ///
    /// With `explicit` the file must exist. Without it, `m3.yaml` in the data
    /// directory is used when present. Environment overrides are applied last.
    pub fn load<F>(explicit: Option<&Path>, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => {
                let root = env("M3_DATA_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(DataLayout::default_root);
                let candidate = DataLayout::new(root).config_file();
                if candidate.exists() {
                    tracing::debug!(file = %candidate.display(), "Loading configuration");
                    Self::from_file(&candidate)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env(env)?;
        Ok(config)
    }

    /// Apply `M3_*` environment overrides.
    pub fn apply_env<F>(&mut self, env: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = env("M3_DATA_DIR") {
            self.data_dir = Some(PathBuf::from(dir));
        }
        if let Some(dataset) = env("M3_DATASET").filter(|s| !s.trim().is_empty()) {
            self.dataset_override = Some(dataset.trim().to_string());
        }

        self.backend.apply_env(&env)?;
        self.etl.apply_env(&env)?;

        if let Some(v) = env("M3_OAUTH2_ENABLED") {
            self.auth.enabled = parse_bool("M3_OAUTH2_ENABLED", &v)?;
        }
        if let Some(v) = env("M3_OAUTH2_REQUIRED_SCOPES") {
            self.auth.required_scopes = split_list(&v);
        }
        if let Some(v) = env("M3_AUDIT_ENABLED") {
            self.audit.enabled = parse_bool("M3_AUDIT_ENABLED", &v)?;
        }
        Ok(())
    }

    pub fn layout(&self) -> DataLayout {
        DataLayout::new(self.data_dir.clone().unwrap_or_else(DataLayout::default_root))
    }

    pub fn datasets_dir(&self) -> PathBuf {
        self.datasets_dir
            .clone()
            .unwrap_or_else(|| self.layout().datasets_dir())
    }
}

pub(crate) fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::Config(format!("{key}: expected a boolean, got '{other}'"))),
    }
}

pub(crate) fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Config(format!("{key}: expected a number, got '{value}'")))
}

pub(crate) fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = M3Config::default();
        assert_eq!(config.backend.kind, BackendKind::DuckDb);
        assert_eq!(config.etl.max_workers, 4);
        assert!(!config.auth.enabled);
    }

    #[test]
    fn test_from_yaml_partial() {
        let yaml = r#"
data_dir: /srv/m3
backend:
  kind: bigquery
  project_id: my-project
  dataset_ids: [mimiciv_3_1_hosp]
etl:
  max_workers: 2
"#;
        let config = M3Config::from_yaml(yaml).unwrap();
        assert_eq!(config.data_dir, Some(PathBuf::from("/srv/m3")));
        assert_eq!(config.backend.kind, BackendKind::BigQuery);
        assert_eq!(config.backend.project_id.as_deref(), Some("my-project"));
        assert_eq!(config.etl.max_workers, 2);
        assert_eq!(config.etl.memory_limit, "3GB");
    }

    #[test]
    fn test_env_overrides() {
        let mut config = M3Config::default();
        config
            .apply_env(env_from(&[
                ("M3_BACKEND", "bigquery"),
                ("M3_PROJECT_ID", "physionet-data"),
                ("M3_BIGQUERY_DATASETS", "a_hosp, b_icu"),
                ("M3_CONVERT_MAX_WORKERS", "8"),
                ("M3_DUCKDB_MEM", "1GB"),
                ("M3_DATASET", "mimic-iv-full"),
                ("M3_OAUTH2_ENABLED", "true"),
            ]))
            .unwrap();

        assert_eq!(config.backend.kind, BackendKind::BigQuery);
        assert_eq!(config.backend.dataset_ids, vec!["a_hosp", "b_icu"]);
        assert_eq!(config.etl.max_workers, 8);
        assert_eq!(config.etl.memory_limit, "1GB");
        assert_eq!(config.dataset_override.as_deref(), Some("mimic-iv-full"));
        assert!(config.auth.enabled);
    }

    #[test]
    fn test_invalid_env_value_is_rejected() {
        let mut config = M3Config::default();
        let err = config
            .apply_env(env_from(&[("M3_CONVERT_MAX_WORKERS", "many")]))
            .unwrap_err();
        assert!(err.to_string().contains("M3_CONVERT_MAX_WORKERS"));

        let err = config.apply_env(env_from(&[("M3_BACKEND", "oracle")])).unwrap_err();
        assert!(err.to_string().contains("oracle"));
    }

    #[test]
    fn test_load_reads_config_from_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("m3.yaml"), "gateway:\n  max_limit: 25\n").unwrap();
        let root = dir.path().to_string_lossy().into_owned();

        let config = M3Config::load(None, env_from(&[("M3_DATA_DIR", &root)])).unwrap();
        assert_eq!(config.gateway.max_limit, 25);
        assert_eq!(config.layout().root(), dir.path());
    }
}
