//! CSV -> Parquet conversion settings.

use super::{ConfigError, parse_bool, parse_number};
use serde::{Deserialize, Serialize};

/// Resource budget for the conversion worker pool.
///
/// Peak memory is roughly `max_workers * memory_limit`; hosts converting the
/// full dataset usually want fewer workers with a larger limit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EtlConfig {
    /// Files converted concurrently (`M3_CONVERT_MAX_WORKERS`).
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// DuckDB `memory_limit` per worker (`M3_DUCKDB_MEM`).
    #[serde(default = "default_memory_limit")]
    pub memory_limit: String,

    /// DuckDB `threads` per worker (`M3_DUCKDB_THREADS`).
    #[serde(default = "default_threads_per_worker")]
    pub threads_per_worker: usize,

    /// Read every CSV column as VARCHAR. Avoids costly and unstable type
    /// inference on wide files.
    #[serde(default = "default_all_varchar")]
    pub all_varchar: bool,
}

impl Default for EtlConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            memory_limit: default_memory_limit(),
            threads_per_worker: default_threads_per_worker(),
            all_varchar: default_all_varchar(),
        }
    }
}

impl EtlConfig {
    pub(crate) fn apply_env<F>(&mut self, env: &F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = env("M3_CONVERT_MAX_WORKERS") {
            self.max_workers = parse_number::<usize>("M3_CONVERT_MAX_WORKERS", &v)?.max(1);
        }
        if let Some(v) = env("M3_DUCKDB_MEM") {
            self.memory_limit = v.trim().to_string();
        }
        if let Some(v) = env("M3_DUCKDB_THREADS") {
            self.threads_per_worker = parse_number::<usize>("M3_DUCKDB_THREADS", &v)?.max(1);
        }
        if let Some(v) = env("M3_CONVERT_ALL_VARCHAR") {
            self.all_varchar = parse_bool("M3_CONVERT_ALL_VARCHAR", &v)?;
        }
        Ok(())
    }

    /// Worker count, never zero.
    pub fn workers(&self) -> usize {
        self.max_workers.max(1)
    }
}

fn default_max_workers() -> usize {
    4
}

fn default_memory_limit() -> String {
    "3GB".to_string()
}

fn default_threads_per_worker() -> usize {
    2
}

fn default_all_varchar() -> bool {
    true
}
