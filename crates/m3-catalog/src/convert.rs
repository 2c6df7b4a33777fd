//! CSV -> Parquet conversion worker pool.
//!
//! Each file is converted by its own in-memory DuckDB instance on the
//! blocking pool, bounded by a semaphore. Files are scheduled smallest first
//! so quick tables finish early and a failure in one file never affects
//! another.

use m3_core::EtlConfig;
use serde::Serialize;
use std::fs;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// One file to convert.
#[derive(Debug, Clone)]
pub struct ConvertJob {
    pub source: PathBuf,
    pub output: PathBuf,
    pub view: String,
    pub bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FileOutcome {
    Succeeded {
        source: PathBuf,
        view: String,
        output: PathBuf,
        rows: u64,
    },
    Failed {
        source: PathBuf,
        view: String,
        reason: String,
    },
}

impl FileOutcome {
    pub fn view(&self) -> &str {
        match self {
            Self::Succeeded { view, .. } | Self::Failed { view, .. } => view,
        }
    }

    pub fn source(&self) -> &Path {
        match self {
            Self::Succeeded { source, .. } | Self::Failed { source, .. } => source,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }

    fn failed(job: &ConvertJob, reason: impl Into<String>) -> Self {
        Self::Failed {
            source: job.source.clone(),
            view: job.view.clone(),
            reason: reason.into(),
        }
    }
}

/// Per-worker DuckDB settings.
#[derive(Debug, Clone)]
struct WorkerSettings {
    memory_limit: String,
    threads: usize,
    all_varchar: bool,
}

/// Convert every job, at most `settings.workers()` at a time.
///
/// Outcomes are returned in completion order.
pub async fn convert_all(jobs: Vec<ConvertJob>, settings: &EtlConfig) -> Vec<FileOutcome> {
    let worker = WorkerSettings {
        memory_limit: settings.memory_limit.clone(),
        threads: settings.threads_per_worker.max(1),
        all_varchar: settings.all_varchar,
    };

    tracing::info!(
        files = jobs.len(),
        workers = settings.workers(),
        memory_limit = %worker.memory_limit,
        threads = worker.threads,
        "Converting raw files to Parquet"
    );

    run_pool(jobs, settings.workers(), move |job| convert_guarded(job, &worker)).await
}

/// Run `work` over every job on the blocking pool, `workers` at a time,
/// smallest file first.
async fn run_pool<F>(mut jobs: Vec<ConvertJob>, workers: usize, work: F) -> Vec<FileOutcome>
where
    F: Fn(&ConvertJob) -> FileOutcome + Send + Sync + 'static,
{
    jobs.sort_by(|a, b| a.bytes.cmp(&b.bytes).then_with(|| a.source.cmp(&b.source)));

    let total = jobs.len();
    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    let work = Arc::new(work);

    let mut tasks = JoinSet::new();
    for job in jobs {
        let semaphore = semaphore.clone();
        let work = work.clone();
        tasks.spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return FileOutcome::failed(&job, "conversion pool closed");
            };
            let blocking_job = job.clone();
            match tokio::task::spawn_blocking(move || work(&blocking_job)).await {
                Ok(outcome) => outcome,
                Err(e) => FileOutcome::failed(&job, format!("worker failed: {e}")),
            }
        });
    }

    let mut outcomes = Vec::with_capacity(total);
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(outcome) => {
                match &outcome {
                    FileOutcome::Succeeded { view, rows, .. } => tracing::info!(
                        view = %view,
                        rows = rows,
                        done = outcomes.len() + 1,
                        total = total,
                        "Converted file"
                    ),
                    FileOutcome::Failed { source, reason, .. } => tracing::warn!(
                        file = %source.display(),
                        reason = %reason,
                        done = outcomes.len() + 1,
                        total = total,
                        "Conversion failed"
                    ),
                }
                outcomes.push(outcome);
            }
            // The task body never panics; a join error here means the runtime
            // is shutting down.
            Err(e) => tracing::error!(error = %e, "Conversion task aborted"),
        }
    }
    outcomes
}

fn convert_guarded(job: &ConvertJob, settings: &WorkerSettings) -> FileOutcome {
    let started = Instant::now();
    match catch_unwind(AssertUnwindSafe(|| convert_file(job, settings))) {
        Ok(Ok(rows)) => {
            tracing::debug!(
                view = %job.view,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Worker finished"
            );
            FileOutcome::Succeeded {
                source: job.source.clone(),
                view: job.view.clone(),
                output: job.output.clone(),
                rows,
            }
        }
        Ok(Err(reason)) => FileOutcome::failed(job, reason),
        Err(_) => FileOutcome::failed(job, "conversion worker panicked"),
    }
}

/// Convert one file; the Parquet output appears only when complete.
fn convert_file(job: &ConvertJob, settings: &WorkerSettings) -> Result<u64, String> {
    if let Some(parent) = job.output.parent() {
        fs::create_dir_all(parent).map_err(|e| format!("cannot create {}: {e}", parent.display()))?;
    }
    let mut tmp_name = job.output.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp = job.output.with_file_name(tmp_name);

    let result = run_copy(job, &tmp, settings).and_then(|rows| {
        fs::rename(&tmp, &job.output)
            .map(|_| rows)
            .map_err(|e| format!("cannot move Parquet output into place: {e}"))
    });
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

fn run_copy(job: &ConvertJob, tmp: &Path, settings: &WorkerSettings) -> Result<u64, String> {
    let conn = duckdb::Connection::open_in_memory().map_err(|e| e.to_string())?;
    conn.execute_batch(&format!(
        "SET memory_limit = {}; SET threads = {};",
        sql_literal(&settings.memory_limit),
        settings.threads
    ))
    .map_err(|e| format!("invalid worker settings: {e}"))?;

    let copy = format!(
        "COPY (SELECT * FROM read_csv_auto({src}, header = true, sample_size = -1, all_varchar = {all_varchar})) \
         TO {dst} (FORMAT PARQUET, COMPRESSION ZSTD)",
        src = sql_literal(&job.source.to_string_lossy()),
        dst = sql_literal(&tmp.to_string_lossy()),
        all_varchar = settings.all_varchar,
    );
    conn.execute_batch(&copy).map_err(|e| e.to_string())?;

    let rows: i64 = conn
        .query_row(
            &format!("SELECT COUNT(*) FROM read_parquet({})", sql_literal(&tmp.to_string_lossy())),
            [],
            |row| row.get(0),
        )
        .map_err(|e| e.to_string())?;
    Ok(rows.max(0) as u64)
}

/// Single-quoted SQL string literal.
pub(crate) fn sql_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
