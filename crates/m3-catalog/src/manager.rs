//! Dataset lifecycle: `init`, `use` and active dataset resolution.

use crate::catalog::{self, staging_path};
use crate::convert::{ConvertJob, FileOutcome, convert_all};
use crate::error::CatalogError;
use crate::fetch::{Fetcher, HttpFetcher, file_name_of};
use crate::locks::CatalogLocks;
use crate::naming::{RawFile, assign_views, table_stem};
use crate::pointer::{ActivePointer, PointerStore};
use crate::state::{DatasetState, InitRun};
use m3_core::{DataLayout, DatasetDefinition, DatasetRegistry, EtlConfig, M3Config};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

/// Write a catalog over `views` at `staged` and verify its primary view.
async fn build_catalog(
    staged: &Path,
    views: &[(String, PathBuf)],
    primary: &str,
) -> Result<u64, CatalogError> {
    let staged = staged.to_path_buf();
    let views = views.to_vec();
    let primary = primary.to_string();
    tokio::task::spawn_blocking(move || {
        catalog::write_catalog(&staged, &views)?;
        catalog::verify(&staged, &primary)
    })
    .await
    .map_err(|e| CatalogError::Engine(format!("catalog worker failed: {e}")))?
}

/// Datasets picked when nothing is configured, in order of preference.
const AUTO_DETECT_ORDER: [&str; 2] = ["mimic-iv-demo", "mimic-iv-full"];

/// Where the active dataset came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActiveSource {
    /// `M3_DATASET` for this process.
    Override,
    /// The persisted pointer.
    Pointer,
    /// No pointer; a built-in dataset with a catalog on disk.
    Detected,
}

/// The dataset a process serves.
#[derive(Debug, Clone)]
pub struct ActiveDataset {
    pub definition: DatasetDefinition,
    pub catalog_path: PathBuf,
    pub source: ActiveSource,
}

/// Outcome of a successful `init`.
#[derive(Debug, Clone, Serialize)]
pub struct InitReport {
    pub dataset: String,
    pub catalog_path: PathBuf,
    pub downloaded: usize,
    pub views: Vec<String>,
    pub primary_rows: u64,
    /// Non-fatal per-file failures.
    pub failures: Vec<FileOutcome>,
    pub elapsed_ms: u64,
}

/// Owns the data directory: definitions, raw files, catalogs and the pointer.
pub struct DatasetCatalog {
    registry: DatasetRegistry,
    layout: DataLayout,
    etl: EtlConfig,
    dataset_override: Option<String>,
    fetcher: Arc<dyn Fetcher>,
    pointer: PointerStore,
    locks: CatalogLocks,
}

impl DatasetCatalog {
    pub fn new(registry: DatasetRegistry, layout: DataLayout, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            pointer: PointerStore::new(layout.pointer_file()),
            registry,
            layout,
            etl: EtlConfig::default(),
            dataset_override: None,
            fetcher,
            locks: CatalogLocks::new(),
        }
    }

    /// Registry from the configured datasets directory, HTTP downloads.
    pub fn from_config(config: &M3Config) -> Result<Self, CatalogError> {
        let registry = DatasetRegistry::load(config.datasets_dir());
        Ok(Self::new(registry, config.layout(), Arc::new(HttpFetcher::new()?))
            .with_etl(config.etl.clone())
            .with_override(config.dataset_override.clone()))
    }

    pub fn with_etl(mut self, etl: EtlConfig) -> Self {
        self.etl = etl;
        self
    }

    pub fn with_override(mut self, dataset: Option<String>) -> Self {
        self.dataset_override = dataset;
        self
    }

    pub fn with_locks(mut self, locks: CatalogLocks) -> Self {
        self.locks = locks;
        self
    }

    pub fn registry(&self) -> &DatasetRegistry {
        &self.registry
    }

    pub fn layout(&self) -> &DataLayout {
        &self.layout
    }

    pub fn locks(&self) -> &CatalogLocks {
        &self.locks
    }

    pub fn pointer(&self) -> ActivePointer {
        self.pointer.load()
    }

    pub(crate) fn definition(&self, name: &str) -> Result<DatasetDefinition, CatalogError> {
        self.registry.get(name).cloned().ok_or_else(|| {
            CatalogError::NotFound(format!(
                "dataset '{}' is not registered (known: {})",
                name,
                self.registry.names().join(", ")
            ))
        })
    }

    pub(crate) fn catalog_path_for(
        &self,
        definition: &DatasetDefinition,
        pointer: &ActivePointer,
    ) -> PathBuf {
        pointer
            .catalog_path(&definition.name)
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.layout.default_catalog_path(definition))
    }

    /// Active dataset: `M3_DATASET` first, then the pointer file, then a
    /// built-in dataset whose catalog exists.
    pub fn resolve_active(&self) -> Result<Option<ActiveDataset>, CatalogError> {
        let pointer = self.pointer.load();

        let (name, source) = if let Some(name) = &self.dataset_override {
            (name.clone(), ActiveSource::Override)
        } else if let Some(name) = &pointer.active_dataset {
            (name.clone(), ActiveSource::Pointer)
        } else if let Some(name) = self.detect_default() {
            (name, ActiveSource::Detected)
        } else {
            return Ok(None);
        };

        let definition = self.definition(&name)?;
        let catalog_path = self.catalog_path_for(&definition, &pointer);
        Ok(Some(ActiveDataset {
            definition,
            catalog_path,
            source,
        }))
    }

    fn detect_default(&self) -> Option<String> {
        AUTO_DETECT_ORDER
            .iter()
            .filter_map(|name| self.registry.get(name))
            .find(|def| self.layout.default_catalog_path(def).is_file())
            .map(|def| def.name.clone())
    }

    /// Download, convert, catalog and verify `name`, then make it active.
    ///
    /// The pointer is only touched after the primary table has been verified
    /// non-empty; any earlier failure leaves it exactly as it was.
    pub async fn init(&self, name: &str) -> Result<InitReport, CatalogError> {
        let started = Instant::now();
        let definition = self.definition(name)?;
        let dataset = definition.name.clone();
        let _guard = self.locks.write(&dataset).await;

        let mut run = InitRun::new(&dataset);
        run.advance(DatasetState::Downloading)?;
        let raw_root = self.layout.raw_root(&dataset);
        let downloaded = self.ensure_raw_files(&definition, &raw_root).await?;

        run.advance(DatasetState::Converting)?;
        let assignment = assign_views(discover_raw_files(
            &raw_root,
            &definition.subdirectories_to_scan,
        ));
        let mut failures: Vec<FileOutcome> = assignment
            .collisions
            .into_iter()
            .map(|(file, view)| FileOutcome::Failed {
                reason: format!("view name '{view}' is already used by an earlier file"),
                source: file.path,
                view,
            })
            .collect();

        // Tables are converted beside the live ones and only swapped in once
        // the staged catalog verifies.
        let parquet_root = self.layout.parquet_root(&dataset);
        let staging_root = catalog::staging_dir(&parquet_root);
        catalog::discard_dir(&staging_root)?;
        let jobs = assignment
            .assigned
            .into_iter()
            .map(|(file, view)| ConvertJob {
                output: staging_root
                    .join(&file.subdir)
                    .join(format!("{}.parquet", table_stem(&file.file_name()))),
                source: file.path,
                view,
                bytes: file.bytes,
            })
            .collect();

        let mut views = Vec::new();
        for outcome in convert_all(jobs, &self.etl).await {
            match outcome {
                FileOutcome::Succeeded { view, output, .. } => views.push((view, output)),
                failed => failures.push(failed),
            }
        }
        views.sort();

        let primary = definition.primary_verification_table.to_lowercase();
        if !views.iter().any(|(view, _)| *view == primary) {
            catalog::discard_dir(&staging_root)?;
            let mut reasons = self.describe_failures(&failures);
            reasons.push(format!("primary table '{primary}' was not converted"));
            return Err(CatalogError::Pipeline {
                dataset,
                failures: reasons,
            });
        }

        let catalog_path = self.layout.default_catalog_path(&definition);
        let staged = staging_path(&catalog_path);
        let primary_rows = match build_catalog(&staged, &views, &primary).await {
            Ok(rows) => rows,
            Err(e) => {
                let _ = fs::remove_file(&staged);
                catalog::discard_dir(&staging_root)?;
                let mut reasons = self.describe_failures(&failures);
                reasons.push(format!("verification of '{primary}' failed: {e}"));
                return Err(CatalogError::Pipeline {
                    dataset,
                    failures: reasons,
                });
            }
        };

        catalog::swap_dirs(&staging_root, &parquet_root)?;
        let views: Vec<(String, PathBuf)> = views
            .into_iter()
            .map(|(view, path)| {
                let live = path
                    .strip_prefix(&staging_root)
                    .map(|relative| parquet_root.join(relative))
                    .unwrap_or_else(|_| path.clone());
                (view, live)
            })
            .collect();
        let primary_rows = match build_catalog(&staged, &views, &primary).await {
            Ok(rows) => rows,
            Err(e) => {
                let _ = fs::remove_file(&staged);
                tracing::error!(
                    dataset = %dataset,
                    staged_rows = primary_rows,
                    error = %e,
                    "Catalog over swapped tables failed verification"
                );
                return Err(e);
            }
        };
        catalog::promote(&staged, &catalog_path)?;
        run.advance(DatasetState::Cataloged)?;

        let key = definition.key();
        self.pointer.update(|p| {
            p.active_dataset = Some(dataset.clone());
            p.catalog_paths.insert(key, catalog_path.clone());
        })?;
        run.advance(DatasetState::Active)?;

        let report = InitReport {
            dataset,
            catalog_path,
            downloaded,
            views: views.into_iter().map(|(view, _)| view).collect(),
            primary_rows,
            failures,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        tracing::info!(
            dataset = %report.dataset,
            views = report.views.len(),
            primary_rows = report.primary_rows,
            failed_files = report.failures.len(),
            elapsed_ms = report.elapsed_ms,
            "Dataset initialized"
        );
        Ok(report)
    }

    /// Make an already initialized dataset active.
    ///
    /// Fails with `NotFound` without touching the pointer when the catalog or
    /// its primary view is missing or empty.
    pub async fn use_dataset(&self, name: &str) -> Result<ActiveDataset, CatalogError> {
        let definition = self.definition(name)?;
        let _guard = self.locks.write(&definition.name).await;

        let pointer = self.pointer.load();
        let catalog_path = self.catalog_path_for(&definition, &pointer);
        let primary = definition.primary_verification_table.to_lowercase();

        let verified = {
            let path = catalog_path.clone();
            tokio::task::spawn_blocking(move || catalog::verify(&path, &primary))
                .await
                .map_err(|e| CatalogError::Engine(format!("catalog worker failed: {e}")))?
        };
        if let Err(e) = verified {
            return Err(CatalogError::NotFound(format!(
                "dataset '{}' is not initialized ({}); run `m3 init {}` first",
                definition.name,
                self.redact(&e.to_string()),
                definition.name
            )));
        }

        let mut run = InitRun::starting_at(&definition.name, DatasetState::Cataloged);
        let key = definition.key();
        let dataset = definition.name.clone();
        self.pointer.update(|p| {
            p.active_dataset = Some(dataset);
            p.catalog_paths.insert(key, catalog_path.clone());
        })?;
        run.advance(DatasetState::Active)?;

        Ok(ActiveDataset {
            definition,
            catalog_path,
            source: ActiveSource::Pointer,
        })
    }

    /// Ensure raw files are on disk; returns how many were downloaded.
    async fn ensure_raw_files(
        &self,
        definition: &DatasetDefinition,
        raw_root: &Path,
    ) -> Result<usize, CatalogError> {
        if raw_files_present(definition, raw_root) {
            tracing::info!(dataset = %definition.name, "Raw files already present");
            return Ok(0);
        }

        let dataset = definition.name.as_str();
        if definition.requires_authentication {
            return Err(CatalogError::pipeline(
                dataset,
                format!(
                    "'{dataset}' requires credentialed access; download it manually into {} and rerun init",
                    self.layout.display_path(raw_root)
                ),
            ));
        }
        let Some(listing) = definition.file_listing_url.as_deref() else {
            return Err(CatalogError::pipeline(
                dataset,
                format!(
                    "no raw files under {} and no file_listing_url to download from",
                    self.layout.display_path(raw_root)
                ),
            ));
        };

        let mut downloaded = 0;
        let mut failures = Vec::new();
        for subdir in scan_dirs(&definition.subdirectories_to_scan) {
            let url = listing_url(listing, subdir);
            let links = self
                .fetcher
                .list(&url)
                .await
                .map_err(|e| CatalogError::pipeline(dataset, format!("listing {url}: {e}")))?;
            if links.is_empty() {
                failures.push(format!("no .csv.gz files listed at {url}"));
                continue;
            }

            for link in links {
                let Some(file_name) = file_name_of(&link) else {
                    continue;
                };
                let dest = raw_root.join(subdir).join(&file_name);
                if dest.is_file() {
                    continue;
                }
                match self.fetcher.download(&link, &dest).await {
                    Ok(bytes) => {
                        downloaded += 1;
                        tracing::info!(dataset = %dataset, file = %file_name, bytes = bytes, "Downloaded");
                    }
                    Err(e) => failures.push(format!("{link}: {e}")),
                }
            }
        }

        if !failures.is_empty() {
            return Err(CatalogError::Pipeline {
                dataset: dataset.to_string(),
                failures,
            });
        }
        if !raw_files_present(definition, raw_root) {
            return Err(CatalogError::pipeline(
                dataset,
                format!(
                    "source of primary table '{}' is missing after download",
                    definition.primary_verification_table
                ),
            ));
        }
        Ok(downloaded)
    }

    fn describe_failures(&self, failures: &[FileOutcome]) -> Vec<String> {
        failures
            .iter()
            .filter_map(|f| match f {
                FileOutcome::Failed { source, reason, .. } => Some(format!(
                    "{}: {}",
                    self.layout.display_path(source),
                    self.redact(reason)
                )),
                FileOutcome::Succeeded { .. } => None,
            })
            .collect()
    }

    /// Hide the data directory prefix in user-facing messages.
    pub(crate) fn redact(&self, message: &str) -> String {
        let root = self.layout.root().to_string_lossy();
        if root.is_empty() {
            return message.to_string();
        }
        message.replace(root.as_ref(), "$M3_DATA")
    }
}

fn scan_dirs(subdirs: &[String]) -> Vec<&str> {
    if subdirs.is_empty() {
        vec![""]
    } else {
        subdirs.iter().map(String::as_str).collect()
    }
}

fn listing_url(listing: &str, subdir: &str) -> String {
    let base = listing.trim_end_matches('/');
    if subdir.is_empty() {
        format!("{base}/")
    } else {
        format!("{base}/{}/", subdir.trim_matches('/'))
    }
}

fn is_raw_file(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.ends_with(".csv.gz") || lower.ends_with(".csv")
}

/// Raw CSV files directly under each scanned subdirectory.
pub(crate) fn discover_raw_files(raw_root: &Path, subdirs: &[String]) -> Vec<RawFile> {
    let mut files = Vec::new();
    for subdir in scan_dirs(subdirs) {
        let dir = raw_root.join(subdir);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(dir = %dir.display(), error = %e, "Cannot scan raw directory");
                }
                continue;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            let name = entry.file_name().to_string_lossy().into_owned();
            if meta.is_file() && is_raw_file(&name) {
                files.push(RawFile {
                    subdir: subdir.to_string(),
                    path,
                    bytes: meta.len(),
                });
            }
        }
    }
    files.sort_by(|a, b| a.path.cmp(&b.path));
    files
}

/// Every scanned subdirectory has a raw file and the primary table has a source.
pub(crate) fn raw_files_present(definition: &DatasetDefinition, raw_root: &Path) -> bool {
    let files = discover_raw_files(raw_root, &definition.subdirectories_to_scan);
    let every_dir = scan_dirs(&definition.subdirectories_to_scan)
        .iter()
        .all(|dir| files.iter().any(|f| f.subdir == *dir));
    let primary = definition.primary_verification_table.to_lowercase();
    every_dir && files.iter().any(|f| f.view_name() == primary)
}
