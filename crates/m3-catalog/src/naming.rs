//! Deterministic catalog view names.
//!
//! `hosp/admissions.csv.gz` becomes `hosp_admissions`. Names only contain
//! `[a-z0-9_]` and never start with a digit, so they are usable unquoted in
//! both SQL dialects.

use std::collections::HashSet;
use std::path::PathBuf;

const KNOWN_EXTENSIONS: [&str; 3] = [".csv.gz", ".csv", ".parquet"];

/// File name without its data extension, e.g. `admissions.csv.gz` -> `admissions`.
pub fn table_stem(file_name: &str) -> &str {
    let lower = file_name.to_ascii_lowercase();
    for ext in KNOWN_EXTENSIONS {
        if lower.ends_with(ext) {
            return &file_name[..file_name.len() - ext.len()];
        }
    }
    file_name
}

/// View name for `file_name` found under `subdir` (may be empty).
pub fn view_name(subdir: &str, file_name: &str) -> String {
    let stem = table_stem(file_name);
    let raw = if subdir.is_empty() {
        stem.to_string()
    } else {
        format!("{subdir}_{stem}")
    };

    let mut name: String = raw
        .chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert_str(0, "t_");
    }
    name
}

/// A raw file discovered under a dataset's raw root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFile {
    /// Subdirectory (module) relative to the raw root; empty for top level.
    pub subdir: String,
    pub path: PathBuf,
    pub bytes: u64,
}

impl RawFile {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn view_name(&self) -> String {
        view_name(&self.subdir, &self.file_name())
    }
}

/// Result of assigning views to a set of raw files.
#[derive(Debug, Default)]
pub struct ViewAssignment {
    pub assigned: Vec<(RawFile, String)>,
    /// Later files whose name was already taken, with the winning view.
    pub collisions: Vec<(RawFile, String)>,
}

/// Assign views in path order. On a name collision the first path wins.
pub fn assign_views(mut files: Vec<RawFile>) -> ViewAssignment {
    files.sort_by(|a, b| a.path.cmp(&b.path));
    let mut seen = HashSet::new();
    let mut out = ViewAssignment::default();

    for file in files {
        let view = file.view_name();
        if seen.insert(view.clone()) {
            out.assigned.push((file, view));
        } else {
            tracing::warn!(file = %file.path.display(), view = %view, "View name already taken");
            out.collisions.push((file, view));
        }
    }
    out
}
