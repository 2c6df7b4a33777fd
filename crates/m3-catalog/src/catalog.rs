//! DuckDB catalog files: views over converted Parquet tables.

use crate::convert::sql_literal;
use crate::error::CatalogError;
use duckdb::{AccessMode, Config, Connection};
use std::fs;
use std::path::{Path, PathBuf};

/// Path a catalog is built at before being renamed into place.
pub fn staging_path(catalog: &Path) -> PathBuf {
    let mut name = catalog.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    catalog.with_file_name(name)
}

/// Write a fresh catalog holding one view per `(name, parquet file)` at
/// `path`, replacing whatever was there.
pub fn write_catalog(path: &Path, views: &[(String, PathBuf)]) -> Result<(), CatalogError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    remove_with_wal(path)?;

    let conn = Connection::open(path)?;
    for (name, parquet) in views {
        conn.execute_batch(&format!(
            "CREATE OR REPLACE VIEW {} AS SELECT * FROM read_parquet({})",
            quote_ident(name),
            sql_literal(&parquet.to_string_lossy())
        ))?;
    }
    conn.execute_batch("CHECKPOINT")?;
    drop(conn);

    tracing::debug!(catalog = %path.display(), views = views.len(), "Wrote catalog");
    Ok(())
}

/// Open a catalog without write access.
pub fn open_read_only(path: &Path) -> Result<Connection, CatalogError> {
    if !path.is_file() {
        return Err(CatalogError::NotFound(format!(
            "catalog {} does not exist",
            path.display()
        )));
    }
    let config = Config::default().access_mode(AccessMode::ReadOnly)?;
    Ok(Connection::open_with_flags(path, config)?)
}

/// Views defined in the catalog, sorted.
pub fn list_views(conn: &Connection) -> Result<Vec<String>, CatalogError> {
    let mut stmt = conn.prepare(
        "SELECT table_name FROM information_schema.tables \
         WHERE table_schema = 'main' ORDER BY table_name",
    )?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(names)
}

pub fn count_rows(conn: &Connection, view: &str) -> Result<u64, CatalogError> {
    let rows: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM {}", quote_ident(view)),
        [],
        |row| row.get(0),
    )?;
    Ok(rows.max(0) as u64)
}

/// Row count of `view` in the catalog at `path`; an error unless it is
/// present and non-empty.
pub fn verify(path: &Path, view: &str) -> Result<u64, CatalogError> {
    let conn = open_read_only(path)?;
    let rows = count_rows(&conn, view).map_err(|e| {
        CatalogError::NotFound(format!("view '{view}' is not readable: {e}"))
    })?;
    if rows == 0 {
        return Err(CatalogError::NotFound(format!("view '{view}' is empty")));
    }
    Ok(rows)
}

/// Move a staged catalog over the live one.
pub fn promote(staged: &Path, catalog: &Path) -> Result<(), CatalogError> {
    fs::rename(staged, catalog)?;
    let _ = fs::remove_file(wal_path(catalog));
    Ok(())
}

/// Directory a run converts into before its tables replace the live ones.
pub fn staging_dir(live: &Path) -> PathBuf {
    sibling(live, ".staging")
}

/// Remove a directory tree if it exists.
pub fn discard_dir(path: &Path) -> Result<(), CatalogError> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Replace the `live` table directory with `staged`.
///
/// The previous tables are moved back when the swap fails.
pub fn swap_dirs(staged: &Path, live: &Path) -> Result<(), CatalogError> {
    let previous = sibling(live, ".previous");
    discard_dir(&previous)?;
    let had_live = live.exists();
    if had_live {
        fs::rename(live, &previous)?;
    }
    if let Err(e) = fs::rename(staged, live) {
        if had_live {
            let _ = fs::rename(&previous, live);
        }
        return Err(e.into());
    }
    if had_live {
        if let Err(e) = discard_dir(&previous) {
            tracing::warn!(path = %previous.display(), error = %e, "Could not remove replaced tables");
        }
    }
    Ok(())
}

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(suffix);
    path.with_file_name(name)
}

fn wal_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".wal");
    path.with_file_name(name)
}

fn remove_with_wal(path: &Path) -> Result<(), CatalogError> {
    for candidate in [path.to_path_buf(), wal_path(path)] {
        match fs::remove_file(&candidate) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}
