//! `m3 use`, `m3 status` and `m3 datasets`.

use super::AppContext;
use anyhow::Result;
use m3_catalog::StatusReport;

pub async fn run_use(ctx: &AppContext, dataset: &str) -> Result<()> {
    let active = ctx.catalog.use_dataset(dataset).await?;

    if let Err(e) = ctx.audit()?.log_dataset_activated(&active.definition.name).await {
        tracing::warn!(error = %e, "Failed to write audit event");
    }

    println!(
        "Active dataset: {} ({})",
        active.definition.name,
        ctx.catalog.layout().display_path(&active.catalog_path)
    );
    if ctx.config.dataset_override.is_some() {
        println!("Note: M3_DATASET is set and takes precedence in this environment.");
    }
    Ok(())
}

pub fn run_status(ctx: &AppContext, json: bool) -> Result<()> {
    let report = ctx.catalog.status();
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_status(&report);
    }
    Ok(())
}

fn print_status(report: &StatusReport) {
    println!("Data directory: {}", report.data_dir);
    match (&report.active_dataset, &report.active_catalog) {
        (Some(name), Some(catalog)) => println!("Active dataset: {name} ({catalog})"),
        (Some(name), None) => println!("Active dataset: {name}"),
        _ => println!("Active dataset: none (run `m3 init <dataset>`)"),
    }

    for dataset in &report.datasets {
        println!();
        println!("{} [{}]", dataset.name, dataset.state.as_str());
        println!("  catalog: {}", dataset.catalog_path);
        println!(
            "  raw files: {}  parquet files: {} ({} bytes)",
            dataset.raw_files, dataset.parquet_files, dataset.parquet_bytes
        );
        for view in &dataset.views {
            match view.rows {
                Some(rows) => println!("    {:<32} {rows} rows", view.name),
                None => println!("    {:<32} unreadable", view.name),
            }
        }
        if !dataset.missing_views.is_empty() {
            println!("  missing views: {}", dataset.missing_views.join(", "));
        }
        for problem in &dataset.problems {
            println!("  ! {problem}");
        }
    }

    if !report.problems.is_empty() {
        println!();
        for problem in &report.problems {
            println!("! {problem}");
        }
    }
}

pub fn run_list(ctx: &AppContext, json: bool) -> Result<()> {
    let datasets = ctx.catalog.list_datasets();
    if json {
        println!("{}", serde_json::to_string_pretty(&datasets)?);
        return Ok(());
    }

    for dataset in &datasets {
        let marker = if dataset.active { "*" } else { " " };
        let local = if dataset.catalog_present {
            "initialized"
        } else if dataset.parquet_present {
            "converted"
        } else if dataset.raw_present {
            "downloaded"
        } else {
            "not downloaded"
        };
        println!(
            "{marker} {:<24} {:<10} {local}",
            dataset.name, dataset.version
        );
        if !dataset.description.is_empty() {
            println!("    {}", dataset.description);
        }
        if dataset.requires_authentication {
            println!("    requires credentialed access");
        }
    }
    Ok(())
}
