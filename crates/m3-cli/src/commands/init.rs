//! `m3 init <dataset>`.

use super::AppContext;
use anyhow::Result;
use m3_catalog::FileOutcome;

pub async fn run_init(ctx: &AppContext, dataset: &str) -> Result<()> {
    let report = ctx.catalog.init(dataset).await?;

    if let Err(e) = ctx
        .audit()?
        .log_dataset_initialized(
            &report.dataset,
            report.views.len(),
            report.failures.len(),
            report.elapsed_ms,
        )
        .await
    {
        tracing::warn!(error = %e, "Failed to write audit event");
    }

    let layout = ctx.catalog.layout();
    println!("Initialized {}", report.dataset);
    println!("  catalog:   {}", layout.display_path(&report.catalog_path));
    println!("  downloaded files: {}", report.downloaded);
    println!("  views:     {}", report.views.len());
    println!("  primary table rows: {}", report.primary_rows);
    println!("  took:      {:.1}s", report.elapsed_ms as f64 / 1000.0);

    if !report.failures.is_empty() {
        println!();
        println!("{} file(s) could not be converted:", report.failures.len());
        for failure in &report.failures {
            if let FileOutcome::Failed { view, reason, .. } = failure {
                println!("  ✗ {view}: {reason}");
            }
        }
    }

    println!();
    println!("{} is now the active dataset.", report.dataset);
    Ok(())
}
