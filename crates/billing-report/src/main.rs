mod bootstrap;

use anyhow::Result;
use report_core::settings::Settings;
use report_data::pipeline::{run_report, RunReport};

fn main() -> Result<()> {
    let settings = Settings::load_with_last_used();

    // The guard keeps the non-blocking file writer flushing until exit.
    let _log_guard = bootstrap::setup_logging(&settings.log_level, settings.log_file.as_ref())?;

    tracing::info!("billing-report v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        "Provider: {}, Policy: {}, Input: {}",
        settings.provider,
        settings.policy.as_deref().unwrap_or("provider default"),
        settings.input.display()
    );

    let config = settings.to_run_config()?;
    bootstrap::ensure_directories(&config)?;

    let report = run_report(&config)?;
    render_report(&report);

    Ok(())
}

/// Print the run summary to stdout.
///
/// The tracing output narrates the run as it happens; this is the final
/// at-a-glance result, one line per entity in partition order.
fn render_report(report: &RunReport) {
    println!();
    println!(
        "{} report for {}: {} rows loaded, {} dropped",
        report.provider.as_str(),
        report.period_sheet,
        report.rows_loaded,
        report.rows_dropped
    );

    for entity in &report.entities {
        match &entity.result {
            Ok(path) => println!(
                "  {} ({} rows) -> {}",
                entity.entity_key,
                entity.row_count,
                path.display()
            ),
            Err(err) => println!("  {} FAILED: {}", entity.entity_key, err),
        }
    }
    if !report.excluded.is_empty() {
        println!("  Excluded: {}", report.excluded.join(", "));
    }

    println!(
        "{} of {} partitions exported in {:.2}s",
        report.exported(),
        report.partition_count(),
        report.load_seconds + report.transform_seconds + report.export_seconds
    );
}
