//! Top-level report pipeline.
//!
//! Wires loading, cleaning, aggregation and export together and returns a
//! [`RunReport`] accounting for every row and every entity, so the caller
//! can render what happened without re-deriving anything.

use std::path::PathBuf;

use chrono::Utc;
use report_core::error::{ReportError, Result};
use report_core::period::{run_timestamp, ReportingPeriod};
use report_core::provider::Provider;
use report_core::settings::RunConfig;
use report_export::exporter::{export_partition, ExportContext};
use tracing::{error, info};

use crate::aggregator::aggregate_table;
use crate::cleaner::clean_table;
use crate::loader::load_table;

// ── Public types ──────────────────────────────────────────────────────────────

/// How one entity's export ended.
#[derive(Debug)]
pub struct EntityOutcome {
    /// Entity the partition was grouped under.
    pub entity_key: String,
    /// Rows in the exported sheet, summary row included.
    pub row_count: usize,
    /// Path written, or why the write failed.
    pub result: Result<PathBuf>,
}

/// The complete account of one pipeline run.
#[derive(Debug)]
pub struct RunReport {
    /// Provider whose schema drove the run.
    pub provider: Provider,
    /// Sheet name of the reporting period, e.g. `"Feb_2024"`.
    pub period_sheet: String,
    /// ISO-8601 timestamp when this report was generated.
    pub generated_at: String,
    /// Data rows read from the input file.
    pub rows_loaded: usize,
    /// Rows the cleaner's row filter removed.
    pub rows_dropped: usize,
    /// Rows skipped because their entity-key cell was empty.
    pub unkeyed_rows: usize,
    /// Entity keys whose partitions the exclusion rule removed.
    pub excluded: Vec<String>,
    /// Per-entity export outcomes, in partition order.
    pub entities: Vec<EntityOutcome>,
    /// Wall-clock seconds spent loading the input file.
    pub load_seconds: f64,
    /// Wall-clock seconds spent cleaning and aggregating.
    pub transform_seconds: f64,
    /// Wall-clock seconds spent writing workbooks.
    pub export_seconds: f64,
}

impl RunReport {
    /// Number of entities whose workbook was written.
    pub fn exported(&self) -> usize {
        self.entities.iter().filter(|e| e.result.is_ok()).count()
    }

    /// Number of entities whose export failed.
    pub fn failed(&self) -> usize {
        self.entities.len() - self.exported()
    }

    /// Every partition the aggregation stage formed, excluded ones included.
    pub fn partition_count(&self) -> usize {
        self.entities.len() + self.excluded.len()
    }
}

// ── Public function ───────────────────────────────────────────────────────────

/// Run the full report pipeline for one input file.
///
/// 1. Load the input into a table.
/// 2. Clean it against the provider schema.
/// 3. Partition by entity and derive the financial columns.
/// 4. Export every partition, collecting one outcome per entity.
///
/// A single entity's export failure does not stop the others; the run as a
/// whole fails only when a stage ahead of export fails or when every
/// partition's export failed. An input whose partitions are all excluded is
/// a successful run that exported nothing.
pub fn run_report(config: &RunConfig) -> Result<RunReport> {
    let schema = config.provider.schema();
    let period = ReportingPeriod::current(config.timezone);

    info!(
        "Processing {} as {} ({} sheet)",
        config.input.display(),
        config.provider.as_str(),
        period.sheet_name()
    );

    // ── Step 1: Load ──────────────────────────────────────────────────────────
    let load_start = std::time::Instant::now();
    let table = load_table(&config.input, schema.encoding)?;
    let load_seconds = load_start.elapsed().as_secs_f64();
    let rows_loaded = table.row_count();
    info!("Loaded {} rows from {}", rows_loaded, config.input.display());

    // ── Step 2: Clean ─────────────────────────────────────────────────────────
    let transform_start = std::time::Instant::now();
    let (cleaned, rows_dropped) = clean_table(table, &schema)?;

    // ── Step 3: Partition and derive ──────────────────────────────────────────
    let outcome = aggregate_table(&cleaned, &schema)?;
    let transform_seconds = transform_start.elapsed().as_secs_f64();

    // ── Step 4: Export each partition ─────────────────────────────────────────
    let ctx = ExportContext {
        output_dir: config.output_dir(),
        policy: config.policy,
        sheet_name: period.sheet_name(),
        run_timestamp: run_timestamp(config.timezone),
    };

    let export_start = std::time::Instant::now();
    let mut entities = Vec::with_capacity(outcome.partitions.len());
    for partition in &outcome.partitions {
        let result = export_partition(partition, &ctx);
        if let Err(err) = &result {
            error!("Export failed for '{}': {}", partition.entity_key, err);
        }
        entities.push(EntityOutcome {
            entity_key: partition.entity_key.clone(),
            row_count: partition.table.row_count(),
            result,
        });
    }
    let export_seconds = export_start.elapsed().as_secs_f64();

    // A run that wrote nothing it was asked to write has failed as a whole.
    if !entities.is_empty() && entities.iter().all(|e| e.result.is_err()) {
        let detail = entities
            .iter()
            .find_map(|e| e.result.as_ref().err().map(|err| err.to_string()))
            .unwrap_or_else(|| "unknown cause".to_string());
        return Err(ReportError::export(
            ctx.output_dir,
            format!(
                "all {} partition exports failed; first failure: {}",
                entities.len(),
                detail
            ),
        ));
    }

    let report = RunReport {
        provider: config.provider,
        period_sheet: period.sheet_name(),
        generated_at: Utc::now().to_rfc3339(),
        rows_loaded,
        rows_dropped,
        unkeyed_rows: outcome.unkeyed_rows,
        excluded: outcome.excluded,
        entities,
        load_seconds,
        transform_seconds,
        export_seconds,
    };

    info!(
        "Run complete: {} of {} partitions exported ({} excluded, {} failed)",
        report.exported(),
        report.partition_count(),
        report.excluded.len(),
        report.failed()
    );

    Ok(report)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::Tz;
    use report_core::provider::ExportPolicy;
    use report_core::table::CellValue;
    use report_export::workbook::read_workbook;
    use rust_xlsxwriter::Workbook;
    use std::path::Path;
    use tempfile::TempDir;

    // ── Helpers ───────────────────────────────────────────────────────────────

    const AZURE_HEADER: [&str; 11] = [
        "CustomerName",
        "Quantity",
        "UnitPrice",
        "BillableQuantity",
        "Bill to",
        "PartnerId",
        "CustomerId",
        "InvoiceNumber",
        "MpnId",
        "PriceAdjustmentDescription",
        "EffectiveUnitPrice",
    ];

    /// One input row: customer, quantity (blank when `None`), unit price,
    /// billable quantity, billing counterparty.
    type AzureRow<'a> = (&'a str, Option<f64>, f64, f64, &'a str);

    fn write_azure_input(dir: &Path, rows: &[AzureRow]) -> PathBuf {
        let path = dir.join("bill.xlsx");
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        for (c, name) in AZURE_HEADER.iter().enumerate() {
            sheet.write_string(0, c as u16, *name).unwrap();
        }
        for (r, (customer, quantity, unit_price, billable, bill_to)) in rows.iter().enumerate() {
            let r = (r + 1) as u32;
            sheet.write_string(r, 0, *customer).unwrap();
            if let Some(q) = quantity {
                sheet.write_number(r, 1, *q).unwrap();
            }
            sheet.write_number(r, 2, *unit_price).unwrap();
            sheet.write_number(r, 3, *billable).unwrap();
            sheet.write_string(r, 4, *bill_to).unwrap();
            for c in 5..11u16 {
                sheet.write_string(r, c, "x").unwrap();
            }
        }
        workbook.save(&path).unwrap();
        path
    }

    fn azure_config(tmp: &TempDir, input: PathBuf) -> RunConfig {
        RunConfig {
            provider: Provider::Azure,
            input,
            output_root: tmp.path().join("reports"),
            policy: ExportPolicy::Append,
            timezone: Tz::UTC,
        }
    }

    fn current_sheet_name() -> String {
        ReportingPeriod::current(Tz::UTC).sheet_name()
    }

    // ── Full Azure run ────────────────────────────────────────────────────────

    #[test]
    fn test_two_customers_yield_two_workbooks() {
        let tmp = TempDir::new().unwrap();
        let input = write_azure_input(
            tmp.path(),
            &[
                ("Contoso", Some(1.0), 100.0, 5.0, "Customer"),
                ("Fabrikam", Some(1.0), 10.0, 2.0, "Customer"),
            ],
        );
        let config = azure_config(&tmp, input);

        let report = run_report(&config).unwrap();

        assert_eq!(report.exported(), 2);
        assert_eq!(report.failed(), 0);
        assert_eq!(report.rows_loaded, 2);
        assert_eq!(report.rows_dropped, 0);
        assert_eq!(report.period_sheet, current_sheet_name());
        assert!(!report.generated_at.is_empty());
        assert!(report.load_seconds >= 0.0);

        let contoso = read_workbook(&tmp.path().join("reports/azure/Contoso.xlsx")).unwrap();
        assert_eq!(contoso.len(), 1);
        assert_eq!(contoso[0].name, current_sheet_name());

        let table = &contoso[0].table;
        assert_eq!(
            table.columns(),
            [
                "CustomerName",
                "Quantity",
                "UnitPrice",
                "BillableQuantity",
                "Subtotal",
                "Total"
            ]
        );
        // One data row plus the summary row.
        assert_eq!(table.row_count(), 2);
        let subtotal = table.column_index("Subtotal").unwrap();
        let total = table.column_index("Total").unwrap();
        assert_eq!(table.cell(0, subtotal), &CellValue::Number(500.0));
        assert_eq!(table.cell(0, total), &CellValue::Number(500.0));
        assert_eq!(table.cell(1, total), &CellValue::Number(500.0));
        assert!(table.cell(1, 0).is_null(), "summary row has no customer");

        assert!(tmp.path().join("reports/azure/Fabrikam.xlsx").is_file());
    }

    #[test]
    fn test_quantityless_rows_are_dropped_before_partitioning() {
        let tmp = TempDir::new().unwrap();
        let input = write_azure_input(
            tmp.path(),
            &[
                ("Contoso", Some(1.0), 100.0, 5.0, "Customer"),
                ("Ghost", None, 10.0, 2.0, "Customer"),
            ],
        );
        let config = azure_config(&tmp, input);

        let report = run_report(&config).unwrap();

        assert_eq!(report.rows_dropped, 1);
        assert_eq!(report.exported(), 1);
        assert!(
            !tmp.path().join("reports/azure/Ghost.xlsx").exists(),
            "a customer with only invalid rows produces no file"
        );
    }

    #[test]
    fn test_excluded_customer_produces_no_file_and_no_error() {
        let tmp = TempDir::new().unwrap();
        let input = write_azure_input(
            tmp.path(),
            &[
                ("Internal", Some(1.0), 100.0, 5.0, "Accord"),
                ("Contoso", Some(1.0), 100.0, 5.0, "Customer"),
            ],
        );
        let config = azure_config(&tmp, input);

        let report = run_report(&config).unwrap();

        assert_eq!(report.excluded, vec!["Internal".to_string()]);
        assert_eq!(report.exported(), 1);
        assert_eq!(
            report.partition_count(),
            report.exported() + report.failed() + report.excluded.len()
        );
        assert!(!tmp.path().join("reports/azure/Internal.xlsx").exists());
    }

    #[test]
    fn test_all_partitions_excluded_is_success() {
        let tmp = TempDir::new().unwrap();
        let input = write_azure_input(
            tmp.path(),
            &[("Internal", Some(1.0), 100.0, 5.0, "Accord")],
        );
        let config = azure_config(&tmp, input);

        let report = run_report(&config).unwrap();

        assert!(report.entities.is_empty());
        assert_eq!(report.excluded.len(), 1);
    }

    #[test]
    fn test_same_month_rerun_replaces_the_period_sheet() {
        let tmp = TempDir::new().unwrap();
        let input = write_azure_input(
            tmp.path(),
            &[("Contoso", Some(1.0), 100.0, 5.0, "Customer")],
        );
        let config = azure_config(&tmp, input);

        run_report(&config).unwrap();
        run_report(&config).unwrap();

        let sheets = read_workbook(&tmp.path().join("reports/azure/Contoso.xlsx")).unwrap();
        assert_eq!(sheets.len(), 1, "the period sheet is replaced, not duplicated");
        assert_eq!(sheets[0].name, current_sheet_name());
    }

    #[test]
    fn test_one_failed_export_does_not_abort_the_rest() {
        let tmp = TempDir::new().unwrap();
        let input = write_azure_input(
            tmp.path(),
            &[
                ("Blocked", Some(1.0), 100.0, 5.0, "Customer"),
                ("Contoso", Some(1.0), 10.0, 2.0, "Customer"),
            ],
        );
        let config = azure_config(&tmp, input);
        // Squat on Blocked's target path with a directory.
        std::fs::create_dir_all(tmp.path().join("reports/azure/Blocked.xlsx")).unwrap();

        let report = run_report(&config).unwrap();

        assert_eq!(report.failed(), 1);
        assert_eq!(report.exported(), 1);
        assert_eq!(report.entities[0].entity_key, "Blocked");
        assert!(report.entities[0].result.is_err());
        assert!(tmp.path().join("reports/azure/Contoso.xlsx").is_file());
    }

    #[test]
    fn test_every_export_failing_fails_the_run() {
        let tmp = TempDir::new().unwrap();
        let input = write_azure_input(
            tmp.path(),
            &[("Contoso", Some(1.0), 100.0, 5.0, "Customer")],
        );
        let config = azure_config(&tmp, input);
        // Squat on the provider output directory with a plain file.
        std::fs::create_dir_all(tmp.path().join("reports")).unwrap();
        std::fs::write(tmp.path().join("reports/azure"), b"in the way").unwrap();

        let err = run_report(&config).unwrap_err();

        assert!(matches!(err, ReportError::Export { .. }));
        assert!(err.to_string().contains("partition exports failed"));
    }

    #[test]
    fn test_missing_column_fails_before_any_export() {
        let tmp = TempDir::new().unwrap();
        // Input lacking the pruned columns entirely.
        let path = tmp.path().join("bill.xlsx");
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.write_string(0, 0, "CustomerName").unwrap();
        sheet.write_string(1, 0, "Contoso").unwrap();
        workbook.save(&path).unwrap();
        let config = azure_config(&tmp, path);

        let err = run_report(&config).unwrap_err();

        assert!(matches!(err, ReportError::Schema { .. }));
        assert!(
            !config.output_dir().exists(),
            "no output may appear for a structurally bad input"
        );
    }

    // ── Full Tencent run ──────────────────────────────────────────────────────

    fn write_tencent_csv(dir: &Path) -> PathBuf {
        let content = "\
Owner Account ID,ProductName,SubproductName,BillingMode,ProjectName,Region,InstanceID,InstanceName,TransactionType,TransactionTime,Usage Start Time,Usage End Time,Configuration Description,OriginalCost,InternalTag\n\
12345678,CVM,Standard S5,Pay as you go,默认项目,Guangzhou,ins-1,web-1,Consumption,2024-02-01 10:00:00,2024-02-01 00:00:00,2024-02-29 23:59:59,4C8G,100.5,keep-out\n\
87654321,COS,Standard Storage,Pay as you go,默认项目,Shanghai,cos-9,bucket-1,Consumption,2024-02-03 09:30:00,2024-02-01 00:00:00,2024-02-29 23:59:59,500GB,9.5,keep-out\n";
        let (bytes, _, _) = encoding_rs::GBK.encode(content);
        let path = dir.join("bill.csv");
        std::fs::write(&path, &bytes).unwrap();
        path
    }

    #[test]
    fn test_tencent_gbk_csv_end_to_end() {
        let tmp = TempDir::new().unwrap();
        let input = write_tencent_csv(tmp.path());
        let config = RunConfig {
            provider: Provider::Tencent,
            input,
            output_root: tmp.path().join("reports"),
            policy: ExportPolicy::Timestamped,
            timezone: Tz::UTC,
        };

        let report = run_report(&config).unwrap();

        assert_eq!(report.exported(), 2);
        let keys: Vec<&str> = report
            .entities
            .iter()
            .map(|e| e.entity_key.as_str())
            .collect();
        assert_eq!(keys, vec!["12345678", "87654321"]);

        let first = report.entities[0].result.as_ref().unwrap();
        let name = first.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("output_12345678_"), "got {name}");

        let sheets = read_workbook(first).unwrap();
        let table = &sheets[0].table;
        // Keep list order, then the two derived columns.
        assert_eq!(table.width(), 16);
        assert_eq!(table.columns()[0], "Owner Account ID");
        assert_eq!(table.columns()[13], "OriginalCost");
        assert_eq!(table.columns()[14], "Discount Multiplier");
        assert_eq!(table.columns()[15], "Total Cost");
        assert!(table.column_index("InternalTag").is_none());

        let project = table.column_index("ProjectName").unwrap();
        assert_eq!(
            table.cell(0, project),
            &CellValue::Text("默认项目".to_string())
        );
        let total = table.column_index("Total Cost").unwrap();
        assert_eq!(table.cell(0, total), &CellValue::Number(100.5));
        // No summary row for this provider.
        assert_eq!(table.row_count(), 1);
    }
}
