//! Per-entity workbook export under the two naming policies.
//!
//! Append keeps one long-lived workbook per entity and accumulates one sheet
//! per reporting period inside it; timestamped creates a fresh, uniquely
//! named file on every run. Either way a single call writes exactly one
//! entity's file, so one entity's failure never touches another's output.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use report_core::error::{ReportError, Result};
use report_core::provider::ExportPolicy;
use report_core::table::Partition;
use tracing::{info, warn};

use crate::workbook::{read_workbook, write_workbook, SheetData};

// ── ExportContext ─────────────────────────────────────────────────────────────

/// Everything the export stage needs besides the partitions themselves.
///
/// Built once per run. The run timestamp is captured with the context, so
/// every entity of one run shares it and the run's files sort together.
#[derive(Debug, Clone)]
pub struct ExportContext {
    /// Directory receiving this provider's workbooks.
    pub output_dir: PathBuf,
    /// Which of the two policies names and writes the files.
    pub policy: ExportPolicy,
    /// Sheet tab name for the reporting period, e.g. `"Feb_2024"`.
    pub sheet_name: String,
    /// Run timestamp used by timestamped filenames, `YYYYmmdd_HHMMSS`.
    pub run_timestamp: String,
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Write one partition's workbook and return the path written.
///
/// Append policy: if the entity's workbook already exists, every sheet in it
/// is read back and the workbook is rewritten with the period sheet added. A
/// sheet that already carries this period's name is replaced in place, with
/// a warning; re-running a corrected export inside the same month is routine
/// and must not require deleting the workbook first. Sheets for other
/// periods come through the rewrite cell for cell.
pub fn export_partition(partition: &Partition, ctx: &ExportContext) -> Result<PathBuf> {
    let path = ctx.output_dir.join(file_name(&partition.entity_key, ctx));
    let sheet = SheetData {
        name: ctx.sheet_name.clone(),
        table: partition.table.clone(),
    };

    match ctx.policy {
        ExportPolicy::Append => append_period_sheet(&path, sheet)?,
        ExportPolicy::Timestamped => write_workbook(&path, &[sheet])?,
    }

    info!(
        "Saved '{}' ({} rows) to {}",
        partition.entity_key,
        partition.table.row_count(),
        path.display()
    );
    Ok(path)
}

/// File name for an entity under the context's policy.
pub fn file_name(entity_key: &str, ctx: &ExportContext) -> String {
    let safe = sanitize_entity_key(entity_key);
    match ctx.policy {
        ExportPolicy::Append => format!("{safe}.xlsx"),
        ExportPolicy::Timestamped => format!("output_{}_{}.xlsx", safe, ctx.run_timestamp),
    }
}

/// Make an entity key usable as a file name.
///
/// Characters outside letters, digits, dot, underscore, space and hyphen
/// become underscores. A key with nothing left becomes `"unnamed"` rather
/// than an extensionless dotfile.
pub fn sanitize_entity_key(key: &str) -> String {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let re = PATTERN.get_or_init(|| Regex::new(r"[^A-Za-z0-9._ -]").expect("regex is valid"));

    let safe = re.replace_all(key.trim(), "_").into_owned();
    if safe.is_empty() {
        "unnamed".to_string()
    } else {
        safe
    }
}

// ── Append policy ─────────────────────────────────────────────────────────────

fn append_period_sheet(path: &Path, sheet: SheetData) -> Result<()> {
    let mut sheets = if path.exists() {
        read_workbook(path).map_err(|e| {
            let detail = match e {
                ReportError::Format { detail, .. } => detail,
                other => other.to_string(),
            };
            ReportError::export(path, format!("cannot read existing workbook: {detail}"))
        })?
    } else {
        Vec::new()
    };

    if let Some(existing) = sheets.iter_mut().find(|s| s.name == sheet.name) {
        warn!(
            "Sheet '{}' already exists in {}; replacing it",
            sheet.name,
            path.display()
        );
        *existing = sheet;
    } else {
        sheets.push(sheet);
    }

    write_workbook(path, &sheets)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
