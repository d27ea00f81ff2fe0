//! Low-level workbook reading and writing.
//!
//! One [`Table`] per sheet, header row first. Reading goes through calamine,
//! writing through rust_xlsxwriter; a workbook is always rewritten whole and
//! swapped into place atomically, so a failed write leaves whatever was on
//! disk before untouched.

use std::path::Path;

use calamine::{open_workbook_auto, Data, DataType as _, Reader};
use report_core::error::{ReportError, Result};
use report_core::table::{CellValue, Table};
use rust_xlsxwriter::{Format, Workbook, Worksheet};
use tracing::debug;

/// Display format applied to date cells.
const DATE_NUM_FORMAT: &str = "yyyy-mm-dd hh:mm:ss";

/// One sheet of a workbook: its tab name and its contents.
#[derive(Debug, Clone)]
pub struct SheetData {
    /// Sheet tab name, e.g. `"Feb_2024"`.
    pub name: String,
    /// Header and rows under that tab.
    pub table: Table,
}

// ── Reading ───────────────────────────────────────────────────────────────────

/// Read every sheet of a workbook into memory, in workbook order.
///
/// The first row of each sheet is taken as its header. Rows that are empty
/// in every cell are dropped; real content never contains them.
pub fn read_workbook(path: &Path) -> Result<Vec<SheetData>> {
    let mut workbook = open_workbook_auto(path).map_err(|e| ReportError::format(path, e))?;

    let names = workbook.sheet_names().to_vec();
    if names.is_empty() {
        return Err(ReportError::format(path, "workbook has no sheets"));
    }

    let mut sheets = Vec::with_capacity(names.len());
    for name in names {
        let range = workbook
            .worksheet_range(&name)
            .map_err(|e| ReportError::format(path, e))?;

        let mut rows = range.rows();
        let columns: Vec<String> = match rows.next() {
            Some(header) => header
                .iter()
                .map(|cell| match cell {
                    Data::String(s) => s.trim().to_string(),
                    Data::Empty => String::new(),
                    other => format!("{}", other),
                })
                .collect(),
            None => Vec::new(),
        };

        let mut table = Table::new(columns);
        for row in rows {
            if row.iter().all(|c| matches!(c, Data::Empty)) {
                continue;
            }
            table.push_row(row.iter().map(cell_from_spreadsheet).collect());
        }
        sheets.push(SheetData { name, table });
    }

    Ok(sheets)
}

/// Map one spreadsheet cell into the pipeline's cell model.
///
/// Whitespace-only strings count as empty, the way the exports use padding
/// cells. Formula error cells carry no usable value.
pub fn cell_from_spreadsheet(cell: &Data) -> CellValue {
    match cell {
        Data::Empty => CellValue::Null,
        Data::String(s) if s.trim().is_empty() => CellValue::Null,
        Data::String(s) => CellValue::Text(s.clone()),
        Data::Float(f) => CellValue::Number(*f),
        Data::Int(i) => CellValue::Number(*i as f64),
        Data::Bool(b) => CellValue::Text(b.to_string()),
        Data::DateTime(_) | Data::DateTimeIso(_) => cell
            .as_datetime()
            .map(CellValue::Date)
            .unwrap_or(CellValue::Null),
        Data::DurationIso(s) => CellValue::Text(s.clone()),
        Data::Error(_) => CellValue::Null,
    }
}

// ── Writing ───────────────────────────────────────────────────────────────────

/// Write `sheets` to `path`, replacing any existing file atomically.
///
/// The workbook is rendered to a buffer, written to a sibling temp file, and
/// renamed over the target.
pub fn write_workbook(path: &Path, sheets: &[SheetData]) -> Result<()> {
    let mut workbook = Workbook::new();
    for sheet in sheets {
        let worksheet = workbook.add_worksheet();
        worksheet
            .set_name(&sheet.name)
            .map_err(|e| ReportError::export(path, e))?;
        write_sheet(worksheet, &sheet.table).map_err(|e| ReportError::export(path, e))?;
    }

    let buffer = workbook
        .save_to_buffer()
        .map_err(|e| ReportError::export(path, e))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ReportError::export(path, e))?;
    }
    let tmp = path.with_extension("xlsx.tmp");
    std::fs::write(&tmp, &buffer).map_err(|e| ReportError::export(path, e))?;
    std::fs::rename(&tmp, path).map_err(|e| ReportError::export(path, e))?;

    debug!(
        "Wrote {} sheet(s) to {}",
        sheets.len(),
        path.display()
    );
    Ok(())
}

fn write_sheet(
    worksheet: &mut Worksheet,
    table: &Table,
) -> std::result::Result<(), rust_xlsxwriter::XlsxError> {
    for (col, name) in table.columns().iter().enumerate() {
        worksheet.write_string(0, col as u16, name.as_str())?;
    }

    let date_format = Format::new().set_num_format(DATE_NUM_FORMAT);
    for (r, row) in table.rows().iter().enumerate() {
        for (c, cell) in row.iter().enumerate() {
            let (r, c) = ((r + 1) as u32, c as u16);
            match cell {
                CellValue::Text(s) => {
                    worksheet.write_string(r, c, s.as_str())?;
                }
                CellValue::Number(n) => {
                    worksheet.write_number(r, c, *n)?;
                }
                CellValue::Date(d) => {
                    worksheet.write_datetime_with_format(r, c, d, &date_format)?;
                }
                CellValue::Null => {}
            }
        }
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
