//! Billing export ingestion.
//!
//! Reads the single input file of a run and converts it into a [`Table`] for
//! the cleaning stage. The format is chosen by file extension: spreadsheets
//! are read with calamine, delimited text with the csv crate decoded from the
//! provider's encoding. No schema validation happens here; that is the
//! cleaning stage's job.

use std::path::Path;

use calamine::{open_workbook_auto, Data, DataType as _, Reader};
use report_core::error::{ReportError, Result};
use report_core::provider::InputEncoding;
use report_core::table::{CellValue, Table};
use tracing::{debug, warn};

// ── Public API ────────────────────────────────────────────────────────────────

/// Load a billing export into a [`Table`].
///
/// `.xlsx` and `.xls` files are read as spreadsheets (first sheet only, the
/// layout every observed export uses); `.csv` and `.txt` as delimited text in
/// `encoding`. Any other extension is a format error, as is an input with no
/// data rows below the header.
pub fn load_table(path: &Path, encoding: InputEncoding) -> Result<Table> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    let table = match ext.as_str() {
        "xlsx" | "xls" => load_spreadsheet(path)?,
        "csv" | "txt" => load_delimited(path, encoding)?,
        other => {
            return Err(ReportError::format(
                path,
                format!("unsupported file extension '{other}'"),
            ));
        }
    };

    if table.is_empty() {
        return Err(ReportError::format(path, "no data rows below the header"));
    }

    debug!(
        "Loaded {} rows x {} columns from {}",
        table.row_count(),
        table.width(),
        path.display()
    );
    Ok(table)
}

// ── Spreadsheet input ─────────────────────────────────────────────────────────

fn load_spreadsheet(path: &Path) -> Result<Table> {
    let mut workbook = open_workbook_auto(path).map_err(|e| ReportError::format(path, e))?;

    let sheet_names = workbook.sheet_names().to_vec();
    let Some(sheet_name) = sheet_names.first() else {
        return Err(ReportError::format(path, "workbook has no sheets"));
    };

    let range = workbook
        .worksheet_range(sheet_name)
        .map_err(|e| ReportError::format(path, e))?;

    let mut rows = range.rows();
    let Some(header) = rows.next() else {
        return Err(ReportError::format(path, "first sheet is empty"));
    };

    let columns: Vec<String> = header
        .iter()
        .map(|cell| match cell {
            Data::String(s) => s.trim().to_string(),
            Data::Empty => String::new(),
            other => format!("{}", other),
        })
        .collect();

    let mut table = Table::new(columns);
    let mut blank_rows = 0usize;
    for row in rows {
        // Ranges often trail off into rows of nothing but empty cells.
        if row.iter().all(|c| matches!(c, Data::Empty)) {
            blank_rows += 1;
            continue;
        }
        table.push_row(row.iter().map(convert_cell).collect());
    }
    if blank_rows > 0 {
        debug!("Skipped {} blank rows in {}", blank_rows, path.display());
    }

    Ok(table)
}

/// Map one spreadsheet cell into the pipeline's cell model.
///
/// Whitespace-only strings count as empty, matching how the exports use
/// padding cells. Formula error cells carry no usable value.
fn convert_cell(cell: &Data) -> CellValue {
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

// ── Delimited input ───────────────────────────────────────────────────────────

fn load_delimited(path: &Path, encoding: InputEncoding) -> Result<Table> {
    let bytes = std::fs::read(path).map_err(|e| ReportError::format(path, e))?;

    let codec = match encoding {
        InputEncoding::Utf8 => encoding_rs::UTF_8,
        InputEncoding::Gbk => encoding_rs::GBK,
    };
    let (text, _, had_errors) = codec.decode(&bytes);
    if had_errors {
        warn!(
            "{}: some bytes did not decode as {} and were replaced",
            path.display(),
            codec.name()
        );
    }

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| ReportError::format(path, e))?;
    let columns: Vec<String> = headers.iter().map(|h| h.trim().to_string()).collect();
    if columns.iter().all(|c| c.is_empty()) {
        return Err(ReportError::format(path, "file is empty"));
    }

    let mut table = Table::new(columns);
    for record in reader.records() {
        let record = record.map_err(|e| ReportError::format(path, e))?;
        if record.iter().all(|f| f.trim().is_empty()) {
            continue;
        }
        table.push_row(record.iter().map(csv_field_to_cell).collect());
    }

    Ok(table)
}

/// Map one delimited-text field into the pipeline's cell model.
///
/// Numeric-looking fields become numbers so the arithmetic columns behave the
/// same whichever container the export arrived in. Dates stay text; nothing
/// downstream computes on them.
fn csv_field_to_cell(field: &str) -> CellValue {
    let trimmed = field.trim();
    if trimmed.is_empty() {
        return CellValue::Null;
    }
    if let Ok(n) = trimmed.parse::<f64>() {
        return CellValue::Number(n);
    }
    CellValue::Text(field.to_string())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
