use chrono::NaiveDateTime;

use crate::error::{ReportError, Result};

/// A single dynamically typed cell value.
///
/// Loader output and Exporter input both speak this type; the pipeline never
/// commits to a per-column static type because billing exports routinely mix
/// numeric text, real numbers, and blank cells within one column.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    /// Free-form text.
    Text(String),
    /// A numeric value; integers are carried as `f64` like spreadsheets do.
    Number(f64),
    /// A date-time without timezone, as stored in spreadsheet cells.
    Date(NaiveDateTime),
    /// An empty cell.
    Null,
}

impl CellValue {
    /// True for [`CellValue::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    /// Numeric view of the cell.
    ///
    /// Text that parses as a number is coerced; spreadsheet readers deliver
    /// numeric-looking columns as text often enough that refusing to parse
    /// them would reject real exports. `Date` and `Null` have no numeric view.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            CellValue::Text(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    /// Text view of the cell, without any conversion.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            CellValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Renders the cell for filenames and log lines.
    ///
    /// Whole numbers render without a fractional part so account identifiers
    /// that arrive as spreadsheet floats (`12345678.0`) keep their original
    /// look. `Null` renders as the empty string.
    pub fn display_string(&self) -> String {
        match self {
            CellValue::Text(s) => s.clone(),
            CellValue::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    format!("{}", *n as i64)
                } else {
                    format!("{n}")
                }
            }
            CellValue::Date(d) => d.format("%Y-%m-%d %H:%M:%S").to_string(),
            CellValue::Null => String::new(),
        }
    }
}

/// An ordered set of named columns and the rows beneath them.
///
/// Every row holds exactly one cell per column; [`Table::push_row`] pads or
/// truncates so the invariant cannot be broken by ragged input files.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<CellValue>>,
}

impl Table {
    /// Creates an empty table with the given column names.
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Column names in order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// All rows in order.
    pub fn rows(&self) -> &[Vec<CellValue>] {
        &self.rows
    }

    /// Number of data rows.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Number of columns.
    pub fn width(&self) -> usize {
        self.columns.len()
    }

    /// True when the table holds no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Appends a row, padding with `Null` or truncating to the column count.
    pub fn push_row(&mut self, mut row: Vec<CellValue>) {
        row.resize(self.columns.len(), CellValue::Null);
        self.rows.push(row);
    }

    /// Position of a column by exact name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Position of a column, or a schema error naming the caller's context.
    pub fn require_column(&self, name: &str, context: &str) -> Result<usize> {
        self.column_index(name)
            .ok_or_else(|| ReportError::schema(name, context))
    }

    /// Cell at (row, column) position.
    pub fn cell(&self, row: usize, col: usize) -> &CellValue {
        &self.rows[row][col]
    }

    /// Keeps only rows the predicate accepts; returns how many were dropped.
    pub fn retain_rows<F>(&mut self, mut keep: F) -> usize
    where
        F: FnMut(&[CellValue]) -> bool,
    {
        let before = self.rows.len();
        self.rows.retain(|row| keep(row));
        before - self.rows.len()
    }

    /// Removes a column and returns its cells, or `None` if absent.
    pub fn remove_column(&mut self, name: &str) -> Option<Vec<CellValue>> {
        let idx = self.column_index(name)?;
        self.columns.remove(idx);
        Some(self.rows.iter_mut().map(|row| row.remove(idx)).collect())
    }

    /// Appends a column on the right, padding missing values with `Null`.
    pub fn add_column(&mut self, name: impl Into<String>, mut values: Vec<CellValue>) {
        values.resize(self.rows.len(), CellValue::Null);
        self.columns.push(name.into());
        for (row, value) in self.rows.iter_mut().zip(values) {
            row.push(value);
        }
    }

    /// Rebuilds the table keeping exactly the named columns, in list order.
    ///
    /// Fails with a schema error for any name the table does not have.
    pub fn select_columns(&mut self, names: &[String], context: &str) -> Result<()> {
        let indices = names
            .iter()
            .map(|name| self.require_column(name, context))
            .collect::<Result<Vec<_>>>()?;
        self.rows = self
            .rows
            .iter()
            .map(|row| indices.iter().map(|&i| row[i].clone()).collect())
            .collect();
        self.columns = names.to_vec();
        Ok(())
    }
}

/// One entity's finalized slice of the cleaned input, ready for export.
#[derive(Debug, Clone)]
pub struct Partition {
    /// Rendered entity-key value this partition was grouped under.
    pub entity_key: String,
    /// The partition's rows, including any derived columns and summary row.
    pub table: Table,
}
