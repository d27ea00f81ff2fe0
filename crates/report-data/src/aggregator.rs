//! Partitioning and financial derivation over cleaned tables.
//!
//! Groups cleaned rows by the provider's entity key, applies the partition
//! exclusion rule, computes derived columns, and appends the summary row
//! where the provider asks for one. Partitions come out in the order their
//! entity keys first appear in the input, so identical files always yield
//! identical output ordering.

use std::collections::HashMap;

use report_core::error::{ReportError, Result};
use report_core::provider::{DerivedColumn, ProviderSchema};
use report_core::table::{CellValue, Partition, Table};
use tracing::{debug, info};

// ── AggregateOutcome ──────────────────────────────────────────────────────────

/// Everything the aggregation stage produced for one run.
#[derive(Debug, Clone)]
pub struct AggregateOutcome {
    /// Finalized partitions in first-seen entity order.
    pub partitions: Vec<Partition>,
    /// Entity keys whose partitions the exclusion rule removed.
    pub excluded: Vec<String>,
    /// Rows skipped because their entity-key cell was empty.
    pub unkeyed_rows: usize,
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Partition a cleaned table and derive the provider's financial columns.
///
/// An empty outcome (every partition excluded, or no keyed rows at all) is
/// success; the caller decides what an empty run means. Non-numeric data in
/// a derived column's operands aborts with an aggregation error because it
/// signals a structurally bad input file, not one bad entity.
pub fn aggregate_table(table: &Table, schema: &ProviderSchema) -> Result<AggregateOutcome> {
    let entity_idx = table.require_column(&schema.entity_key, "partitioning")?;
    let rule_idx = match &schema.exclusion {
        Some(rule) => Some(table.require_column(&rule.column, "exclusion rule")?),
        None => None,
    };

    // Group row indices by entity key, remembering first-seen order.
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<usize>> = HashMap::new();
    let mut unkeyed_rows = 0usize;
    for (i, row) in table.rows().iter().enumerate() {
        let key_cell = &row[entity_idx];
        if key_cell.is_null() {
            unkeyed_rows += 1;
            continue;
        }
        let key = key_cell.display_string();
        if let Some(rows) = groups.get_mut(&key) {
            rows.push(i);
        } else {
            order.push(key.clone());
            groups.insert(key, vec![i]);
        }
    }
    if unkeyed_rows > 0 {
        debug!(
            "Skipped {} rows with no '{}' value",
            unkeyed_rows, schema.entity_key
        );
    }

    let mut partitions = Vec::new();
    let mut excluded = Vec::new();
    for key in order {
        let row_indices = &groups[&key];

        // Exclusion rule: one matching row removes the whole partition.
        if let (Some(idx), Some(rule)) = (rule_idx, &schema.exclusion) {
            let matches = row_indices
                .iter()
                .any(|&i| table.cell(i, idx).as_text() == Some(rule.value.as_str()));
            if matches {
                info!(
                    "Excluding '{}' ({} rows): '{}' is '{}'",
                    key,
                    row_indices.len(),
                    rule.column,
                    rule.value
                );
                excluded.push(key);
                continue;
            }
        }

        let mut partition_table = Table::new(table.columns().to_vec());
        for &i in row_indices {
            partition_table.push_row(table.rows()[i].clone());
        }

        // The rule column has served its purpose; it never reaches storage.
        if let Some(rule) = &schema.exclusion {
            partition_table.remove_column(&rule.column);
        }

        apply_derived_columns(&mut partition_table, &schema.derived)?;

        if let Some(total_column) = &schema.summary_column {
            append_summary_row(&mut partition_table, total_column)?;
        }

        partitions.push(Partition {
            entity_key: key,
            table: partition_table,
        });
    }

    debug!(
        "Formed {} partitions ({} excluded, {} unkeyed rows)",
        partitions.len(),
        excluded.len(),
        unkeyed_rows
    );

    Ok(AggregateOutcome {
        partitions,
        excluded,
        unkeyed_rows,
    })
}

// ── Derived columns ───────────────────────────────────────────────────────────

/// Compute the schema's derived columns in plan order.
///
/// Plans run against the live table, so a product may reference a column an
/// earlier plan produced.
fn apply_derived_columns(table: &mut Table, plans: &[DerivedColumn]) -> Result<()> {
    for plan in plans {
        match plan {
            DerivedColumn::Constant { name, value } => {
                let values = vec![CellValue::Number(*value); table.row_count()];
                table.add_column(name.clone(), values);
            }
            DerivedColumn::Product { name, left, right } => {
                let left_idx = table.require_column(left, "derived column")?;
                let right_idx = table.require_column(right, "derived column")?;
                let mut values = Vec::with_capacity(table.row_count());
                for (row_no, row) in table.rows().iter().enumerate() {
                    values.push(multiply_cells(
                        &row[left_idx],
                        &row[right_idx],
                        left,
                        right,
                        row_no,
                    )?);
                }
                table.add_column(name.clone(), values);
            }
        }
    }
    Ok(())
}

/// Per-row product with null propagation.
///
/// An empty operand yields an empty product, never zero; a non-empty operand
/// that has no numeric reading is an aggregation error naming the column.
fn multiply_cells(
    left: &CellValue,
    right: &CellValue,
    left_name: &str,
    right_name: &str,
    row_no: usize,
) -> Result<CellValue> {
    let operand = |cell: &CellValue, column: &str| -> Result<Option<f64>> {
        if cell.is_null() {
            return Ok(None);
        }
        match cell.as_number() {
            Some(n) => Ok(Some(n)),
            None => Err(ReportError::Aggregation {
                column: column.to_string(),
                detail: format!("row {} holds '{}'", row_no + 1, cell.display_string()),
            }),
        }
    };

    match (operand(left, left_name)?, operand(right, right_name)?) {
        (Some(a), Some(b)) => Ok(CellValue::Number(a * b)),
        _ => Ok(CellValue::Null),
    }
}

// ── Summary row ───────────────────────────────────────────────────────────────

/// Append the partition total as a final row.
///
/// Only the total-bearing column is populated; every other cell stays empty.
/// Rows without a numeric total are skipped by the sum.
fn append_summary_row(table: &mut Table, total_column: &str) -> Result<()> {
    let idx = table.require_column(total_column, "summary row")?;
    let sum: f64 = table
        .rows()
        .iter()
        .filter_map(|row| row[idx].as_number())
        .sum();

    let mut row = vec![CellValue::Null; table.width()];
    row[idx] = CellValue::Number(sum);
    table.push_row(row);
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
