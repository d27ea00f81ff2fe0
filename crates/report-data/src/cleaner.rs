//! Schema-driven cleaning of loaded billing tables.
//!
//! Applies the provider's row filter and column filter, in that order. Any
//! required column missing from the input surfaces here as a schema error
//! instead of an index panic further down the pipeline.

use report_core::error::Result;
use report_core::provider::{ColumnFilter, ProviderSchema};
use report_core::table::Table;
use tracing::info;

/// Apply the provider's cleaning rules to a freshly loaded table.
///
/// Returns the cleaned table and the number of rows the row filter removed.
/// An empty result is not an error; a file whose every row is filtered out
/// simply produces nothing to export.
pub fn clean_table(mut table: Table, schema: &ProviderSchema) -> Result<(Table, usize)> {
    let entity_idx = table.require_column(&schema.entity_key, "entity key")?;

    // Row filter: a row naming an entity but carrying no quantity is an
    // incomplete line item.
    let mut rows_dropped = 0usize;
    if let Some(quantity) = &schema.quantity_column {
        let quantity_idx = table.require_column(quantity, "row filter")?;
        rows_dropped = table
            .retain_rows(|row| row[entity_idx].is_null() || !row[quantity_idx].is_null());
        info!(
            "Removed {} rows with '{}' missing",
            rows_dropped, quantity
        );
    }

    // Column filter.
    match &schema.column_filter {
        ColumnFilter::Drop(names) => {
            // Validate the whole list before touching the table.
            for name in names {
                table.require_column(name, "drop list")?;
            }
            for name in names {
                table.remove_column(name);
            }
        }
        ColumnFilter::Keep(names) => {
            table.select_columns(names, "keep list")?;
        }
    }

    Ok((table, rows_dropped))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
