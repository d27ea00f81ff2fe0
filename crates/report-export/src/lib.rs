//! Workbook persistence for the billing report pipeline.
//!
//! Renders finalized partitions into per-entity Excel workbooks under the
//! two export policies, and owns the low-level spreadsheet read/write
//! plumbing the rest of the workspace builds on.

pub mod exporter;
pub mod workbook;
