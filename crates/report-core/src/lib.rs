//! Core domain layer for the billing report pipeline.
//!
//! Defines the table model shared by every pipeline stage, the provider
//! schemas that parameterize cleaning and aggregation, reporting-period
//! arithmetic, CLI settings with last-used persistence, and the error
//! taxonomy used across the workspace.

pub mod error;
pub mod period;
pub mod provider;
pub mod settings;
pub mod table;

pub use error::{ReportError, Result};
