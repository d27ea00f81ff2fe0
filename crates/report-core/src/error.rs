use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the billing report pipeline.
#[derive(Error, Debug)]
pub enum ReportError {
    /// An input file could not be opened, parsed, or contains no data.
    #[error("Failed to load {path}: {detail}")]
    Format { path: PathBuf, detail: String },

    /// A column the provider schema requires is absent from the input.
    #[error("Missing required column '{column}' ({context})")]
    Schema { column: String, context: String },

    /// A required numeric column holds data that cannot be treated as a number.
    #[error("Non-numeric data in column '{column}': {detail}")]
    Aggregation { column: String, detail: String },

    /// A workbook could not be written to disk.
    #[error("Failed to export {path}: {detail}")]
    Export { path: PathBuf, detail: String },

    /// A configuration value is missing or invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A JSON document could not be parsed.
    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// Pass-through for any raw I/O error that does not carry a path.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ReportError {
    /// Builds a [`ReportError::Format`] from a path and any displayable cause.
    pub fn format(path: impl Into<PathBuf>, detail: impl std::fmt::Display) -> Self {
        ReportError::Format {
            path: path.into(),
            detail: detail.to_string(),
        }
    }

    /// Builds a [`ReportError::Export`] from a path and any displayable cause.
    pub fn export(path: impl Into<PathBuf>, detail: impl std::fmt::Display) -> Self {
        ReportError::Export {
            path: path.into(),
            detail: detail.to_string(),
        }
    }

    /// Builds a [`ReportError::Schema`] for a missing column.
    pub fn schema(column: impl Into<String>, context: impl Into<String>) -> Self {
        ReportError::Schema {
            column: column.into(),
            context: context.into(),
        }
    }
}

/// Convenience alias used throughout the report crates.
pub type Result<T> = std::result::Result<T, ReportError>;
