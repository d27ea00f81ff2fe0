use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{ReportError, Result};

/// Cloud providers whose billing exports the pipeline understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Microsoft partner-center invoice reconciliation export.
    Azure,
    /// Tencent Cloud billing detail export.
    Tencent,
}

impl FromStr for Provider {
    type Err = ReportError;

    /// Case-insensitive construction from a string slice.
    ///
    /// Accepts `"azure"` and `"tencent"`; anything else is a
    /// [`ReportError::Config`].
    fn from_str(value: &str) -> Result<Self> {
        match value.to_lowercase().as_str() {
            "azure" => Ok(Provider::Azure),
            "tencent" => Ok(Provider::Tencent),
            other => Err(ReportError::Config(format!("unknown provider '{other}'"))),
        }
    }
}

/// How per-entity workbooks are written to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportPolicy {
    /// One long-lived workbook per entity; every run adds its period sheet.
    Append,
    /// A brand-new timestamped workbook per entity on every run.
    Timestamped,
}

impl FromStr for ExportPolicy {
    type Err = ReportError;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_lowercase().as_str() {
            "append" => Ok(ExportPolicy::Append),
            "timestamped" => Ok(ExportPolicy::Timestamped),
            other => Err(ReportError::Config(format!("unknown export policy '{other}'"))),
        }
    }
}

impl ExportPolicy {
    /// The canonical lowercase string identifier for this policy.
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportPolicy::Append => "append",
            ExportPolicy::Timestamped => "timestamped",
        }
    }
}

/// Which columns the cleaning stage keeps.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnFilter {
    /// Remove exactly these columns; everything else survives.
    Drop(Vec<String>),
    /// Retain exactly these columns, in this order; everything else goes.
    Keep(Vec<String>),
}

/// A synthetic column appended during aggregation.
#[derive(Debug, Clone, PartialEq)]
pub enum DerivedColumn {
    /// Per-row product of two numeric columns.
    Product {
        /// Name of the new column.
        name: String,
        /// Left operand column.
        left: String,
        /// Right operand column.
        right: String,
    },
    /// The same numeric value on every row.
    Constant {
        /// Name of the new column.
        name: String,
        /// Value filled into every row.
        value: f64,
    },
}

impl DerivedColumn {
    /// Name of the column this plan produces.
    pub fn name(&self) -> &str {
        match self {
            DerivedColumn::Product { name, .. } => name,
            DerivedColumn::Constant { name, .. } => name,
        }
    }
}

/// Drops a whole partition when any of its rows matches.
///
/// The rule column survives cleaning so the aggregation stage can evaluate
/// it; the aggregation stage strips it before the partition is finalized, so
/// it never appears in exported workbooks.
#[derive(Debug, Clone, PartialEq)]
pub struct ExclusionRule {
    /// Column inspected on every row of the partition.
    pub column: String,
    /// Cell text that marks the partition as excluded.
    pub value: String,
}

/// Text encoding of delimited input files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEncoding {
    /// Plain UTF-8.
    Utf8,
    /// GBK, the encoding Tencent's console produces CSV downloads in.
    Gbk,
}

/// Immutable pipeline configuration for one provider.
///
/// Providers are alternative configurations of the one pipeline, not
/// separate code paths; everything provider-specific lives in this struct.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSchema {
    /// Column whose values partition rows into per-entity segments.
    pub entity_key: String,
    /// Column that must be non-null for a row to survive cleaning, checked
    /// only on rows whose entity key is present. `None` disables the filter.
    pub quantity_column: Option<String>,
    /// Column retention rule.
    pub column_filter: ColumnFilter,
    /// Optional partition-level exclusion rule.
    pub exclusion: Option<ExclusionRule>,
    /// Derived columns, computed in order; later plans may reference the
    /// columns earlier plans produced.
    pub derived: Vec<DerivedColumn>,
    /// When set, a summary row is appended per partition holding the sum of
    /// this column in this column; all other cells stay empty.
    pub summary_column: Option<String>,
    /// Encoding used when the input is delimited text.
    pub encoding: InputEncoding,
    /// Subdirectory under the output root that receives this provider's
    /// workbooks.
    pub output_subdir: String,
    /// Export policy used when the command line does not override it.
    pub default_policy: ExportPolicy,
}

// ── Provider data ──────────────────────────────────────────────────────────────

/// Partner bookkeeping columns stripped from Azure exports before grouping.
const AZURE_PRUNED_COLUMNS: &[&str] = &[
    "PartnerId",
    "CustomerId",
    "InvoiceNumber",
    "MpnId",
    "PriceAdjustmentDescription",
    "EffectiveUnitPrice",
];

/// Columns retained from Tencent exports, in output order.
const TENCENT_KEPT_COLUMNS: &[&str] = &[
    "Owner Account ID",
    "ProductName",
    "SubproductName",
    "BillingMode",
    "ProjectName",
    "Region",
    "InstanceID",
    "InstanceName",
    "TransactionType",
    "TransactionTime",
    "Usage Start Time",
    "Usage End Time",
    "Configuration Description",
    "OriginalCost",
];

fn to_owned_list(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

impl Provider {
    /// The canonical lowercase string identifier for this provider.
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Azure => "azure",
            Provider::Tencent => "tencent",
        }
    }

    /// The full pipeline configuration for this provider.
    pub fn schema(&self) -> ProviderSchema {
        match self {
            Provider::Azure => ProviderSchema {
                entity_key: "CustomerName".to_string(),
                quantity_column: Some("Quantity".to_string()),
                column_filter: ColumnFilter::Drop(to_owned_list(AZURE_PRUNED_COLUMNS)),
                exclusion: Some(ExclusionRule {
                    column: "Bill to".to_string(),
                    value: "Accord".to_string(),
                }),
                derived: vec![
                    DerivedColumn::Product {
                        name: "Subtotal".to_string(),
                        left: "UnitPrice".to_string(),
                        right: "BillableQuantity".to_string(),
                    },
                    DerivedColumn::Product {
                        name: "Total".to_string(),
                        left: "UnitPrice".to_string(),
                        right: "BillableQuantity".to_string(),
                    },
                ],
                summary_column: Some("Total".to_string()),
                encoding: InputEncoding::Utf8,
                output_subdir: "azure".to_string(),
                default_policy: ExportPolicy::Append,
            },
            Provider::Tencent => ProviderSchema {
                entity_key: "Owner Account ID".to_string(),
                quantity_column: None,
                column_filter: ColumnFilter::Keep(to_owned_list(TENCENT_KEPT_COLUMNS)),
                exclusion: None,
                derived: vec![
                    DerivedColumn::Constant {
                        name: "Discount Multiplier".to_string(),
                        value: 1.0,
                    },
                    DerivedColumn::Product {
                        name: "Total Cost".to_string(),
                        left: "OriginalCost".to_string(),
                        right: "Discount Multiplier".to_string(),
                    },
                ],
                summary_column: None,
                encoding: InputEncoding::Gbk,
                output_subdir: "tencent".to_string(),
                default_policy: ExportPolicy::Timestamped,
            },
        }
    }
}
