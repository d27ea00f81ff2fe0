//! Pipeline stages for the billing report workspace.
//!
//! Responsible for loading one provider billing export, cleaning it against
//! the provider schema, partitioning it by entity and deriving the financial
//! columns, then handing the finished partitions to the export layer.
//! [`pipeline::run_report`] is the single entry point the binary consumes.

pub mod aggregator;
pub mod cleaner;
pub mod loader;
pub mod pipeline;

pub use report_core as core;
