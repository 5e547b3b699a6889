//! # Tally
//!
//! Tabular reporting over relational data: group rows, compute sums,
//! balances and percentages per group, and widen the table with one column
//! per date window (time series) or per dimension value (cross-tab).
//!
//! ## Features
//!
//! - **Computation fields**: reusable aggregates with dependencies, resolved
//!   once per report run
//! - **Time series**: daily to annual windows, or custom date ranges
//! - **Cross-tab**: per-value columns with an optional remainder bucket
//! - **Pluggable sources**: in-memory tables, CSV directories, SQLite
//!
//! ## Modules
//!
//! - [`source`]: schema, filters and the [`DataSource`] trait
//! - [`fields`]: computation fields and their registry
//! - [`report`]: report generation and TOML report definitions
//! - [`config`]: configuration files and environment overrides
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use tally::{ReportGenerator, Schema, SqliteSource};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let schema = Schema::load(Path::new("schema.toml"))?;
//!     let source = Arc::new(SqliteSource::open(Path::new("sales.db"), schema)?);
//!
//!     let report = ReportGenerator::builder(source, "sales")
//!         .group_by("client")
//!         .date_field("doc_date")
//!         .columns(["name", "__balance__"])
//!         .build()?;
//!
//!     for row in report.get_report_data()? {
//!         println!("{:?}", row);
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod fields;
pub mod report;
pub mod source;

// Re-export top-level types for convenience
pub use source::{
    CsvLoader, DataSource, EntitySchema, FieldDef, FieldKind, FilterSet, MemorySource, Predicate, Record, Schema,
    SourceError, SourceResult, SqliteSource, Value,
};

pub use fields::{ComputationField, ComputationFieldSpec, FieldRef, FieldRegistry, RegistryError};

pub use report::{
    ColumnSpec, ReportBuilder, ReportDefinition, ReportError, ReportGenerator, ReportResponse, ReportResult,
    ReportRow, TimeSeriesPattern,
};

pub use config::{Config, ConfigError, LoggingConfig, ReportConfig, SourceConfig, SourceKind};
