//! Report generation
//!
//! Builds tabular reports out of computation fields: one row per group,
//! optionally widened with one column per date window (time series) and per
//! dimension value (cross-tab).
//!
//! # Components
//! - [`ReportGenerator`]: validation, base rows, row resolution
//! - [`columns`]: column classification and time-series/cross-tab expansion
//! - [`DependencyPlan`]: prepares each (field, context) pair once
//! - [`ReportDefinition`]: reports described in TOML

pub mod columns;
pub mod crosstab;
pub mod definition;
pub mod error;
pub mod generator;
pub mod planner;
pub mod response;
pub mod row;
pub mod time_series;

#[cfg(test)]
pub(crate) mod fixtures;

pub use columns::{
    Attributes, ColumnOptions, ColumnSource, ColumnSpec, LabeledAttribute, ParsedColumn, RowAttributeResolver,
    CROSSTAB_PLACEHOLDER, INDEX_COLUMN, TIME_SERIES_PLACEHOLDER,
};
pub use crosstab::{Crosstab, CrosstabId, REMAINDER_ID, REMAINDER_LABEL};
pub use definition::ReportDefinition;
pub use error::{ConfigurationError, ReportError, ReportResult};
pub use generator::{ReportBuilder, ReportGenerator, RowFormatter};
pub use planner::DependencyPlan;
pub use response::{ChartSettings, ColumnData, ReportMetadata, ReportResponse, DEFAULT_CHARTS_ENGINE};
pub use row::ReportRow;
pub use time_series::{time_series_windows, DateWindow, TimeSeriesPattern};
