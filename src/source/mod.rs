//! Queryable data source
//!
//! The report engine never talks to a database directly. It goes through the
//! [`DataSource`] trait, which offers filtering, scalar and grouped
//! aggregation, distinct values and related-row lookups.
//!
//! # Implementations
//! - [`MemorySource`]: tables held in memory (tests, CSV-loaded data)
//! - [`SqliteSource`]: a SQLite database, filters compiled to SQL

pub mod aggregate;
pub mod csv_import;
pub mod error;
pub mod filter;
pub mod memory;
pub mod schema;
pub mod sqlite;
pub mod value;

pub use aggregate::{Aggregation, CalculationMethod};
pub use csv_import::{CsvLoadResult, CsvLoader};
pub use error::{SourceError, SourceResult};
pub use filter::{Condition, FilterSet, LookupValue, Predicate};
pub use memory::MemorySource;
pub use schema::{EntitySchema, FieldDef, FieldKind, ResolvedPath, Schema, PATH_SEPARATOR};
pub use sqlite::SqliteSource;
pub use value::{Record, Value};

use std::collections::HashMap;

/// A relational store the report engine can query
///
/// Paths passed to these methods may traverse relations (`client__name`).
/// Grouped results are keyed by [`Value::to_key`] of the group value.
pub trait DataSource: Send + Sync {
    /// Entities and fields exposed by this source
    fn schema(&self) -> &Schema;

    /// Matching records of `entity`, projected onto `fields` (all own fields
    /// when empty), in storage order
    fn rows(&self, entity: &str, filters: &FilterSet, fields: &[String]) -> SourceResult<Vec<Record>>;

    /// Single aggregate over the matching records; `None` when there is
    /// nothing to aggregate
    fn aggregate(
        &self,
        entity: &str,
        filters: &FilterSet,
        aggregation: &Aggregation,
    ) -> SourceResult<Option<f64>>;

    /// Aggregate per distinct value of `group_path`
    fn group_and_aggregate(
        &self,
        entity: &str,
        filters: &FilterSet,
        group_path: &str,
        aggregation: &Aggregation,
    ) -> SourceResult<HashMap<String, f64>>;

    /// Distinct values of `path` among matching records, in order of first
    /// appearance
    fn distinct_values(&self, entity: &str, filters: &FilterSet, path: &str) -> SourceResult<Vec<Value>>;

    /// Rows of `entity` whose primary key is in `ids` (every row when
    /// `None`), ordered by primary key; the primary key is always included
    fn related_rows_matching(
        &self,
        entity: &str,
        ids: Option<&[Value]>,
        fields: &[String],
    ) -> SourceResult<Vec<Record>>;
}
