//! Column resolution
//!
//! Turns the raw column list of a report into [`ParsedColumn`]s, each tagged
//! with exactly one [`ColumnSource`]. Time-series and cross-tab columns are
//! expanded here too, one copy per window or bucket.

use crate::fields::{ComputationFieldSpec, FieldRef, FieldRegistry};
use crate::report::crosstab::{Crosstab, CrosstabId};
use crate::report::error::{ConfigurationError, ReportResult};
use crate::report::row::ReportRow;
use crate::report::time_series::{DateWindow, TimeSeriesPattern};
use crate::source::{FieldDef, Record, Schema, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Marks where time-series columns go in the display list
pub const TIME_SERIES_PLACEHOLDER: &str = "__time_series__";

/// Marks where cross-tab columns go in the display list
pub const CROSSTAB_PLACEHOLDER: &str = "__crosstab__";

/// Synthetic position column of custom group-by filter sets
pub const INDEX_COLUMN: &str = "__index__";

/// Per-column overrides
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnOptions {
    #[serde(default)]
    pub verbose_name: Option<String>,
    #[serde(default, rename = "type")]
    pub column_type: Option<String>,
    #[serde(default)]
    pub is_summable: Option<bool>,
    #[serde(default)]
    pub visible: Option<bool>,
}

/// One entry of a report's column list
#[derive(Debug, Clone)]
pub enum ColumnSpec {
    /// Registry name, attribute name or database path
    Name(String),
    /// A name with display overrides
    Configured { name: String, options: ColumnOptions },
    /// A computation field given directly
    Field(FieldRef),
}

impl ColumnSpec {
    pub fn configured(name: impl Into<String>, options: ColumnOptions) -> Self {
        ColumnSpec::Configured {
            name: name.into(),
            options,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ColumnSpec::Name(name) => name,
            ColumnSpec::Configured { name, .. } => name,
            ColumnSpec::Field(field) => field.name(),
        }
    }

    fn options(&self) -> Option<&ColumnOptions> {
        match self {
            ColumnSpec::Configured { options, .. } => Some(options),
            _ => None,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self.name(), TIME_SERIES_PLACEHOLDER | CROSSTAB_PLACEHOLDER)
    }
}

impl From<&str> for ColumnSpec {
    fn from(name: &str) -> Self {
        ColumnSpec::Name(name.to_string())
    }
}

impl From<String> for ColumnSpec {
    fn from(name: String) -> Self {
        ColumnSpec::Name(name)
    }
}

impl From<FieldRef> for ColumnSpec {
    fn from(field: FieldRef) -> Self {
        ColumnSpec::Field(field)
    }
}

/// Per-row logic that is not an aggregate
///
/// Receives the base record of the row and the cells resolved so far.
pub trait RowAttributeResolver: Send + Sync {
    fn compute(&self, record: &Record, row: &ReportRow) -> ReportResult<Value>;

    fn verbose_name(&self) -> Option<&str> {
        None
    }
}

impl<F> RowAttributeResolver for F
where
    F: Fn(&Record, &ReportRow) -> ReportResult<Value> + Send + Sync,
{
    fn compute(&self, record: &Record, row: &ReportRow) -> ReportResult<Value> {
        self(record, row)
    }
}

/// Attribute resolver carrying its own label
pub struct LabeledAttribute<F> {
    verbose_name: String,
    compute: F,
}

impl<F> LabeledAttribute<F>
where
    F: Fn(&Record, &ReportRow) -> ReportResult<Value> + Send + Sync,
{
    pub fn new(verbose_name: impl Into<String>, compute: F) -> Self {
        Self {
            verbose_name: verbose_name.into(),
            compute,
        }
    }
}

impl<F> RowAttributeResolver for LabeledAttribute<F>
where
    F: Fn(&Record, &ReportRow) -> ReportResult<Value> + Send + Sync,
{
    fn compute(&self, record: &Record, row: &ReportRow) -> ReportResult<Value> {
        (self.compute)(record, row)
    }

    fn verbose_name(&self) -> Option<&str> {
        Some(&self.verbose_name)
    }
}

/// Named attribute resolvers of a report
pub type Attributes = HashMap<String, Arc<dyn RowAttributeResolver>>;

/// Where a column's value comes from
#[derive(Clone)]
pub enum ColumnSource {
    /// Read from the base record; `field` is `None` for `__index__`
    Database { path: String, field: Option<FieldDef> },
    Computation(FieldRef),
    Attribute(Arc<dyn RowAttributeResolver>),
}

impl ColumnSource {
    /// Tag used in column metadata
    pub fn tag(&self) -> &'static str {
        match self {
            ColumnSource::Database { .. } => "database",
            ColumnSource::Computation(_) => "computation_field",
            ColumnSource::Attribute(_) => "container_attribute",
        }
    }
}

impl fmt::Debug for ColumnSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnSource::Database { path, .. } => f.debug_tuple("Database").field(path).finish(),
            ColumnSource::Computation(field) => f.debug_tuple("Computation").field(&field.name()).finish(),
            ColumnSource::Attribute(_) => f.write_str("Attribute"),
        }
    }
}

/// A resolved display column
#[derive(Debug, Clone)]
pub struct ParsedColumn {
    /// Key of the column in report rows
    pub name: String,
    pub verbose_name: String,
    pub source: ColumnSource,
    pub column_type: String,
    pub is_summable: bool,
    pub visible: bool,
    /// Name before any time-series or cross-tab suffix
    pub original_name: String,
    pub window: Option<DateWindow>,
    pub crosstab_id: Option<CrosstabId>,
}

impl ParsedColumn {
    pub fn computation_field(&self) -> Option<&FieldRef> {
        match &self.source {
            ColumnSource::Computation(field) => Some(field),
            _ => None,
        }
    }

    pub fn is_computation(&self) -> bool {
        self.computation_field().is_some()
    }

    pub fn is_database(&self) -> bool {
        matches!(self.source, ColumnSource::Database { .. })
    }

    pub fn is_remainder(&self) -> bool {
        self.crosstab_id.as_ref().map(CrosstabId::is_remainder).unwrap_or(false)
    }

    fn computation(field: FieldRef) -> Self {
        Self {
            name: field.name().to_string(),
            verbose_name: field.verbose_name().to_string(),
            column_type: field.column_type().to_string(),
            is_summable: field.is_summable(),
            visible: true,
            original_name: field.name().to_string(),
            window: None,
            crosstab_id: None,
            source: ColumnSource::Computation(field),
        }
    }

    fn apply(mut self, options: Option<&ColumnOptions>) -> Self {
        if let Some(options) = options {
            if let Some(verbose_name) = &options.verbose_name {
                self.verbose_name = verbose_name.clone();
            }
            if let Some(column_type) = &options.column_type {
                self.column_type = column_type.clone();
            }
            if let Some(is_summable) = options.is_summable {
                self.is_summable = is_summable;
            }
            if let Some(visible) = options.visible {
                self.visible = visible;
            }
        }
        self
    }
}

/// Classifies raw columns against a registry, attributes and a schema
pub struct ColumnResolver<'a> {
    pub schema: &'a Schema,
    /// Report entity, named in errors
    pub entity: &'a str,
    /// Entity database columns are looked up on
    pub lookup_entity: &'a str,
    pub registry: &'a FieldRegistry,
    pub attributes: &'a Attributes,
    /// Report name, named in errors
    pub container: &'a str,
    /// Verbose name of `__index__`
    pub custom_group_label: Option<&'a str>,
}

impl ColumnResolver<'_> {
    /// Parse every non-placeholder column, in order
    pub fn check_columns(&self, columns: &[ColumnSpec]) -> ReportResult<Vec<ParsedColumn>> {
        columns
            .iter()
            .filter(|column| !column.is_placeholder())
            .map(|column| self.parse(column))
            .collect()
    }

    /// Computation columns only; anything else is a configuration error
    pub fn check_computation_columns(&self, columns: &[ColumnSpec]) -> ReportResult<Vec<ParsedColumn>> {
        let parsed = self.check_columns(columns)?;
        if let Some(other) = parsed.iter().find(|column| !column.is_computation()) {
            return Err(ConfigurationError::Misconfigured(format!(
                "{} is not a computation field",
                other.name
            ))
            .into());
        }
        Ok(parsed)
    }

    pub fn parse(&self, column: &ColumnSpec) -> ReportResult<ParsedColumn> {
        let name = column.name();
        let options = column.options();

        if name == INDEX_COLUMN {
            let parsed = ParsedColumn {
                name: INDEX_COLUMN.to_string(),
                verbose_name: self.custom_group_label.unwrap_or(INDEX_COLUMN).to_string(),
                source: ColumnSource::Database {
                    path: INDEX_COLUMN.to_string(),
                    field: None,
                },
                column_type: "text".to_string(),
                is_summable: false,
                visible: true,
                original_name: INDEX_COLUMN.to_string(),
                window: None,
                crosstab_id: None,
            };
            return Ok(parsed.apply(options));
        }

        if let ColumnSpec::Field(field) = column {
            return Ok(ParsedColumn::computation(field.clone()).apply(options));
        }

        if self.registry.contains(name) {
            let field = self.registry.get_field_by_name(name)?;
            return Ok(ParsedColumn::computation(field).apply(options));
        }

        if let Some(resolver) = self.attributes.get(name) {
            let parsed = ParsedColumn {
                name: name.to_string(),
                verbose_name: resolver.verbose_name().unwrap_or(name).to_string(),
                source: ColumnSource::Attribute(resolver.clone()),
                column_type: "text".to_string(),
                is_summable: false,
                visible: true,
                original_name: name.to_string(),
                window: None,
                crosstab_id: None,
            };
            return Ok(parsed.apply(options));
        }

        let resolved = self
            .schema
            .resolve_path(self.lookup_entity, name)
            .map_err(|_| ConfigurationError::FieldNotFound {
                column: name.to_string(),
                container: self.container.to_string(),
                entity: self.lookup_entity.to_string(),
            })?;
        let parsed = ParsedColumn {
            name: name.to_string(),
            verbose_name: resolved.field.label().to_string(),
            column_type: resolved.field.kind.type_name().to_string(),
            is_summable: false,
            visible: true,
            original_name: name.to_string(),
            window: None,
            crosstab_id: None,
            source: ColumnSource::Database {
                path: name.to_string(),
                field: Some(resolved.field),
            },
        };
        Ok(parsed.apply(options))
    }
}

/// Copy of a column scoped to the `index`-th window
///
/// Cross-tab copies keep their bucket label and get the window appended.
pub fn time_series_copy(
    column: &ParsedColumn,
    windows: &[DateWindow],
    index: usize,
    pattern: TimeSeriesPattern,
) -> Option<ParsedColumn> {
    let window = windows.get(index)?;
    let mut copy = column.clone();
    copy.name = format!("{}{}", column.name, window.column_suffix());
    copy.verbose_name = match (column.computation_field(), &column.crosstab_id) {
        (_, Some(_)) => pattern.window_label(&column.verbose_name, window, index),
        (Some(field), None) => field.time_series_verbose_name(window, index, windows, pattern),
        (None, None) => column.verbose_name.clone(),
    };
    copy.window = Some(*window);
    Some(copy)
}

/// One copy of every column per window, window-major
pub fn expand_time_series(
    columns: &[ParsedColumn],
    windows: &[DateWindow],
    pattern: TimeSeriesPattern,
) -> Vec<ParsedColumn> {
    (0..windows.len())
        .flat_map(|index| {
            columns
                .iter()
                .filter_map(move |column| time_series_copy(column, windows, index, pattern))
        })
        .collect()
}

/// One copy of every column per bucket, bucket-major
pub fn expand_crosstab(columns: &[ParsedColumn], crosstab: &Crosstab, dimension: &str) -> Vec<ParsedColumn> {
    let buckets = crosstab.buckets();
    let mut expanded = Vec::with_capacity(columns.len() * buckets.len());
    for id in &buckets {
        for column in columns {
            let mut copy = column.clone();
            copy.name = format!("{}{}", column.name, id.column_suffix());
            if let Some(field) = column.computation_field() {
                copy.verbose_name = field.crosstab_verbose_name(dimension, id);
            }
            copy.crosstab_id = Some(id.clone());
            expanded.push(copy);
        }
    }
    expanded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::fixtures;
    use crate::source::DataSource;

    fn resolver<'a>(
        schema: &'a Schema,
        lookup_entity: &'a str,
        registry: &'a FieldRegistry,
        attributes: &'a Attributes,
    ) -> ColumnResolver<'a> {
        ColumnResolver {
            schema,
            entity: "sales",
            lookup_entity,
            registry,
            attributes,
            container: "ClientTotals",
            custom_group_label: Some("Segment"),
        }
    }

    #[test]
    fn test_classification_order() {
        let source = fixtures::sales_source();
        let registry = FieldRegistry::with_defaults();
        let mut attributes: Attributes = HashMap::new();
        attributes.insert(
            "label".to_string(),
            Arc::new(LabeledAttribute::new("Label", |_: &Record, _: &ReportRow| {
                Ok(Value::from("x"))
            })),
        );
        let resolver = resolver(source.schema(), "client", &registry, &attributes);

        let parsed = resolver
            .check_columns(&[
                ColumnSpec::from("name"),
                ColumnSpec::from(TIME_SERIES_PLACEHOLDER),
                ColumnSpec::from("__balance__"),
                ColumnSpec::from("label"),
                ColumnSpec::from(INDEX_COLUMN),
            ])
            .unwrap();

        let tags: Vec<&str> = parsed.iter().map(|c| c.source.tag()).collect();
        assert_eq!(tags, vec!["database", "computation_field", "container_attribute", "database"]);
        assert_eq!(parsed[1].verbose_name, "Closing Total");
        assert_eq!(parsed[2].verbose_name, "Label");
        assert_eq!(parsed[3].verbose_name, "Segment");
    }

    #[test]
    fn test_unknown_column_names_container_and_entity() {
        let source = fixtures::sales_source();
        let registry = FieldRegistry::with_defaults();
        let attributes = Attributes::new();
        let resolver = resolver(source.schema(), "client", &registry, &attributes);

        let err = resolver.parse(&ColumnSpec::from("doc_date")).unwrap_err();
        match err {
            crate::report::ReportError::Configuration(ConfigurationError::FieldNotFound {
                column,
                container,
                entity,
            }) => {
                assert_eq!(column, "doc_date");
                assert_eq!(container, "ClientTotals");
                assert_eq!(entity, "client");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_options_override() {
        let source = fixtures::sales_source();
        let registry = FieldRegistry::with_defaults();
        let attributes = Attributes::new();
        let resolver = resolver(source.schema(), "sales", &registry, &attributes);

        let parsed = resolver
            .parse(&ColumnSpec::configured(
                "__total__",
                ColumnOptions {
                    verbose_name: Some("Sold".to_string()),
                    visible: Some(false),
                    ..Default::default()
                },
            ))
            .unwrap();
        assert_eq!(parsed.verbose_name, "Sold");
        assert!(!parsed.visible);
        assert!(parsed.is_summable);

        let traversing = resolver.parse(&ColumnSpec::from("client__name")).unwrap();
        assert!(traversing.is_database());
        assert_eq!(traversing.column_type, "text");
    }

    #[test]
    fn test_expansions() {
        let registry = FieldRegistry::with_defaults();
        let total = ParsedColumn::computation(registry.get_field_by_name("__total__").unwrap());

        let windows = vec![
            DateWindow::new(fixtures::at(2020, 1, 1), fixtures::at(2020, 2, 1)),
            DateWindow::new(fixtures::at(2020, 2, 1), fixtures::at(2020, 3, 1)),
        ];
        let ts = expand_time_series(&[total.clone()], &windows, TimeSeriesPattern::Monthly);
        assert_eq!(ts.len(), 2);
        assert_eq!(ts[0].name, "__total__TS20200201");
        assert_eq!(ts[0].verbose_name, "Sum of value January 2020");
        assert_eq!(ts[1].original_name, "__total__");

        let mut crosstab = Crosstab::new("flag");
        crosstab.ids = vec![Value::from("sales")];
        let ct = expand_crosstab(&[total], &crosstab, "flag");
        assert_eq!(ct.len(), 2);
        assert_eq!(ct[0].name, "__total__CTsales");
        assert_eq!(ct[0].verbose_name, "Sum of value flag sales");
        assert_eq!(ct[1].name, "__total__CT----");
        assert!(ct[1].is_remainder());
        assert_eq!(ct[1].verbose_name, "The remainder");
    }
}
