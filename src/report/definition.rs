//! TOML report definitions
//!
//! A [`ReportDefinition`] describes one report in a file so the CLI can run
//! it without code:
//!
//! ```toml
//! name = "client_balances"
//! entity = "sales"
//! date_field = "doc_date"
//! start_date = "2020-01-01"
//! end_date = "2021-01-01"
//! group_by = "client"
//! columns = ["name", "__balance__", { name = "__total__", verbose_name = "Sold" }]
//!
//! [filters]
//! flag__in = ["sales", "sales-return"]
//!
//! [time_series]
//! pattern = "monthly"
//! columns = ["__balance__"]
//! ```
//!
//! Dates are strings; lookup keys follow the `path__lookup` convention of
//! [`Predicate::from_lookup`](crate::source::Predicate::from_lookup).

use crate::config::ReportConfig;
use crate::fields::{ComputationField, FieldRegistry};
use crate::report::columns::{ColumnOptions, ColumnSpec};
use crate::report::error::{ConfigurationError, ReportError, ReportResult};
use crate::report::generator::{ReportBuilder, ReportGenerator};
use crate::report::response::ChartSettings;
use crate::report::time_series::{DateWindow, TimeSeriesPattern};
use crate::source::csv_import::parse_datetime;
use crate::source::{CalculationMethod, DataSource, EntitySchema, FilterSet, LookupValue, Schema, Value};
use chrono::NaiveDateTime;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// `path__lookup` -> value
pub type Lookups = BTreeMap<String, LookupValue>;

/// A column given by name or with display overrides
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ColumnDef {
    Name(String),
    Configured {
        name: String,
        #[serde(flatten)]
        options: ColumnOptions,
    },
}

impl From<&ColumnDef> for ColumnSpec {
    fn from(def: &ColumnDef) -> Self {
        match def {
            ColumnDef::Name(name) => ColumnSpec::Name(name.clone()),
            ColumnDef::Configured { name, options } => ColumnSpec::configured(name.clone(), options.clone()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WindowDef {
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimeSeriesDef {
    pub pattern: TimeSeriesPattern,
    #[serde(default)]
    pub columns: Vec<ColumnDef>,
    /// Windows of the `custom` pattern
    #[serde(default)]
    pub custom_dates: Vec<WindowDef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CrosstabDef {
    pub field: String,
    #[serde(default)]
    pub columns: Vec<ColumnDef>,
    #[serde(default)]
    pub ids: Vec<Value>,
    #[serde(default)]
    pub custom_filters: Vec<Lookups>,
    #[serde(default)]
    pub compute_remainder: Option<bool>,
}

/// Ad-hoc computation field, built with [`ComputationField::create`]
#[derive(Debug, Clone, Deserialize)]
pub struct FieldDefinition {
    pub method: CalculationMethod,
    pub field: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub verbose_name: Option<String>,
    #[serde(default = "default_summable")]
    pub is_summable: bool,
}

fn default_summable() -> bool {
    true
}

/// One report, as read from TOML
#[derive(Debug, Clone, Deserialize)]
pub struct ReportDefinition {
    pub name: String,
    #[serde(default)]
    pub title: Option<String>,
    pub entity: String,
    /// Entities declared inline, replacing the configured schema
    #[serde(default)]
    pub entities: Vec<EntitySchema>,
    #[serde(default)]
    pub date_field: Option<String>,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub group_by: Option<String>,
    #[serde(default)]
    pub columns: Vec<ColumnDef>,
    #[serde(default)]
    pub base_filters: Lookups,
    #[serde(default)]
    pub filters: Lookups,
    /// Negated lookups
    #[serde(default)]
    pub exclude: Lookups,
    #[serde(default)]
    pub plus_side: Lookups,
    #[serde(default)]
    pub minus_side: Lookups,
    #[serde(default)]
    pub custom_querysets: Vec<Lookups>,
    #[serde(default)]
    pub custom_group_label: Option<String>,
    #[serde(default)]
    pub time_series: Option<TimeSeriesDef>,
    #[serde(default)]
    pub crosstab: Option<CrosstabDef>,
    #[serde(default)]
    pub show_empty_records: Option<bool>,
    #[serde(default)]
    pub swap_sign: bool,
    #[serde(default)]
    pub limit_records: Option<usize>,
    #[serde(default)]
    pub fields: Vec<FieldDefinition>,
    #[serde(default)]
    pub charts: Vec<ChartSettings>,
}

fn lookups(lookups: &Lookups) -> ReportResult<FilterSet> {
    Ok(FilterSet::from_lookups(lookups.iter().map(|(k, v)| (k, v.clone())))?)
}

fn side(lookups_map: &Lookups) -> ReportResult<Option<FilterSet>> {
    if lookups_map.is_empty() {
        return Ok(None);
    }
    lookups(lookups_map).map(Some)
}

fn date(value: &str) -> ReportResult<NaiveDateTime> {
    parse_datetime(value).ok_or_else(|| ReportError::Definition(format!("invalid date \"{}\"", value)))
}

impl ReportDefinition {
    pub fn from_toml(content: &str) -> ReportResult<Self> {
        toml::from_str(content).map_err(|e| ReportError::Definition(e.to_string()))
    }

    pub fn load(path: &Path) -> ReportResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ReportError::Definition(format!("failed to read {:?}: {}", path, e)))?;
        Self::from_toml(&content)
    }

    /// Title used for charts
    pub fn title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.name)
    }

    /// Schema declared inline, if any
    pub fn schema(&self) -> Option<Schema> {
        if self.entities.is_empty() {
            return None;
        }
        Some(self.entities.iter().cloned().fold(Schema::new(), Schema::entity))
    }

    /// The global registry, or a private copy holding the ad-hoc fields
    pub fn registry(&self) -> ReportResult<Arc<FieldRegistry>> {
        if self.fields.is_empty() {
            return Ok(FieldRegistry::global());
        }
        let registry = FieldRegistry::with_defaults();
        for def in &self.fields {
            let field = ComputationField::create(
                &registry,
                def.method,
                &def.field,
                def.name.as_deref(),
                def.verbose_name.as_deref(),
                def.is_summable,
            )?;
            registry.register(field.into_ref(), false)?;
        }
        Ok(Arc::new(registry))
    }

    /// Builder with every option of this definition applied
    pub fn builder(&self, source: Arc<dyn DataSource>, config: &ReportConfig) -> ReportResult<ReportBuilder> {
        let mut builder = ReportGenerator::builder(source, self.entity.clone())
            .config(config)
            .name(self.name.clone())
            .registry(self.registry()?)
            .base_filters(lookups(&self.base_filters)?)
            .filters(lookups(&self.filters)?)
            .columns(self.columns.iter().map(ColumnSpec::from))
            .swap_sign(self.swap_sign);

        let mut exclude = lookups(&self.exclude)?;
        for predicate in exclude.iter_mut() {
            predicate.negated = true;
        }
        builder = builder.q_filters(exclude);

        if let Some(field) = &self.date_field {
            builder = builder.date_field(field.clone());
        }
        if let Some(start) = &self.start_date {
            builder = builder.start_date(date(start)?);
        }
        if let Some(end) = &self.end_date {
            builder = builder.end_date(date(end)?);
        }
        if let Some(group_by) = &self.group_by {
            builder = builder.group_by(group_by.clone());
        }
        if let Some(plus) = side(&self.plus_side)? {
            builder = builder.plus_side(plus);
        }
        if let Some(minus) = side(&self.minus_side)? {
            builder = builder.minus_side(minus);
        }
        if !self.custom_querysets.is_empty() {
            let sets = self.custom_querysets.iter().map(lookups).collect::<ReportResult<Vec<_>>>()?;
            builder = builder.group_by_custom_querysets(sets);
        }
        if let Some(label) = &self.custom_group_label {
            builder = builder.custom_group_label(label.clone());
        }
        if let Some(show) = self.show_empty_records {
            builder = builder.show_empty_records(show);
        }
        if let Some(limit) = self.limit_records {
            builder = builder.limit_records(limit);
        }

        if let Some(ts) = &self.time_series {
            let windows = ts
                .custom_dates
                .iter()
                .map(|w| Ok(DateWindow::new(date(&w.start)?, date(&w.end)?)))
                .collect::<ReportResult<Vec<_>>>()?;
            if ts.pattern == TimeSeriesPattern::Custom && windows.is_empty() {
                return Err(ConfigurationError::Misconfigured(
                    "custom time series need custom_dates".to_string(),
                )
                .into());
            }
            builder = builder
                .time_series_pattern(ts.pattern)
                .time_series_columns(ts.columns.iter().map(ColumnSpec::from))
                .time_series_custom_dates(windows);
        }

        if let Some(crosstab) = &self.crosstab {
            let custom = crosstab.custom_filters.iter().map(lookups).collect::<ReportResult<Vec<_>>>()?;
            builder = builder
                .crosstab_field(crosstab.field.clone())
                .crosstab_columns(crosstab.columns.iter().map(ColumnSpec::from))
                .crosstab_ids(crosstab.ids.clone())
                .crosstab_ids_custom_filters(custom);
            if let Some(remainder) = crosstab.compute_remainder {
                builder = builder.crosstab_compute_remainder(remainder);
            }
        }

        Ok(builder)
    }

    pub fn build(&self, source: Arc<dyn DataSource>, config: &ReportConfig) -> ReportResult<ReportGenerator> {
        self.builder(source, config)?.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::fixtures;

    const DEFINITION: &str = r#"
name = "client_balances"
title = "Balances"
entity = "sales"
date_field = "doc_date"
start_date = "2020-01-01"
end_date = "2020-04-01"
group_by = "client"
columns = ["name", { name = "__total__", verbose_name = "Sold" }, "__time_series__"]

[exclude]
flag = "sales-return"

[time_series]
pattern = "monthly"
columns = ["__balance__"]

[[fields]]
method = "count"
field = "id"
name = "orders"
verbose_name = "Orders"
is_summable = false

[[charts]]
type = "bar"
data_source = ["__total__"]
title_source = ["name"]
"#;

    #[test]
    fn test_parse_and_build() {
        let definition = ReportDefinition::from_toml(DEFINITION).unwrap();
        assert_eq!(definition.title(), "Balances");
        assert_eq!(definition.charts[0].chart_type, "bar");
        assert!(definition.registry().unwrap().contains("orders"));

        let source: Arc<dyn DataSource> = Arc::new(fixtures::sales_source());
        let report = definition.build(source, &ReportConfig::default()).unwrap();
        assert_eq!(report.name(), "client_balances");

        let columns = report.get_columns_data();
        assert_eq!(columns[1].verbose_name, "Sold");
        assert_eq!(columns.len(), 5);

        let data = report.get_report_data().unwrap();
        assert_eq!(data.len(), 2);
        assert_eq!(data[0].get("__total__"), Some(&Value::Float(300.0)));
        assert_eq!(data[0].get("__balance__TS20200301"), Some(&Value::Float(200.0)));
    }

    #[test]
    fn test_lookup_tables() {
        let definition = ReportDefinition::from_toml(
            r#"
name = "flags"
entity = "sales"

[filters]
flag__in = ["sales", "gift"]
client = 1

[crosstab]
field = "flag"
ids = ["sales"]
compute_remainder = false
columns = ["__total__"]
"#,
        )
        .unwrap();
        let source: Arc<dyn DataSource> = Arc::new(fixtures::flag_source());
        let report = definition
            .builder(source, &ReportConfig::default())
            .unwrap()
            .start_date(fixtures::at(2020, 1, 1))
            .end_date(fixtures::at(2021, 1, 1))
            .build()
            .unwrap();
        let data = report.get_report_data().unwrap();
        assert_eq!(data.len(), 1);
        assert_eq!(data[0].get("__total__CTsales"), Some(&Value::Float(1500.0)));
    }

    #[test]
    fn test_invalid_definitions() {
        assert!(matches!(
            ReportDefinition::from_toml("entity = 1"),
            Err(ReportError::Definition(_))
        ));

        let definition = ReportDefinition::from_toml(
            r#"
name = "bad"
entity = "sales"
start_date = "yesterday"
"#,
        )
        .unwrap();
        let source: Arc<dyn DataSource> = Arc::new(fixtures::sales_source());
        assert!(matches!(
            definition.build(source, &ReportConfig::default()),
            Err(ReportError::Definition(_))
        ));
    }
}
