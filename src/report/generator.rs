//! Report generator
//!
//! [`ReportGenerator`] validates a report configuration, builds the base
//! rows to iterate, plans and prepares every computation field once, then
//! resolves one output row per base row.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tally::report::ReportGenerator;
//! use tally::source::{DataSource, MemorySource, Schema};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let source: Arc<dyn DataSource> = Arc::new(MemorySource::new(Schema::new()));
//! let report = ReportGenerator::builder(source, "sales")
//!     .group_by("client")
//!     .date_field("doc_date")
//!     .columns(["name", "__balance__"])
//!     .build()?;
//!
//! for row in report.get_report_data()? {
//!     println!("{:?}", row.get("__balance__"));
//! }
//! # Ok(())
//! # }
//! ```

use crate::config::ReportConfig;
use crate::fields::{FieldContext, FieldRegistry, GroupKey, Grouping};
use crate::report::columns::{
    expand_crosstab, time_series_copy, Attributes, ColumnResolver, ColumnSource, ColumnSpec, ParsedColumn,
    RowAttributeResolver, CROSSTAB_PLACEHOLDER, INDEX_COLUMN, TIME_SERIES_PLACEHOLDER,
};
use crate::report::crosstab::{Crosstab, REMAINDER_ID};
use crate::report::error::{ConfigurationError, ReportResult};
use crate::report::planner::DependencyPlan;
use crate::report::response::{get_chart_settings, ChartSettings, ColumnData, ReportMetadata, ReportResponse};
use crate::report::row::ReportRow;
use crate::report::time_series::{time_series_windows, DateWindow, TimeSeriesPattern};
use crate::source::{DataSource, FilterSet, Predicate, Record, ResolvedPath, Value};
use chrono::{Datelike, Local, NaiveDateTime};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Hook applied to every finished row
pub type RowFormatter = Arc<dyn Fn(ReportRow) -> ReportRow + Send + Sync>;

/// Default report name, used in errors and as the response slug
pub const DEFAULT_REPORT_NAME: &str = "ReportGenerator";

/// Builder for [`ReportGenerator`]
pub struct ReportBuilder {
    source: Arc<dyn DataSource>,
    entity: String,
    name: String,
    registry: Option<Arc<FieldRegistry>>,
    config: ReportConfig,
    base_filters: FilterSet,
    start_date: Option<NaiveDateTime>,
    end_date: Option<NaiveDateTime>,
    date_field: Option<String>,
    filters: FilterSet,
    q_filters: FilterSet,
    group_by: Option<String>,
    group_by_custom_querysets: Vec<FilterSet>,
    custom_group_label: Option<String>,
    columns: Vec<ColumnSpec>,
    time_series_pattern: Option<TimeSeriesPattern>,
    time_series_columns: Vec<ColumnSpec>,
    time_series_custom_dates: Vec<DateWindow>,
    crosstab_field: Option<String>,
    crosstab_columns: Vec<ColumnSpec>,
    crosstab_ids: Vec<Value>,
    crosstab_ids_custom_filters: Vec<FilterSet>,
    crosstab_compute_remainder: bool,
    show_empty_records: bool,
    swap_sign: bool,
    plus_side: Option<FilterSet>,
    minus_side: Option<FilterSet>,
    limit_records: Option<usize>,
    format_row: Option<RowFormatter>,
    attributes: Attributes,
}

impl ReportBuilder {
    fn new(source: Arc<dyn DataSource>, entity: impl Into<String>) -> Self {
        let config = ReportConfig::default();
        Self {
            source,
            entity: entity.into(),
            name: DEFAULT_REPORT_NAME.to_string(),
            registry: None,
            show_empty_records: config.show_empty_records,
            crosstab_compute_remainder: config.crosstab_compute_remainder,
            config,
            base_filters: FilterSet::new(),
            start_date: None,
            end_date: None,
            date_field: None,
            filters: FilterSet::new(),
            q_filters: FilterSet::new(),
            group_by: None,
            group_by_custom_querysets: Vec::new(),
            custom_group_label: None,
            columns: Vec::new(),
            time_series_pattern: None,
            time_series_columns: Vec::new(),
            time_series_custom_dates: Vec::new(),
            crosstab_field: None,
            crosstab_columns: Vec::new(),
            crosstab_ids: Vec::new(),
            crosstab_ids_custom_filters: Vec::new(),
            swap_sign: false,
            plus_side: None,
            minus_side: None,
            limit_records: None,
            format_row: None,
            attributes: Attributes::new(),
        }
    }

    /// Take defaults from configuration; call before the other setters
    pub fn config(mut self, config: &ReportConfig) -> Self {
        self.show_empty_records = config.show_empty_records;
        self.crosstab_compute_remainder = config.crosstab_compute_remainder;
        self.limit_records = self.limit_records.or(config.limit_records);
        self.config = config.clone();
        self
    }

    /// Name used in error messages and as the default response slug
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Registry for computation field lookups (the global one by default)
    pub fn registry(mut self, registry: Arc<FieldRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Restriction of the report's own row set
    pub fn base_filters(mut self, filters: FilterSet) -> Self {
        self.base_filters = filters;
        self
    }

    pub fn start_date(mut self, start: NaiveDateTime) -> Self {
        self.start_date = Some(start);
        self
    }

    pub fn end_date(mut self, end: NaiveDateTime) -> Self {
        self.end_date = Some(end);
        self
    }

    pub fn date_field(mut self, field: impl Into<String>) -> Self {
        self.date_field = Some(field.into());
        self
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.filters.push(predicate);
        self
    }

    pub fn filters(mut self, filters: FilterSet) -> Self {
        self.filters.extend(&filters);
        self
    }

    pub fn q_filters(mut self, filters: FilterSet) -> Self {
        self.q_filters.extend(&filters);
        self
    }

    pub fn group_by(mut self, path: impl Into<String>) -> Self {
        self.group_by = Some(path.into());
        self
    }

    /// One output row per filter set, in order
    pub fn group_by_custom_querysets(mut self, sets: Vec<FilterSet>) -> Self {
        self.group_by_custom_querysets = sets;
        self
    }

    pub fn custom_group_label(mut self, label: impl Into<String>) -> Self {
        self.custom_group_label = Some(label.into());
        self
    }

    pub fn column(mut self, column: impl Into<ColumnSpec>) -> Self {
        self.columns.push(column.into());
        self
    }

    pub fn columns<I, C>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<ColumnSpec>,
    {
        self.columns.extend(columns.into_iter().map(Into::into));
        self
    }

    pub fn time_series_pattern(mut self, pattern: TimeSeriesPattern) -> Self {
        self.time_series_pattern = Some(pattern);
        self
    }

    pub fn time_series_columns<I, C>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<ColumnSpec>,
    {
        self.time_series_columns.extend(columns.into_iter().map(Into::into));
        self
    }

    /// Windows used by [`TimeSeriesPattern::Custom`]
    pub fn time_series_custom_dates(mut self, windows: Vec<DateWindow>) -> Self {
        self.time_series_custom_dates = windows;
        self
    }

    pub fn crosstab_field(mut self, path: impl Into<String>) -> Self {
        self.crosstab_field = Some(path.into());
        self
    }

    pub fn crosstab_columns<I, C>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<ColumnSpec>,
    {
        self.crosstab_columns.extend(columns.into_iter().map(Into::into));
        self
    }

    pub fn crosstab_ids<I, V>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.crosstab_ids = ids.into_iter().map(Into::into).collect();
        self
    }

    /// One bucket per filter set instead of explicit ids
    pub fn crosstab_ids_custom_filters(mut self, sets: Vec<FilterSet>) -> Self {
        self.crosstab_ids_custom_filters = sets;
        self
    }

    pub fn crosstab_compute_remainder(mut self, compute: bool) -> Self {
        self.crosstab_compute_remainder = compute;
        self
    }

    /// List groups without any matching record (relation group-by only)
    pub fn show_empty_records(mut self, show: bool) -> Self {
        self.show_empty_records = show;
        self
    }

    /// Negate every computation value
    pub fn swap_sign(mut self, swap: bool) -> Self {
        self.swap_sign = swap;
        self
    }

    pub fn plus_side(mut self, filters: FilterSet) -> Self {
        self.plus_side = Some(filters);
        self
    }

    pub fn minus_side(mut self, filters: FilterSet) -> Self {
        self.minus_side = Some(filters);
        self
    }

    /// Plus and minus sides from document type lists on `path`
    pub fn doc_types(mut self, path: &str, plus: Vec<Value>, minus: Vec<Value>) -> Self {
        if !plus.is_empty() {
            self.plus_side = Some(FilterSet::new().and(Predicate::in_list(path, plus)));
        }
        if !minus.is_empty() {
            self.minus_side = Some(FilterSet::new().and(Predicate::in_list(path, minus)));
        }
        self
    }

    pub fn limit_records(mut self, limit: usize) -> Self {
        self.limit_records = Some(limit);
        self
    }

    pub fn format_row<F>(mut self, format: F) -> Self
    where
        F: Fn(ReportRow) -> ReportRow + Send + Sync + 'static,
    {
        self.format_row = Some(Arc::new(format));
        self
    }

    /// Register a per-row attribute column
    pub fn attribute<R>(mut self, name: impl Into<String>, resolver: R) -> Self
    where
        R: RowAttributeResolver + 'static,
    {
        self.attributes.insert(name.into(), Arc::new(resolver));
        self
    }

    /// Validate, build the base rows and prepare every computation field
    pub fn build(self) -> ReportResult<ReportGenerator> {
        ReportGenerator::from_builder(self)
    }
}

/// Where a block of columns sits in the display list
#[derive(Debug, Clone, Copy, PartialEq)]
enum LayoutItem {
    Column(usize),
    TimeSeries,
    Crosstab,
}

/// A validated report, ready to produce rows
pub struct ReportGenerator {
    name: String,
    entity: String,
    start_date: NaiveDateTime,
    end_date: NaiveDateTime,
    time_series_pattern: Option<TimeSeriesPattern>,
    crosstab_field: Option<String>,
    charts_engine: String,
    swap_sign: bool,
    format_row: Option<RowFormatter>,
    layout: Vec<LayoutItem>,
    parsed_columns: Vec<ParsedColumn>,
    time_series_parsed_columns: Vec<ParsedColumn>,
    crosstab_parsed_columns: Vec<ParsedColumn>,
    base_rows: Vec<(GroupKey, Record)>,
    plan: DependencyPlan,
    run_id: Uuid,
    span: tracing::Span,
}

impl ReportGenerator {
    pub fn builder(source: Arc<dyn DataSource>, entity: impl Into<String>) -> ReportBuilder {
        ReportBuilder::new(source, entity)
    }

    fn from_builder(options: ReportBuilder) -> ReportResult<Self> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("report", run_id = %run_id, entity = %options.entity);
        let _entered = span.clone().entered();
        let started = Instant::now();

        let source = options.source.clone();
        let schema = source.schema();
        let registry = options.registry.clone().unwrap_or_else(FieldRegistry::global);

        if options.entity.is_empty() {
            return Err(ConfigurationError::MissingReportModel.into());
        }
        let entity = options.entity.clone();
        let entity_schema = schema
            .get(&entity)
            .map_err(|_| ConfigurationError::Misconfigured(format!("unknown report entity {}", entity)))?;

        if options.time_series_pattern.is_some() && options.date_field.is_none() {
            return Err(ConfigurationError::MissingDateField.into());
        }
        if !options.time_series_columns.is_empty() && options.time_series_pattern.is_none() {
            return Err(ConfigurationError::Misconfigured(
                "time_series_columns need a time_series_pattern".to_string(),
            )
            .into());
        }
        if !options.crosstab_columns.is_empty() && options.crosstab_field.is_none() {
            return Err(ConfigurationError::Misconfigured("crosstab_columns need a crosstab_field".to_string()).into());
        }

        if let Some(date_field) = &options.date_field {
            schema.resolve_path(&entity, date_field).map_err(|_| {
                ConfigurationError::Misconfigured(format!("date field {} not found on {}", date_field, entity))
            })?;
        }

        let group_by: Option<ResolvedPath> = match &options.group_by {
            Some(path) => Some(schema.resolve_path(&entity, path).map_err(|_| {
                ConfigurationError::GroupByNotFound {
                    group_by: path.clone(),
                    entity: entity.clone(),
                }
            })?),
            None => None,
        };

        let crosstab = match &options.crosstab_field {
            Some(field) => {
                schema
                    .resolve_path(&entity, field)
                    .map_err(|_| ConfigurationError::CrosstabFieldNotFound {
                        field: field.clone(),
                        entity: entity.clone(),
                    })?;
                if options.crosstab_ids.iter().any(|id| id.to_key() == REMAINDER_ID) {
                    return Err(ConfigurationError::Misconfigured(format!(
                        "crosstab id {} is reserved for the remainder bucket",
                        REMAINDER_ID
                    ))
                    .into());
                }
                Some(Crosstab {
                    field: field.clone(),
                    ids: options.crosstab_ids.clone(),
                    custom_filters: options.crosstab_ids_custom_filters.clone(),
                    compute_remainder: options.crosstab_compute_remainder,
                })
            }
            None => None,
        };

        let now = Local::now().naive_local();
        let start_date = options
            .start_date
            .or_else(|| options.config.default_start_date.and_then(|d| d.and_hms_opt(0, 0, 0)))
            .or_else(|| now.date().with_day(1).and_then(|d| d.with_month(1)).and_then(|d| d.and_hms_opt(0, 0, 0)))
            .unwrap_or(now);
        let end_date = options
            .end_date
            .or_else(|| options.config.default_end_date.and_then(|d| d.and_hms_opt(0, 0, 0)))
            .unwrap_or(now);
        if start_date > end_date {
            return Err(ConfigurationError::Misconfigured(format!(
                "start_date {} is after end_date {}",
                start_date, end_date
            ))
            .into());
        }

        let custom_groups = !options.group_by_custom_querysets.is_empty();
        let related_entity = match &group_by {
            Some(resolved) if !custom_groups && resolved.is_relation() => resolved.target_entity(),
            _ => None,
        };
        let lookup_entity = related_entity.unwrap_or(&entity);

        let mut columns = options.columns.clone();
        if custom_groups && !columns.iter().any(|c| c.name() == INDEX_COLUMN) {
            columns.insert(0, ColumnSpec::from(INDEX_COLUMN));
        }

        let resolver = ColumnResolver {
            schema,
            entity: &entity,
            lookup_entity,
            registry: &registry,
            attributes: &options.attributes,
            container: &options.name,
            custom_group_label: options.custom_group_label.as_deref(),
        };
        let parsed_columns = resolver.check_columns(&columns)?;

        let mut layout = Vec::new();
        let mut position = 0;
        for column in &columns {
            match column.name() {
                TIME_SERIES_PLACEHOLDER if options.time_series_pattern.is_some() => {
                    layout.push(LayoutItem::TimeSeries)
                }
                CROSSTAB_PLACEHOLDER if crosstab.is_some() => layout.push(LayoutItem::Crosstab),
                TIME_SERIES_PLACEHOLDER | CROSSTAB_PLACEHOLDER => {}
                _ => {
                    layout.push(LayoutItem::Column(position));
                    position += 1;
                }
            }
        }
        if options.time_series_pattern.is_some() && !layout.contains(&LayoutItem::TimeSeries) {
            layout.push(LayoutItem::TimeSeries);
        }
        if crosstab.is_some() && !layout.contains(&LayoutItem::Crosstab) {
            layout.push(LayoutItem::Crosstab);
        }

        let crosstab_parsed_columns = match &crosstab {
            Some(crosstab) => {
                let base = resolver.check_computation_columns(&options.crosstab_columns)?;
                expand_crosstab(&base, crosstab, &crosstab.field)
            }
            None => Vec::new(),
        };

        let time_series_parsed_columns = match options.time_series_pattern {
            Some(pattern) => {
                let windows = time_series_windows(
                    pattern,
                    start_date,
                    end_date,
                    &options.time_series_custom_dates,
                )?;
                if windows.is_empty() {
                    return Err(ConfigurationError::Misconfigured(
                        "time series has no date windows".to_string(),
                    )
                    .into());
                }
                let base = resolver.check_computation_columns(&options.time_series_columns)?;
                let mut expanded = Vec::new();
                for index in 0..windows.len() {
                    for column in base.iter().chain(crosstab_parsed_columns.iter()) {
                        expanded.extend(time_series_copy(column, &windows, index, pattern));
                    }
                }
                tracing::debug!("Expanded {} time series windows ({})", windows.len(), pattern);
                expanded
            }
            None => Vec::new(),
        };

        let mut row_filters = options.filters.clone();
        row_filters.extend(&options.q_filters);

        let grouping = if custom_groups {
            Grouping::Custom(options.group_by_custom_querysets.clone())
        } else {
            match &options.group_by {
                Some(path) => Grouping::Field(path.clone()),
                None => Grouping::None,
            }
        };

        let base_context = FieldContext {
            entity: entity.clone(),
            base_filters: options.base_filters.clone(),
            date_field: options.date_field.clone(),
            window: Some(DateWindow::new(start_date, end_date)),
            filters: row_filters.clone(),
            grouping,
            plus_side: options.plus_side.clone(),
            minus_side: options.minus_side.clone(),
        };

        let mut base_rows = base_rows(
            source.as_ref(),
            &options,
            &base_context,
            &parsed_columns,
            related_entity,
        )?;
        if let Some(limit) = options.limit_records {
            base_rows.truncate(limit);
        }

        let all_columns: Vec<&ParsedColumn> = parsed_columns
            .iter()
            .chain(time_series_parsed_columns.iter())
            .chain(crosstab_parsed_columns.iter())
            .collect();
        let plan = DependencyPlan::build(&all_columns, &base_context, crosstab.as_ref(), &registry, source.as_ref())?;

        tracing::info!(
            "Built report {} on {}: {} rows, {} columns in {:?}",
            options.name,
            entity_schema.name,
            base_rows.len(),
            all_columns.len(),
            started.elapsed()
        );

        Ok(Self {
            name: options.name.clone(),
            entity,
            start_date,
            end_date,
            time_series_pattern: options.time_series_pattern,
            crosstab_field: options.crosstab_field.clone(),
            charts_engine: options.config.charts_engine.clone(),
            swap_sign: options.swap_sign,
            format_row: options.format_row.clone(),
            layout,
            parsed_columns,
            time_series_parsed_columns,
            crosstab_parsed_columns,
            base_rows,
            plan,
            run_id,
            span,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Effective `[start, end)` range
    pub fn date_range(&self) -> DateWindow {
        DateWindow::new(self.start_date, self.end_date)
    }

    /// Number of independently prepared computation instances
    pub fn prepared_count(&self) -> usize {
        self.plan.prepared_count()
    }

    /// One row per base row, in base row order
    pub fn get_report_data(&self) -> ReportResult<Vec<ReportRow>> {
        let _entered = self.span.enter();
        let columns: Vec<&ParsedColumn> = self
            .parsed_columns
            .iter()
            .chain(self.time_series_parsed_columns.iter())
            .chain(self.crosstab_parsed_columns.iter())
            .collect();

        let mut data = Vec::with_capacity(self.base_rows.len());
        for (key, record) in &self.base_rows {
            let mut row = ReportRow::new();
            for column in &columns {
                let value = match &column.source {
                    ColumnSource::Database { path, .. } => record.get(path).cloned().unwrap_or_default(),
                    ColumnSource::Computation(_) => {
                        let value = self.plan.resolve(column, key, &row)?;
                        if self.swap_sign {
                            value.negate()
                        } else {
                            value
                        }
                    }
                    ColumnSource::Attribute(resolver) => resolver.compute(record, &row)?,
                };
                row.insert(column.name.clone(), value);
            }
            if let Some(format_row) = &self.format_row {
                row = format_row(row);
            }
            data.push(row);
        }

        tracing::debug!("Resolved {} rows", data.len());
        Ok(data)
    }

    /// Display columns with time-series and cross-tab blocks in place
    pub fn get_list_display_columns(&self) -> Vec<&ParsedColumn> {
        let mut columns = Vec::new();
        for item in &self.layout {
            match item {
                LayoutItem::Column(i) => columns.extend(self.parsed_columns.get(*i)),
                LayoutItem::TimeSeries => columns.extend(self.time_series_parsed_columns.iter()),
                LayoutItem::Crosstab => columns.extend(self.crosstab_parsed_columns.iter()),
            }
        }
        columns
    }

    pub fn get_time_series_parsed_columns(&self) -> &[ParsedColumn] {
        &self.time_series_parsed_columns
    }

    pub fn get_crosstab_parsed_columns(&self) -> &[ParsedColumn] {
        &self.crosstab_parsed_columns
    }

    pub fn get_columns_data(&self) -> Vec<ColumnData> {
        self.get_list_display_columns()
            .into_iter()
            .map(|column| ColumnData {
                name: column.name.clone(),
                computation_field: column.original_name.clone(),
                verbose_name: column.verbose_name.clone(),
                visible: column.visible,
                column_type: column.column_type.clone(),
                is_summable: column.is_summable,
            })
            .collect()
    }

    pub fn get_metadata(&self) -> ReportMetadata {
        ReportMetadata {
            time_series_pattern: self.time_series_pattern.map(|p| p.name().to_string()),
            time_series_column_names: self.time_series_parsed_columns.iter().map(|c| c.name.clone()).collect(),
            time_series_column_verbose_names: self
                .time_series_parsed_columns
                .iter()
                .map(|c| c.verbose_name.clone())
                .collect(),
            crosstab_field: self.crosstab_field.clone().unwrap_or_default(),
            crosstab_column_names: self.crosstab_parsed_columns.iter().map(|c| c.name.clone()).collect(),
            crosstab_column_verbose_names: self
                .crosstab_parsed_columns
                .iter()
                .map(|c| c.verbose_name.clone())
                .collect(),
        }
    }

    pub fn get_chart_settings(&self, settings: Vec<ChartSettings>, default_title: Option<&str>) -> Vec<ChartSettings> {
        get_chart_settings(settings, default_title.unwrap_or(""), &self.charts_engine)
    }

    /// Rows, columns, metadata and charts in one payload
    ///
    /// Rows are generated unless `data` is given; the slug defaults to the
    /// report name.
    pub fn get_full_response(
        &self,
        data: Option<Vec<ReportRow>>,
        report_slug: Option<&str>,
        chart_settings: Vec<ChartSettings>,
        default_title: Option<&str>,
    ) -> ReportResult<ReportResponse> {
        let data = match data {
            Some(data) => data,
            None => self.get_report_data()?,
        };
        Ok(ReportResponse {
            report_slug: report_slug.unwrap_or(&self.name).to_string(),
            data,
            columns: self.get_columns_data(),
            metadata: self.get_metadata(),
            chart_settings: self.get_chart_settings(chart_settings, default_title),
        })
    }
}

impl std::fmt::Debug for ReportGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReportGenerator")
            .field("name", &self.name)
            .field("entity", &self.entity)
            .field("run_id", &self.run_id)
            .field("rows", &self.base_rows.len())
            .finish()
    }
}

/// Rows to iterate, each with the group it reads aggregates for
fn base_rows(
    source: &dyn DataSource,
    options: &ReportBuilder,
    context: &FieldContext,
    columns: &[ParsedColumn],
    related_entity: Option<&str>,
) -> ReportResult<Vec<(GroupKey, Record)>> {
    if !options.group_by_custom_querysets.is_empty() {
        return Ok((0..options.group_by_custom_querysets.len())
            .map(|i| {
                let mut record = Record::new();
                record.insert(INDEX_COLUMN.to_string(), Value::Int(i as i64));
                (GroupKey::Index(i), record)
            })
            .collect());
    }

    let database_columns: Vec<String> = columns
        .iter()
        .filter(|c| c.is_database())
        .map(|c| c.name.clone())
        .collect();

    let mut filters = context.base_filters.clone();
    if let (Some(field), Some(window)) = (&context.date_field, &context.window) {
        filters.push(Predicate::gte(field.clone(), window.start));
        filters.push(Predicate::lt(field.clone(), window.end));
    }
    filters.extend(&context.filters);

    match (&options.group_by, related_entity) {
        (Some(path), Some(target)) => {
            let pk = source.schema().get(target)?.primary_key.clone();
            let records = if options.show_empty_records {
                let pinned = context.filters.pinned_values(path);
                source.related_rows_matching(target, pinned.as_deref(), &database_columns)?
            } else {
                let ids: Vec<Value> = source
                    .distinct_values(&context.entity, &filters, path)?
                    .into_iter()
                    .filter(|v| !v.is_null())
                    .collect();
                source.related_rows_matching(target, Some(&ids), &database_columns)?
            };
            Ok(records
                .into_iter()
                .map(|record| {
                    let key = record.get(&pk).map(Value::to_key).unwrap_or_default();
                    (GroupKey::Key(key), record)
                })
                .collect())
        }
        (Some(path), None) => Ok(source
            .distinct_values(&context.entity, &filters, path)?
            .into_iter()
            .map(|value| {
                let key = GroupKey::Key(value.to_key());
                let mut record = Record::new();
                record.insert(path.clone(), value);
                (key, record)
            })
            .collect()),
        (None, _) if options.time_series_pattern.is_some() || database_columns.is_empty() => {
            Ok(vec![(GroupKey::All, Record::new())])
        }
        (None, _) => Ok(source
            .rows(&context.entity, &filters, &database_columns)?
            .into_iter()
            .map(|record| (GroupKey::All, record))
            .collect()),
    }
}
