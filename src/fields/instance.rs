//! Per-run computation field instances
//!
//! A [`PreparedField`] wraps a field definition for a single report run.
//! `init_preparation` runs the aggregate queries once (dependencies first)
//! and caches them; `resolve` then reads the cache for every row.
//!
//! Fields built against the same [`SharedFields`] map reuse one instance per
//! dependency name, so a requirement common to several fields of a context
//! is queried once.

use crate::fields::registry::FieldRegistry;
use crate::fields::spec::{required_fields, ComputationFieldSpec, DateScope, FieldRef, ResolveInput};
use crate::report::error::{ConfigurationError, ReportError, ReportResult};
use crate::report::row::ReportRow;
use crate::report::time_series::DateWindow;
use crate::source::{Aggregation, DataSource, FilterSet, Predicate, Value};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

/// How aggregates are split into groups
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Grouping {
    /// One aggregate over everything
    #[default]
    None,
    /// One aggregate per distinct value of a path
    Field(String),
    /// One aggregate per custom filter set, by position
    Custom(Vec<FilterSet>),
}

/// Group a row belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GroupKey {
    /// Ungrouped report
    All,
    /// Stringified group-by value
    Key(String),
    /// Position of a custom filter set
    Index(usize),
}

/// Cached aggregate of one side (debit or credit)
#[derive(Debug, Clone, PartialEq)]
pub enum AggregateResult {
    Scalar(Option<f64>),
    Grouped(HashMap<String, f64>),
    Positional(Vec<Option<f64>>),
}

impl AggregateResult {
    /// Value for a group; missing groups count as zero
    pub fn value_for(&self, key: &GroupKey) -> f64 {
        match (self, key) {
            (AggregateResult::Scalar(v), _) => v.unwrap_or(0.0),
            (AggregateResult::Grouped(map), GroupKey::Key(k)) => map.get(k).copied().unwrap_or(0.0),
            (AggregateResult::Positional(values), GroupKey::Index(i)) => {
                values.get(*i).copied().flatten().unwrap_or(0.0)
            }
            _ => 0.0,
        }
    }
}

/// Query context shared by a field and its dependencies
#[derive(Debug, Clone, Default)]
pub struct FieldContext {
    /// Entity the aggregates run on
    pub entity: String,
    /// Restriction of the report's own row set
    pub base_filters: FilterSet,
    pub date_field: Option<String>,
    /// Dates covered, `[start, end)`
    pub window: Option<DateWindow>,
    /// Report filters plus any cross-tab bucket filter
    pub filters: FilterSet,
    pub grouping: Grouping,
    pub plus_side: Option<FilterSet>,
    pub minus_side: Option<FilterSet>,
}

impl FieldContext {
    fn date_filters(&self, scope: DateScope) -> FilterSet {
        let (field, window) = match (&self.date_field, &self.window) {
            (Some(field), Some(window)) => (field, window),
            _ => return FilterSet::new(),
        };
        match scope {
            DateScope::Window => FilterSet::new()
                .and(Predicate::gte(field.clone(), window.start))
                .and(Predicate::lt(field.clone(), window.end)),
            DateScope::Before => FilterSet::new().and(Predicate::lt(field.clone(), window.start)),
        }
    }
}

/// Dependency instances of one context, by field name
pub type SharedFields = HashMap<String, Arc<PreparedField>>;

#[derive(Debug)]
struct Aggregates {
    debit: AggregateResult,
    credit: Option<AggregateResult>,
}

/// A computation field bound to one report run
#[derive(Debug)]
pub struct PreparedField {
    spec: FieldRef,
    context: Arc<FieldContext>,
    dependencies: Vec<Arc<PreparedField>>,
    aggregates: OnceLock<Aggregates>,
}

impl PreparedField {
    /// Instantiate a field and, recursively, its requirements
    pub fn new(spec: FieldRef, registry: &FieldRegistry, context: Arc<FieldContext>) -> ReportResult<Self> {
        Self::with_shared(spec, registry, context, &mut SharedFields::new())
    }

    /// Instantiate a field, taking requirements from `shared` when present
    /// and adding the ones it had to build
    ///
    /// Every field in `shared` must have been built for the same context.
    pub fn with_shared(
        spec: FieldRef,
        registry: &FieldRegistry,
        context: Arc<FieldContext>,
        shared: &mut SharedFields,
    ) -> ReportResult<Self> {
        Self::build(spec, registry, context, &mut Vec::new(), shared)
    }

    fn build(
        spec: FieldRef,
        registry: &FieldRegistry,
        context: Arc<FieldContext>,
        stack: &mut Vec<String>,
        shared: &mut SharedFields,
    ) -> ReportResult<Self> {
        if stack.iter().any(|name| name == spec.name()) {
            let mut path = stack.clone();
            path.push(spec.name().to_string());
            return Err(ConfigurationError::DependencyCycle(path).into());
        }

        stack.push(spec.name().to_string());
        let mut dependencies = Vec::new();
        for dep in required_fields(spec.as_ref(), registry)? {
            let instance = match shared.get(dep.name()) {
                Some(existing) => existing.clone(),
                None => {
                    let built = Arc::new(Self::build(dep, registry, context.clone(), stack, shared)?);
                    shared.insert(built.name().to_string(), built.clone());
                    built
                }
            };
            dependencies.push(instance);
        }
        stack.pop();

        Ok(Self {
            spec,
            context,
            dependencies,
            aggregates: OnceLock::new(),
        })
    }

    pub fn name(&self) -> &str {
        self.spec.name()
    }

    pub fn spec(&self) -> &FieldRef {
        &self.spec
    }

    pub fn is_prepared(&self) -> bool {
        self.aggregates.get().is_some()
    }

    /// Prepare every dependency not prepared yet, then run this field's own
    /// aggregates
    pub fn init_preparation(&self, source: &dyn DataSource) -> ReportResult<()> {
        if self.is_prepared() {
            return Err(ReportError::AlreadyPrepared(self.name().to_string()));
        }
        for dependency in &self.dependencies {
            if !dependency.is_prepared() {
                dependency.init_preparation(source)?;
            }
        }
        let aggregates = self.prepare(source)?;
        self.aggregates
            .set(aggregates)
            .map_err(|_| ReportError::AlreadyPrepared(self.name().to_string()))
    }

    fn prepare(&self, source: &dyn DataSource) -> ReportResult<Aggregates> {
        let context = self.context.clone();
        let spec = self.spec.clone();

        let mut filters = context.base_filters.clone();
        if let Some(base) = spec.base_filters() {
            filters.extend(base);
        }
        filters.extend(&context.date_filters(spec.date_scope()));
        filters.extend(&context.filters);

        let plus = spec.plus_side().or(context.plus_side.as_ref());
        let minus = spec.minus_side().or(context.minus_side.as_ref());
        let aggregation = Aggregation::new(spec.calculation_method(), spec.calculation_field());
        let ungrouped = Grouping::None;
        let grouping = if spec.prevent_group_by() {
            &ungrouped
        } else {
            &context.grouping
        };

        let mut debit_filters = filters.clone();
        if let Some(plus) = plus {
            debit_filters.extend(plus);
        }
        let debit = aggregate(source, &context.entity, &debit_filters, grouping, &aggregation)?;

        let credit = match minus {
            Some(minus) => {
                let credit_filters = filters.merged(minus);
                Some(aggregate(source, &context.entity, &credit_filters, grouping, &aggregation)?)
            }
            None => None,
        };

        tracing::debug!(
            "Prepared {} ({}) on {}",
            spec.name(),
            aggregation.annotation(),
            context.entity
        );
        Ok(Aggregates { debit, credit })
    }

    /// Value of this field for one group
    pub fn resolve(&self, key: &GroupKey, row: &ReportRow) -> ReportResult<Value> {
        let aggregates = self
            .aggregates
            .get()
            .ok_or_else(|| ReportError::NotPrepared(self.name().to_string()))?;

        let mut dependencies = HashMap::new();
        for dependency in &self.dependencies {
            dependencies.insert(dependency.name().to_string(), dependency.resolve(key, row)?);
        }

        let debit = aggregates.debit.value_for(key);
        let credit = aggregates.credit.as_ref().map(|c| c.value_for(key)).unwrap_or(0.0);

        self.spec.resolve(&ResolveInput {
            field: self.name(),
            debit,
            credit,
            dependencies: &dependencies,
            row,
            date_field: self.context.date_field.as_deref(),
        })
    }

    /// Prepared dependency with this name, searched depth-first
    pub fn find_dependency(&self, name: &str) -> Option<&PreparedField> {
        self.dependencies.iter().find_map(|dependency| {
            if dependency.name() == name {
                Some(dependency.as_ref())
            } else {
                dependency.find_dependency(name)
            }
        })
    }

    /// Resolve a dependency's value for one group
    pub fn dependency_value(&self, name: &str, key: &GroupKey, row: &ReportRow) -> ReportResult<Value> {
        self.find_dependency(name)
            .ok_or_else(|| ReportError::DependencyMissing {
                field: self.name().to_string(),
                dependency: name.to_string(),
            })?
            .resolve(key, row)
    }
}

fn aggregate(
    source: &dyn DataSource,
    entity: &str,
    filters: &FilterSet,
    grouping: &Grouping,
    aggregation: &Aggregation,
) -> ReportResult<AggregateResult> {
    Ok(match grouping {
        Grouping::None => AggregateResult::Scalar(source.aggregate(entity, filters, aggregation)?),
        Grouping::Field(path) => {
            AggregateResult::Grouped(source.group_and_aggregate(entity, filters, path, aggregation)?)
        }
        Grouping::Custom(sets) => AggregateResult::Positional(
            sets.iter()
                .map(|set| source.aggregate(entity, &filters.merged(set), aggregation))
                .collect::<Result<Vec<_>, _>>()?,
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::spec::ComputationField;
    use crate::report::fixtures;

    fn context(grouping: Grouping) -> Arc<FieldContext> {
        Arc::new(FieldContext {
            entity: "sales".to_string(),
            date_field: Some("doc_date".to_string()),
            window: Some(DateWindow::new(fixtures::at(2020, 1, 1), fixtures::at(2021, 1, 1))),
            grouping,
            ..Default::default()
        })
    }

    #[test]
    fn test_prepare_once_and_resolve_per_group() {
        let source = fixtures::sales_source();
        let registry = FieldRegistry::with_defaults();
        let spec = registry.get_field_by_name("__balance__").unwrap();
        let field =
            PreparedField::new(spec, &registry, context(Grouping::Field("client".to_string()))).unwrap();

        let row = ReportRow::new();
        assert!(matches!(
            field.resolve(&GroupKey::Key("1".into()), &row),
            Err(ReportError::NotPrepared(_))
        ));

        field.init_preparation(&source).unwrap();
        assert!(matches!(
            field.init_preparation(&source),
            Err(ReportError::AlreadyPrepared(_))
        ));

        assert_eq!(field.resolve(&GroupKey::Key("1".into()), &row).unwrap(), Value::Float(300.0));
        assert_eq!(field.resolve(&GroupKey::Key("3".into()), &row).unwrap(), Value::Float(900.0));
        // no transactions for this group
        assert_eq!(field.resolve(&GroupKey::Key("99".into()), &row).unwrap(), Value::Float(0.0));
    }

    #[test]
    fn test_dependency_lookup() {
        let source = fixtures::sales_source();
        let registry = FieldRegistry::with_defaults();
        let spec = registry.get_field_by_name("__percent_to_total_balance__").unwrap();
        let field =
            PreparedField::new(spec, &registry, context(Grouping::Field("client".to_string()))).unwrap();
        field.init_preparation(&source).unwrap();

        let row = ReportRow::new();
        let key = GroupKey::Key("3".into());
        assert_eq!(field.resolve(&key, &row).unwrap(), Value::Float(50.0));
        assert_eq!(field.dependency_value("__fb__", &key, &row).unwrap(), Value::Float(0.0));
        assert!(matches!(
            field.dependency_value("__debit__", &key, &row),
            Err(ReportError::DependencyMissing { .. })
        ));
    }

    #[test]
    fn test_shared_dependencies_are_prepared_once() {
        let source = fixtures::CountingSource::new(fixtures::sales_source());
        let registry = FieldRegistry::with_defaults();
        let context = context(Grouping::Field("client".to_string()));
        let mut shared = SharedFields::new();

        let balance = registry.get_field_by_name("__balance__").unwrap();
        let adjusted = ComputationField::new("adjusted").requires("__fb__").into_ref();
        let balance = PreparedField::with_shared(balance, &registry, context.clone(), &mut shared).unwrap();
        let adjusted = PreparedField::with_shared(adjusted, &registry, context, &mut shared).unwrap();
        assert_eq!(shared.len(), 1);
        assert!(Arc::ptr_eq(&shared["__fb__"], &balance.dependencies[0]));
        assert!(Arc::ptr_eq(&shared["__fb__"], &adjusted.dependencies[0]));

        balance.init_preparation(&source).unwrap();
        // balance and its opening balance
        assert_eq!(source.aggregate_calls(), 2);
        adjusted.init_preparation(&source).unwrap();
        assert_eq!(source.aggregate_calls(), 3);

        let row = ReportRow::new();
        let key = GroupKey::Key("1".into());
        assert_eq!(balance.resolve(&key, &row).unwrap(), Value::Float(300.0));
        assert_eq!(adjusted.resolve(&key, &row).unwrap(), Value::Float(300.0));
        assert_eq!(adjusted.dependency_value("__fb__", &key, &row).unwrap(), Value::Float(0.0));
    }

    #[test]
    fn test_custom_grouping_is_positional() {
        let source = fixtures::sales_source();
        let registry = FieldRegistry::new();
        let spec = ComputationField::new("qty")
            .calculation(crate::source::CalculationMethod::Sum, "quantity")
            .into_ref();
        let sets = vec![
            FilterSet::new().and(Predicate::exact("client", 1)),
            FilterSet::new().and(Predicate::in_list("client", vec![Value::Int(2), Value::Int(3)])),
            FilterSet::new().and(Predicate::exact("client", 99)),
        ];
        let field = PreparedField::new(spec, &registry, context(Grouping::Custom(sets))).unwrap();
        field.init_preparation(&source).unwrap();

        let row = ReportRow::new();
        assert_eq!(field.resolve(&GroupKey::Index(0), &row).unwrap(), Value::Float(30.0));
        assert_eq!(field.resolve(&GroupKey::Index(1), &row).unwrap(), Value::Float(150.0));
        assert_eq!(field.resolve(&GroupKey::Index(2), &row).unwrap(), Value::Float(0.0));
    }

    #[test]
    fn test_cycle_detected_on_build() {
        let registry = FieldRegistry::new();
        registry
            .register(ComputationField::new("a").requires("b").into_ref(), false)
            .unwrap();
        registry
            .register(ComputationField::new("b").requires("a").into_ref(), false)
            .unwrap();
        let a = registry.get_field_by_name("a").unwrap();
        let err = PreparedField::new(a, &registry, context(Grouping::None)).unwrap_err();
        assert!(matches!(
            err,
            ReportError::Configuration(ConfigurationError::DependencyCycle(_))
        ));
    }
}
