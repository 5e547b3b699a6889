//! Computation field definitions
//!
//! [`ComputationFieldSpec`] is the capability a report needs from a
//! computation field: what to aggregate, what it depends on, and how to turn
//! prepared aggregates into a cell value. [`ComputationField`] is the
//! configurable implementation used by every built-in field and by
//! [`ComputationField::create`].

use crate::fields::error::{RegistryError, RegistryResult};
use crate::fields::registry::FieldRegistry;
use crate::report::crosstab::{crosstab_label, CrosstabId};
use crate::report::error::{ConfigurationError, ReportError, ReportResult};
use crate::report::row::ReportRow;
use crate::report::time_series::{DateWindow, TimeSeriesPattern};
use crate::source::{CalculationMethod, FilterSet, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Shared handle to a computation field definition
pub type FieldRef = Arc<dyn ComputationFieldSpec>;

/// Which dates an aggregate covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DateScope {
    /// `[start, end)` of the report or window
    #[default]
    Window,
    /// Everything strictly before the start (opening balances)
    Before,
}

/// A dependency named in `requires`
#[derive(Debug, Clone)]
pub enum Requirement {
    /// Looked up in the registry
    Name(String),
    /// Referenced directly
    Field(FieldRef),
}

impl Requirement {
    pub fn name(&self) -> &str {
        match self {
            Requirement::Name(name) => name,
            Requirement::Field(field) => field.name(),
        }
    }

    pub fn resolve(&self, registry: &FieldRegistry) -> RegistryResult<FieldRef> {
        match self {
            Requirement::Name(name) => registry.get_field_by_name(name),
            Requirement::Field(field) => Ok(field.clone()),
        }
    }
}

impl From<&str> for Requirement {
    fn from(name: &str) -> Self {
        Requirement::Name(name.to_string())
    }
}

impl From<FieldRef> for Requirement {
    fn from(field: FieldRef) -> Self {
        Requirement::Field(field)
    }
}

/// Everything a field's `resolve` step may read for one row
pub struct ResolveInput<'a> {
    /// Name of the field being resolved
    pub field: &'a str,
    /// Plus-side aggregate for the current group (0 when missing)
    pub debit: f64,
    /// Minus-side aggregate for the current group (0 when missing)
    pub credit: f64,
    /// Values of the direct dependencies for the current group
    pub dependencies: &'a HashMap<String, Value>,
    /// Cells resolved so far for the current row
    pub row: &'a ReportRow,
    /// Report date field, if any
    pub date_field: Option<&'a str>,
}

impl ResolveInput<'_> {
    /// `debit - credit`
    pub fn net(&self) -> f64 {
        self.debit - self.credit
    }

    /// Value of a dependency, failing loudly if it was never prepared
    pub fn dependency(&self, name: &str) -> ReportResult<&Value> {
        self.dependencies
            .get(name)
            .ok_or_else(|| ReportError::DependencyMissing {
                field: self.field.to_string(),
                dependency: name.to_string(),
            })
    }
}

/// Capability interface of a computation field
pub trait ComputationFieldSpec: Send + Sync + fmt::Debug {
    /// Unique name within a registry
    fn name(&self) -> &str;

    fn verbose_name(&self) -> &str {
        self.name()
    }

    /// Field path being aggregated
    fn calculation_field(&self) -> &str {
        "value"
    }

    fn calculation_method(&self) -> CalculationMethod {
        CalculationMethod::Sum
    }

    fn requires(&self) -> Vec<Requirement> {
        Vec::new()
    }

    /// Type hint for the presentation layer
    fn column_type(&self) -> &str {
        "number"
    }

    fn is_summable(&self) -> bool {
        true
    }

    /// Aggregate over the whole filtered set even in grouped reports
    fn prevent_group_by(&self) -> bool {
        false
    }

    /// Overrides the report's plus side
    fn plus_side(&self) -> Option<&FilterSet> {
        None
    }

    /// Overrides the report's minus side
    fn minus_side(&self) -> Option<&FilterSet> {
        None
    }

    /// Applied before every aggregate of this field
    fn base_filters(&self) -> Option<&FilterSet> {
        None
    }

    fn date_scope(&self) -> DateScope {
        DateScope::Window
    }

    /// Turn prepared aggregates into the cell value
    fn resolve(&self, input: &ResolveInput<'_>) -> ReportResult<Value> {
        Ok(Value::Float(input.net()))
    }

    fn crosstab_verbose_name(&self, dimension: &str, id: &CrosstabId) -> String {
        crosstab_label(self.verbose_name(), dimension, id)
    }

    fn time_series_verbose_name(
        &self,
        window: &DateWindow,
        index: usize,
        _windows: &[DateWindow],
        pattern: TimeSeriesPattern,
    ) -> String {
        pattern.window_label(self.verbose_name(), window, index)
    }
}

/// How a [`ComputationField`] combines its aggregates
#[derive(Debug, Clone, PartialEq)]
pub enum Resolver {
    /// `debit - credit`
    Net,
    DebitOnly,
    CreditOnly,
    /// `debit - credit`, or 0 when the report has no date field
    OpeningBalance,
    /// `debit - credit + <opening>`
    ClosingBalance { opening: String },
    /// `<of> / (debit - credit) * 100`; NULL when the total is zero
    PercentageOfTotal { of: String },
}

/// Configurable computation field
#[derive(Debug, Clone)]
pub struct ComputationField {
    name: String,
    verbose_name: Option<String>,
    calculation_field: String,
    calculation_method: CalculationMethod,
    requires: Vec<Requirement>,
    column_type: String,
    is_summable: bool,
    prevent_group_by: bool,
    plus_side: Option<FilterSet>,
    minus_side: Option<FilterSet>,
    base_filters: Option<FilterSet>,
    date_scope: DateScope,
    resolver: Resolver,
}

impl ComputationField {
    /// Field summing `value` with no dependencies
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            verbose_name: None,
            calculation_field: "value".to_string(),
            calculation_method: CalculationMethod::Sum,
            requires: Vec::new(),
            column_type: "number".to_string(),
            is_summable: true,
            prevent_group_by: false,
            plus_side: None,
            minus_side: None,
            base_filters: None,
            date_scope: DateScope::Window,
            resolver: Resolver::Net,
        }
    }

    /// Build a field aggregating `field` with `method`
    ///
    /// Without a name the field is called `{method}__{field}` (for example
    /// `sum__value`), which must not already be registered.
    pub fn create(
        registry: &FieldRegistry,
        method: CalculationMethod,
        field: &str,
        name: Option<&str>,
        verbose_name: Option<&str>,
        is_summable: bool,
    ) -> RegistryResult<Self> {
        let name = match name {
            Some(name) => name.to_string(),
            None => {
                let name = format!("{}__{}", method.name(), field);
                if registry.contains(&name) {
                    return Err(RegistryError::AlreadyRegistered(name));
                }
                name
            }
        };
        let verbose_name = verbose_name
            .map(str::to_string)
            .unwrap_or_else(|| format!("{} {}", method.label(), field));

        Ok(Self::new(name)
            .verbose(verbose_name)
            .calculation(method, field)
            .summable(is_summable))
    }

    pub fn verbose(mut self, verbose_name: impl Into<String>) -> Self {
        self.verbose_name = Some(verbose_name.into());
        self
    }

    pub fn calculation(mut self, method: CalculationMethod, field: impl Into<String>) -> Self {
        self.calculation_method = method;
        self.calculation_field = field.into();
        self
    }

    pub fn requires(mut self, requirement: impl Into<Requirement>) -> Self {
        self.requires.push(requirement.into());
        self
    }

    pub fn column_type(mut self, column_type: impl Into<String>) -> Self {
        self.column_type = column_type.into();
        self
    }

    pub fn summable(mut self, is_summable: bool) -> Self {
        self.is_summable = is_summable;
        self
    }

    pub fn prevent_group_by(mut self, prevent: bool) -> Self {
        self.prevent_group_by = prevent;
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

    pub fn base_filters(mut self, filters: FilterSet) -> Self {
        self.base_filters = Some(filters);
        self
    }

    pub fn date_scope(mut self, scope: DateScope) -> Self {
        self.date_scope = scope;
        self
    }

    pub fn resolver(mut self, resolver: Resolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Wrap into a shared handle
    pub fn into_ref(self) -> FieldRef {
        Arc::new(self)
    }
}

impl ComputationFieldSpec for ComputationField {
    fn name(&self) -> &str {
        &self.name
    }

    fn verbose_name(&self) -> &str {
        self.verbose_name.as_deref().unwrap_or(&self.name)
    }

    fn calculation_field(&self) -> &str {
        &self.calculation_field
    }

    fn calculation_method(&self) -> CalculationMethod {
        self.calculation_method
    }

    fn requires(&self) -> Vec<Requirement> {
        self.requires.clone()
    }

    fn column_type(&self) -> &str {
        &self.column_type
    }

    fn is_summable(&self) -> bool {
        self.is_summable
    }

    fn prevent_group_by(&self) -> bool {
        self.prevent_group_by
    }

    fn plus_side(&self) -> Option<&FilterSet> {
        self.plus_side.as_ref()
    }

    fn minus_side(&self) -> Option<&FilterSet> {
        self.minus_side.as_ref()
    }

    fn base_filters(&self) -> Option<&FilterSet> {
        self.base_filters.as_ref()
    }

    fn date_scope(&self) -> DateScope {
        self.date_scope
    }

    fn resolve(&self, input: &ResolveInput<'_>) -> ReportResult<Value> {
        let value = match &self.resolver {
            Resolver::Net => input.net(),
            Resolver::DebitOnly => input.debit,
            Resolver::CreditOnly => input.credit,
            Resolver::OpeningBalance if input.date_field.is_none() => 0.0,
            Resolver::OpeningBalance => input.net(),
            Resolver::ClosingBalance { opening } => {
                input.net() + input.dependency(opening)?.number_or_zero()
            }
            Resolver::PercentageOfTotal { of } => {
                let part = input.dependency(of)?.number_or_zero();
                let total = input.net();
                if total == 0.0 {
                    return Ok(Value::Null);
                }
                part / total * 100.0
            }
        };
        Ok(Value::Float(value))
    }
}

/// Direct requirements of a field, resolved against the registry
pub fn required_fields(spec: &dyn ComputationFieldSpec, registry: &FieldRegistry) -> RegistryResult<Vec<FieldRef>> {
    spec.requires().iter().map(|r| r.resolve(registry)).collect()
}

/// Every field `spec` depends on, transitively, depth-first
///
/// A cycle fails with [`ConfigurationError::DependencyCycle`] naming the path.
pub fn get_full_dependency_list(
    spec: &dyn ComputationFieldSpec,
    registry: &FieldRegistry,
) -> ReportResult<Vec<FieldRef>> {
    fn walk(
        spec: &dyn ComputationFieldSpec,
        registry: &FieldRegistry,
        stack: &mut Vec<String>,
        out: &mut Vec<FieldRef>,
    ) -> ReportResult<()> {
        stack.push(spec.name().to_string());
        for dependency in required_fields(spec, registry)? {
            if stack.iter().any(|name| name == dependency.name()) {
                let mut path = stack.clone();
                path.push(dependency.name().to_string());
                return Err(ConfigurationError::DependencyCycle(path).into());
            }
            out.push(dependency.clone());
            walk(dependency.as_ref(), registry, stack, out)?;
        }
        stack.pop();
        Ok(())
    }

    let mut out = Vec::new();
    walk(spec, registry, &mut Vec::new(), &mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input<'a>(debit: f64, credit: f64, deps: &'a HashMap<String, Value>, row: &'a ReportRow) -> ResolveInput<'a> {
        ResolveInput {
            field: "test",
            debit,
            credit,
            dependencies: deps,
            row,
            date_field: Some("doc_date"),
        }
    }

    #[test]
    fn test_create_defaults() {
        let registry = FieldRegistry::new();
        let field =
            ComputationField::create(&registry, CalculationMethod::Sum, "value", None, None, true).unwrap();
        assert_eq!(field.name(), "sum__value");
        assert_eq!(field.verbose_name(), "Sum value");
        assert_eq!(field.calculation_field(), "value");

        registry.register(field.into_ref(), false).unwrap();
        let err = ComputationField::create(&registry, CalculationMethod::Sum, "value", None, None, true)
            .unwrap_err();
        assert_eq!(err, RegistryError::AlreadyRegistered("sum__value".to_string()));

        let named = ComputationField::create(
            &registry,
            CalculationMethod::Count,
            "id",
            Some("order_count"),
            Some("Orders"),
            false,
        )
        .unwrap();
        assert_eq!(named.name(), "order_count");
        assert_eq!(named.verbose_name(), "Orders");
        assert!(!named.is_summable());
    }

    #[test]
    fn test_resolvers() {
        let row = ReportRow::new();
        let mut deps = HashMap::new();
        deps.insert("__fb__".to_string(), Value::Float(50.0));
        deps.insert("__balance__".to_string(), Value::Float(25.0));

        let net = ComputationField::new("net");
        assert_eq!(net.resolve(&input(10.0, 4.0, &deps, &row)).unwrap(), Value::Float(6.0));

        let closing = ComputationField::new("closing").resolver(Resolver::ClosingBalance {
            opening: "__fb__".to_string(),
        });
        assert_eq!(closing.resolve(&input(10.0, 4.0, &deps, &row)).unwrap(), Value::Float(56.0));

        let percent = ComputationField::new("pct").resolver(Resolver::PercentageOfTotal {
            of: "__balance__".to_string(),
        });
        assert_eq!(percent.resolve(&input(100.0, 0.0, &deps, &row)).unwrap(), Value::Float(25.0));
        assert_eq!(percent.resolve(&input(0.0, 0.0, &deps, &row)).unwrap(), Value::Null);

        let missing = ComputationField::new("closing").resolver(Resolver::ClosingBalance {
            opening: "__nope__".to_string(),
        });
        let err = missing.resolve(&input(1.0, 0.0, &deps, &row)).unwrap_err();
        assert!(matches!(err, ReportError::DependencyMissing { .. }));
    }

    #[test]
    fn test_opening_balance_without_date_field() {
        let row = ReportRow::new();
        let deps = HashMap::new();
        let fb = ComputationField::new("fb").resolver(Resolver::OpeningBalance);
        let mut no_date = input(10.0, 0.0, &deps, &row);
        no_date.date_field = None;
        assert_eq!(fb.resolve(&no_date).unwrap(), Value::Float(0.0));
    }

    #[test]
    fn test_dependency_cycle() {
        let registry = FieldRegistry::new();
        registry
            .register(ComputationField::new("a").requires("b").into_ref(), false)
            .unwrap();
        registry
            .register(ComputationField::new("b").requires("a").into_ref(), false)
            .unwrap();
        let a = registry.get_field_by_name("a").unwrap();
        let err = get_full_dependency_list(a.as_ref(), &registry).unwrap_err();
        match err {
            ReportError::Configuration(ConfigurationError::DependencyCycle(path)) => {
                assert_eq!(path, vec!["a", "b", "a"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_full_dependency_list_is_transitive() {
        let registry = FieldRegistry::with_defaults();
        let pct = registry.get_field_by_name("__percent_to_total_balance__").unwrap();
        let names: Vec<String> = get_full_dependency_list(pct.as_ref(), &registry)
            .unwrap()
            .iter()
            .map(|f| f.name().to_string())
            .collect();
        assert_eq!(names, vec!["__balance__", "__fb__"]);
    }
}
