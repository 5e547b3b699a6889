//! Dependency planning
//!
//! Every window and cross-tab bucket is its own computation context. Inside
//! a context, a column whose field is required by another column's field is
//! read from that field's dependency tree instead of being prepared again.
//! Dependency trees of one context are built from a single
//! [`SharedFields`] map, so a requirement common to several columns is
//! prepared once as well: each (field, context) pair is queried at most once.

use crate::fields::{
    get_full_dependency_list, ComputationFieldSpec, FieldContext, FieldRegistry, GroupKey, PreparedField, SharedFields,
};
use crate::report::columns::ParsedColumn;
use crate::report::crosstab::Crosstab;
use crate::report::error::{ReportError, ReportResult};
use crate::report::row::ReportRow;
use crate::report::time_series::DateWindow;
use crate::source::{DataSource, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Window and bucket a computation column is scoped to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ContextKey {
    window: Option<DateWindow>,
    crosstab: Option<String>,
}

impl ContextKey {
    fn of(column: &ParsedColumn) -> Self {
        Self {
            window: column.window,
            crosstab: column.crosstab_id.as_ref().map(|id| id.key()),
        }
    }
}

/// Prepared computation instances of one report run
#[derive(Debug, Default)]
pub struct DependencyPlan {
    /// Column name -> instance prepared for it
    prepared: HashMap<String, Arc<PreparedField>>,
    /// Column name -> column whose instance holds its value as a dependency
    sourced_from: HashMap<String, String>,
    contexts: usize,
}

impl DependencyPlan {
    /// Plan and prepare every computation column
    ///
    /// `base` carries the report-wide query context; each column's window
    /// and cross-tab bucket are folded into a copy of it.
    pub fn build(
        columns: &[&ParsedColumn],
        base: &FieldContext,
        crosstab: Option<&Crosstab>,
        registry: &FieldRegistry,
        source: &dyn DataSource,
    ) -> ReportResult<Self> {
        let mut groups: Vec<(ContextKey, Vec<&ParsedColumn>)> = Vec::new();
        for column in columns.iter().copied().filter(|c| c.is_computation()) {
            let key = ContextKey::of(column);
            match groups.iter_mut().find(|(k, _)| *k == key) {
                Some((_, members)) => members.push(column),
                None => groups.push((key, vec![column])),
            }
        }

        let mut plan = DependencyPlan {
            contexts: groups.len(),
            ..Default::default()
        };

        for (_, members) in &groups {
            let direct = mark_dependencies(members, registry)?;
            let context = Arc::new(context_for(members[0], base, crosstab));
            let mut shared = SharedFields::new();

            for column in members {
                if direct.contains_key(&column.name) {
                    continue;
                }
                let spec = match column.computation_field() {
                    Some(spec) => spec.clone(),
                    None => continue,
                };
                let field = match shared.get(spec.name()) {
                    Some(existing) => existing.clone(),
                    None => {
                        let field = Arc::new(PreparedField::with_shared(spec, registry, context.clone(), &mut shared)?);
                        shared.insert(field.name().to_string(), field.clone());
                        field
                    }
                };
                if !field.is_prepared() {
                    field.init_preparation(source)?;
                }
                plan.prepared.insert(column.name.clone(), field);
            }

            for name in direct.keys() {
                let mut owner = &direct[name];
                let mut seen = HashSet::new();
                while let Some(next) = direct.get(owner) {
                    if !seen.insert(owner.clone()) {
                        break;
                    }
                    owner = next;
                }
                plan.sourced_from.insert(name.clone(), owner.clone());
            }
        }

        tracing::info!(
            "Prepared {} computation fields over {} contexts, {} read from dependencies",
            plan.prepared.len(),
            plan.contexts,
            plan.sourced_from.len()
        );
        Ok(plan)
    }

    /// Number of independently prepared instances
    pub fn prepared_count(&self) -> usize {
        self.prepared.len()
    }

    /// Column whose instance provides `column`'s value, if not its own
    pub fn source_of(&self, column: &str) -> Option<&str> {
        self.sourced_from.get(column).map(String::as_str)
    }

    /// Cell value of a computation column for one group
    pub fn resolve(&self, column: &ParsedColumn, key: &GroupKey, row: &ReportRow) -> ReportResult<Value> {
        if let Some(owner) = self.sourced_from.get(&column.name) {
            let owner = self
                .prepared
                .get(owner)
                .ok_or_else(|| ReportError::NotPrepared(owner.clone()))?;
            return owner.dependency_value(&column.original_name, key, row);
        }
        self.prepared
            .get(&column.name)
            .ok_or_else(|| ReportError::NotPrepared(column.name.clone()))?
            .resolve(key, row)
    }
}

/// Columns of one context that another column already requires, mapped to
/// that column
fn mark_dependencies(
    members: &[&ParsedColumn],
    registry: &FieldRegistry,
) -> ReportResult<HashMap<String, String>> {
    let mut marked: HashMap<String, String> = HashMap::new();
    for column in members {
        let spec = match column.computation_field() {
            Some(spec) => spec,
            None => continue,
        };
        let required: HashSet<String> = get_full_dependency_list(spec.as_ref(), registry)?
            .iter()
            .map(|dep| dep.name().to_string())
            .collect();
        if required.is_empty() {
            continue;
        }

        for other in members {
            if other.name != column.name
                && required.contains(&other.original_name)
                && !marked.contains_key(&other.name)
            {
                tracing::debug!("{} is read from the dependencies of {}", other.name, column.name);
                marked.insert(other.name.clone(), column.name.clone());
            }
        }
    }
    Ok(marked)
}

fn context_for(column: &ParsedColumn, base: &FieldContext, crosstab: Option<&Crosstab>) -> FieldContext {
    let mut context = base.clone();
    if let Some(window) = column.window {
        context.window = Some(window);
    }
    if let (Some(id), Some(crosstab)) = (&column.crosstab_id, crosstab) {
        context.filters.extend(&crosstab.filter_for(id));
    }
    context
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::{ComputationField, Grouping};
    use crate::report::columns::{ColumnResolver, ColumnSpec};
    use crate::report::fixtures;
    use crate::source::CalculationMethod;

    fn base() -> FieldContext {
        FieldContext {
            entity: "sales".to_string(),
            date_field: Some("doc_date".to_string()),
            window: Some(DateWindow::new(fixtures::at(2020, 1, 1), fixtures::at(2021, 1, 1))),
            grouping: Grouping::Field("client".to_string()),
            ..Default::default()
        }
    }

    fn parse(registry: &FieldRegistry, source: &dyn DataSource, names: &[&str]) -> Vec<ParsedColumn> {
        let attributes = Default::default();
        let resolver = ColumnResolver {
            schema: source.schema(),
            entity: "sales",
            lookup_entity: "client",
            registry,
            attributes: &attributes,
            container: "test",
            custom_group_label: None,
        };
        let specs: Vec<ColumnSpec> = names.iter().map(|n| ColumnSpec::from(*n)).collect();
        resolver.check_columns(&specs).unwrap()
    }

    #[test]
    fn test_dependency_columns_are_not_prepared_twice() {
        let source = fixtures::CountingSource::new(fixtures::sales_source());
        let registry = FieldRegistry::with_defaults();
        let columns = parse(&registry, &source, &["__balance__", "__fb__", "__percent_to_total_balance__"]);
        let refs: Vec<&ParsedColumn> = columns.iter().collect();

        let plan = DependencyPlan::build(&refs, &base(), None, &registry, &source).unwrap();
        assert_eq!(plan.prepared_count(), 1);
        assert_eq!(plan.source_of("__fb__"), Some("__percent_to_total_balance__"));
        assert_eq!(plan.source_of("__balance__"), Some("__percent_to_total_balance__"));
        // percentage (ungrouped) + balance + opening balance
        assert_eq!(source.aggregate_calls(), 3);

        let row = ReportRow::new();
        let key = GroupKey::Key("3".to_string());
        assert_eq!(plan.resolve(&columns[0], &key, &row).unwrap(), Value::Float(900.0));
        assert_eq!(plan.resolve(&columns[1], &key, &row).unwrap(), Value::Float(0.0));
        assert_eq!(plan.resolve(&columns[2], &key, &row).unwrap(), Value::Float(50.0));
    }

    #[test]
    fn test_shared_requirement_is_queried_once_per_context() {
        let source = fixtures::CountingSource::new(fixtures::sales_source());
        let registry = FieldRegistry::with_defaults();
        registry
            .register(ComputationField::new("sales_net").requires("__fb__").into_ref(), false)
            .unwrap();
        registry
            .register(
                ComputationField::new("sales_qty")
                    .calculation(CalculationMethod::Sum, "quantity")
                    .requires("__fb__")
                    .into_ref(),
                false,
            )
            .unwrap();
        let columns = parse(&registry, &source, &["sales_net", "sales_qty"]);
        let refs: Vec<&ParsedColumn> = columns.iter().collect();

        let plan = DependencyPlan::build(&refs, &base(), None, &registry, &source).unwrap();
        assert_eq!(plan.prepared_count(), 2);
        // sales_net, sales_qty and one shared __fb__
        assert_eq!(source.aggregate_calls(), 3);

        let row = ReportRow::new();
        let key = GroupKey::Key("2".to_string());
        assert_eq!(plan.resolve(&columns[0], &key, &row).unwrap(), Value::Float(600.0));
        assert_eq!(plan.resolve(&columns[1], &key, &row).unwrap(), Value::Float(60.0));
    }

    #[test]
    fn test_contexts_are_planned_separately() {
        let source = fixtures::CountingSource::new(fixtures::sales_source());
        let registry = FieldRegistry::with_defaults();
        let columns = parse(&registry, &source, &["__total__", "__debit__"]);
        let mut windowed = columns.clone();
        for column in &mut windowed {
            column.window = Some(DateWindow::new(fixtures::at(2020, 1, 1), fixtures::at(2020, 2, 1)));
            column.name = format!("{}TS20200201", column.name);
        }
        let refs: Vec<&ParsedColumn> = columns.iter().chain(windowed.iter()).collect();

        let plan = DependencyPlan::build(&refs, &base(), None, &registry, &source).unwrap();
        assert_eq!(plan.prepared_count(), 2);
        assert_eq!(plan.source_of("__debit__TS20200201"), Some("__total__TS20200201"));

        let row = ReportRow::new();
        let key = GroupKey::Key("1".to_string());
        assert_eq!(plan.resolve(&windowed[0], &key, &row).unwrap(), Value::Float(100.0));
        assert_eq!(plan.resolve(&columns[0], &key, &row).unwrap(), Value::Float(300.0));
    }
}
