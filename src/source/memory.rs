//! In-memory data source
//!
//! Tables are plain vectors of records; relations are followed through a
//! per-entity primary key index. Used for tests, CSV-loaded data and small
//! embedded datasets.

use crate::source::aggregate::Aggregation;
use crate::source::error::{SourceError, SourceResult};
use crate::source::filter::{FilterSet, Predicate};
use crate::source::schema::{ResolvedPath, Schema};
use crate::source::value::{Record, Value};
use crate::source::DataSource;
use std::collections::{HashMap, HashSet};

/// Data source holding every table in memory
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    schema: Schema,
    tables: HashMap<String, Vec<Record>>,
    /// entity -> primary key (as group key) -> row position
    pk_index: HashMap<String, HashMap<String, usize>>,
}

impl MemorySource {
    pub fn new(schema: Schema) -> Self {
        Self {
            schema,
            tables: HashMap::new(),
            pk_index: HashMap::new(),
        }
    }

    /// Append a record to an entity's table
    pub fn insert(&mut self, entity: &str, record: Record) -> SourceResult<()> {
        let pk = self.schema.get(entity)?.primary_key.clone();
        let table = self.tables.entry(entity.to_string()).or_default();
        if let Some(key) = record.get(&pk).filter(|v| !v.is_null()) {
            self.pk_index
                .entry(entity.to_string())
                .or_default()
                .insert(key.to_key(), table.len());
        }
        table.push(record);
        Ok(())
    }

    /// Builder: append several records
    pub fn with_rows(
        mut self,
        entity: &str,
        rows: impl IntoIterator<Item = Record>,
    ) -> SourceResult<Self> {
        for row in rows {
            self.insert(entity, row)?;
        }
        Ok(self)
    }

    /// Number of records stored for an entity
    pub fn len(&self, entity: &str) -> usize {
        self.tables.get(entity).map(Vec::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.tables.values().all(Vec::is_empty)
    }

    fn table(&self, entity: &str) -> SourceResult<&[Record]> {
        self.schema.get(entity)?;
        Ok(self.tables.get(entity).map(Vec::as_slice).unwrap_or(&[]))
    }

    fn find_by_pk(&self, entity: &str, key: &Value) -> Option<&Record> {
        let position = self.pk_index.get(entity)?.get(&key.to_key())?;
        self.tables.get(entity)?.get(*position)
    }

    /// Value found by following `resolved` from `record`
    fn value_at(&self, record: &Record, resolved: &ResolvedPath) -> Value {
        let mut current = record;
        for (_, relation) in &resolved.hops {
            let fk = match current.get(&relation.name) {
                Some(v) if !v.is_null() => v,
                _ => return Value::Null,
            };
            let target = match relation.related_entity.as_deref() {
                Some(target) => target,
                None => return Value::Null,
            };
            current = match self.find_by_pk(target, fk) {
                Some(row) => row,
                None => return Value::Null,
            };
        }
        current.get(&resolved.field.name).cloned().unwrap_or(Value::Null)
    }

    fn resolve_filters<'a>(
        &self,
        entity: &str,
        filters: &'a FilterSet,
    ) -> SourceResult<Vec<(ResolvedPath, &'a Predicate)>> {
        filters
            .iter()
            .map(|p| Ok((self.schema.resolve_path(entity, &p.path)?, p)))
            .collect()
    }

    fn matching<'a>(
        &'a self,
        entity: &str,
        filters: &FilterSet,
    ) -> SourceResult<Vec<&'a Record>> {
        let table = self.table(entity)?;
        let resolved = self.resolve_filters(entity, filters)?;
        Ok(table
            .iter()
            .filter(|record| {
                resolved
                    .iter()
                    .all(|(path, predicate)| predicate.matches(&self.value_at(record, path)))
            })
            .collect())
    }

    fn project(&self, record: &Record, fields: &[(String, ResolvedPath)]) -> Record {
        fields
            .iter()
            .map(|(name, path)| (name.clone(), self.value_at(record, path)))
            .collect()
    }

    fn resolve_fields(&self, entity: &str, fields: &[String]) -> SourceResult<Vec<(String, ResolvedPath)>> {
        let names = if fields.is_empty() {
            self.schema.get(entity)?.field_names()
        } else {
            fields.to_vec()
        };
        names
            .into_iter()
            .map(|name| {
                let path = self.schema.resolve_path(entity, &name)?;
                Ok((name, path))
            })
            .collect()
    }
}

impl DataSource for MemorySource {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn rows(&self, entity: &str, filters: &FilterSet, fields: &[String]) -> SourceResult<Vec<Record>> {
        let fields = self.resolve_fields(entity, fields)?;
        Ok(self
            .matching(entity, filters)?
            .into_iter()
            .map(|record| self.project(record, &fields))
            .collect())
    }

    fn aggregate(
        &self,
        entity: &str,
        filters: &FilterSet,
        aggregation: &Aggregation,
    ) -> SourceResult<Option<f64>> {
        let target = self.schema.resolve_path(entity, &aggregation.field)?;
        let values: Vec<Value> = self
            .matching(entity, filters)?
            .into_iter()
            .map(|record| self.value_at(record, &target))
            .collect();
        Ok(aggregation.method.compute(&values))
    }

    fn group_and_aggregate(
        &self,
        entity: &str,
        filters: &FilterSet,
        group_path: &str,
        aggregation: &Aggregation,
    ) -> SourceResult<HashMap<String, f64>> {
        let group = self.schema.resolve_path(entity, group_path)?;
        let target = self.schema.resolve_path(entity, &aggregation.field)?;

        let mut buckets: HashMap<String, Vec<Value>> = HashMap::new();
        for record in self.matching(entity, filters)? {
            buckets
                .entry(self.value_at(record, &group).to_key())
                .or_default()
                .push(self.value_at(record, &target));
        }

        Ok(buckets
            .into_iter()
            .filter_map(|(key, values)| aggregation.method.compute(&values).map(|v| (key, v)))
            .collect())
    }

    fn distinct_values(&self, entity: &str, filters: &FilterSet, path: &str) -> SourceResult<Vec<Value>> {
        let resolved = self.schema.resolve_path(entity, path)?;
        let mut seen = HashSet::new();
        let mut values = Vec::new();
        for record in self.matching(entity, filters)? {
            let value = self.value_at(record, &resolved);
            if seen.insert(value.to_key()) {
                values.push(value);
            }
        }
        Ok(values)
    }

    fn related_rows_matching(
        &self,
        entity: &str,
        ids: Option<&[Value]>,
        fields: &[String],
    ) -> SourceResult<Vec<Record>> {
        let pk = self.schema.get(entity)?.primary_key.clone();
        let fields = self.resolve_fields(entity, fields)?;
        let wanted: Option<HashSet<String>> = ids.map(|ids| ids.iter().map(Value::to_key).collect());

        let mut rows: Vec<&Record> = self
            .table(entity)?
            .iter()
            .filter(|record| match &wanted {
                Some(wanted) => record
                    .get(&pk)
                    .map(|v| wanted.contains(&v.to_key()))
                    .unwrap_or(false),
                None => true,
            })
            .collect();
        rows.sort_by(|a, b| {
            let (a, b) = (a.get(&pk).cloned().unwrap_or_default(), b.get(&pk).cloned().unwrap_or_default());
            a.compare(&b).unwrap_or(std::cmp::Ordering::Equal)
        });

        Ok(rows
            .into_iter()
            .map(|record| {
                let mut projected = self.project(record, &fields);
                projected
                    .entry(pk.clone())
                    .or_insert_with(|| record.get(&pk).cloned().unwrap_or_default());
                projected
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::aggregate::CalculationMethod;
    use crate::source::schema::{EntitySchema, FieldDef};

    fn record(pairs: &[(&str, Value)]) -> Record {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    fn source() -> MemorySource {
        let schema = Schema::new()
            .entity(EntitySchema::new("client").field(FieldDef::text("name")))
            .entity(
                EntitySchema::new("sales")
                    .field(FieldDef::relation("client", "client"))
                    .field(FieldDef::text("flag"))
                    .field(FieldDef::decimal("value")),
            );
        MemorySource::new(schema)
            .with_rows(
                "client",
                vec![
                    record(&[("id", Value::Int(2)), ("name", "Beta".into())]),
                    record(&[("id", Value::Int(1)), ("name", "Alpha".into())]),
                ],
            )
            .unwrap()
            .with_rows(
                "sales",
                vec![
                    record(&[("id", 1.into()), ("client", 2.into()), ("flag", "sales".into()), ("value", 10.0.into())]),
                    record(&[("id", 2.into()), ("client", 1.into()), ("flag", "sales".into()), ("value", 5.0.into())]),
                    record(&[("id", 3.into()), ("client", 2.into()), ("flag", "return".into()), ("value", 4.0.into())]),
                    record(&[("id", 4.into()), ("client", Value::Null), ("flag", Value::Null), ("value", 1.0.into())]),
                ],
            )
            .unwrap()
    }

    #[test]
    fn test_aggregate_with_filters() {
        let source = source();
        let sum = Aggregation::new(CalculationMethod::Sum, "value");
        let filters = FilterSet::new().and(Predicate::exact("flag", "sales"));
        assert_eq!(source.aggregate("sales", &filters, &sum).unwrap(), Some(15.0));

        let by_name = FilterSet::new().and(Predicate::exact("client__name", "Beta"));
        assert_eq!(source.aggregate("sales", &by_name, &sum).unwrap(), Some(14.0));

        let none = FilterSet::new().and(Predicate::exact("flag", "missing"));
        assert_eq!(source.aggregate("sales", &none, &sum).unwrap(), None);
    }

    #[test]
    fn test_group_and_aggregate() {
        let source = source();
        let sum = Aggregation::new(CalculationMethod::Sum, "value");
        let grouped = source
            .group_and_aggregate("sales", &FilterSet::new(), "client", &sum)
            .unwrap();
        assert_eq!(grouped.get("2"), Some(&14.0));
        assert_eq!(grouped.get("1"), Some(&5.0));
        assert_eq!(grouped.get("None"), Some(&1.0));
    }

    #[test]
    fn test_negated_in_keeps_nulls() {
        let source = source();
        let count = Aggregation::new(CalculationMethod::Count, "id");
        let filters = FilterSet::new().and(Predicate::in_list("flag", vec!["sales".into()]).negate());
        assert_eq!(source.aggregate("sales", &filters, &count).unwrap(), Some(2.0));
    }

    #[test]
    fn test_distinct_and_related_rows() {
        let source = source();
        let ids = source.distinct_values("sales", &FilterSet::new(), "client").unwrap();
        assert_eq!(ids, vec![Value::Int(2), Value::Int(1), Value::Null]);

        let rows = source
            .related_rows_matching("client", Some(&ids), &["name".to_string()])
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("id"), Some(&Value::Int(1)));
        assert_eq!(rows[0].get("name"), Some(&Value::from("Alpha")));

        let all = source.related_rows_matching("client", None, &[]).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_unknown_entity() {
        let source = source();
        let err = source.rows("nope", &FilterSet::new(), &[]).unwrap_err();
        assert!(matches!(err, SourceError::EntityNotFound(_)));
    }
}
