//! Row filters
//!
//! A `FilterSet` is a conjunction of `Predicate`s, each testing the value
//! found at a (possibly traversing) field path. Predicates can be built
//! directly or parsed from lookup keys such as `doc_date__gte`.

use crate::source::error::{SourceError, SourceResult};
use crate::source::value::Value;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Comparison applied to the value found at a predicate's path
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Exact(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    In(Vec<Value>),
    IsNull(bool),
}

impl Condition {
    /// Evaluate against a cell value
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Condition::Exact(Value::Null) => value.is_null(),
            Condition::Exact(target) => value.loosely_equals(target),
            Condition::Gt(target) => value.compare(target) == Some(Ordering::Greater),
            Condition::Gte(target) => matches!(
                value.compare(target),
                Some(Ordering::Greater) | Some(Ordering::Equal)
            ),
            Condition::Lt(target) => value.compare(target) == Some(Ordering::Less),
            Condition::Lte(target) => matches!(
                value.compare(target),
                Some(Ordering::Less) | Some(Ordering::Equal)
            ),
            Condition::In(targets) => {
                !value.is_null() && targets.iter().any(|t| value.loosely_equals(t))
            }
            Condition::IsNull(expected) => value.is_null() == *expected,
        }
    }

    /// Lookup suffix naming this condition
    pub fn lookup_name(&self) -> &'static str {
        match self {
            Condition::Exact(_) => "exact",
            Condition::Gt(_) => "gt",
            Condition::Gte(_) => "gte",
            Condition::Lt(_) => "lt",
            Condition::Lte(_) => "lte",
            Condition::In(_) => "in",
            Condition::IsNull(_) => "isnull",
        }
    }

    /// Whether this condition only ever tests for NULL-ness
    pub fn is_null_check(&self) -> bool {
        matches!(self, Condition::IsNull(_) | Condition::Exact(Value::Null))
    }
}

/// Right-hand side of a lookup: a single value or a list (for `__in`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LookupValue {
    Many(Vec<Value>),
    One(Value),
}

impl From<Value> for LookupValue {
    fn from(v: Value) -> Self {
        LookupValue::One(v)
    }
}

impl From<Vec<Value>> for LookupValue {
    fn from(v: Vec<Value>) -> Self {
        LookupValue::Many(v)
    }
}

/// A single test on a field path
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub path: String,
    pub condition: Condition,
    pub negated: bool,
}

impl Predicate {
    pub fn new(path: impl Into<String>, condition: Condition) -> Self {
        Self {
            path: path.into(),
            condition,
            negated: false,
        }
    }

    pub fn exact(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(path, Condition::Exact(value.into()))
    }

    pub fn gte(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(path, Condition::Gte(value.into()))
    }

    pub fn lt(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(path, Condition::Lt(value.into()))
    }

    pub fn in_list(path: impl Into<String>, values: Vec<Value>) -> Self {
        Self::new(path, Condition::In(values))
    }

    pub fn is_null(path: impl Into<String>, expected: bool) -> Self {
        Self::new(path, Condition::IsNull(expected))
    }

    /// Builder: invert the predicate (NULLs satisfy a negated comparison)
    pub fn negate(mut self) -> Self {
        self.negated = !self.negated;
        self
    }

    /// Parse a lookup key such as `client__name__in` or `doc_date__gte`
    ///
    /// A key without a recognised lookup suffix is an exact match on the
    /// whole path.
    pub fn from_lookup(key: &str, value: impl Into<LookupValue>) -> SourceResult<Self> {
        let value = value.into();
        let (path, lookup) = match key.rsplit_once("__") {
            Some((path, lookup))
                if matches!(lookup, "exact" | "gt" | "gte" | "lt" | "lte" | "in" | "isnull") =>
            {
                (path, lookup)
            }
            _ => (key, "exact"),
        };

        let condition = match (lookup, value) {
            ("in", LookupValue::Many(values)) => Condition::In(values),
            ("in", LookupValue::One(v)) => Condition::In(vec![v]),
            ("isnull", LookupValue::One(Value::Bool(b))) => Condition::IsNull(b),
            ("isnull", other) => {
                return Err(SourceError::Parse(format!(
                    "Lookup \"{}\" expects a boolean, got {:?}",
                    key, other
                )))
            }
            (_, LookupValue::Many(_)) => {
                return Err(SourceError::Parse(format!(
                    "Lookup \"{}\" expects a single value",
                    key
                )))
            }
            ("gt", LookupValue::One(v)) => Condition::Gt(v),
            ("gte", LookupValue::One(v)) => Condition::Gte(v),
            ("lt", LookupValue::One(v)) => Condition::Lt(v),
            ("lte", LookupValue::One(v)) => Condition::Lte(v),
            (_, LookupValue::One(v)) => Condition::Exact(v),
        };

        Ok(Self::new(path, condition))
    }

    /// Evaluate against the value found at `path`
    pub fn matches(&self, value: &Value) -> bool {
        self.condition.matches(value) != self.negated
    }
}

/// Conjunction of predicates
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FilterSet {
    predicates: Vec<Predicate>,
}

impl FilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: add a predicate
    pub fn and(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn push(&mut self, predicate: Predicate) {
        self.predicates.push(predicate);
    }

    /// Append every predicate of `other`
    pub fn extend(&mut self, other: &FilterSet) {
        self.predicates.extend(other.predicates.iter().cloned());
    }

    /// New set holding the predicates of both
    pub fn merged(&self, other: &FilterSet) -> FilterSet {
        let mut merged = self.clone();
        merged.extend(other);
        merged
    }

    /// Build from `(lookup key, value)` pairs
    pub fn from_lookups<I, K, V>(lookups: I) -> SourceResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<LookupValue>,
    {
        let mut set = FilterSet::new();
        for (key, value) in lookups {
            set.push(Predicate::from_lookup(key.as_ref(), value)?);
        }
        Ok(set)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Predicate> {
        self.predicates.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Predicate> {
        self.predicates.iter_mut()
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    pub fn len(&self) -> usize {
        self.predicates.len()
    }

    /// Values a non-negated predicate pins `path` to, if any
    ///
    /// `Exact` pins a single value and `In` pins its list.
    pub fn pinned_values(&self, path: &str) -> Option<Vec<Value>> {
        self.predicates
            .iter()
            .filter(|p| p.path == path && !p.negated)
            .find_map(|p| match &p.condition {
                Condition::Exact(v) if !v.is_null() => Some(vec![v.clone()]),
                Condition::In(values) => Some(values.clone()),
                _ => None,
            })
    }
}

impl From<Vec<Predicate>> for FilterSet {
    fn from(predicates: Vec<Predicate>) -> Self {
        Self { predicates }
    }
}
