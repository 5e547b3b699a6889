//! Cross-tab expansion
//!
//! Replicates cross-tab computation fields once per dimension value, each
//! copy scoped by a filter on the dimension. An optional remainder bucket
//! collects every row whose dimension is outside the explicit ids.

use crate::source::{FilterSet, Predicate, Value};

/// Identifier of the synthetic remainder bucket
pub const REMAINDER_ID: &str = "----";

/// Label of the remainder bucket
pub const REMAINDER_LABEL: &str = "The remainder";

/// One cross-tab bucket
#[derive(Debug, Clone, PartialEq)]
pub enum CrosstabId {
    /// Rows whose dimension equals this value
    Id(Value),
    /// Rows matching the caller's n-th custom filter set
    Custom(usize),
    /// Rows whose dimension is none of the explicit ids
    Remainder,
}

impl CrosstabId {
    /// Key used in column names (`{field}CT{key}`)
    pub fn key(&self) -> String {
        match self {
            CrosstabId::Id(v) => v.to_key(),
            CrosstabId::Custom(i) => i.to_string(),
            CrosstabId::Remainder => REMAINDER_ID.to_string(),
        }
    }

    pub fn is_remainder(&self) -> bool {
        matches!(self, CrosstabId::Remainder)
    }

    /// Suffix appended to column names replicated for this bucket
    pub fn column_suffix(&self) -> String {
        format!("CT{}", self.key())
    }
}

/// Default human label of a field inside a bucket
pub fn crosstab_label(verbose_name: &str, dimension: &str, id: &CrosstabId) -> String {
    match id {
        CrosstabId::Remainder => REMAINDER_LABEL.to_string(),
        other => format!("{} {} {}", verbose_name, dimension, other.key()),
    }
}

/// Dimension plus the buckets to split it into
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Crosstab {
    /// Dimension path on the report entity (may traverse relations)
    pub field: String,
    pub ids: Vec<Value>,
    /// When set, replaces `ids` with one bucket per filter set
    pub custom_filters: Vec<FilterSet>,
    pub compute_remainder: bool,
}

impl Crosstab {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            ids: Vec::new(),
            custom_filters: Vec::new(),
            compute_remainder: true,
        }
    }

    /// Ordered buckets; the remainder comes last and never accompanies custom filters
    pub fn buckets(&self) -> Vec<CrosstabId> {
        if !self.custom_filters.is_empty() {
            return (0..self.custom_filters.len()).map(CrosstabId::Custom).collect();
        }
        let mut buckets: Vec<CrosstabId> = self.ids.iter().cloned().map(CrosstabId::Id).collect();
        if self.compute_remainder {
            buckets.push(CrosstabId::Remainder);
        }
        buckets
    }

    /// Filter restricting rows to one bucket
    pub fn filter_for(&self, id: &CrosstabId) -> FilterSet {
        match id {
            CrosstabId::Id(v) => FilterSet::new().and(Predicate::exact(self.field.clone(), v.clone())),
            CrosstabId::Remainder => FilterSet::new()
                .and(Predicate::in_list(self.field.clone(), self.ids.clone()).negate()),
            CrosstabId::Custom(i) => self.custom_filters.get(*i).cloned().unwrap_or_default(),
        }
    }
}
