//! Aggregation primitives
//!
//! `CalculationMethod` names the operator, `Aggregation` binds it to a field
//! path. Both map directly onto SQL aggregate functions.

use crate::source::value::Value;
use serde::{Deserialize, Serialize};

/// Aggregation operator applied by a computation field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalculationMethod {
    /// Sum of values
    Sum,
    /// Count of non-null values
    Count,
    /// Average of values
    Avg,
    /// Maximum value
    Max,
    /// Minimum value
    Min,
}

impl CalculationMethod {
    /// Apply to a set of cells, ignoring NULLs
    ///
    /// `Count` of nothing is zero; every other operator yields `None` when
    /// there is no numeric input.
    pub fn compute<'a>(&self, values: impl IntoIterator<Item = &'a Value>) -> Option<f64> {
        let present: Vec<&Value> = values.into_iter().filter(|v| !v.is_null()).collect();
        if *self == Self::Count {
            return Some(present.len() as f64);
        }

        let numbers: Vec<f64> = present.iter().filter_map(|v| v.as_f64()).collect();
        if numbers.is_empty() {
            return None;
        }

        Some(match self {
            Self::Sum => numbers.iter().sum(),
            Self::Avg => numbers.iter().sum::<f64>() / numbers.len() as f64,
            Self::Max => numbers.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
            Self::Min => numbers.iter().cloned().fold(f64::INFINITY, f64::min),
            Self::Count => numbers.len() as f64,
        })
    }

    /// Parse from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "sum" => Some(Self::Sum),
            "count" => Some(Self::Count),
            "avg" | "average" => Some(Self::Avg),
            "max" => Some(Self::Max),
            "min" => Some(Self::Min),
            _ => None,
        }
    }

    /// Lowercase name used in annotations and default field names
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Count => "count",
            Self::Avg => "avg",
            Self::Max => "max",
            Self::Min => "min",
        }
    }

    /// Capitalized name used in default verbose names
    pub fn label(&self) -> &'static str {
        match self {
            Self::Sum => "Sum",
            Self::Count => "Count",
            Self::Avg => "Avg",
            Self::Max => "Max",
            Self::Min => "Min",
        }
    }

    /// SQL aggregate function
    pub fn sql_function(&self) -> &'static str {
        match self {
            Self::Sum => "SUM",
            Self::Count => "COUNT",
            Self::Avg => "AVG",
            Self::Max => "MAX",
            Self::Min => "MIN",
        }
    }
}

impl std::fmt::Display for CalculationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// An operator bound to the field path it aggregates
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Aggregation {
    pub method: CalculationMethod,
    pub field: String,
}

impl Aggregation {
    pub fn new(method: CalculationMethod, field: impl Into<String>) -> Self {
        Self {
            method,
            field: field.into(),
        }
    }

    /// Name of the aggregate in result rows, e.g. `value__sum`
    pub fn annotation(&self) -> String {
        format!("{}__{}", self.field, self.method)
    }
}
