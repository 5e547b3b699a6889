//! Scalar values flowing between the data source and report rows
//!
//! - `Value`: a single cell (number, text, date, ...)
//! - `Record`: one row fetched from an entity, keyed by field name or path

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Floats at or beyond 2^53 are keyed by their own formatting
const MAX_EXACT_FLOAT_INT: f64 = 9_007_199_254_740_992.0;

/// A row fetched from the data source, keyed by field name (or `a__b` path)
pub type Record = BTreeMap<String, Value>;

/// A single scalar cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
    /// Missing / SQL NULL
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Calendar date without time (declared before `DateTime` so untagged
    /// deserialization prefers it for `YYYY-MM-DD` strings)
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric view of the value; text is parsed when it looks like a number
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Numeric view, treating anything non-numeric as zero
    pub fn number_or_zero(&self) -> f64 {
        self.as_f64().unwrap_or(0.0)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Date-time view; a plain date is taken at midnight
    pub fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            Value::DateTime(dt) => Some(*dt),
            Value::Date(d) => d.and_hms_opt(0, 0, 0),
            _ => None,
        }
    }

    /// Stringified form used to key grouped aggregates and crosstab ids
    pub fn to_key(&self) -> String {
        match self {
            Value::Null => "None".to_string(),
            Value::Float(f) if f.fract() == 0.0 && f.abs() < MAX_EXACT_FLOAT_INT => format!("{}", *f as i64),
            other => other.to_string(),
        }
    }

    /// Negate numeric values, leaving everything else untouched
    pub fn negate(self) -> Self {
        match self {
            Value::Int(i) => Value::Int(-i),
            Value::Float(f) => Value::Float(-f),
            other => other,
        }
    }

    /// Compare two values across compatible types
    ///
    /// Numbers compare numerically regardless of int/float, dates compare
    /// against date-times at midnight, text compares lexicographically.
    /// Returns `None` for incompatible types or NULL.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => None,
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
            (a, b) if a.as_datetime().is_some() && b.as_datetime().is_some() => {
                a.as_datetime().partial_cmp(&b.as_datetime())
            }
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x.partial_cmp(&y),
                _ => None,
            },
        }
    }

    /// Equality used by filters (`1 == 1.0`, `date == datetime at midnight`)
    pub fn loosely_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Text(_), _) | (_, Value::Text(_)) => self.to_key() == other.to_key(),
            _ => self.compare(other) == Some(Ordering::Equal),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, ""),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Text(s) => write!(f, "{}", s),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Value::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S")),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::DateTime(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_key() {
        assert_eq!(Value::Int(3).to_key(), "3");
        assert_eq!(Value::Float(3.0).to_key(), "3");
        assert_eq!(Value::Float(2.5).to_key(), "2.5");
        assert_eq!(Value::from("sales").to_key(), "sales");
        assert_eq!(Value::Null.to_key(), "None");
        assert_eq!(Value::Float(-4096.0).to_key(), "-4096");
    }

    #[test]
    fn test_to_key_large_floats_stay_distinct() {
        let first = Value::Float(1e19).to_key();
        let second = Value::Float(2e19).to_key();
        assert_ne!(first, second);
        assert_eq!(first, "10000000000000000000");
        assert_ne!(Value::Float(f64::INFINITY).to_key(), Value::Float(f64::MAX).to_key());
    }

    #[test]
    fn test_compare_numbers_and_dates() {
        assert_eq!(Value::Int(2).compare(&Value::Float(2.5)), Some(Ordering::Less));

        let day = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let noon = day.and_hms_opt(12, 0, 0).unwrap();
        assert_eq!(Value::Date(day).compare(&Value::DateTime(noon)), Some(Ordering::Less));
        assert!(Value::Date(day).loosely_equals(&Value::DateTime(day.and_hms_opt(0, 0, 0).unwrap())));

        assert_eq!(Value::Null.compare(&Value::Int(1)), None);
        assert_eq!(Value::from("a").compare(&Value::Int(1)), None);
    }

    #[test]
    fn test_loose_equality_across_types() {
        assert!(Value::Int(1).loosely_equals(&Value::Float(1.0)));
        assert!(Value::Int(7).loosely_equals(&Value::from("7")));
        assert!(!Value::from("7").loosely_equals(&Value::from("8")));
    }

    #[test]
    fn test_json_shape() {
        let json = serde_json::to_string(&vec![
            Value::Int(1),
            Value::from("x"),
            Value::Null,
            Value::Date(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()),
        ])
        .unwrap();
        assert_eq!(json, r#"[1,"x",null,"2024-03-01"]"#);
    }
}
