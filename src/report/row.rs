//! Report rows
//!
//! A row keeps its cells in column order and serializes to a JSON object
//! with the same key order.

use crate::source::{Record, Value};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

/// One output row: column name -> value, in column order
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReportRow {
    cells: Vec<(String, Value)>,
}

impl ReportRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.cells.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    /// Set a cell, replacing an existing value in place
    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        match self.cells.iter_mut().find(|(k, _)| *k == name) {
            Some((_, existing)) => *existing = value,
            None => self.cells.push((name, value)),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.cells.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.cells.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

impl From<Record> for ReportRow {
    fn from(record: Record) -> Self {
        Self {
            cells: record.into_iter().collect(),
        }
    }
}

impl Serialize for ReportRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.cells.len()))?;
        for (k, v) in &self.cells {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}
