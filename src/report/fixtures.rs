//! Shared test data
//!
//! `sales` rows reference `client` rows; every row falls in 2020.
//!
//! | client | sales (value / quantity)                         |
//! |--------|--------------------------------------------------|
//! | 1 Acme | Jan, Feb, Mar: 100 / 10 each                     |
//! | 2      | Jan 400 / 40, May 200 / 20                       |
//! | 3      | Apr 600 / 60, Jun 300 / 30 flagged sales-return  |
//! | 4      | none                                             |

use crate::source::{
    Aggregation, DataSource, EntitySchema, FieldDef, FilterSet, MemorySource, Record, Schema, SourceResult,
    SqliteSource, Value,
};
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

pub fn at(year: i32, month: u32, day: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap()
}

pub fn schema() -> Schema {
    Schema::new()
        .entity(
            EntitySchema::new("client")
                .verbose("Client")
                .field(FieldDef::text("name").verbose("Client name")),
        )
        .entity(
            EntitySchema::new("sales")
                .field(FieldDef::relation("client", "client").verbose("Client"))
                .field(FieldDef::datetime("doc_date"))
                .field(FieldDef::decimal("quantity"))
                .field(FieldDef::decimal("value"))
                .field(FieldDef::text("flag")),
        )
}

fn client(id: i64, name: &str) -> Record {
    let mut record = Record::new();
    record.insert("id".to_string(), Value::Int(id));
    record.insert("name".to_string(), Value::from(name));
    record
}

fn sale(id: i64, client: i64, date: NaiveDateTime, quantity: f64, value: f64, flag: &str) -> Record {
    let mut record = Record::new();
    record.insert("id".to_string(), Value::Int(id));
    record.insert("client".to_string(), Value::Int(client));
    record.insert("doc_date".to_string(), Value::DateTime(date));
    record.insert("quantity".to_string(), Value::Float(quantity));
    record.insert("value".to_string(), Value::Float(value));
    record.insert("flag".to_string(), Value::from(flag));
    record
}

fn clients() -> Vec<Record> {
    vec![
        client(1, "Acme"),
        client(2, "Globex"),
        client(3, "Initech"),
        client(4, "Umbrella"),
    ]
}

fn sales_rows() -> Vec<Record> {
    vec![
        sale(1, 1, at(2020, 1, 10), 10.0, 100.0, "sales"),
        sale(2, 1, at(2020, 2, 10), 10.0, 100.0, "sales"),
        sale(3, 1, at(2020, 3, 10), 10.0, 100.0, "sales"),
        sale(4, 2, at(2020, 1, 20), 40.0, 400.0, "sales"),
        sale(5, 2, at(2020, 5, 20), 20.0, 200.0, "sales"),
        sale(6, 3, at(2020, 4, 15), 60.0, 600.0, "sales"),
        sale(7, 3, at(2020, 6, 1), 30.0, 300.0, "sales-return"),
    ]
}

pub fn sales_source() -> MemorySource {
    MemorySource::new(schema())
        .with_rows("client", clients())
        .and_then(|source| source.with_rows("sales", sales_rows()))
        .unwrap()
}

/// The `sales_source` rows in an in-memory SQLite database
pub fn sqlite_sales_source() -> SqliteSource {
    let source = SqliteSource::in_memory(schema()).unwrap();
    source.create_tables().unwrap();
    source.insert("client", &clients()).unwrap();
    source.insert("sales", &sales_rows()).unwrap();
    source
}

/// Client 1: five sales of 300, two returns of 100 and one `gift` of 50;
/// client 2: a single sale of 300
pub fn flag_source() -> MemorySource {
    let mut rows: Vec<Record> = (1..=5)
        .map(|i| sale(i, 1, at(2020, i as u32, 5), 30.0, 300.0, "sales"))
        .collect();
    rows.push(sale(6, 1, at(2020, 6, 5), 10.0, 100.0, "sales-return"));
    rows.push(sale(7, 1, at(2020, 7, 5), 10.0, 100.0, "sales-return"));
    rows.push(sale(8, 1, at(2020, 8, 5), 5.0, 50.0, "gift"));
    rows.push(sale(9, 2, at(2020, 9, 5), 30.0, 300.0, "sales"));

    MemorySource::new(schema())
        .with_rows("client", clients())
        .and_then(|source| source.with_rows("sales", rows))
        .unwrap()
}

/// Counts aggregate queries reaching the wrapped source
#[derive(Debug)]
pub struct CountingSource {
    inner: MemorySource,
    aggregates: AtomicUsize,
}

impl CountingSource {
    pub fn new(inner: MemorySource) -> Self {
        Self {
            inner,
            aggregates: AtomicUsize::new(0),
        }
    }

    pub fn aggregate_calls(&self) -> usize {
        self.aggregates.load(Ordering::SeqCst)
    }
}

impl DataSource for CountingSource {
    fn schema(&self) -> &Schema {
        self.inner.schema()
    }

    fn rows(&self, entity: &str, filters: &FilterSet, fields: &[String]) -> SourceResult<Vec<Record>> {
        self.inner.rows(entity, filters, fields)
    }

    fn aggregate(&self, entity: &str, filters: &FilterSet, aggregation: &Aggregation) -> SourceResult<Option<f64>> {
        self.aggregates.fetch_add(1, Ordering::SeqCst);
        self.inner.aggregate(entity, filters, aggregation)
    }

    fn group_and_aggregate(
        &self,
        entity: &str,
        filters: &FilterSet,
        group_path: &str,
        aggregation: &Aggregation,
    ) -> SourceResult<HashMap<String, f64>> {
        self.aggregates.fetch_add(1, Ordering::SeqCst);
        self.inner.group_and_aggregate(entity, filters, group_path, aggregation)
    }

    fn distinct_values(&self, entity: &str, filters: &FilterSet, path: &str) -> SourceResult<Vec<Value>> {
        self.inner.distinct_values(entity, filters, path)
    }

    fn related_rows_matching(
        &self,
        entity: &str,
        ids: Option<&[Value]>,
        fields: &[String],
    ) -> SourceResult<Vec<Record>> {
        self.inner.related_rows_matching(entity, ids, fields)
    }
}
