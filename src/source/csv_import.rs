//! CSV import
//!
//! Loads entity tables from CSV files into a `MemorySource`. Header names
//! map to schema fields; each cell is coerced according to the field kind.
//! Rows that fail coercion are skipped and reported.

use crate::source::error::{SourceError, SourceResult};
use crate::source::memory::MemorySource;
use crate::source::schema::{EntitySchema, FieldKind, Schema};
use crate::source::value::{Record, Value};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use std::path::Path;

const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%m/%d/%Y", "%d/%m/%Y", "%Y/%m/%d"];

const DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%SZ",
    "%Y-%m-%d %H:%M",
];

/// Outcome of loading one CSV file
#[derive(Debug, Default)]
pub struct CsvLoadResult {
    pub rows_loaded: usize,
    pub rows_failed: usize,
    pub errors: Vec<String>,
}

/// CSV loader bound to a schema
pub struct CsvLoader {
    schema: Schema,
    delimiter: u8,
}

impl CsvLoader {
    pub fn new(schema: Schema) -> Self {
        Self {
            schema,
            delimiter: b',',
        }
    }

    /// Set the field delimiter
    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Load every `<entity>.csv` found in `dir` into a fresh memory source
    pub fn load_dir(&self, dir: &Path) -> SourceResult<MemorySource> {
        let mut source = MemorySource::new(self.schema.clone());
        for entity in self.schema.entities() {
            let path = dir.join(format!("{}.csv", entity.name));
            if !path.exists() {
                tracing::debug!("No CSV for entity {}", entity.name);
                continue;
            }
            let result = self.load_entity(&mut source, &entity.name, &path)?;
            if result.rows_failed > 0 {
                tracing::warn!(
                    "{}: {} rows skipped while loading {}",
                    entity.name,
                    result.rows_failed,
                    path.display()
                );
            }
            tracing::info!("Loaded {} rows into {}", result.rows_loaded, entity.name);
        }
        Ok(source)
    }

    /// Load one CSV file into `source` as rows of `entity`
    pub fn load_entity(
        &self,
        source: &mut MemorySource,
        entity: &str,
        path: &Path,
    ) -> SourceResult<CsvLoadResult> {
        let schema = self.schema.get(entity)?;
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .delimiter(self.delimiter)
            .flexible(true)
            .from_path(path)?;

        let headers = reader.headers()?.clone();
        let columns: Vec<(usize, FieldKind, String)> = headers
            .iter()
            .enumerate()
            .filter_map(|(idx, header)| {
                let field = schema.get_field(header.trim())?;
                Some((idx, field.kind, field.name.clone()))
            })
            .collect();

        let mut result = CsvLoadResult::default();
        for (line_num, row) in reader.records().enumerate() {
            let line = line_num + 2;
            let row = match row {
                Ok(row) => row,
                Err(e) => {
                    result.errors.push(format!("Line {}: {}", line, e));
                    result.rows_failed += 1;
                    continue;
                }
            };

            match coerce_row(schema, &columns, &row) {
                Ok(record) => {
                    source.insert(entity, record)?;
                    result.rows_loaded += 1;
                }
                Err(e) => {
                    result.errors.push(format!("Line {}: {}", line, e));
                    result.rows_failed += 1;
                }
            }
        }

        Ok(result)
    }
}

fn coerce_row(
    schema: &EntitySchema,
    columns: &[(usize, FieldKind, String)],
    row: &csv::StringRecord,
) -> SourceResult<Record> {
    let mut record: Record = schema
        .fields
        .iter()
        .map(|f| (f.name.clone(), Value::Null))
        .collect();
    for (idx, kind, name) in columns {
        let cell = row.get(*idx).unwrap_or("");
        record.insert(name.clone(), parse_cell(cell, *kind)?);
    }
    Ok(record)
}

/// Coerce a raw cell to a value of the given kind; empty cells are NULL
pub fn parse_cell(cell: &str, kind: FieldKind) -> SourceResult<Value> {
    let cell = cell.trim();
    if cell.is_empty() {
        return Ok(Value::Null);
    }

    let invalid = || SourceError::Parse(format!("Invalid {} value: {}", kind.type_name(), cell));
    match kind {
        FieldKind::Integer => cell.parse::<i64>().map(Value::Int).map_err(|_| invalid()),
        // relation keys may be non-numeric
        FieldKind::Relation => Ok(cell
            .parse::<i64>()
            .map(Value::Int)
            .unwrap_or_else(|_| Value::Text(cell.to_string()))),
        FieldKind::Decimal => cell.parse::<f64>().map(Value::Float).map_err(|_| invalid()),
        FieldKind::Boolean => match cell.to_lowercase().as_str() {
            "true" | "1" | "yes" | "y" => Ok(Value::Bool(true)),
            "false" | "0" | "no" | "n" => Ok(Value::Bool(false)),
            _ => Err(invalid()),
        },
        FieldKind::Date => parse_date(cell).map(Value::Date).ok_or_else(invalid),
        FieldKind::DateTime => parse_datetime(cell).map(Value::DateTime).ok_or_else(invalid),
        FieldKind::Text => Ok(Value::Text(cell.to_string())),
    }
}

/// Parse a date trying the common formats in turn
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
        .or_else(|| parse_datetime(s).map(|dt| dt.date()))
}

/// Parse a date-time; a bare date is taken at midnight
pub fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    if let Some(dt) = DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
    {
        return Some(dt);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }

    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::aggregate::{Aggregation, CalculationMethod};
    use crate::source::filter::FilterSet;
    use crate::source::schema::FieldDef;
    use crate::source::DataSource;
    use std::io::Write;
    use tempfile::TempDir;

    fn schema() -> Schema {
        Schema::new().entity(
            EntitySchema::new("sales")
                .field(FieldDef::date("doc_date"))
                .field(FieldDef::text("flag"))
                .field(FieldDef::decimal("value")),
        )
    }

    #[test]
    fn test_load_dir() {
        let temp = TempDir::new().unwrap();
        let mut file = std::fs::File::create(temp.path().join("sales.csv")).unwrap();
        writeln!(file, "id,doc_date,flag,value,ignored").unwrap();
        writeln!(file, "1,2020-01-02,sales,100,x").unwrap();
        writeln!(file, "2,02/03/2020,sales,50.5,x").unwrap();
        writeln!(file, "3,not-a-date,sales,1,x").unwrap();
        writeln!(file, "4,2020-03-01,,,x").unwrap();
        drop(file);

        let source = CsvLoader::new(schema()).load_dir(temp.path()).unwrap();
        assert_eq!(source.len("sales"), 3);

        let sum = Aggregation::new(CalculationMethod::Sum, "value");
        assert_eq!(source.aggregate("sales", &FilterSet::new(), &sum).unwrap(), Some(150.5));

        let rows = source.rows("sales", &FilterSet::new(), &[]).unwrap();
        assert_eq!(
            rows[1].get("doc_date"),
            Some(&Value::Date(NaiveDate::from_ymd_opt(2020, 2, 3).unwrap()))
        );
        assert_eq!(rows[2].get("flag"), Some(&Value::Null));
    }

    #[test]
    fn test_load_entity_reports_failures() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("sales.csv");
        std::fs::write(&path, "id,value\n1,abc\n2,3\n").unwrap();

        let mut source = MemorySource::new(schema());
        let result = CsvLoader::new(schema())
            .load_entity(&mut source, "sales", &path)
            .unwrap();
        assert_eq!(result.rows_loaded, 1);
        assert_eq!(result.rows_failed, 1);
        assert!(result.errors[0].starts_with("Line 2"));
    }

    #[test]
    fn test_parse_cell() {
        assert_eq!(parse_cell("yes", FieldKind::Boolean).unwrap(), Value::Bool(true));
        assert_eq!(parse_cell("C-12", FieldKind::Relation).unwrap(), Value::from("C-12"));
        assert!(parse_cell("1.5", FieldKind::Integer).is_err());
        assert_eq!(
            parse_datetime("2020-01-02T10:30:00Z").unwrap(),
            NaiveDate::from_ymd_opt(2020, 1, 2).unwrap().and_hms_opt(10, 30, 0).unwrap()
        );
    }
}
