//! SQLite data source
//!
//! Compiles filter sets and aggregations into parameterized SQL. Every
//! relation traversed by a path becomes a LEFT JOIN, shared between all
//! paths walking the same prefix.
//!
//! Dates are stored as `YYYY-MM-DD` text and date-times as
//! `YYYY-MM-DD HH:MM:SS`, so range comparisons work on the raw column.

use crate::source::aggregate::Aggregation;
use crate::source::error::{SourceError, SourceResult};
use crate::source::filter::{Condition, FilterSet, Predicate};
use crate::source::schema::{EntitySchema, FieldKind, Schema, PATH_SEPARATOR};
use crate::source::value::{Record, Value};
use crate::source::DataSource;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection, OpenFlags};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

const DATE_FORMAT: &str = "%Y-%m-%d";
const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Data source backed by a SQLite database
pub struct SqliteSource {
    conn: Mutex<Connection>,
    schema: Schema,
    path: Option<PathBuf>,
}

impl SqliteSource {
    /// Open (or create) a database file
    pub fn open(path: &Path, schema: Schema) -> SourceResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            ",
        )?;

        tracing::debug!("Opened SQLite source at {}", path.display());

        Ok(Self {
            conn: Mutex::new(conn),
            schema,
            path: Some(path.to_path_buf()),
        })
    }

    /// Database living only in memory
    pub fn in_memory(schema: Schema) -> SourceResult<Self> {
        Ok(Self {
            conn: Mutex::new(Connection::open_in_memory()?),
            schema,
            path: None,
        })
    }

    /// Path of the database file, if file-backed
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn conn(&self) -> SourceResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| SourceError::Lock(e.to_string()))
    }

    /// Create a table per schema entity if missing
    pub fn create_tables(&self) -> SourceResult<()> {
        let conn = self.conn()?;
        for entity in self.schema.entities() {
            let columns: Vec<String> = entity
                .fields
                .iter()
                .map(|f| {
                    let mut column = format!("{} {}", quote(&f.name), sql_type(f.kind));
                    if f.name == entity.primary_key {
                        column.push_str(" PRIMARY KEY");
                    }
                    column
                })
                .collect();
            let sql = format!(
                "CREATE TABLE IF NOT EXISTS {} ({})",
                quote(&entity.name),
                columns.join(", ")
            );
            conn.execute(&sql, [])?;
        }
        Ok(())
    }

    /// Insert records into an entity's table inside one transaction
    pub fn insert(&self, entity: &str, records: &[Record]) -> SourceResult<()> {
        let schema = self.schema.get(entity)?;
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let names: Vec<String> = schema.fields.iter().map(|f| quote(&f.name)).collect();
            let placeholders = vec!["?"; names.len()].join(", ");
            let sql = format!(
                "INSERT INTO {} ({}) VALUES ({})",
                quote(&schema.name),
                names.join(", "),
                placeholders
            );
            let mut stmt = tx.prepare_cached(&sql)?;
            for record in records {
                let params = schema.fields.iter().map(|f| {
                    to_sql(record.get(&f.name).unwrap_or(&Value::Null), f.kind)
                });
                stmt.execute(params_from_iter(params))?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Run raw SQL (fixtures, migrations)
    pub fn execute_batch(&self, sql: &str) -> SourceResult<()> {
        self.conn()?.execute_batch(sql)?;
        Ok(())
    }

    fn query(&self, query: &CompiledQuery, kinds: &[FieldKind]) -> SourceResult<Vec<Vec<Value>>> {
        tracing::debug!("SQL: {}", query.sql);
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(&query.sql)?;
        let mut rows = stmt.query(params_from_iter(query.params.iter()))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(kinds.len());
            for (i, kind) in kinds.iter().enumerate() {
                values.push(from_sql(row.get_ref(i)?, *kind));
            }
            out.push(values);
        }
        Ok(out)
    }
}

impl DataSource for SqliteSource {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn rows(&self, entity: &str, filters: &FilterSet, fields: &[String]) -> SourceResult<Vec<Record>> {
        let names = if fields.is_empty() {
            self.schema.get(entity)?.field_names()
        } else {
            fields.to_vec()
        };

        let mut builder = SqlBuilder::new(&self.schema, entity)?;
        let mut exprs = Vec::new();
        let mut kinds = Vec::new();
        for name in &names {
            let (expr, kind) = builder.column(name)?;
            exprs.push(expr);
            kinds.push(kind);
        }
        let query = builder.finish(&exprs.join(", "), filters, "", "ORDER BY t0.rowid")?;

        Ok(self
            .query(&query, &kinds)?
            .into_iter()
            .map(|values| names.iter().cloned().zip(values).collect())
            .collect())
    }

    fn aggregate(
        &self,
        entity: &str,
        filters: &FilterSet,
        aggregation: &Aggregation,
    ) -> SourceResult<Option<f64>> {
        let mut builder = SqlBuilder::new(&self.schema, entity)?;
        let (expr, _) = builder.column(&aggregation.field)?;
        let select = format!("{}({})", aggregation.method.sql_function(), expr);
        let query = builder.finish(&select, filters, "", "")?;

        let rows = self.query(&query, &[FieldKind::Decimal])?;
        Ok(rows
            .first()
            .and_then(|row| row.first())
            .and_then(Value::as_f64))
    }

    fn group_and_aggregate(
        &self,
        entity: &str,
        filters: &FilterSet,
        group_path: &str,
        aggregation: &Aggregation,
    ) -> SourceResult<HashMap<String, f64>> {
        let mut builder = SqlBuilder::new(&self.schema, entity)?;
        let (group_expr, group_kind) = builder.column(group_path)?;
        let (expr, _) = builder.column(&aggregation.field)?;
        let select = format!(
            "{}, {}({})",
            group_expr,
            aggregation.method.sql_function(),
            expr
        );
        let group = format!("GROUP BY {}", group_expr);
        let query = builder.finish(&select, filters, &group, "")?;

        Ok(self
            .query(&query, &[group_kind, FieldKind::Decimal])?
            .into_iter()
            .filter_map(|row| {
                let value = row.get(1).and_then(Value::as_f64)?;
                Some((row.first()?.to_key(), value))
            })
            .collect())
    }

    fn distinct_values(&self, entity: &str, filters: &FilterSet, path: &str) -> SourceResult<Vec<Value>> {
        let mut builder = SqlBuilder::new(&self.schema, entity)?;
        let (expr, kind) = builder.column(path)?;
        let group = format!("GROUP BY {}", expr);
        let query = builder.finish(&expr, filters, &group, "ORDER BY MIN(t0.rowid)")?;

        Ok(self
            .query(&query, &[kind])?
            .into_iter()
            .filter_map(|row| row.into_iter().next())
            .collect())
    }

    fn related_rows_matching(
        &self,
        entity: &str,
        ids: Option<&[Value]>,
        fields: &[String],
    ) -> SourceResult<Vec<Record>> {
        let pk = self.schema.get(entity)?.primary_key.clone();
        let mut names = if fields.is_empty() {
            self.schema.get(entity)?.field_names()
        } else {
            fields.to_vec()
        };
        if !names.contains(&pk) {
            names.insert(0, pk.clone());
        }

        let filters = match ids {
            Some([]) => return Ok(Vec::new()),
            Some(ids) => FilterSet::new().and(Predicate::in_list(pk.clone(), ids.to_vec())),
            None => FilterSet::new(),
        };

        let mut builder = SqlBuilder::new(&self.schema, entity)?;
        let mut exprs = Vec::new();
        let mut kinds = Vec::new();
        for name in &names {
            let (expr, kind) = builder.column(name)?;
            exprs.push(expr);
            kinds.push(kind);
        }
        let order = format!("ORDER BY t0.{}", quote(&pk));
        let query = builder.finish(&exprs.join(", "), &filters, "", &order)?;

        Ok(self
            .query(&query, &kinds)?
            .into_iter()
            .map(|values| names.iter().cloned().zip(values).collect())
            .collect())
    }
}

/// SQL text plus its positional parameters
struct CompiledQuery {
    sql: String,
    params: Vec<SqlValue>,
}

/// Accumulates joins for one query rooted at an entity
struct SqlBuilder<'a> {
    schema: &'a Schema,
    root: &'a EntitySchema,
    joins: Vec<String>,
    /// relation path prefix -> table alias
    aliases: HashMap<String, String>,
}

impl<'a> SqlBuilder<'a> {
    fn new(schema: &'a Schema, entity: &str) -> SourceResult<Self> {
        Ok(Self {
            schema,
            root: schema.get(entity)?,
            joins: Vec::new(),
            aliases: HashMap::new(),
        })
    }

    /// Column expression (with joins registered) for a field path
    fn column(&mut self, path: &str) -> SourceResult<(String, FieldKind)> {
        let resolved = self.schema.resolve_path(&self.root.name, path)?;
        let mut alias = "t0".to_string();
        let mut prefix = String::new();

        for (_, relation) in &resolved.hops {
            if !prefix.is_empty() {
                prefix.push_str(PATH_SEPARATOR);
            }
            prefix.push_str(&relation.name);

            alias = match self.aliases.get(&prefix) {
                Some(existing) => existing.clone(),
                None => {
                    let target = relation.related_entity.as_deref().ok_or_else(|| {
                        SourceError::NotARelation {
                            entity: self.root.name.clone(),
                            field: relation.name.clone(),
                        }
                    })?;
                    let target_pk = &self.schema.get(target)?.primary_key;
                    let next = format!("t{}", self.aliases.len() + 1);
                    self.joins.push(format!(
                        "LEFT JOIN {} AS {} ON {}.{} = {}.{}",
                        quote(target),
                        next,
                        alias,
                        quote(&relation.name),
                        next,
                        quote(target_pk)
                    ));
                    self.aliases.insert(prefix.clone(), next.clone());
                    next
                }
            };
        }

        Ok((format!("{}.{}", alias, quote(&resolved.field.name)), resolved.field.kind))
    }

    fn predicate(&mut self, predicate: &Predicate, params: &mut Vec<SqlValue>) -> SourceResult<String> {
        let (expr, kind) = self.column(&predicate.path)?;
        let mut bind = |v: &Value| {
            params.push(to_sql(v, kind));
            "?".to_string()
        };

        let test = match &predicate.condition {
            Condition::Exact(Value::Null) => format!("{} IS NULL", expr),
            Condition::Exact(v) => format!("{} = {}", expr, bind(v)),
            Condition::Gt(v) => format!("{} > {}", expr, bind(v)),
            Condition::Gte(v) => format!("{} >= {}", expr, bind(v)),
            Condition::Lt(v) => format!("{} < {}", expr, bind(v)),
            Condition::Lte(v) => format!("{} <= {}", expr, bind(v)),
            Condition::In(values) if values.is_empty() => "0".to_string(),
            Condition::In(values) => {
                let marks: Vec<String> = values.iter().map(&mut bind).collect();
                format!("{} IN ({})", expr, marks.join(", "))
            }
            Condition::IsNull(true) => format!("{} IS NULL", expr),
            Condition::IsNull(false) => format!("{} IS NOT NULL", expr),
        };

        Ok(match (predicate.negated, predicate.condition.is_null_check()) {
            (false, _) => test,
            (true, true) => format!("NOT ({})", test),
            (true, false) => format!("({} IS NULL OR NOT ({}))", expr, test),
        })
    }

    fn finish(
        mut self,
        select: &str,
        filters: &FilterSet,
        group: &str,
        order: &str,
    ) -> SourceResult<CompiledQuery> {
        let mut params = Vec::new();
        let mut clauses = Vec::new();
        for predicate in filters.iter() {
            clauses.push(self.predicate(predicate, &mut params)?);
        }

        let mut sql = format!("SELECT {} FROM {} AS t0", select, quote(&self.root.name));
        for join in &self.joins {
            sql.push(' ');
            sql.push_str(join);
        }
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        for tail in [group, order] {
            if !tail.is_empty() {
                sql.push(' ');
                sql.push_str(tail);
            }
        }

        Ok(CompiledQuery { sql, params })
    }
}

fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

fn sql_type(kind: FieldKind) -> &'static str {
    match kind {
        FieldKind::Integer | FieldKind::Relation | FieldKind::Boolean => "INTEGER",
        FieldKind::Decimal => "REAL",
        FieldKind::Text | FieldKind::Date | FieldKind::DateTime => "TEXT",
    }
}

/// Bind a value for a column of the given kind
fn to_sql(value: &Value, kind: FieldKind) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(*b as i64),
        Value::Int(i) => SqlValue::Integer(*i),
        Value::Float(f) => SqlValue::Real(*f),
        Value::Text(s) => SqlValue::Text(s.clone()),
        Value::Date(d) if kind == FieldKind::DateTime => match d.and_hms_opt(0, 0, 0) {
            Some(dt) => SqlValue::Text(dt.format(DATETIME_FORMAT).to_string()),
            None => SqlValue::Text(d.format(DATE_FORMAT).to_string()),
        },
        Value::Date(d) => SqlValue::Text(d.format(DATE_FORMAT).to_string()),
        // midnight collapses to the bare date so text comparison stays exact
        Value::DateTime(dt) if kind == FieldKind::Date && Some(dt.time()) == NaiveTime::from_hms_opt(0, 0, 0) => {
            SqlValue::Text(dt.date().format(DATE_FORMAT).to_string())
        }
        Value::DateTime(dt) => SqlValue::Text(dt.format(DATETIME_FORMAT).to_string()),
    }
}

/// Read a cell back according to the column kind
fn from_sql(cell: ValueRef<'_>, kind: FieldKind) -> Value {
    match cell {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) if kind == FieldKind::Boolean => Value::Bool(i != 0),
        ValueRef::Integer(i) if kind == FieldKind::Decimal => Value::Float(i as f64),
        ValueRef::Integer(i) => Value::Int(i),
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            let text = String::from_utf8_lossy(bytes).to_string();
            match kind {
                FieldKind::Date => NaiveDate::parse_from_str(&text, DATE_FORMAT)
                    .map(Value::Date)
                    .unwrap_or(Value::Text(text)),
                FieldKind::DateTime => NaiveDateTime::parse_from_str(&text, DATETIME_FORMAT)
                    .map(Value::DateTime)
                    .unwrap_or(Value::Text(text)),
                _ => Value::Text(text),
            }
        }
    }
}
