//! Record queries against user tables.
//!
//! SQL is assembled from catalog identifiers only; every value is bound as a
//! parameter. Each entry point first checks that the table's schema version
//! still matches the [`TableSchema`] the caller validated against.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension as _, types::Value as SqlValue};
use serde_json::{Map, Value};
use strata_core::{
  Error as CoreError,
  error::FieldErrors,
  query::{FilterOp, FilterValue, ListQuery, Page, PageMeta},
  record::Record,
  schema::{ColumnType, TableSchema},
  store::Transition,
};

use crate::{
  Result, catalog,
  encode::{decode_value, encode_dt, encode_value, quote},
};

/// Counts SELECTs issued against user tables.
pub type Counter = AtomicU64;

fn tick(counter: &Counter) { counter.fetch_add(1, Ordering::Relaxed); }

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn check_version(conn: &Connection, schema: &TableSchema) -> Result<()> {
  match catalog::schema_version(conn, schema.table.id)? {
    Some(v) if v == schema.table.schema_version => Ok(()),
    _ => Err(CoreError::SchemaChanged(schema.name().to_string()).into()),
  }
}

fn select_list(schema: &TableSchema) -> String {
  schema
    .physical_columns()
    .iter()
    .map(|c| quote(c))
    .collect::<Vec<_>>()
    .join(", ")
}

fn read_record(schema: &TableSchema, row: &rusqlite::Row<'_>) -> rusqlite::Result<Record> {
  let mut values = Map::new();
  let mut id = 0;
  for (i, name) in schema.physical_columns().into_iter().enumerate() {
    if name == "id" {
      id = row.get(i)?;
      continue;
    }
    let ty = schema.query_type(name).unwrap_or(ColumnType::Text);
    values.insert(name.to_string(), decode_value(ty, row.get_ref(i)?));
  }
  Ok(Record { id, values })
}

fn column_type(schema: &TableSchema, column: &str) -> Result<ColumnType> {
  schema
    .query_type(column)
    .ok_or_else(|| CoreError::InvalidQuery(format!("unknown column {column:?}")).into())
}

/// Escape `%`, `_` and `\` for a `LIKE ... ESCAPE '\'` pattern.
fn escape_like(term: &str) -> String {
  let mut out = String::with_capacity(term.len());
  for c in term.chars() {
    if matches!(c, '%' | '_' | '\\') {
      out.push('\\');
    }
    out.push(c);
  }
  out
}

/// Accumulates a WHERE clause and its bound parameters.
#[derive(Default)]
struct Conditions {
  clauses: Vec<String>,
  params:  Vec<SqlValue>,
}

impl Conditions {
  fn push(&mut self, clause: String, params: impl IntoIterator<Item = SqlValue>) {
    self.clauses.push(clause);
    self.params.extend(params);
  }

  fn live_only(&mut self, schema: &TableSchema) {
    if schema.table.has_soft_deletes {
      self.clauses.push(format!("{} IS NULL", quote("deleted_at")));
    }
  }

  fn sql(&self) -> String {
    if self.clauses.is_empty() {
      String::new()
    } else {
      format!(" WHERE {}", self.clauses.join(" AND "))
    }
  }
}

fn fetch_one(
  conn: &Connection,
  schema: &TableSchema,
  id: i64,
  extra: Option<&str>,
  counter: &Counter,
) -> Result<Option<Record>> {
  let mut sql = format!(
    "SELECT {} FROM {} WHERE {} = ?1",
    select_list(schema),
    quote(schema.name()),
    quote("id")
  );
  if let Some(extra) = extra {
    sql.push_str(" AND ");
    sql.push_str(extra);
  }
  tick(counter);
  let record = conn
    .query_row(&sql, rusqlite::params![id], |row| read_record(schema, row))
    .optional()?;
  Ok(record)
}

fn live_condition(schema: &TableSchema) -> Option<String> {
  schema
    .table
    .has_soft_deletes
    .then(|| format!("{} IS NULL", quote("deleted_at")))
}

/// Report every unique column whose value is already taken by another row.
fn check_unique(
  conn: &Connection,
  schema: &TableSchema,
  values: &Map<String, Value>,
  exclude_id: Option<i64>,
) -> Result<()> {
  let mut errors = FieldErrors::new();
  for column in schema.columns.iter().filter(|c| c.unique) {
    let Some(value) = values.get(&column.name).filter(|v| !v.is_null()) else {
      continue;
    };
    let mut sql = format!(
      "SELECT 1 FROM {} WHERE {} = ?1",
      quote(schema.name()),
      quote(&column.name)
    );
    if exclude_id.is_some() {
      sql.push_str(&format!(" AND {} != ?2", quote("id")));
    }
    sql.push_str(" LIMIT 1");
    let bound = encode_value(column.column_type, value);
    let taken = match exclude_id {
      Some(id) => conn.query_row(&sql, rusqlite::params![bound, id], |_| Ok(true)),
      None => conn.query_row(&sql, rusqlite::params![bound], |_| Ok(true)),
    }
    .optional()?
    .unwrap_or(false);
    if taken {
      errors
        .entry(column.name.clone())
        .or_default()
        .push("has already been taken".to_string());
    }
  }
  if errors.is_empty() { Ok(()) } else { Err(CoreError::Validation(errors).into()) }
}

fn encoded(schema: &TableSchema, values: &Map<String, Value>) -> Result<Vec<(String, SqlValue)>> {
  values
    .iter()
    .map(|(name, value)| Ok((name.clone(), encode_value(column_type(schema, name)?, value))))
    .collect()
}

// ─── Reads ───────────────────────────────────────────────────────────────────

pub fn list(
  conn: &Connection,
  schema: &TableSchema,
  query: &ListQuery,
  counter: &Counter,
) -> Result<Page<Record>> {
  check_version(conn, schema)?;

  let mut cond = Conditions::default();
  cond.live_only(schema);

  if let Some(term) = &query.search
    && !query.search_columns.is_empty()
  {
    let pattern = format!("{}%", escape_like(term));
    let any = query
      .search_columns
      .iter()
      .map(|c| format!("{} LIKE ? ESCAPE '\\'", quote(c)))
      .collect::<Vec<_>>()
      .join(" OR ");
    cond.push(
      format!("({any})"),
      query
        .search_columns
        .iter()
        .map(|_| SqlValue::Text(pattern.clone())),
    );
  }

  for filter in &query.filters {
    let ty = column_type(schema, &filter.column)?;
    let col = quote(&filter.column);
    match (&filter.op, &filter.value) {
      (FilterOp::Null, FilterValue::IsNull(true)) => cond.push(format!("{col} IS NULL"), []),
      (FilterOp::Null, _) => cond.push(format!("{col} IS NOT NULL"), []),
      (FilterOp::In, FilterValue::List(items)) if items.is_empty() => {
        cond.push("0".to_string(), [])
      }
      (FilterOp::In, FilterValue::List(items)) => cond.push(
        format!("{col} IN ({})", vec!["?"; items.len()].join(", ")),
        items.iter().map(|v| encode_value(ty, v)).collect::<Vec<_>>(),
      ),
      (FilterOp::Like, FilterValue::Single(v)) => {
        let needle = v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string());
        cond.push(
          format!("{col} LIKE ? ESCAPE '\\'"),
          [SqlValue::Text(format!("%{}%", escape_like(&needle)))],
        )
      }
      (op, FilterValue::Single(v)) => {
        cond.push(format!("{col} {} ?", op.sql()), [encode_value(ty, v)])
      }
      (op, _) => {
        return Err(
          CoreError::InvalidQuery(format!(
            "filter on {:?}: bad operand for {}",
            filter.column,
            op.as_str()
          ))
          .into(),
        );
      }
    }
  }

  let table = quote(schema.name());
  let where_sql = cond.sql();

  tick(counter);
  let total: i64 = conn.query_row(
    &format!("SELECT COUNT(*) FROM {table}{where_sql}"),
    rusqlite::params_from_iter(cond.params.iter()),
    |row| row.get(0),
  )?;

  column_type(schema, &query.sort)?;
  let dir = query.direction.sql();
  let mut order = format!("{} {dir}", quote(&query.sort));
  if query.sort != "id" {
    order.push_str(&format!(", {} {dir}", quote("id")));
  }

  let mut params = cond.params.clone();
  params.push(SqlValue::Integer(i64::from(query.per_page)));
  params.push(SqlValue::Integer(
    i64::try_from(query.offset()).unwrap_or(i64::MAX),
  ));

  tick(counter);
  let mut stmt = conn.prepare(&format!(
    "SELECT {} FROM {table}{where_sql} ORDER BY {order} LIMIT ? OFFSET ?",
    select_list(schema)
  ))?;
  let data = stmt
    .query_map(rusqlite::params_from_iter(params.iter()), |row| {
      read_record(schema, row)
    })?
    .collect::<rusqlite::Result<Vec<_>>>()?;

  Ok(Page {
    data,
    meta: PageMeta::new(query.page, query.per_page, total.max(0) as u64),
  })
}

pub fn get(
  conn: &Connection,
  schema: &TableSchema,
  id: i64,
  with_trashed: bool,
  counter: &Counter,
) -> Result<Option<Record>> {
  check_version(conn, schema)?;
  let extra = if with_trashed { None } else { live_condition(schema) };
  fetch_one(conn, schema, id, extra.as_deref(), counter)
}

/// Live rows whose `column` matches any of `keys`, in a single SELECT.
pub fn fetch_where_in(
  conn: &Connection,
  schema: &TableSchema,
  column: &str,
  mut keys: Vec<i64>,
  counter: &Counter,
) -> Result<Vec<Record>> {
  check_version(conn, schema)?;
  column_type(schema, column)?;
  keys.sort_unstable();
  keys.dedup();
  if keys.is_empty() {
    return Ok(Vec::new());
  }

  let mut cond = Conditions::default();
  cond.live_only(schema);
  cond.push(
    format!("{} IN ({})", quote(column), vec!["?"; keys.len()].join(", ")),
    keys.iter().map(|k| SqlValue::Integer(*k)).collect::<Vec<_>>(),
  );

  tick(counter);
  let mut stmt = conn.prepare(&format!(
    "SELECT {} FROM {}{} ORDER BY {}",
    select_list(schema),
    quote(schema.name()),
    cond.sql(),
    quote("id")
  ))?;
  let rows = stmt
    .query_map(rusqlite::params_from_iter(cond.params.iter()), |row| {
      read_record(schema, row)
    })?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  Ok(rows)
}

// ─── Writes ──────────────────────────────────────────────────────────────────

fn insert_row(
  conn: &Connection,
  schema: &TableSchema,
  values: &Map<String, Value>,
  now: DateTime<Utc>,
  counter: &Counter,
) -> Result<Record> {
  check_unique(conn, schema, values, None)?;

  let mut pairs = encoded(schema, values)?;
  if schema.table.has_timestamps {
    pairs.push(("created_at".to_string(), SqlValue::Text(encode_dt(now))));
    pairs.push(("updated_at".to_string(), SqlValue::Text(encode_dt(now))));
  }

  let table = quote(schema.name());
  if pairs.is_empty() {
    conn.execute(&format!("INSERT INTO {table} DEFAULT VALUES"), [])?;
  } else {
    let columns = pairs.iter().map(|(c, _)| quote(c)).collect::<Vec<_>>();
    conn.execute(
      &format!(
        "INSERT INTO {table} ({}) VALUES ({})",
        columns.join(", "),
        vec!["?"; pairs.len()].join(", ")
      ),
      rusqlite::params_from_iter(pairs.iter().map(|(_, v)| v)),
    )?;
  }

  let id = conn.last_insert_rowid();
  fetch_one(conn, schema, id, None, counter)?
    .ok_or_else(|| CoreError::RecordNotFound { table: schema.name().to_string(), id }.into())
}

pub fn insert(
  conn: &mut Connection,
  schema: &TableSchema,
  values: &Map<String, Value>,
  now: DateTime<Utc>,
  counter: &Counter,
) -> Result<Record> {
  let tx = conn.transaction()?;
  check_version(&tx, schema)?;
  let record = insert_row(&tx, schema, values, now, counter)?;
  tx.commit()?;
  Ok(record)
}

/// All rows or none; the first invalid row aborts the batch.
pub fn insert_many(
  conn: &mut Connection,
  schema: &TableSchema,
  rows: &[Map<String, Value>],
  now: DateTime<Utc>,
  counter: &Counter,
) -> Result<Vec<Record>> {
  let tx = conn.transaction()?;
  check_version(&tx, schema)?;
  let mut out = Vec::with_capacity(rows.len());
  for values in rows {
    out.push(insert_row(&tx, schema, values, now, counter)?);
  }
  tx.commit()?;
  Ok(out)
}

/// Run `UPDATE ... SET <assignments> WHERE id = ?` on a row selected by
/// `condition` and return it before and after.
fn transition(
  conn: &mut Connection,
  schema: &TableSchema,
  id: i64,
  condition: Option<&str>,
  assignments: Vec<(String, SqlValue)>,
  unique: Option<&Map<String, Value>>,
  counter: &Counter,
) -> Result<Option<Transition>> {
  let tx = conn.transaction()?;
  check_version(&tx, schema)?;
  let Some(before) = fetch_one(&tx, schema, id, condition, counter)? else {
    return Ok(None);
  };
  if let Some(values) = unique {
    check_unique(&tx, schema, values, Some(id))?;
  }

  if !assignments.is_empty() {
    let set = assignments
      .iter()
      .map(|(c, _)| format!("{} = ?", quote(c)))
      .collect::<Vec<_>>()
      .join(", ");
    let mut params: Vec<SqlValue> = assignments.into_iter().map(|(_, v)| v).collect();
    params.push(SqlValue::Integer(id));
    tx.execute(
      &format!(
        "UPDATE {} SET {set} WHERE {} = ?",
        quote(schema.name()),
        quote("id")
      ),
      rusqlite::params_from_iter(params.iter()),
    )?;
  }

  let after = fetch_one(&tx, schema, id, None, counter)?
    .ok_or_else(|| CoreError::RecordNotFound { table: schema.name().to_string(), id })?;
  tx.commit()?;
  Ok(Some((before, after)))
}

fn touch(schema: &TableSchema, now: DateTime<Utc>) -> Option<(String, SqlValue)> {
  schema
    .table
    .has_timestamps
    .then(|| ("updated_at".to_string(), SqlValue::Text(encode_dt(now))))
}

pub fn update(
  conn: &mut Connection,
  schema: &TableSchema,
  id: i64,
  values: &Map<String, Value>,
  now: DateTime<Utc>,
  counter: &Counter,
) -> Result<Option<Transition>> {
  let mut assignments = encoded(schema, values)?;
  assignments.extend(touch(schema, now));
  let live = live_condition(schema);
  transition(conn, schema, id, live.as_deref(), assignments, Some(values), counter)
}

fn require_soft_deletes(schema: &TableSchema) -> Result<()> {
  if schema.table.has_soft_deletes {
    Ok(())
  } else {
    Err(CoreError::SchemaConflict(format!("{} does not use soft deletes", schema.name())).into())
  }
}

pub fn soft_delete(
  conn: &mut Connection,
  schema: &TableSchema,
  id: i64,
  now: DateTime<Utc>,
  counter: &Counter,
) -> Result<Option<Transition>> {
  require_soft_deletes(schema)?;
  let mut assignments = vec![("deleted_at".to_string(), SqlValue::Text(encode_dt(now)))];
  assignments.extend(touch(schema, now));
  let live = live_condition(schema);
  transition(conn, schema, id, live.as_deref(), assignments, None, counter)
}

pub fn restore(
  conn: &mut Connection,
  schema: &TableSchema,
  id: i64,
  now: DateTime<Utc>,
  counter: &Counter,
) -> Result<Option<Transition>> {
  require_soft_deletes(schema)?;
  let mut assignments = vec![("deleted_at".to_string(), SqlValue::Null)];
  assignments.extend(touch(schema, now));
  let trashed = format!("{} IS NOT NULL", quote("deleted_at"));
  transition(conn, schema, id, Some(&trashed), assignments, None, counter)
}

pub fn delete(
  conn: &mut Connection,
  schema: &TableSchema,
  id: i64,
  counter: &Counter,
) -> Result<Option<Record>> {
  let tx = conn.transaction()?;
  check_version(&tx, schema)?;
  let Some(before) = fetch_one(&tx, schema, id, None, counter)? else {
    return Ok(None);
  };
  tx.execute(
    &format!("DELETE FROM {} WHERE {} = ?1", quote(schema.name()), quote("id")),
    rusqlite::params![id],
  )?;
  tx.commit()?;
  Ok(Some(before))
}
