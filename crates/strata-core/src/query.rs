//! List query model and its parser.
//!
//! Raw query-string pairs are turned into a [`ListQuery`] against a
//! [`TableSchema`]. Every column a filter or sort names must be declared on
//! the table (or be a system column), so storage only ever sees identifiers
//! that came out of the catalog.

use std::collections::BTreeSet;

use serde::Serialize;
use serde_json::Value;

use crate::{
  Error, Result,
  record::parse_datetime,
  schema::{ColumnType, TableSchema},
};

pub const DEFAULT_PER_PAGE: u32 = 15;
pub const MAX_PER_PAGE: u32 = 100;

/// Parameters with a fixed meaning; anything else that is not a `filter[..]`
/// key is ignored.
pub const RESERVED_PARAMS: [&str; 9] = [
  "search", "sort", "order", "direction", "page", "per_page", "include", "nocache", "api_key",
];

// ─── Types ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
  Asc,
  Desc,
}

impl SortDirection {
  pub fn sql(self) -> &'static str {
    match self {
      SortDirection::Asc => "ASC",
      SortDirection::Desc => "DESC",
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FilterOp {
  Eq,
  Ne,
  Gt,
  Gte,
  Lt,
  Lte,
  /// Substring match on the string form.
  Like,
  /// Comma-separated list of values.
  In,
  /// `true` → IS NULL, `false` → IS NOT NULL.
  Null,
}

impl FilterOp {
  pub fn parse(s: &str) -> Option<Self> {
    let op = match s {
      "eq" => FilterOp::Eq,
      "ne" | "neq" => FilterOp::Ne,
      "gt" => FilterOp::Gt,
      "gte" => FilterOp::Gte,
      "lt" => FilterOp::Lt,
      "lte" => FilterOp::Lte,
      "like" => FilterOp::Like,
      "in" => FilterOp::In,
      "null" => FilterOp::Null,
      _ => return None,
    };
    Some(op)
  }

  pub fn as_str(self) -> &'static str {
    match self {
      FilterOp::Eq => "eq",
      FilterOp::Ne => "ne",
      FilterOp::Gt => "gt",
      FilterOp::Gte => "gte",
      FilterOp::Lt => "lt",
      FilterOp::Lte => "lte",
      FilterOp::Like => "like",
      FilterOp::In => "in",
      FilterOp::Null => "null",
    }
  }

  /// SQL comparison operator for the scalar variants.
  pub fn sql(self) -> &'static str {
    match self {
      FilterOp::Eq => "=",
      FilterOp::Ne => "!=",
      FilterOp::Gt => ">",
      FilterOp::Gte => ">=",
      FilterOp::Lt => "<",
      FilterOp::Lte => "<=",
      FilterOp::Like => "LIKE",
      FilterOp::In => "IN",
      FilterOp::Null => "IS",
    }
  }
}

/// Operand of a filter, already coerced to the column's type.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
  Single(Value),
  List(Vec<Value>),
  IsNull(bool),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
  pub column: String,
  pub op:     FilterOp,
  pub value:  FilterValue,
}

/// A validated list request.
#[derive(Debug, Clone, PartialEq)]
pub struct ListQuery {
  /// Prefix search term, matched against `search_columns`.
  pub search:         Option<String>,
  pub search_columns: Vec<String>,
  pub filters:        Vec<Filter>,
  pub sort:           String,
  pub direction:      SortDirection,
  pub page:           u32,
  pub per_page:       u32,
  /// Relationship names to eager-load.
  pub include:        Vec<String>,
}

impl Default for ListQuery {
  fn default() -> Self {
    Self {
      search:         None,
      search_columns: Vec::new(),
      filters:        Vec::new(),
      sort:           "id".to_string(),
      direction:      SortDirection::Desc,
      page:           1,
      per_page:       DEFAULT_PER_PAGE,
      include:        Vec::new(),
    }
  }
}

/// Page metadata returned alongside list results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageMeta {
  pub current_page: u32,
  pub last_page:    u32,
  pub per_page:     u32,
  pub total:        u64,
}

impl PageMeta {
  pub fn new(page: u32, per_page: u32, total: u64) -> Self {
    let last_page = total.div_ceil(u64::from(per_page.max(1))).max(1);
    Self {
      current_page: page,
      last_page: u32::try_from(last_page).unwrap_or(u32::MAX),
      per_page,
      total,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
  pub data: Vec<T>,
  pub meta: PageMeta,
}

// ─── Parsing ─────────────────────────────────────────────────────────────────

impl ListQuery {
  /// Parse raw query-string pairs. Nothing here touches storage.
  pub fn parse(schema: &TableSchema, params: &[(String, String)]) -> Result<Self> {
    let mut query = ListQuery {
      search_columns: schema
        .columns
        .iter()
        .filter(|c| c.searchable && !c.hidden && c.column_type.is_searchable_text())
        .map(|c| c.name.clone())
        .collect(),
      ..Default::default()
    };

    for (key, raw) in params {
      match key.as_str() {
        "search" => {
          let term = raw.trim();
          query.search = (!term.is_empty()).then(|| term.to_string());
        }
        "sort" => {
          let column = raw.trim();
          if !is_sortable(schema, column) {
            return Err(Error::InvalidQuery(format!("cannot sort by {column:?}")));
          }
          query.sort = column.to_string();
        }
        "order" | "direction" => {
          query.direction = match raw.trim().to_ascii_lowercase().as_str() {
            "asc" => SortDirection::Asc,
            "desc" => SortDirection::Desc,
            other => {
              return Err(Error::InvalidQuery(format!(
                "sort direction must be asc or desc, got {other:?}"
              )));
            }
          };
        }
        "page" => {
          query.page = parse_positive(key, raw)?;
        }
        "per_page" => {
          query.per_page = parse_positive(key, raw)?.min(MAX_PER_PAGE);
        }
        "include" => {
          for name in raw.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            if schema.relationship(name).is_none() {
              return Err(Error::RelationshipNotFound {
                table:        schema.name().to_string(),
                relationship: name.to_string(),
              });
            }
            if !query.include.iter().any(|n| n == name) {
              query.include.push(name.to_string());
            }
          }
        }
        other if other.starts_with("filter") => {
          query.filters.push(parse_filter(schema, other, raw)?);
        }
        _ => {}
      }
    }

    Ok(query)
  }

  pub fn offset(&self) -> u64 { u64::from(self.page - 1) * u64::from(self.per_page) }

  /// Restrict the listing to rows whose `column` equals `value`. Used for
  /// ownership rules, so the column's `filterable` flag does not apply.
  pub fn restrict_to(&mut self, schema: &TableSchema, column: &str, value: &str) -> Result<()> {
    let ty = schema.query_type(column).ok_or_else(|| Error::ColumnNotFound {
      table:  schema.name().to_string(),
      column: column.to_string(),
    })?;
    let operand = filter_operand(column, ty, value)?;
    self.filters.push(Filter {
      column: column.to_string(),
      op:     FilterOp::Eq,
      value:  FilterValue::Single(operand),
    });
    Ok(())
  }

  /// Stable, order-independent description of the query, used for cache keys.
  pub fn canonical_pairs(&self) -> Vec<(String, String)> {
    let mut pairs = BTreeSet::new();
    if let Some(search) = &self.search {
      pairs.insert(("search".to_string(), search.clone()));
    }
    for f in &self.filters {
      let operand = match &f.value {
        FilterValue::Single(v) => v.to_string(),
        FilterValue::List(vs) => Value::Array(vs.clone()).to_string(),
        FilterValue::IsNull(b) => b.to_string(),
      };
      pairs.insert((format!("filter[{}][{}]", f.column, f.op.as_str()), operand));
    }
    pairs.insert(("sort".to_string(), self.sort.clone()));
    pairs.insert((
      "direction".to_string(),
      self.direction.sql().to_ascii_lowercase(),
    ));
    pairs.insert(("page".to_string(), self.page.to_string()));
    pairs.insert(("per_page".to_string(), self.per_page.to_string()));
    let mut include = self.include.clone();
    include.sort();
    if !include.is_empty() {
      pairs.insert(("include".to_string(), include.join(",")));
    }
    pairs.into_iter().collect()
  }
}

fn parse_positive(key: &str, raw: &str) -> Result<u32> {
  match raw.trim().parse::<u32>() {
    Ok(n) if n >= 1 => Ok(n),
    _ => Err(Error::InvalidQuery(format!(
      "{key} must be a positive integer, got {raw:?}"
    ))),
  }
}

fn is_sortable(schema: &TableSchema, column: &str) -> bool {
  match schema.column(column) {
    Some(c) => c.sortable && !c.hidden,
    None => matches!(column, "id")
      || (matches!(column, "created_at" | "updated_at") && schema.table.has_timestamps),
  }
}

/// Type of a column that may be filtered on, or an `InvalidQuery` error.
fn filter_column_type(schema: &TableSchema, column: &str) -> Result<ColumnType> {
  let allowed = match schema.column(column) {
    Some(c) => c.filterable && !c.hidden,
    None => schema.query_type(column).is_some(),
  };
  match schema.query_type(column) {
    Some(ty) if allowed => Ok(ty),
    _ => Err(Error::InvalidQuery(format!("cannot filter by {column:?}"))),
  }
}

/// `filter[col]` or `filter[col][op]`.
fn parse_filter(schema: &TableSchema, key: &str, raw: &str) -> Result<Filter> {
  let malformed = || Error::InvalidQuery(format!("malformed filter parameter {key:?}"));
  let inner = key
    .strip_prefix("filter[")
    .and_then(|rest| rest.strip_suffix(']'))
    .ok_or_else(malformed)?;
  let (column, op) = match inner.split_once("][") {
    Some((column, op)) => (column, FilterOp::parse(op).ok_or_else(malformed)?),
    None => (inner, FilterOp::Eq),
  };

  let ty = filter_column_type(schema, column)?;
  let value = match op {
    FilterOp::Null => match raw.trim() {
      "1" | "true" => FilterValue::IsNull(true),
      "0" | "false" => FilterValue::IsNull(false),
      _ => {
        return Err(Error::InvalidQuery(format!(
          "filter on {column:?}: null expects true or false"
        )));
      }
    },
    FilterOp::Like => FilterValue::Single(Value::String(raw.to_string())),
    FilterOp::In => FilterValue::List(
      raw
        .split(',')
        .map(|part| filter_operand(column, ty, part.trim()))
        .collect::<Result<Vec<_>>>()?,
    ),
    _ => FilterValue::Single(filter_operand(column, ty, raw)?),
  };

  Ok(Filter {
    column: column.to_string(),
    op,
    value,
  })
}

/// Coerce a query-string operand to the value stored for `ty`.
fn filter_operand(column: &str, ty: ColumnType, raw: &str) -> Result<Value> {
  let invalid = || Error::InvalidQuery(format!("filter on {column:?}: {raw:?} is not a valid {ty}"));
  let value = match ty {
    ColumnType::Integer | ColumnType::BigInteger => {
      Value::from(raw.trim().parse::<i64>().map_err(|_| invalid())?)
    }
    ColumnType::Float | ColumnType::Decimal => {
      let f = raw.trim().parse::<f64>().map_err(|_| invalid())?;
      serde_json::Number::from_f64(f).map(Value::Number).ok_or_else(invalid)?
    }
    ColumnType::Boolean => match raw.trim() {
      "1" | "true" => Value::Bool(true),
      "0" | "false" => Value::Bool(false),
      _ => return Err(invalid()),
    },
    ColumnType::DateTime => parse_datetime(raw.trim())
      .map(|dt| Value::String(dt.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)))
      .ok_or_else(invalid)?,
    _ => Value::String(raw.to_string()),
  };
  Ok(value)
}
