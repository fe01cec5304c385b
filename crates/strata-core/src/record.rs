//! Dynamic records and payload validation.
//!
//! A record's shape is whatever the table's columns say it is at request time,
//! so a record is an id plus a JSON map. Payloads are validated and coerced
//! into canonical JSON values before they reach storage: integers as `i64`,
//! floats and decimals as `f64`, booleans as `bool`, dates as ISO strings.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::{
  Error, Result,
  error::FieldErrors,
  naming,
  schema::{ColumnDefinition, ColumnType, TableSchema},
};

const MAX_STRING_LEN: usize = 255;

// ─── Record ──────────────────────────────────────────────────────────────────

/// One row of a dynamic table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
  pub id:     i64,
  #[serde(flatten)]
  pub values: Map<String, Value>,
}

impl Record {
  pub fn get(&self, column: &str) -> Option<&Value> { self.values.get(column) }

  /// Whether the soft-delete marker is set.
  pub fn is_tombstoned(&self) -> bool {
    match self.values.get("deleted_at") {
      None | Some(Value::Null) => false,
      Some(Value::String(s)) => !s.is_empty(),
      Some(_) => true,
    }
  }

  /// Remove the given columns from the record.
  pub fn redact(&mut self, columns: &[&str]) {
    for column in columns {
      self.values.remove(*column);
    }
  }

  /// The record as a flat map including `id`, as row rules see it.
  pub fn as_row(&self) -> Map<String, Value> {
    let mut row = self.values.clone();
    row.insert("id".to_string(), Value::from(self.id));
    row
  }
}

// ─── Payload validation ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
  Create,
  Update,
}

/// Validate `payload` against the table's declared columns.
///
/// Unknown keys and system columns are rejected. On create, missing columns
/// take their default and required columns without one are reported. All
/// problems are collected into a single [`Error::Validation`].
pub fn validate_payload(
  schema: &TableSchema,
  payload: &Map<String, Value>,
  mode: WriteMode,
) -> Result<Map<String, Value>> {
  let mut errors = FieldErrors::new();
  let mut values = Map::new();

  for (key, value) in payload {
    let Some(column) = schema.column(key) else {
      let message = if naming::is_system_column(key) {
        "is managed by the system and cannot be written".to_string()
      } else {
        format!("is not a column of {}", schema.name())
      };
      errors.entry(key.clone()).or_default().push(message);
      continue;
    };
    match coerce_value(column, value) {
      Ok(v) => {
        values.insert(key.clone(), v);
      }
      Err(message) => errors.entry(key.clone()).or_default().push(message),
    }
  }

  if mode == WriteMode::Create {
    for column in &schema.columns {
      if payload.contains_key(&column.name) {
        continue;
      }
      match &column.default_value {
        Some(default) => match coerce_value(column, default) {
          Ok(v) => {
            values.insert(column.name.clone(), v);
          }
          Err(message) => errors
            .entry(column.name.clone())
            .or_default()
            .push(format!("invalid default: {message}")),
        },
        None if column.required => errors
          .entry(column.name.clone())
          .or_default()
          .push("is required".to_string()),
        None => {}
      }
    }
  }

  if errors.is_empty() { Ok(values) } else { Err(Error::Validation(errors)) }
}

/// Coerce a single JSON value to the canonical representation for `column`.
/// The error is a human-readable message for that column.
pub fn coerce_value(column: &ColumnDefinition, value: &Value) -> Result<Value, String> {
  if value.is_null() {
    return if column.required {
      Err("is required".to_string())
    } else {
      Ok(Value::Null)
    };
  }

  match column.column_type {
    ColumnType::String => text(value, Some(MAX_STRING_LEN)).map(Value::String),
    ColumnType::Text => text(value, None).map(Value::String),
    ColumnType::Email => {
      let s = text(value, Some(MAX_STRING_LEN))?;
      if is_email(&s) {
        Ok(Value::String(s))
      } else {
        Err("must be a valid email address".to_string())
      }
    }
    ColumnType::Url => {
      let s = text(value, None)?;
      match url::Url::parse(&s) {
        Ok(u) if matches!(u.scheme(), "http" | "https") && u.has_host() => {
          Ok(Value::String(s))
        }
        _ => Err("must be a valid http or https URL".to_string()),
      }
    }
    ColumnType::Uuid => {
      let s = text(value, None)?;
      uuid::Uuid::parse_str(&s)
        .map(|u| Value::String(u.hyphenated().to_string()))
        .map_err(|_| "must be a valid UUID".to_string())
    }
    ColumnType::Enum => {
      let s = text(value, None)?;
      if column.options.iter().any(|o| *o == s) {
        Ok(Value::String(s))
      } else {
        Err(format!("must be one of: {}", column.options.join(", ")))
      }
    }
    ColumnType::Integer | ColumnType::BigInteger => integer(value).map(Value::from),
    ColumnType::Float | ColumnType::Decimal => number(value),
    ColumnType::Boolean => boolean(value).map(Value::Bool),
    ColumnType::Date => {
      let s = text(value, None)?;
      NaiveDate::parse_from_str(&s, "%Y-%m-%d")
        .map(|d| Value::String(d.format("%Y-%m-%d").to_string()))
        .map_err(|_| "must be a date formatted YYYY-MM-DD".to_string())
    }
    ColumnType::DateTime => {
      let s = text(value, None)?;
      parse_datetime(&s)
        .map(|dt| Value::String(dt.to_rfc3339_opts(SecondsFormat::Secs, true)))
        .ok_or_else(|| "must be an RFC 3339 date-time".to_string())
    }
    ColumnType::Time => {
      let s = text(value, None)?;
      NaiveTime::parse_from_str(&s, "%H:%M:%S")
        .map(|t| Value::String(t.format("%H:%M:%S").to_string()))
        .map_err(|_| "must be a time formatted HH:MM:SS".to_string())
    }
    ColumnType::Json => match value {
      Value::Object(_) | Value::Array(_) => Ok(value.clone()),
      _ => Err("must be an array or object".to_string()),
    },
  }
}

fn text(value: &Value, max: Option<usize>) -> Result<String, String> {
  let Value::String(s) = value else {
    return Err("must be a string".to_string());
  };
  if let Some(max) = max
    && s.chars().count() > max
  {
    return Err(format!("may not be longer than {max} characters"));
  }
  Ok(s.clone())
}

fn integer(value: &Value) -> Result<i64, String> {
  let parsed = match value {
    Value::Number(n) => n.as_i64(),
    Value::String(s) => s.trim().parse::<i64>().ok(),
    _ => None,
  };
  parsed.ok_or_else(|| "must be an integer".to_string())
}

fn number(value: &Value) -> Result<Value, String> {
  let parsed = match value {
    Value::Number(n) => n.as_f64(),
    Value::String(s) => s.trim().parse::<f64>().ok(),
    _ => None,
  };
  parsed
    .and_then(Number::from_f64)
    .map(Value::Number)
    .ok_or_else(|| "must be a number".to_string())
}

fn boolean(value: &Value) -> Result<bool, String> {
  match value {
    Value::Bool(b) => Ok(*b),
    Value::Number(n) if n.as_i64() == Some(1) => Ok(true),
    Value::Number(n) if n.as_i64() == Some(0) => Ok(false),
    Value::String(s) => match s.as_str() {
      "1" | "true" => Ok(true),
      "0" | "false" => Ok(false),
      _ => Err("must be true or false".to_string()),
    },
    _ => Err("must be true or false".to_string()),
  }
}

/// Accepts RFC 3339 or a naive `YYYY-MM-DD[ T]HH:MM:SS`, taken as UTC.
pub fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
  if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
    return Some(dt.with_timezone(&Utc));
  }
  ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"]
    .iter()
    .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
    .map(|naive| naive.and_utc())
}

fn is_email(s: &str) -> bool {
  let Some((local, domain)) = s.split_once('@') else {
    return false;
  };
  !local.is_empty()
    && !domain.contains('@')
    && !s.chars().any(char::is_whitespace)
    && domain.split('.').count() >= 2
    && domain.split('.').all(|part| !part.is_empty())
}
