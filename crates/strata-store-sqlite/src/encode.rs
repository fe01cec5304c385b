//! Encoding and decoding helpers between domain types and SQLite values.
//!
//! Timestamps are stored as RFC 3339 strings with second precision and a `Z`
//! suffix, so they sort lexically. Structured catalog fields (settings, rules,
//! options, abilities) are stored as compact JSON. Record values are mapped
//! per logical column type.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::{Value as SqlValue, ValueRef};
use serde_json::{Map, Number, Value};
use strata_core::{
  access::{Abilities, ApiKey, KeyKind},
  rules::RowRules,
  schema::{
    ColumnDefinition, ColumnType, RelationKind, RelationshipDefinition, TableDefinition,
  },
};

use crate::{Error, Result};

// ─── Identifiers ─────────────────────────────────────────────────────────────

/// Double-quote an identifier. Names reaching here were validated by
/// `strata_core::naming`, so no embedded quotes are possible.
pub fn quote(ident: &str) -> String { format!("\"{}\"", ident.replace('"', "\"\"")) }

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339_opts(SecondsFormat::Secs, true) }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

fn decode_opt_dt(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
  s.as_deref().map(decode_dt).transpose()
}

// ─── Record values ───────────────────────────────────────────────────────────

/// Canonical JSON value → SQLite value for a column of type `ty`.
pub fn encode_value(ty: ColumnType, value: &Value) -> SqlValue {
  match value {
    Value::Null => SqlValue::Null,
    Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
    Value::Number(n) => match ty {
      ColumnType::Float | ColumnType::Decimal => {
        SqlValue::Real(n.as_f64().unwrap_or_default())
      }
      _ => match n.as_i64() {
        Some(i) => SqlValue::Integer(i),
        None => SqlValue::Real(n.as_f64().unwrap_or_default()),
      },
    },
    Value::String(s) => SqlValue::Text(s.clone()),
    Value::Array(_) | Value::Object(_) => SqlValue::Text(value.to_string()),
  }
}

/// SQLite value → canonical JSON value for a column of type `ty`.
pub fn decode_value(ty: ColumnType, raw: ValueRef<'_>) -> Value {
  match raw {
    ValueRef::Null => Value::Null,
    ValueRef::Integer(i) => match ty {
      ColumnType::Boolean => Value::Bool(i != 0),
      ColumnType::Float | ColumnType::Decimal => float(i as f64),
      _ => Value::from(i),
    },
    ValueRef::Real(f) => match ty {
      ColumnType::Integer | ColumnType::BigInteger if f.fract() == 0.0 => {
        Value::from(f as i64)
      }
      _ => float(f),
    },
    ValueRef::Text(bytes) => {
      let text = String::from_utf8_lossy(bytes);
      match ty {
        ColumnType::Json => {
          serde_json::from_str(&text).unwrap_or_else(|_| Value::String(text.into_owned()))
        }
        _ => Value::String(text.into_owned()),
      }
    }
    ValueRef::Blob(bytes) => Value::String(hex::encode(bytes)),
  }
}

fn float(f: f64) -> Value { Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null) }

/// Literal for a `DEFAULT` clause. Only canonical (already coerced) values
/// reach here.
pub fn default_literal(value: &Value) -> Option<String> {
  match value {
    Value::Null => None,
    Value::Bool(b) => Some(i64::from(*b).to_string()),
    Value::Number(n) => Some(n.to_string()),
    Value::String(s) => Some(format!("'{}'", s.replace('\'', "''"))),
    Value::Array(_) | Value::Object(_) => {
      Some(format!("'{}'", value.to_string().replace('\'', "''")))
    }
  }
}

// ─── Relationship kind ───────────────────────────────────────────────────────

pub fn encode_kind(kind: RelationKind) -> &'static str { kind.as_str() }

pub fn decode_kind(s: &str) -> Result<RelationKind> { Ok(RelationKind::parse(s)?) }

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw values read directly from a `strata_tables` row.
pub struct RawTable {
  pub id:               i64,
  pub owner:            Option<String>,
  pub name:             String,
  pub table_name:       String,
  pub display_name:     String,
  pub description:      Option<String>,
  pub icon:             String,
  pub is_active:        bool,
  pub has_timestamps:   bool,
  pub has_soft_deletes: bool,
  pub api_enabled:      bool,
  pub settings:         String,
  pub rules:            String,
  pub schema_version:   i64,
  pub created_at:       String,
  pub updated_at:       String,
}

pub const TABLE_COLUMNS: &str = "id, owner, name, table_name, display_name, description, icon,
  is_active, has_timestamps, has_soft_deletes, api_enabled, settings, rules,
  schema_version, created_at, updated_at";

impl RawTable {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:               row.get(0)?,
      owner:            row.get(1)?,
      name:             row.get(2)?,
      table_name:       row.get(3)?,
      display_name:     row.get(4)?,
      description:      row.get(5)?,
      icon:             row.get(6)?,
      is_active:        row.get(7)?,
      has_timestamps:   row.get(8)?,
      has_soft_deletes: row.get(9)?,
      api_enabled:      row.get(10)?,
      settings:         row.get(11)?,
      rules:            row.get(12)?,
      schema_version:   row.get(13)?,
      created_at:       row.get(14)?,
      updated_at:       row.get(15)?,
    })
  }

  pub fn into_table(self) -> Result<TableDefinition> {
    let settings: Map<String, Value> = serde_json::from_str(&self.settings)?;
    let rules: RowRules = serde_json::from_str(&self.rules)?;
    Ok(TableDefinition {
      id: self.id,
      owner: self.owner,
      name: self.name,
      table_name: self.table_name,
      display_name: self.display_name,
      description: self.description,
      icon: self.icon,
      is_active: self.is_active,
      has_timestamps: self.has_timestamps,
      has_soft_deletes: self.has_soft_deletes,
      api_enabled: self.api_enabled,
      settings,
      rules,
      schema_version: self.schema_version,
      created_at: decode_dt(&self.created_at)?,
      updated_at: decode_dt(&self.updated_at)?,
    })
  }
}

/// Raw values read directly from a `strata_columns` row.
pub struct RawColumn {
  pub id:            i64,
  pub table_id:      i64,
  pub name:          String,
  pub display_name:  String,
  pub description:   Option<String>,
  pub column_type:   String,
  pub required:      bool,
  pub unique:        bool,
  pub indexed:       bool,
  pub searchable:    bool,
  pub filterable:    bool,
  pub sortable:      bool,
  pub hidden:        bool,
  pub options:       String,
  pub default_value: Option<String>,
  pub position:      i64,
}

pub const COLUMN_COLUMNS: &str = "id, table_id, name, display_name, description, column_type,
  required, is_unique, indexed, searchable, filterable, sortable, hidden, options,
  default_value, position";

impl RawColumn {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:            row.get(0)?,
      table_id:      row.get(1)?,
      name:          row.get(2)?,
      display_name:  row.get(3)?,
      description:   row.get(4)?,
      column_type:   row.get(5)?,
      required:      row.get(6)?,
      unique:        row.get(7)?,
      indexed:       row.get(8)?,
      searchable:    row.get(9)?,
      filterable:    row.get(10)?,
      sortable:      row.get(11)?,
      hidden:        row.get(12)?,
      options:       row.get(13)?,
      default_value: row.get(14)?,
      position:      row.get(15)?,
    })
  }

  pub fn into_column(self) -> Result<ColumnDefinition> {
    let column_type = ColumnType::parse(&self.column_type)
      .map_err(|_| Error::Corrupt(format!("unknown column type {:?}", self.column_type)))?;
    Ok(ColumnDefinition {
      id: self.id,
      table_id: self.table_id,
      name: self.name,
      display_name: self.display_name,
      description: self.description,
      column_type,
      required: self.required,
      unique: self.unique,
      indexed: self.indexed,
      searchable: self.searchable,
      filterable: self.filterable,
      sortable: self.sortable,
      hidden: self.hidden,
      options: serde_json::from_str(&self.options)?,
      default_value: self.default_value.as_deref().map(serde_json::from_str).transpose()?,
      position: self.position,
    })
  }
}

/// Raw values from `strata_relationships` joined with both table names.
pub struct RawRelationship {
  pub id:              i64,
  pub name:            String,
  pub kind:            String,
  pub source_table_id: i64,
  pub source_table:    String,
  pub target_table_id: i64,
  pub target_table:    String,
  pub foreign_key:     String,
  pub created_at:      String,
}

pub const RELATIONSHIP_SELECT: &str = "SELECT r.id, r.name, r.kind,
  r.source_table_id, s.table_name, r.target_table_id, t.table_name,
  r.foreign_key, r.created_at
  FROM strata_relationships r
  JOIN strata_tables s ON s.id = r.source_table_id
  JOIN strata_tables t ON t.id = r.target_table_id";

impl RawRelationship {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:              row.get(0)?,
      name:            row.get(1)?,
      kind:            row.get(2)?,
      source_table_id: row.get(3)?,
      source_table:    row.get(4)?,
      target_table_id: row.get(5)?,
      target_table:    row.get(6)?,
      foreign_key:     row.get(7)?,
      created_at:      row.get(8)?,
    })
  }

  pub fn into_relationship(self) -> Result<RelationshipDefinition> {
    Ok(RelationshipDefinition {
      id:              self.id,
      name:            self.name,
      kind:            decode_kind(&self.kind)?,
      source_table_id: self.source_table_id,
      source_table:    self.source_table,
      target_table_id: self.target_table_id,
      target_table:    self.target_table,
      foreign_key:     self.foreign_key,
      created_at:      decode_dt(&self.created_at)?,
    })
  }
}

/// Raw values read directly from a `strata_api_keys` row.
pub struct RawApiKey {
  pub id:           i64,
  pub name:         String,
  pub owner:        Option<String>,
  pub kind:         String,
  pub hint:         String,
  pub abilities:    String,
  pub tables:       String,
  pub rate_limit:   u32,
  pub is_active:    bool,
  pub expires_at:   Option<String>,
  pub last_used_at: Option<String>,
  pub created_at:   String,
}

pub const API_KEY_COLUMNS: &str = "id, name, owner, kind, hint, abilities, tables,
  rate_limit, is_active, expires_at, last_used_at, created_at";

impl RawApiKey {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:           row.get(0)?,
      name:         row.get(1)?,
      owner:        row.get(2)?,
      kind:         row.get(3)?,
      hint:         row.get(4)?,
      abilities:    row.get(5)?,
      tables:       row.get(6)?,
      rate_limit:   row.get(7)?,
      is_active:    row.get(8)?,
      expires_at:   row.get(9)?,
      last_used_at: row.get(10)?,
      created_at:   row.get(11)?,
    })
  }

  pub fn into_key(self) -> Result<ApiKey> {
    let kind = match self.kind.as_str() {
      "secret" => KeyKind::Secret,
      "public" => KeyKind::Public,
      other => return Err(Error::Corrupt(format!("unknown key kind {other:?}"))),
    };
    let abilities: Vec<String> = serde_json::from_str(&self.abilities)?;
    Ok(ApiKey {
      id: self.id,
      name: self.name,
      owner: self.owner,
      kind,
      hint: self.hint,
      abilities: Abilities::try_from(abilities)?,
      tables: serde_json::from_str(&self.tables)?,
      rate_limit: self.rate_limit,
      is_active: self.is_active,
      expires_at: decode_opt_dt(self.expires_at)?,
      last_used_at: decode_opt_dt(self.last_used_at)?,
      created_at: decode_dt(&self.created_at)?,
    })
  }
}

pub fn encode_key_kind(kind: KeyKind) -> &'static str {
  match kind {
    KeyKind::Secret => "secret",
    KeyKind::Public => "public",
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  #[test]
  fn booleans_round_trip_as_integers() {
    let stored = encode_value(ColumnType::Boolean, &json!(true));
    assert_eq!(stored, SqlValue::Integer(1));
    assert_eq!(decode_value(ColumnType::Boolean, ValueRef::Integer(1)), json!(true));
  }

  #[test]
  fn decimals_decode_as_floats() {
    assert_eq!(decode_value(ColumnType::Decimal, ValueRef::Integer(12)), json!(12.0));
  }

  #[test]
  fn json_columns_decode_structurally() {
    let raw = br#"{"a":[1,2]}"#;
    assert_eq!(decode_value(ColumnType::Json, ValueRef::Text(raw)), json!({ "a": [1, 2] }));
  }

  #[test]
  fn default_literals_are_quoted() {
    assert_eq!(default_literal(&json!("O'Brien")).as_deref(), Some("'O''Brien'"));
    assert_eq!(default_literal(&json!(false)).as_deref(), Some("0"));
    assert_eq!(default_literal(&Value::Null), None);
  }
}
