//! Schema catalog types: tables, columns and relationships defined at runtime.
//!
//! `*Spec` types are operator input, `*Definition` types are what the registry
//! persisted. [`TableSchema`] bundles a table with its columns and
//! relationships, which is the unit every record operation is validated
//! against.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::{
  Error, Result, naming,
  record::coerce_value,
  rules::RowRules,
};

// ─── Column types ────────────────────────────────────────────────────────────

/// Logical column type declared by an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
  String,
  Text,
  Email,
  Url,
  Uuid,
  Enum,
  Integer,
  BigInteger,
  Float,
  Decimal,
  Boolean,
  Date,
  DateTime,
  Time,
  Json,
}

/// SQLite storage class a [`ColumnType`] materializes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageType {
  Text,
  Integer,
  Real,
  Numeric,
}

impl StorageType {
  pub fn sql(self) -> &'static str {
    match self {
      StorageType::Text => "TEXT",
      StorageType::Integer => "INTEGER",
      StorageType::Real => "REAL",
      StorageType::Numeric => "NUMERIC",
    }
  }
}

impl ColumnType {
  pub const ALL: [ColumnType; 15] = [
    ColumnType::String,
    ColumnType::Text,
    ColumnType::Email,
    ColumnType::Url,
    ColumnType::Uuid,
    ColumnType::Enum,
    ColumnType::Integer,
    ColumnType::BigInteger,
    ColumnType::Float,
    ColumnType::Decimal,
    ColumnType::Boolean,
    ColumnType::Date,
    ColumnType::DateTime,
    ColumnType::Time,
    ColumnType::Json,
  ];

  /// Parse a declared type name, accepting the aliases operators commonly use.
  pub fn parse(name: &str) -> Result<Self> {
    let ty = match name.trim().to_ascii_lowercase().as_str() {
      "string" | "phone" | "slug" | "color" | "file" | "image" | "password" => {
        ColumnType::String
      }
      "text" | "richtext" | "markdown" => ColumnType::Text,
      "email" => ColumnType::Email,
      "url" => ColumnType::Url,
      "uuid" => ColumnType::Uuid,
      "enum" | "select" => ColumnType::Enum,
      "integer" | "int" => ColumnType::Integer,
      "big_integer" | "bigint" => ColumnType::BigInteger,
      "float" => ColumnType::Float,
      "decimal" | "money" => ColumnType::Decimal,
      "boolean" | "bool" | "checkbox" => ColumnType::Boolean,
      "date" => ColumnType::Date,
      "datetime" | "timestamp" => ColumnType::DateTime,
      "time" => ColumnType::Time,
      "json" | "array" => ColumnType::Json,
      _ => return Err(Error::UnsupportedType(name.to_string())),
    };
    Ok(ty)
  }

  pub fn as_str(self) -> &'static str {
    match self {
      ColumnType::String => "string",
      ColumnType::Text => "text",
      ColumnType::Email => "email",
      ColumnType::Url => "url",
      ColumnType::Uuid => "uuid",
      ColumnType::Enum => "enum",
      ColumnType::Integer => "integer",
      ColumnType::BigInteger => "big_integer",
      ColumnType::Float => "float",
      ColumnType::Decimal => "decimal",
      ColumnType::Boolean => "boolean",
      ColumnType::Date => "date",
      ColumnType::DateTime => "datetime",
      ColumnType::Time => "time",
      ColumnType::Json => "json",
    }
  }

  /// The fixed logical → physical mapping.
  pub fn storage(self) -> StorageType {
    match self {
      ColumnType::Integer | ColumnType::BigInteger | ColumnType::Boolean => {
        StorageType::Integer
      }
      ColumnType::Float => StorageType::Real,
      ColumnType::Decimal => StorageType::Numeric,
      ColumnType::String
      | ColumnType::Text
      | ColumnType::Email
      | ColumnType::Url
      | ColumnType::Uuid
      | ColumnType::Enum
      | ColumnType::Date
      | ColumnType::DateTime
      | ColumnType::Time
      | ColumnType::Json => StorageType::Text,
    }
  }

  /// Types included in free-text search.
  pub fn is_searchable_text(self) -> bool {
    matches!(
      self,
      ColumnType::String
        | ColumnType::Text
        | ColumnType::Email
        | ColumnType::Url
        | ColumnType::Enum
        | ColumnType::Uuid
    )
  }
}

impl fmt::Display for ColumnType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl Serialize for ColumnType {
  fn serialize<S: Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_str(self.as_str())
  }
}

impl<'de> Deserialize<'de> for ColumnType {
  fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
    let name = String::deserialize(d)?;
    ColumnType::parse(&name).map_err(serde::de::Error::custom)
  }
}

// ─── Definitions ─────────────────────────────────────────────────────────────

/// A persisted, operator-defined table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDefinition {
  pub id:               i64,
  pub owner:            Option<String>,
  pub name:             String,
  /// Physical storage name. Immutable once materialized.
  pub table_name:       String,
  pub display_name:     String,
  pub description:      Option<String>,
  pub icon:             String,
  pub is_active:        bool,
  pub has_timestamps:   bool,
  pub has_soft_deletes: bool,
  pub api_enabled:      bool,
  pub settings:         Map<String, Value>,
  pub rules:            RowRules,
  /// Bumped by every schema mutation on this table.
  pub schema_version:   i64,
  pub created_at:       DateTime<Utc>,
  pub updated_at:       DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDefinition {
  pub id:            i64,
  pub table_id:      i64,
  pub name:          String,
  pub display_name:  String,
  pub description:   Option<String>,
  #[serde(rename = "type")]
  pub column_type:   ColumnType,
  pub required:      bool,
  pub unique:        bool,
  pub indexed:       bool,
  pub searchable:    bool,
  pub filterable:    bool,
  pub sortable:      bool,
  pub hidden:        bool,
  pub options:       Vec<String>,
  pub default_value: Option<Value>,
  pub position:      i64,
}

/// Cardinality of a relationship, seen from its source table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
  /// Many-to-one: the foreign key lives on the source table.
  #[serde(alias = "belongsTo")]
  BelongsTo,
  /// One-to-many: the foreign key lives on the target table.
  #[serde(alias = "hasMany")]
  HasMany,
  /// One-to-one: the foreign key lives on the target table.
  #[serde(alias = "hasOne")]
  HasOne,
}

impl RelationKind {
  pub fn as_str(self) -> &'static str {
    match self {
      RelationKind::BelongsTo => "belongs_to",
      RelationKind::HasMany => "has_many",
      RelationKind::HasOne => "has_one",
    }
  }

  pub fn parse(s: &str) -> Result<Self> {
    match s {
      "belongs_to" => Ok(RelationKind::BelongsTo),
      "has_many" => Ok(RelationKind::HasMany),
      "has_one" => Ok(RelationKind::HasOne),
      other => Err(Error::InvalidSpec(format!("unknown relationship kind {other:?}"))),
    }
  }

  /// Whether the foreign key column is on the source table.
  pub fn key_on_source(self) -> bool { self == RelationKind::BelongsTo }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipDefinition {
  pub id:              i64,
  /// Key under which related records appear in responses.
  pub name:            String,
  pub kind:            RelationKind,
  pub source_table_id: i64,
  pub source_table:    String,
  pub target_table_id: i64,
  pub target_table:    String,
  pub foreign_key:     String,
  pub created_at:      DateTime<Utc>,
}

impl RelationshipDefinition {
  /// Physical table that carries the foreign key column.
  pub fn owning_table(&self) -> &str {
    if self.kind.key_on_source() { &self.source_table } else { &self.target_table }
  }
}

// ─── Specs ───────────────────────────────────────────────────────────────────

fn yes() -> bool { true }

/// Input for defining a new table.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TableSpec {
  pub name:             String,
  /// Defaults to the snake_case plural of `name`.
  #[serde(default)]
  pub table_name:       Option<String>,
  #[serde(default)]
  pub display_name:     Option<String>,
  #[serde(default)]
  pub description:      Option<String>,
  #[serde(default)]
  pub icon:             Option<String>,
  #[serde(default = "yes")]
  pub has_timestamps:   bool,
  #[serde(default)]
  pub has_soft_deletes: bool,
  #[serde(default = "yes")]
  pub api_enabled:      bool,
  #[serde(default)]
  pub settings:         Map<String, Value>,
  #[serde(default)]
  pub rules:            RowRules,
  #[serde(default)]
  pub columns:          Vec<ColumnSpec>,
}

impl TableSpec {
  /// Convenience constructor with the same defaults as deserialization.
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      has_timestamps: true,
      api_enabled: true,
      ..Default::default()
    }
  }

  pub fn with_column(mut self, column: ColumnSpec) -> Self {
    self.columns.push(column);
    self
  }

  pub fn soft_deletes(mut self) -> Self {
    self.has_soft_deletes = true;
    self
  }

  /// Validate names, column specs and rules; returns the physical table name.
  pub fn validate(&self) -> Result<String> {
    naming::validate_model_name(&self.name)?;
    let table_name = match &self.table_name {
      Some(t) => t.clone(),
      None => naming::table_name_for(&self.name),
    };
    naming::validate_table_name(&table_name)?;

    let mut seen = std::collections::HashSet::new();
    for column in &self.columns {
      column.validate()?;
      if !seen.insert(column.name.as_str()) {
        return Err(Error::ColumnNameConflict {
          table:  table_name.clone(),
          column: column.name.clone(),
        });
      }
    }
    self.rules.validate()?;
    Ok(table_name)
  }
}

/// Input for defining a column.
#[derive(Debug, Clone, Deserialize)]
pub struct ColumnSpec {
  pub name:          String,
  #[serde(default)]
  pub display_name:  Option<String>,
  #[serde(default)]
  pub description:   Option<String>,
  /// Kept as a raw string so unknown types surface as `UnsupportedType`.
  #[serde(rename = "type")]
  pub column_type:   String,
  #[serde(default)]
  pub required:      bool,
  #[serde(default)]
  pub unique:        bool,
  #[serde(default)]
  pub indexed:       bool,
  #[serde(default = "yes")]
  pub searchable:    bool,
  #[serde(default = "yes")]
  pub filterable:    bool,
  #[serde(default = "yes")]
  pub sortable:      bool,
  #[serde(default)]
  pub hidden:        bool,
  #[serde(default)]
  pub options:       Vec<String>,
  #[serde(default)]
  pub default_value: Option<Value>,
}

impl ColumnSpec {
  pub fn new(name: impl Into<String>, column_type: impl Into<String>) -> Self {
    Self {
      name:          name.into(),
      display_name:  None,
      description:   None,
      column_type:   column_type.into(),
      required:      false,
      unique:        false,
      indexed:       false,
      searchable:    true,
      filterable:    true,
      sortable:      true,
      hidden:        false,
      options:       Vec::new(),
      default_value: None,
    }
  }

  pub fn required(mut self) -> Self {
    self.required = true;
    self
  }

  pub fn unique(mut self) -> Self {
    self.unique = true;
    self
  }

  pub fn hidden(mut self) -> Self {
    self.hidden = true;
    self
  }

  pub fn default_value(mut self, value: Value) -> Self {
    self.default_value = Some(value);
    self
  }

  pub fn options<I, S>(mut self, options: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.options = options.into_iter().map(Into::into).collect();
    self
  }

  /// Validate the name, type, options and default; returns the parsed type.
  pub fn validate(&self) -> Result<ColumnType> {
    naming::validate_column_name(&self.name)?;
    let column_type = ColumnType::parse(&self.column_type)?;
    if column_type == ColumnType::Enum && self.options.is_empty() {
      return Err(Error::InvalidSpec(format!(
        "enum column {:?} needs at least one option",
        self.name
      )));
    }
    if let Some(default) = &self.default_value
      && !default.is_null()
    {
      let probe = self.to_definition(0, 0, column_type);
      coerce_value(&probe, default).map_err(|msg| {
        Error::InvalidSpec(format!("default for {:?}: {msg}", self.name))
      })?;
    }
    Ok(column_type)
  }

  /// Build the definition this spec describes. `id` and `table_id` are
  /// assigned by the registry.
  pub fn to_definition(
    &self,
    table_id: i64,
    position: i64,
    column_type: ColumnType,
  ) -> ColumnDefinition {
    ColumnDefinition {
      id: 0,
      table_id,
      name: self.name.clone(),
      display_name: self
        .display_name
        .clone()
        .unwrap_or_else(|| title_case(&self.name)),
      description: self.description.clone(),
      column_type,
      required: self.required,
      unique: self.unique,
      indexed: self.indexed,
      searchable: self.searchable,
      filterable: self.filterable,
      sortable: self.sortable,
      hidden: self.hidden,
      options: self.options.clone(),
      default_value: self.default_value.clone().filter(|v| !v.is_null()),
      position,
    }
  }
}

/// Input for defining a relationship between two registered tables.
#[derive(Debug, Clone, Deserialize)]
pub struct RelationshipSpec {
  pub name:        String,
  pub kind:        RelationKind,
  /// Logical or physical name of the source table.
  pub source:      String,
  /// Logical or physical name of the target table.
  pub target:      String,
  /// Derived from the table names when absent.
  #[serde(default)]
  pub foreign_key: Option<String>,
}

impl RelationshipSpec {
  /// Foreign key column, given the resolved physical table names.
  pub fn resolved_foreign_key(&self, source_table: &str, target_table: &str) -> String {
    self.foreign_key.clone().unwrap_or_else(|| {
      if self.kind.key_on_source() {
        naming::default_foreign_key(target_table)
      } else {
        naming::default_foreign_key(source_table)
      }
    })
  }
}

/// Partial update of a table's metadata.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TablePatch {
  pub display_name:     Option<String>,
  pub description:      Option<String>,
  pub icon:             Option<String>,
  pub is_active:        Option<bool>,
  pub has_timestamps:   Option<bool>,
  pub has_soft_deletes: Option<bool>,
  pub api_enabled:      Option<bool>,
  pub settings:         Option<Map<String, Value>>,
  pub rules:            Option<RowRules>,
}

/// Partial update of a column. `column_type` changes follow the policy in
/// [`TypeChange`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ColumnPatch {
  pub display_name:  Option<String>,
  pub description:   Option<String>,
  #[serde(rename = "type")]
  pub column_type:   Option<String>,
  pub required:      Option<bool>,
  pub unique:        Option<bool>,
  pub indexed:       Option<bool>,
  pub searchable:    Option<bool>,
  pub filterable:    Option<bool>,
  pub sortable:      Option<bool>,
  pub hidden:        Option<bool>,
  pub options:       Option<Vec<String>>,
  /// `null` clears the default.
  #[serde(default, deserialize_with = "double_option")]
  pub default_value: Option<Option<Value>>,
}

fn double_option<'de, D: Deserializer<'de>>(
  d: D,
) -> std::result::Result<Option<Option<Value>>, D::Error> {
  Ok(Some(Option::<Value>::deserialize(d)?))
}

/// What a column type change requires of the physical schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeChange {
  /// Same logical type.
  None,
  /// Same storage class; only the catalog changes.
  MetadataOnly,
  /// Different storage class; the physical column must be rebuilt, which is
  /// only allowed while the table holds no rows.
  Rebuild,
}

impl TypeChange {
  pub fn between(from: ColumnType, to: ColumnType) -> Self {
    if from == to {
      TypeChange::None
    } else if from.storage() == to.storage() {
      TypeChange::MetadataOnly
    } else {
      TypeChange::Rebuild
    }
  }
}

// ─── TableSchema ─────────────────────────────────────────────────────────────

/// A table with its columns (ordered by position) and outgoing relationships.
#[derive(Debug, Clone, Serialize)]
pub struct TableSchema {
  pub table:         TableDefinition,
  pub columns:       Vec<ColumnDefinition>,
  pub relationships: Vec<RelationshipDefinition>,
}

impl TableSchema {
  pub fn name(&self) -> &str { &self.table.table_name }

  pub fn column(&self, name: &str) -> Option<&ColumnDefinition> {
    self.columns.iter().find(|c| c.name == name)
  }

  pub fn relationship(&self, name: &str) -> Option<&RelationshipDefinition> {
    self.relationships.iter().find(|r| r.name == name)
  }

  /// Type of a declared or system column as seen by queries, or `None` if the
  /// table has no such column.
  pub fn query_type(&self, name: &str) -> Option<ColumnType> {
    match name {
      "id" => Some(ColumnType::BigInteger),
      "created_at" | "updated_at" if self.table.has_timestamps => {
        Some(ColumnType::DateTime)
      }
      "deleted_at" if self.table.has_soft_deletes => Some(ColumnType::DateTime),
      _ => self.column(name).map(|c| c.column_type),
    }
  }

  /// Physical column names in select order.
  pub fn physical_columns(&self) -> Vec<&str> {
    let mut names = vec!["id"];
    names.extend(self.columns.iter().map(|c| c.name.as_str()));
    if self.table.has_timestamps {
      names.extend(["created_at", "updated_at"]);
    }
    if self.table.has_soft_deletes {
      names.push("deleted_at");
    }
    names
  }

  /// Names of columns never exposed outside the store.
  pub fn hidden_columns(&self) -> Vec<&str> {
    self
      .columns
      .iter()
      .filter(|c| c.hidden)
      .map(|c| c.name.as_str())
      .collect()
  }
}

/// `shipping_address` → `Shipping Address`.
pub fn title_case(name: &str) -> String {
  name
    .split('_')
    .filter(|w| !w.is_empty())
    .map(|w| {
      let mut chars = w.chars();
      match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => String::new(),
      }
    })
    .collect::<Vec<_>>()
    .join(" ")
}
