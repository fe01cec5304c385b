//! Schema registry operations.
//!
//! Each operation runs in one transaction that covers both the physical DDL
//! and the catalog rows, so a failed physical change leaves the catalog as
//! it was.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension as _};
use strata_core::{
  Error as CoreError,
  naming,
  record::coerce_value,
  schema::{
    ColumnDefinition, ColumnPatch, ColumnSpec, ColumnType, RelationshipDefinition,
    RelationshipSpec, TableDefinition, TablePatch, TableSchema, TableSpec, TypeChange,
    title_case,
  },
};

use crate::{
  Result, catalog, ddl,
  encode::{RELATIONSHIP_SELECT, RawRelationship, encode_dt, encode_kind},
};

// ─── Tables ──────────────────────────────────────────────────────────────────

pub fn define_table(
  conn: &mut Connection,
  owner: Option<String>,
  spec: TableSpec,
  now: DateTime<Utc>,
) -> Result<TableSchema> {
  let table_name = spec.validate()?;
  let types = spec
    .columns
    .iter()
    .map(ColumnSpec::validate)
    .collect::<strata_core::Result<Vec<_>>>()?;

  let tx = conn.transaction()?;

  let taken = tx
    .query_row(
      "SELECT 1 FROM strata_tables WHERE name = ?1 OR table_name = ?2",
      rusqlite::params![spec.name, table_name],
      |_| Ok(true),
    )
    .optional()?
    .unwrap_or(false);
  if taken {
    return Err(CoreError::NameConflict(spec.name.clone()).into());
  }

  // Physical first; the catalog rows below only land if it succeeded.
  let provisional = TableSchema {
    table:         TableDefinition {
      id:               0,
      owner:            owner.clone(),
      name:             spec.name.clone(),
      table_name:       table_name.clone(),
      display_name:     spec
        .display_name
        .clone()
        .unwrap_or_else(|| title_case(&table_name)),
      description:      spec.description.clone(),
      icon:             spec.icon.clone().unwrap_or_else(|| "table".to_string()),
      is_active:        true,
      has_timestamps:   spec.has_timestamps,
      has_soft_deletes: spec.has_soft_deletes,
      api_enabled:      spec.api_enabled,
      settings:         spec.settings.clone(),
      rules:            spec.rules.clone(),
      schema_version:   1,
      created_at:       now,
      updated_at:       now,
    },
    columns:       spec
      .columns
      .iter()
      .zip(&types)
      .enumerate()
      .map(|(pos, (c, ty))| canonical_default(c.to_definition(0, pos as i64, *ty)))
      .collect::<Result<Vec<_>>>()?,
    relationships: Vec::new(),
  };
  ddl::create_table(&tx, &provisional)?;

  let t = &provisional.table;
  tx.execute(
    "INSERT INTO strata_tables (
       owner, name, table_name, display_name, description, icon, is_active,
       has_timestamps, has_soft_deletes, api_enabled, settings, rules,
       schema_version, created_at, updated_at
     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?14)",
    rusqlite::params![
      t.owner,
      t.name,
      t.table_name,
      t.display_name,
      t.description,
      t.icon,
      t.is_active,
      t.has_timestamps,
      t.has_soft_deletes,
      t.api_enabled,
      serde_json::to_string(&t.settings)?,
      serde_json::to_string(&t.rules)?,
      t.schema_version,
      encode_dt(now),
    ],
  )?;
  let table_id = tx.last_insert_rowid();

  for column in &provisional.columns {
    let mut column = column.clone();
    column.table_id = table_id;
    catalog::insert_column(&tx, &column)?;
  }

  let schema = catalog::require_schema(&tx, table_id)?;
  tx.commit()?;
  tracing::info!(table = %schema.name(), table_id, "defined table");
  Ok(schema)
}

pub fn update_table(
  conn: &mut Connection,
  table_id: i64,
  patch: TablePatch,
  now: DateTime<Utc>,
) -> Result<TableSchema> {
  let tx = conn.transaction()?;
  let mut table = catalog::load_table(&tx, table_id)?
    .ok_or_else(|| CoreError::TableNotFound(table_id.to_string()))?;

  if let Some(v) = patch.display_name {
    table.display_name = v;
  }
  if let Some(v) = patch.description {
    table.description = Some(v);
  }
  if let Some(v) = patch.icon {
    table.icon = v;
  }
  if let Some(v) = patch.is_active {
    table.is_active = v;
  }
  if let Some(v) = patch.has_timestamps {
    table.has_timestamps = v;
  }
  if let Some(v) = patch.has_soft_deletes {
    table.has_soft_deletes = v;
  }
  if let Some(v) = patch.api_enabled {
    table.api_enabled = v;
  }
  if let Some(v) = patch.settings {
    table.settings = v;
  }
  if let Some(v) = patch.rules {
    v.validate()?;
    table.rules = v;
  }

  // Switching a flag on needs the matching physical columns.
  ddl::repair_system_columns(&tx, &table)?;

  tx.execute(
    "UPDATE strata_tables SET
       display_name = ?2, description = ?3, icon = ?4, is_active = ?5,
       has_timestamps = ?6, has_soft_deletes = ?7, api_enabled = ?8,
       settings = ?9, rules = ?10
     WHERE id = ?1",
    rusqlite::params![
      table_id,
      table.display_name,
      table.description,
      table.icon,
      table.is_active,
      table.has_timestamps,
      table.has_soft_deletes,
      table.api_enabled,
      serde_json::to_string(&table.settings)?,
      serde_json::to_string(&table.rules)?,
    ],
  )?;
  catalog::bump_version(&tx, table_id, now)?;

  let schema = catalog::require_schema(&tx, table_id)?;
  tx.commit()?;
  Ok(schema)
}

/// Relationships, then the physical table, then the definition. All three
/// share a transaction: if the drop fails nothing is removed.
pub fn delete_table(conn: &mut Connection, table_id: i64) -> Result<()> {
  let tx = conn.transaction()?;
  let table = catalog::load_table(&tx, table_id)?
    .ok_or_else(|| CoreError::TableNotFound(table_id.to_string()))?;

  let edges = tx.execute(
    "DELETE FROM strata_relationships WHERE source_table_id = ?1 OR target_table_id = ?1",
    rusqlite::params![table_id],
  )?;
  ddl::drop_table(&tx, &table.table_name)?;
  tx.execute(
    "DELETE FROM strata_columns WHERE table_id = ?1",
    rusqlite::params![table_id],
  )?;
  tx.execute(
    "DELETE FROM strata_tables WHERE id = ?1",
    rusqlite::params![table_id],
  )?;

  tx.commit()?;
  tracing::info!(table = %table.table_name, relationships = edges, "deleted table");
  Ok(())
}

// ─── Columns ─────────────────────────────────────────────────────────────────

pub fn define_column(
  conn: &mut Connection,
  table_id: i64,
  spec: ColumnSpec,
  now: DateTime<Utc>,
) -> Result<ColumnDefinition> {
  let column_type = spec.validate()?;
  let tx = conn.transaction()?;
  let schema = catalog::require_schema(&tx, table_id)?;

  if schema.relationship(&spec.name).is_some() {
    return Err(
      CoreError::NameConflict(format!(
        "{}.{} is already a relationship",
        schema.name(),
        spec.name
      ))
      .into(),
    );
  }
  if schema.column(&spec.name).is_some() {
    return Err(
      CoreError::ColumnNameConflict {
        table:  schema.name().to_string(),
        column: spec.name,
      }
      .into(),
    );
  }

  let position = catalog::next_position(&tx, table_id)?;
  let mut column = canonical_default(spec.to_definition(table_id, position, column_type))?;
  ddl::add_column(&tx, schema.name(), &column)?;
  column.id = catalog::insert_column(&tx, &column)?;
  catalog::bump_version(&tx, table_id, now)?;

  tx.commit()?;
  Ok(column)
}

/// Store defaults in the same canonical form as written values.
fn canonical_default(mut column: ColumnDefinition) -> Result<ColumnDefinition> {
  if let Some(default) = &column.default_value {
    let canonical = coerce_value(&column, default).map_err(|msg| {
      CoreError::InvalidSpec(format!("default for {:?}: {msg}", column.name))
    })?;
    column.default_value = Some(canonical);
  }
  Ok(column)
}

pub fn update_column(
  conn: &mut Connection,
  table_id: i64,
  name: String,
  patch: ColumnPatch,
  now: DateTime<Utc>,
) -> Result<ColumnDefinition> {
  let tx = conn.transaction()?;
  let schema = catalog::require_schema(&tx, table_id)?;
  let current = schema
    .column(&name)
    .cloned()
    .ok_or_else(|| CoreError::ColumnNotFound {
      table:  schema.name().to_string(),
      column: name.clone(),
    })?;

  let mut next = current.clone();
  if let Some(v) = patch.display_name {
    next.display_name = v;
  }
  if let Some(v) = patch.description {
    next.description = Some(v);
  }
  if let Some(raw) = &patch.column_type {
    next.column_type = ColumnType::parse(raw)?;
  }
  if let Some(v) = patch.required {
    next.required = v;
  }
  if let Some(v) = patch.unique {
    next.unique = v;
  }
  if let Some(v) = patch.indexed {
    next.indexed = v;
  }
  if let Some(v) = patch.searchable {
    next.searchable = v;
  }
  if let Some(v) = patch.filterable {
    next.filterable = v;
  }
  if let Some(v) = patch.sortable {
    next.sortable = v;
  }
  if let Some(v) = patch.hidden {
    next.hidden = v;
  }
  if let Some(v) = patch.options {
    next.options = v;
  }
  if let Some(v) = patch.default_value {
    next.default_value = v.filter(|d| !d.is_null());
  }

  if next.column_type == ColumnType::Enum && next.options.is_empty() {
    return Err(
      CoreError::InvalidSpec(format!("enum column {name:?} needs at least one option")).into(),
    );
  }
  let next = canonical_default(next)?;

  let table = schema.name();
  match TypeChange::between(current.column_type, next.column_type) {
    TypeChange::None | TypeChange::MetadataOnly => ddl::sync_indexes(&tx, table, &next)?,
    TypeChange::Rebuild => {
      let rows = ddl::row_count(&tx, table)?;
      if rows > 0 {
        return Err(
          CoreError::SchemaConflict(format!(
            "cannot change {table}.{name} from {} to {} while the table holds {rows} rows",
            current.column_type, next.column_type
          ))
          .into(),
        );
      }
      ddl::drop_column(&tx, table, &name)?;
      ddl::add_column(&tx, table, &next)?;
    }
  }

  catalog::update_column(&tx, &next)?;
  catalog::bump_version(&tx, table_id, now)?;
  tx.commit()?;
  Ok(next)
}

pub fn drop_column(
  conn: &mut Connection,
  table_id: i64,
  name: String,
  now: DateTime<Utc>,
) -> Result<()> {
  let tx = conn.transaction()?;
  let schema = catalog::require_schema(&tx, table_id)?;
  let column = schema
    .column(&name)
    .ok_or_else(|| CoreError::ColumnNotFound {
      table:  schema.name().to_string(),
      column: name.clone(),
    })?;

  let used_by = catalog::relationships_touching(&tx, table_id)?
    .into_iter()
    .find(|r| r.owning_table() == schema.name() && r.foreign_key == column.name);
  if let Some(rel) = used_by {
    return Err(
      CoreError::SchemaConflict(format!(
        "{}.{name} is the foreign key of relationship {:?}",
        schema.name(),
        rel.name
      ))
      .into(),
    );
  }

  ddl::drop_column(&tx, schema.name(), &name)?;
  tx.execute(
    "DELETE FROM strata_columns WHERE id = ?1",
    rusqlite::params![column.id],
  )?;
  catalog::bump_version(&tx, table_id, now)?;
  tx.commit()?;
  Ok(())
}

// ─── Relationships ───────────────────────────────────────────────────────────

pub fn define_relationship(
  conn: &mut Connection,
  spec: RelationshipSpec,
  now: DateTime<Utc>,
) -> Result<RelationshipDefinition> {
  if !naming::is_identifier(&spec.name) {
    return Err(
      CoreError::InvalidSpec(format!(
        "relationship name {:?} must match ^[a-z][a-z0-9_]*$",
        spec.name
      ))
      .into(),
    );
  }

  let tx = conn.transaction()?;
  let source_id = catalog::find_table_id(&tx, &spec.source)?
    .ok_or_else(|| CoreError::TableNotFound(spec.source.clone()))?;
  let target_id = catalog::find_table_id(&tx, &spec.target)?
    .ok_or_else(|| CoreError::TableNotFound(spec.target.clone()))?;
  let source = catalog::require_schema(&tx, source_id)?;
  let target = catalog::require_schema(&tx, target_id)?;

  if source.relationship(&spec.name).is_some() {
    return Err(CoreError::NameConflict(format!("{}.{}", source.name(), spec.name)).into());
  }
  // Included rows are keyed by relationship name next to the columns.
  if source.column(&spec.name).is_some() {
    return Err(
      CoreError::NameConflict(format!("{}.{} is already a column", source.name(), spec.name))
        .into(),
    );
  }

  let foreign_key = spec.resolved_foreign_key(source.name(), target.name());
  naming::validate_column_name(&foreign_key)?;

  let owner = if spec.kind.key_on_source() { &source } else { &target };
  match owner.column(&foreign_key) {
    Some(existing)
      if matches!(existing.column_type, ColumnType::Integer | ColumnType::BigInteger) => {}
    Some(existing) => {
      return Err(
        CoreError::InvalidForeignKey(format!(
          "{}.{foreign_key} is {}, not an integer column",
          owner.name(),
          existing.column_type
        ))
        .into(),
      );
    }
    None => {
      let mut column = ColumnSpec::new(foreign_key.clone(), "big_integer").to_definition(
        owner.table.id,
        catalog::next_position(&tx, owner.table.id)?,
        ColumnType::BigInteger,
      );
      column.indexed = true;
      ddl::add_column(&tx, owner.name(), &column)?;
      catalog::insert_column(&tx, &column)?;
      catalog::bump_version(&tx, owner.table.id, now)?;
    }
  }

  tx.execute(
    "INSERT INTO strata_relationships
       (name, kind, source_table_id, target_table_id, foreign_key, created_at)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    rusqlite::params![
      spec.name,
      encode_kind(spec.kind),
      source_id,
      target_id,
      foreign_key,
      encode_dt(now),
    ],
  )?;
  let id = tx.last_insert_rowid();
  catalog::bump_version(&tx, source_id, now)?;

  let relationship = tx
    .query_row(
      &format!("{RELATIONSHIP_SELECT} WHERE r.id = ?1"),
      rusqlite::params![id],
      RawRelationship::from_row,
    )?
    .into_relationship()?;
  tx.commit()?;
  Ok(relationship)
}

pub fn delete_relationship(
  conn: &mut Connection,
  table_id: i64,
  name: String,
  now: DateTime<Utc>,
) -> Result<()> {
  let tx = conn.transaction()?;
  let schema = catalog::require_schema(&tx, table_id)?;
  let removed = tx.execute(
    "DELETE FROM strata_relationships WHERE source_table_id = ?1 AND name = ?2",
    rusqlite::params![table_id, name],
  )?;
  if removed == 0 {
    return Err(
      CoreError::RelationshipNotFound {
        table:        schema.name().to_string(),
        relationship: name,
      }
      .into(),
    );
  }
  catalog::bump_version(&tx, table_id, now)?;
  tx.commit()?;
  Ok(())
}
