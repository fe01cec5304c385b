//! Catalog reads and writes on a borrowed connection.
//!
//! These run inside `Connection::call` closures, usually within a
//! transaction opened by the caller.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension as _};
use strata_core::{
  Error as CoreError,
  schema::{ColumnDefinition, RelationshipDefinition, TableDefinition, TableSchema},
};

use crate::{
  Result,
  encode::{
    COLUMN_COLUMNS, RELATIONSHIP_SELECT, RawColumn, RawRelationship, RawTable, TABLE_COLUMNS,
    encode_dt,
  },
};

pub fn load_table(conn: &Connection, table_id: i64) -> Result<Option<TableDefinition>> {
  conn
    .query_row(
      &format!("SELECT {TABLE_COLUMNS} FROM strata_tables WHERE id = ?1"),
      rusqlite::params![table_id],
      RawTable::from_row,
    )
    .optional()?
    .map(RawTable::into_table)
    .transpose()
}

/// Resolve a logical or physical table name to its id.
pub fn find_table_id(conn: &Connection, name: &str) -> Result<Option<i64>> {
  let id = conn
    .query_row(
      "SELECT id FROM strata_tables WHERE table_name = ?1 OR name = ?1
       ORDER BY table_name = ?1 DESC LIMIT 1",
      rusqlite::params![name],
      |row| row.get(0),
    )
    .optional()?;
  Ok(id)
}

pub fn list_tables(conn: &Connection) -> Result<Vec<TableDefinition>> {
  let mut stmt = conn.prepare(&format!(
    "SELECT {TABLE_COLUMNS} FROM strata_tables ORDER BY name"
  ))?;
  let raws = stmt
    .query_map([], RawTable::from_row)?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  raws.into_iter().map(RawTable::into_table).collect()
}

pub fn load_columns(conn: &Connection, table_id: i64) -> Result<Vec<ColumnDefinition>> {
  let mut stmt = conn.prepare(&format!(
    "SELECT {COLUMN_COLUMNS} FROM strata_columns WHERE table_id = ?1 ORDER BY position, id"
  ))?;
  let raws = stmt
    .query_map(rusqlite::params![table_id], RawColumn::from_row)?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  raws.into_iter().map(RawColumn::into_column).collect()
}

/// Relationships whose source is `table_id`.
pub fn outgoing_relationships(
  conn: &Connection,
  table_id: i64,
) -> Result<Vec<RelationshipDefinition>> {
  let mut stmt = conn.prepare(&format!(
    "{RELATIONSHIP_SELECT} WHERE r.source_table_id = ?1 ORDER BY r.name"
  ))?;
  let raws = stmt
    .query_map(rusqlite::params![table_id], RawRelationship::from_row)?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  raws.into_iter().map(RawRelationship::into_relationship).collect()
}

/// Relationships where `table_id` is source or target.
pub fn relationships_touching(
  conn: &Connection,
  table_id: i64,
) -> Result<Vec<RelationshipDefinition>> {
  let mut stmt = conn.prepare(&format!(
    "{RELATIONSHIP_SELECT} WHERE r.source_table_id = ?1 OR r.target_table_id = ?1 ORDER BY r.id"
  ))?;
  let raws = stmt
    .query_map(rusqlite::params![table_id], RawRelationship::from_row)?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  raws.into_iter().map(RawRelationship::into_relationship).collect()
}

pub fn load_schema(conn: &Connection, table_id: i64) -> Result<Option<TableSchema>> {
  let Some(table) = load_table(conn, table_id)? else {
    return Ok(None);
  };
  Ok(Some(TableSchema {
    columns: load_columns(conn, table_id)?,
    relationships: outgoing_relationships(conn, table_id)?,
    table,
  }))
}

pub fn find_schema(conn: &Connection, name: &str) -> Result<Option<TableSchema>> {
  match find_table_id(conn, name)? {
    Some(id) => load_schema(conn, id),
    None => Ok(None),
  }
}

pub fn require_schema(conn: &Connection, table_id: i64) -> Result<TableSchema> {
  load_schema(conn, table_id)?
    .ok_or_else(|| CoreError::TableNotFound(table_id.to_string()).into())
}

pub fn insert_column(conn: &Connection, column: &ColumnDefinition) -> Result<i64> {
  conn.execute(
    "INSERT INTO strata_columns (
       table_id, name, display_name, description, column_type, required, is_unique,
       indexed, searchable, filterable, sortable, hidden, options, default_value, position
     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
    rusqlite::params![
      column.table_id,
      column.name,
      column.display_name,
      column.description,
      column.column_type.as_str(),
      column.required,
      column.unique,
      column.indexed,
      column.searchable,
      column.filterable,
      column.sortable,
      column.hidden,
      serde_json::to_string(&column.options)?,
      column
        .default_value
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?,
      column.position,
    ],
  )?;
  Ok(conn.last_insert_rowid())
}

pub fn update_column(conn: &Connection, column: &ColumnDefinition) -> Result<()> {
  conn.execute(
    "UPDATE strata_columns SET
       display_name = ?2, description = ?3, column_type = ?4, required = ?5,
       is_unique = ?6, indexed = ?7, searchable = ?8, filterable = ?9, sortable = ?10,
       hidden = ?11, options = ?12, default_value = ?13
     WHERE id = ?1",
    rusqlite::params![
      column.id,
      column.display_name,
      column.description,
      column.column_type.as_str(),
      column.required,
      column.unique,
      column.indexed,
      column.searchable,
      column.filterable,
      column.sortable,
      column.hidden,
      serde_json::to_string(&column.options)?,
      column
        .default_value
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?,
    ],
  )?;
  Ok(())
}

/// Mark a schema mutation: bump the version and touch `updated_at`.
pub fn bump_version(conn: &Connection, table_id: i64, now: DateTime<Utc>) -> Result<()> {
  conn.execute(
    "UPDATE strata_tables SET schema_version = schema_version + 1, updated_at = ?2
     WHERE id = ?1",
    rusqlite::params![table_id, encode_dt(now)],
  )?;
  Ok(())
}

/// Next free ordinal position for a column of `table_id`.
pub fn next_position(conn: &Connection, table_id: i64) -> Result<i64> {
  let pos = conn.query_row(
    "SELECT COALESCE(MAX(position) + 1, 0) FROM strata_columns WHERE table_id = ?1",
    rusqlite::params![table_id],
    |row| row.get(0),
  )?;
  Ok(pos)
}

/// Current version of a table, or `None` if it no longer exists.
pub fn schema_version(conn: &Connection, table_id: i64) -> Result<Option<i64>> {
  let version = conn
    .query_row(
      "SELECT schema_version FROM strata_tables WHERE id = ?1",
      rusqlite::params![table_id],
      |row| row.get(0),
    )
    .optional()?;
  Ok(version)
}
