//! Physical schema operations on user tables.
//!
//! Every function checks the current physical state first and only issues DDL
//! when something differs, so repeating an operation is harmless. SQLite DDL
//! is transactional; callers run these inside the same transaction as the
//! matching catalog write.

use rusqlite::{Connection, OptionalExtension as _};
use strata_core::{
  Error as CoreError,
  schema::{ColumnDefinition, TableDefinition, TableSchema},
};

use crate::{
  Error, Result,
  encode::{default_literal, quote},
};

/// One row of `pragma_table_info`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhysicalColumn {
  pub name:      String,
  pub decl_type: String,
}

pub fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
  let found = conn
    .query_row(
      "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
      rusqlite::params![table],
      |_| Ok(true),
    )
    .optional()?
    .unwrap_or(false);
  Ok(found)
}

pub fn physical_columns(conn: &Connection, table: &str) -> Result<Vec<PhysicalColumn>> {
  let mut stmt = conn.prepare("SELECT name, type FROM pragma_table_info(?1) ORDER BY cid")?;
  let columns = stmt
    .query_map(rusqlite::params![table], |row| {
      Ok(PhysicalColumn {
        name:      row.get(0)?,
        decl_type: row.get(1)?,
      })
    })?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  Ok(columns)
}

/// Physical column names, or `None` if the table does not exist.
pub fn column_names(conn: &Connection, table: &str) -> Result<Option<Vec<String>>> {
  if !table_exists(conn, table)? {
    return Ok(None);
  }
  Ok(Some(
    physical_columns(conn, table)?
      .into_iter()
      .map(|c| c.name)
      .collect(),
  ))
}

pub fn row_count(conn: &Connection, table: &str) -> Result<i64> {
  let count = conn.query_row(
    &format!("SELECT COUNT(*) FROM {}", quote(table)),
    [],
    |row| row.get(0),
  )?;
  Ok(count)
}

/// Column clause for `CREATE TABLE` / `ADD COLUMN`.
///
/// `NOT NULL` is only emitted where SQLite can honour it: on a fresh table,
/// or together with a default. Required-ness is always enforced on write.
fn column_clause(column: &ColumnDefinition, fresh_table: bool) -> String {
  let mut clause = format!("{} {}", quote(&column.name), column.column_type.storage().sql());
  let default = column.default_value.as_ref().and_then(default_literal);
  if column.required && (fresh_table || default.is_some()) {
    clause.push_str(" NOT NULL");
  }
  if let Some(literal) = default {
    clause.push_str(" DEFAULT ");
    clause.push_str(&literal);
  }
  clause
}

fn unique_index(table: &str, column: &str) -> String { format!("{table}__{column}__unique") }

fn plain_index(table: &str, column: &str) -> String { format!("{table}__{column}__idx") }

/// Create or drop the unique and plain indexes of `column` to match its flags.
pub fn sync_indexes(conn: &Connection, table: &str, column: &ColumnDefinition) -> Result<()> {
  let unique = unique_index(table, &column.name);
  let plain = plain_index(table, &column.name);
  let sql = format!(
    "{}; {};",
    if column.unique {
      format!(
        "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {} ({})",
        quote(&unique),
        quote(table),
        quote(&column.name)
      )
    } else {
      format!("DROP INDEX IF EXISTS {}", quote(&unique))
    },
    if column.indexed {
      format!(
        "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
        quote(&plain),
        quote(table),
        quote(&column.name)
      )
    } else {
      format!("DROP INDEX IF EXISTS {}", quote(&plain))
    },
  );
  conn
    .execute_batch(&sql)
    .map_err(|e| Error::materialization(table, e))
}

/// Create the physical table for `schema`, or bring an existing one up to
/// date by adding whatever columns it lacks.
pub fn create_table(conn: &Connection, schema: &TableSchema) -> Result<()> {
  let table = schema.name();
  if table_exists(conn, table)? {
    for column in &schema.columns {
      add_column(conn, table, column)?;
    }
    repair_system_columns(conn, &schema.table)?;
    return Ok(());
  }

  let mut clauses = vec![format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", quote("id"))];
  clauses.extend(schema.columns.iter().map(|c| column_clause(c, true)));
  if schema.table.has_timestamps {
    clauses.push(format!("{} TEXT", quote("created_at")));
    clauses.push(format!("{} TEXT", quote("updated_at")));
  }
  if schema.table.has_soft_deletes {
    clauses.push(format!("{} TEXT", quote("deleted_at")));
  }

  let sql = format!("CREATE TABLE {} ({})", quote(table), clauses.join(", "));
  conn
    .execute_batch(&sql)
    .map_err(|e| Error::materialization(table, e))?;
  for column in &schema.columns {
    sync_indexes(conn, table, column)?;
  }
  tracing::info!(table, columns = schema.columns.len(), "created physical table");
  Ok(())
}

/// Add `column` unless a column of that name and storage type exists.
/// A same-named column with a different storage type is a conflict.
pub fn add_column(conn: &Connection, table: &str, column: &ColumnDefinition) -> Result<()> {
  let wanted = column.column_type.storage().sql();
  let existing = physical_columns(conn, table)?
    .into_iter()
    .find(|c| c.name == column.name);

  match existing {
    Some(found) if found.decl_type.eq_ignore_ascii_case(wanted) => {}
    Some(found) => {
      return Err(
        CoreError::SchemaConflict(format!(
          "{table}.{} exists with type {} (wanted {wanted})",
          column.name, found.decl_type
        ))
        .into(),
      );
    }
    None => {
      let sql = format!(
        "ALTER TABLE {} ADD COLUMN {}",
        quote(table),
        column_clause(column, false)
      );
      conn
        .execute_batch(&sql)
        .map_err(|e| Error::materialization(table, e))?;
      tracing::info!(table, column = %column.name, "added physical column");
    }
  }
  sync_indexes(conn, table, column)
}

/// Drop `column` and its indexes if present.
pub fn drop_column(conn: &Connection, table: &str, column: &str) -> Result<()> {
  if !table_exists(conn, table)? {
    return Ok(());
  }
  if !physical_columns(conn, table)?.iter().any(|c| c.name == column) {
    return Ok(());
  }
  let sql = format!(
    "DROP INDEX IF EXISTS {}; DROP INDEX IF EXISTS {}; ALTER TABLE {} DROP COLUMN {};",
    quote(&unique_index(table, column)),
    quote(&plain_index(table, column)),
    quote(table),
    quote(column),
  );
  conn
    .execute_batch(&sql)
    .map_err(|e| Error::materialization(table, e))?;
  tracing::info!(table, column, "dropped physical column");
  Ok(())
}

pub fn drop_table(conn: &Connection, table: &str) -> Result<()> {
  conn
    .execute_batch(&format!("DROP TABLE IF EXISTS {}", quote(table)))
    .map_err(|e| Error::materialization(table, e))?;
  tracing::info!(table, "dropped physical table");
  Ok(())
}

/// Add the system columns the table's flags call for. Returns those added.
pub fn repair_system_columns(conn: &Connection, table: &TableDefinition) -> Result<Vec<String>> {
  let name = table.table_name.as_str();
  if !table_exists(conn, name)? {
    return Err(Error::materialization(name, "physical table does not exist"));
  }
  let present: Vec<String> = physical_columns(conn, name)?
    .into_iter()
    .map(|c| c.name)
    .collect();

  let mut wanted = Vec::new();
  if table.has_timestamps {
    wanted.extend(["created_at", "updated_at"]);
  }
  if table.has_soft_deletes {
    wanted.push("deleted_at");
  }

  let mut added = Vec::new();
  for column in wanted {
    if present.iter().any(|p| p == column) {
      continue;
    }
    conn
      .execute_batch(&format!(
        "ALTER TABLE {} ADD COLUMN {} TEXT",
        quote(name),
        quote(column)
      ))
      .map_err(|e| Error::materialization(name, e))?;
    tracing::info!(table = name, column, "added missing system column");
    added.push(column.to_string());
  }
  Ok(added)
}
