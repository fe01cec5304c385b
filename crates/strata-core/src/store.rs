//! Storage traits.
//!
//! Implemented by storage backends (e.g. `strata-store-sqlite`). The HTTP layer
//! and the server binary depend on these abstractions, not on a concrete
//! backend. Arguments are owned so the returned futures only borrow `self`.

use std::future::Future;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::{
  access::{ApiKey, ApiKeySpec, IssuedKey},
  error::DomainError,
  query::{ListQuery, Page},
  record::Record,
  schema::{
    ColumnDefinition, ColumnPatch, ColumnSpec, RelationshipDefinition, RelationshipSpec,
    TableDefinition, TablePatch, TableSchema, TableSpec,
  },
};

/// Shared error type for every storage trait of a backend.
pub trait Store: Send + Sync {
  type Error: DomainError;
}

/// A record before and after a write.
pub type Transition = (Record, Record);

// ─── Schema registry ─────────────────────────────────────────────────────────

/// Persistent catalog of tables, columns and relationships.
///
/// Every mutation is applied to the physical schema in the same operation as
/// the catalog write; if the physical change fails, the catalog is left as it
/// was.
pub trait SchemaRegistry: Store {
  /// Define a table and its initial columns, and materialize it.
  fn define_table(
    &self,
    owner: Option<String>,
    spec: TableSpec,
  ) -> impl Future<Output = Result<TableSchema, Self::Error>> + Send + '_;

  fn update_table(
    &self,
    table_id: i64,
    patch: TablePatch,
  ) -> impl Future<Output = Result<TableSchema, Self::Error>> + Send + '_;

  /// Delete relationships touching the table, drop the physical table, then
  /// remove the definition.
  fn delete_table(
    &self,
    table_id: i64,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn define_column(
    &self,
    table_id: i64,
    spec: ColumnSpec,
  ) -> impl Future<Output = Result<ColumnDefinition, Self::Error>> + Send + '_;

  fn update_column(
    &self,
    table_id: i64,
    column: String,
    patch: ColumnPatch,
  ) -> impl Future<Output = Result<ColumnDefinition, Self::Error>> + Send + '_;

  fn drop_column(
    &self,
    table_id: i64,
    column: String,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Define a relationship, creating the foreign-key column if it is missing.
  fn define_relationship(
    &self,
    spec: RelationshipSpec,
  ) -> impl Future<Output = Result<RelationshipDefinition, Self::Error>> + Send + '_;

  fn delete_relationship(
    &self,
    table_id: i64,
    name: String,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn get_table(
    &self,
    table_id: i64,
  ) -> impl Future<Output = Result<Option<TableSchema>, Self::Error>> + Send + '_;

  /// Look a table up by logical name or physical table name.
  fn find_table(
    &self,
    name: String,
  ) -> impl Future<Output = Result<Option<TableSchema>, Self::Error>> + Send + '_;

  fn list_tables(
    &self,
  ) -> impl Future<Output = Result<Vec<TableDefinition>, Self::Error>> + Send + '_;

  /// Relationships where the table is either source or target.
  fn relationships_touching(
    &self,
    table_id: i64,
  ) -> impl Future<Output = Result<Vec<RelationshipDefinition>, Self::Error>> + Send + '_;
}

// ─── Materializer ────────────────────────────────────────────────────────────

/// Physical schema operations. Each is idempotent: acting on a table or
/// column that is already in the desired state succeeds without change.
pub trait Materializer: Store {
  fn apply_create(
    &self,
    schema: TableSchema,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn apply_column_add(
    &self,
    table_name: String,
    column: ColumnDefinition,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn apply_column_drop(
    &self,
    table_name: String,
    column: String,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn apply_drop(
    &self,
    table_name: String,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Add any `created_at`/`updated_at`/`deleted_at` column the table's flags
  /// call for but the physical table lacks. Returns the columns added.
  fn repair_system_columns(
    &self,
    table: TableDefinition,
  ) -> impl Future<Output = Result<Vec<String>, Self::Error>> + Send + '_;

  /// Physical column names, or `None` if the table does not exist.
  fn physical_columns(
    &self,
    table_name: String,
  ) -> impl Future<Output = Result<Option<Vec<String>>, Self::Error>> + Send + '_;
}

// ─── Records ─────────────────────────────────────────────────────────────────

/// Record storage for dynamic tables.
///
/// Every call carries the [`TableSchema`] it was validated against; backends
/// fail with a schema-changed error if the table was altered in between.
/// Values passed in have already been validated and coerced.
pub trait RecordStore: Store {
  /// Tombstoned rows are excluded.
  fn list(
    &self,
    schema: TableSchema,
    query: ListQuery,
  ) -> impl Future<Output = Result<Page<Record>, Self::Error>> + Send + '_;

  fn get(
    &self,
    schema: TableSchema,
    id: i64,
    with_trashed: bool,
  ) -> impl Future<Output = Result<Option<Record>, Self::Error>> + Send + '_;

  /// Insert one row. Unique columns are checked in the same transaction.
  fn insert(
    &self,
    schema: TableSchema,
    values: Map<String, Value>,
  ) -> impl Future<Output = Result<Record, Self::Error>> + Send + '_;

  /// Insert all rows or none.
  fn insert_many(
    &self,
    schema: TableSchema,
    rows: Vec<Map<String, Value>>,
  ) -> impl Future<Output = Result<Vec<Record>, Self::Error>> + Send + '_;

  fn update(
    &self,
    schema: TableSchema,
    id: i64,
    values: Map<String, Value>,
  ) -> impl Future<Output = Result<Option<Transition>, Self::Error>> + Send + '_;

  /// Set the tombstone on a live row.
  fn soft_delete(
    &self,
    schema: TableSchema,
    id: i64,
  ) -> impl Future<Output = Result<Option<Transition>, Self::Error>> + Send + '_;

  /// Clear the tombstone on a soft-deleted row.
  fn restore(
    &self,
    schema: TableSchema,
    id: i64,
  ) -> impl Future<Output = Result<Option<Transition>, Self::Error>> + Send + '_;

  /// Remove a row; returns it as it was.
  fn delete(
    &self,
    schema: TableSchema,
    id: i64,
  ) -> impl Future<Output = Result<Option<Record>, Self::Error>> + Send + '_;

  /// Live rows whose `column` is one of `keys`, in one statement.
  fn fetch_where_in(
    &self,
    schema: TableSchema,
    column: String,
    keys: Vec<i64>,
  ) -> impl Future<Output = Result<Vec<Record>, Self::Error>> + Send + '_;
}

// ─── Keys and settings ───────────────────────────────────────────────────────

pub trait KeyStore: Store {
  /// Issue a key. The plaintext token is only ever returned here.
  fn create_key(
    &self,
    spec: ApiKeySpec,
  ) -> impl Future<Output = Result<IssuedKey, Self::Error>> + Send + '_;

  fn find_key_by_token(
    &self,
    token: String,
  ) -> impl Future<Output = Result<Option<ApiKey>, Self::Error>> + Send + '_;

  fn list_keys(&self) -> impl Future<Output = Result<Vec<ApiKey>, Self::Error>> + Send + '_;

  /// Returns whether a key was removed.
  fn revoke_key(
    &self,
    key_id: i64,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  fn touch_key(
    &self,
    key_id: i64,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;
}

/// Flat key/value settings (branding and similar).
pub trait SettingsStore: Store {
  fn get_setting(
    &self,
    key: String,
  ) -> impl Future<Output = Result<Option<Value>, Self::Error>> + Send + '_;

  fn put_setting(
    &self,
    key: String,
    value: Value,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn list_settings(
    &self,
  ) -> impl Future<Output = Result<Map<String, Value>, Self::Error>> + Send + '_;
}

/// Everything the HTTP layer needs from a backend.
pub trait Backend:
  SchemaRegistry + Materializer + RecordStore + KeyStore + SettingsStore + 'static
{
}

impl<T> Backend for T where
  T: SchemaRegistry + Materializer + RecordStore + KeyStore + SettingsStore + 'static
{
}
