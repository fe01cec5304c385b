//! [`SqliteStore`]: the SQLite implementation of the `strata-core` storage
//! traits.

use std::{
  path::Path,
  sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
  },
};

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use strata_core::{
  access::{ApiKey, ApiKeySpec, IssuedKey},
  query::{ListQuery, Page},
  record::Record,
  schema::{
    ColumnDefinition, ColumnPatch, ColumnSpec, RelationshipDefinition, RelationshipSpec,
    TableDefinition, TablePatch, TableSchema, TableSpec,
  },
  store::{
    KeyStore, Materializer, RecordStore, SchemaRegistry, SettingsStore, Store, Transition,
  },
};

use crate::{Error, Result, catalog, ddl, error::lift, keys, records, registry, schema::SCHEMA};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Strata store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted. All access
/// goes through one connection thread, so operations on the same table never
/// interleave.
#[derive(Clone)]
pub struct SqliteStore {
  pub(crate) conn: tokio_rusqlite::Connection,
  statements:      Arc<AtomicU64>,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn, statements: Arc::default() };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn, statements: Arc::default() };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Number of SELECTs issued against user tables since the store opened.
  pub fn statements_executed(&self) -> u64 { self.statements.load(Ordering::Relaxed) }
}

impl Store for SqliteStore {
  type Error = Error;
}

// ─── SchemaRegistry ──────────────────────────────────────────────────────────

impl SchemaRegistry for SqliteStore {
  async fn define_table(&self, owner: Option<String>, spec: TableSpec) -> Result<TableSchema> {
    let now = Utc::now();
    Ok(
      self
        .conn
        .call(move |conn| lift(registry::define_table(conn, owner, spec, now)))
        .await?,
    )
  }

  async fn update_table(&self, table_id: i64, patch: TablePatch) -> Result<TableSchema> {
    let now = Utc::now();
    Ok(
      self
        .conn
        .call(move |conn| lift(registry::update_table(conn, table_id, patch, now)))
        .await?,
    )
  }

  async fn delete_table(&self, table_id: i64) -> Result<()> {
    self
      .conn
      .call(move |conn| lift(registry::delete_table(conn, table_id)))
      .await?;
    Ok(())
  }

  async fn define_column(&self, table_id: i64, spec: ColumnSpec) -> Result<ColumnDefinition> {
    let now = Utc::now();
    Ok(
      self
        .conn
        .call(move |conn| lift(registry::define_column(conn, table_id, spec, now)))
        .await?,
    )
  }

  async fn update_column(
    &self,
    table_id: i64,
    column: String,
    patch: ColumnPatch,
  ) -> Result<ColumnDefinition> {
    let now = Utc::now();
    Ok(
      self
        .conn
        .call(move |conn| lift(registry::update_column(conn, table_id, column, patch, now)))
        .await?,
    )
  }

  async fn drop_column(&self, table_id: i64, column: String) -> Result<()> {
    let now = Utc::now();
    self
      .conn
      .call(move |conn| lift(registry::drop_column(conn, table_id, column, now)))
      .await?;
    Ok(())
  }

  async fn define_relationship(&self, spec: RelationshipSpec) -> Result<RelationshipDefinition> {
    let now = Utc::now();
    Ok(
      self
        .conn
        .call(move |conn| lift(registry::define_relationship(conn, spec, now)))
        .await?,
    )
  }

  async fn delete_relationship(&self, table_id: i64, name: String) -> Result<()> {
    let now = Utc::now();
    self
      .conn
      .call(move |conn| lift(registry::delete_relationship(conn, table_id, name, now)))
      .await?;
    Ok(())
  }

  async fn get_table(&self, table_id: i64) -> Result<Option<TableSchema>> {
    Ok(
      self
        .conn
        .call(move |conn| lift(catalog::load_schema(conn, table_id)))
        .await?,
    )
  }

  async fn find_table(&self, name: String) -> Result<Option<TableSchema>> {
    Ok(
      self
        .conn
        .call(move |conn| lift(catalog::find_schema(conn, &name)))
        .await?,
    )
  }

  async fn list_tables(&self) -> Result<Vec<TableDefinition>> {
    Ok(self.conn.call(|conn| lift(catalog::list_tables(conn))).await?)
  }

  async fn relationships_touching(&self, table_id: i64) -> Result<Vec<RelationshipDefinition>> {
    Ok(
      self
        .conn
        .call(move |conn| lift(catalog::relationships_touching(conn, table_id)))
        .await?,
    )
  }
}

// ─── Materializer ────────────────────────────────────────────────────────────

impl Materializer for SqliteStore {
  async fn apply_create(&self, schema: TableSchema) -> Result<()> {
    self
      .conn
      .call(move |conn| lift(ddl::create_table(conn, &schema)))
      .await?;
    Ok(())
  }

  async fn apply_column_add(&self, table_name: String, column: ColumnDefinition) -> Result<()> {
    self
      .conn
      .call(move |conn| lift(ddl::add_column(conn, &table_name, &column)))
      .await?;
    Ok(())
  }

  async fn apply_column_drop(&self, table_name: String, column: String) -> Result<()> {
    self
      .conn
      .call(move |conn| lift(ddl::drop_column(conn, &table_name, &column)))
      .await?;
    Ok(())
  }

  async fn apply_drop(&self, table_name: String) -> Result<()> {
    self
      .conn
      .call(move |conn| lift(ddl::drop_table(conn, &table_name)))
      .await?;
    Ok(())
  }

  async fn repair_system_columns(&self, table: TableDefinition) -> Result<Vec<String>> {
    Ok(
      self
        .conn
        .call(move |conn| lift(ddl::repair_system_columns(conn, &table)))
        .await?,
    )
  }

  async fn physical_columns(&self, table_name: String) -> Result<Option<Vec<String>>> {
    Ok(
      self
        .conn
        .call(move |conn| lift(ddl::column_names(conn, &table_name)))
        .await?,
    )
  }
}

// ─── RecordStore ─────────────────────────────────────────────────────────────

impl RecordStore for SqliteStore {
  async fn list(&self, schema: TableSchema, query: ListQuery) -> Result<Page<Record>> {
    let counter = self.statements.clone();
    Ok(
      self
        .conn
        .call(move |conn| lift(records::list(conn, &schema, &query, &counter)))
        .await?,
    )
  }

  async fn get(&self, schema: TableSchema, id: i64, with_trashed: bool) -> Result<Option<Record>> {
    let counter = self.statements.clone();
    Ok(
      self
        .conn
        .call(move |conn| lift(records::get(conn, &schema, id, with_trashed, &counter)))
        .await?,
    )
  }

  async fn insert(&self, schema: TableSchema, values: Map<String, Value>) -> Result<Record> {
    let counter = self.statements.clone();
    let now = Utc::now();
    Ok(
      self
        .conn
        .call(move |conn| lift(records::insert(conn, &schema, &values, now, &counter)))
        .await?,
    )
  }

  async fn insert_many(
    &self,
    schema: TableSchema,
    rows: Vec<Map<String, Value>>,
  ) -> Result<Vec<Record>> {
    let counter = self.statements.clone();
    let now = Utc::now();
    Ok(
      self
        .conn
        .call(move |conn| lift(records::insert_many(conn, &schema, &rows, now, &counter)))
        .await?,
    )
  }

  async fn update(
    &self,
    schema: TableSchema,
    id: i64,
    values: Map<String, Value>,
  ) -> Result<Option<Transition>> {
    let counter = self.statements.clone();
    let now = Utc::now();
    Ok(
      self
        .conn
        .call(move |conn| lift(records::update(conn, &schema, id, &values, now, &counter)))
        .await?,
    )
  }

  async fn soft_delete(&self, schema: TableSchema, id: i64) -> Result<Option<Transition>> {
    let counter = self.statements.clone();
    let now = Utc::now();
    Ok(
      self
        .conn
        .call(move |conn| lift(records::soft_delete(conn, &schema, id, now, &counter)))
        .await?,
    )
  }

  async fn restore(&self, schema: TableSchema, id: i64) -> Result<Option<Transition>> {
    let counter = self.statements.clone();
    let now = Utc::now();
    Ok(
      self
        .conn
        .call(move |conn| lift(records::restore(conn, &schema, id, now, &counter)))
        .await?,
    )
  }

  async fn delete(&self, schema: TableSchema, id: i64) -> Result<Option<Record>> {
    let counter = self.statements.clone();
    Ok(
      self
        .conn
        .call(move |conn| lift(records::delete(conn, &schema, id, &counter)))
        .await?,
    )
  }

  async fn fetch_where_in(
    &self,
    schema: TableSchema,
    column: String,
    keys: Vec<i64>,
  ) -> Result<Vec<Record>> {
    let counter = self.statements.clone();
    Ok(
      self
        .conn
        .call(move |conn| lift(records::fetch_where_in(conn, &schema, &column, keys, &counter)))
        .await?,
    )
  }
}

// ─── Keys and settings ───────────────────────────────────────────────────────

impl KeyStore for SqliteStore {
  async fn create_key(&self, spec: ApiKeySpec) -> Result<IssuedKey> {
    let now = Utc::now();
    Ok(
      self
        .conn
        .call(move |conn| lift(keys::create_key(conn, spec, now)))
        .await?,
    )
  }

  async fn find_key_by_token(&self, token: String) -> Result<Option<ApiKey>> {
    Ok(
      self
        .conn
        .call(move |conn| lift(keys::find_key_by_token(conn, &token)))
        .await?,
    )
  }

  async fn list_keys(&self) -> Result<Vec<ApiKey>> {
    Ok(self.conn.call(|conn| lift(keys::list_keys(conn))).await?)
  }

  async fn revoke_key(&self, key_id: i64) -> Result<bool> {
    Ok(
      self
        .conn
        .call(move |conn| lift(keys::revoke_key(conn, key_id)))
        .await?,
    )
  }

  async fn touch_key(&self, key_id: i64, at: DateTime<Utc>) -> Result<()> {
    self
      .conn
      .call(move |conn| lift(keys::touch_key(conn, key_id, at)))
      .await?;
    Ok(())
  }
}

impl SettingsStore for SqliteStore {
  async fn get_setting(&self, key: String) -> Result<Option<Value>> {
    Ok(
      self
        .conn
        .call(move |conn| lift(keys::get_setting(conn, &key)))
        .await?,
    )
  }

  async fn put_setting(&self, key: String, value: Value) -> Result<()> {
    let now = Utc::now();
    self
      .conn
      .call(move |conn| lift(keys::put_setting(conn, &key, &value, now)))
      .await?;
    Ok(())
  }

  async fn list_settings(&self) -> Result<Map<String, Value>> {
    Ok(self.conn.call(|conn| lift(keys::list_settings(conn))).await?)
  }
}
