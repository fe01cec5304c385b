//! Integration tests for `SqliteStore` against an in-memory database.

use serde_json::{Map, Value, json};
use strata_core::{
  DomainError as _, Error as CoreError, ErrorKind,
  access::{Abilities, ApiKeySpec, KeyKind},
  query::ListQuery,
  schema::{
    ColumnPatch, ColumnSpec, ColumnType, RelationKind, RelationshipSpec, TablePatch,
    TableSchema, TableSpec,
  },
  store::{KeyStore, Materializer, RecordStore, SchemaRegistry, SettingsStore},
};

use crate::{Error, SqliteStore};

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

fn row(v: Value) -> Map<String, Value> { v.as_object().unwrap().clone() }

fn params(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
  pairs
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

async fn customers(s: &SqliteStore) -> TableSchema {
  s.define_table(
    None,
    TableSpec::new("Customer")
      .with_column(ColumnSpec::new("name", "string").required())
      .with_column(ColumnSpec::new("email", "email").unique()),
  )
  .await
  .unwrap()
}

async fn orders(s: &SqliteStore) -> TableSchema {
  s.define_table(
    None,
    TableSpec::new("Order")
      .soft_deletes()
      .with_column(ColumnSpec::new("total", "decimal").required())
      .with_column(ColumnSpec::new("status", "enum").options(["open", "paid"])),
  )
  .await
  .unwrap()
}

// ─── Registry ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn define_table_creates_catalog_and_physical_table() {
  let s = store().await;
  let schema = customers(&s).await;

  assert_eq!(schema.name(), "customers");
  assert_eq!(schema.table.display_name, "Customers");
  assert_eq!(schema.columns.len(), 2);
  assert_eq!(schema.column("email").unwrap().column_type, ColumnType::Email);

  let physical = s.physical_columns("customers".into()).await.unwrap().unwrap();
  assert_eq!(physical, vec!["id", "name", "email", "created_at", "updated_at"]);

  let by_model = s.find_table("Customer".into()).await.unwrap().unwrap();
  let by_table = s.find_table("customers".into()).await.unwrap().unwrap();
  assert_eq!(by_model.table.id, by_table.table.id);
}

#[tokio::test]
async fn duplicate_table_name_conflicts() {
  let s = store().await;
  customers(&s).await;
  let err = s
    .define_table(None, TableSpec::new("Customer"))
    .await
    .unwrap_err();
  assert_eq!(err.kind(), ErrorKind::NameConflict);
}

#[tokio::test]
async fn unsupported_column_type_is_rejected_before_any_change() {
  let s = store().await;
  let err = s
    .define_table(
      None,
      TableSpec::new("Widget").with_column(ColumnSpec::new("shape", "polygon")),
    )
    .await
    .unwrap_err();
  assert_eq!(err.kind(), ErrorKind::UnsupportedType);
  assert!(s.list_tables().await.unwrap().is_empty());
  assert!(s.physical_columns("widgets".into()).await.unwrap().is_none());
}

#[tokio::test]
async fn define_column_adds_physical_column_and_bumps_version() {
  let s = store().await;
  let before = customers(&s).await;
  let column = s
    .define_column(before.table.id, ColumnSpec::new("vip", "boolean").default_value(json!(false)))
    .await
    .unwrap();
  assert_eq!(column.position, 2);

  let after = s.get_table(before.table.id).await.unwrap().unwrap();
  assert!(after.table.schema_version > before.table.schema_version);
  let physical = s.physical_columns("customers".into()).await.unwrap().unwrap();
  assert!(physical.contains(&"vip".to_string()));

  let err = s
    .define_column(before.table.id, ColumnSpec::new("vip", "string"))
    .await
    .unwrap_err();
  assert_eq!(err.kind(), ErrorKind::NameConflict);
}

#[tokio::test]
async fn delete_table_removes_relationships_table_and_metadata() {
  let s = store().await;
  let c = customers(&s).await;
  orders(&s).await;
  s.define_relationship(RelationshipSpec {
    name:        "customer".into(),
    kind:        RelationKind::BelongsTo,
    source:      "orders".into(),
    target:      "customers".into(),
    foreign_key: None,
  })
  .await
  .unwrap();

  s.delete_table(c.table.id).await.unwrap();

  assert!(s.get_table(c.table.id).await.unwrap().is_none());
  assert!(s.physical_columns("customers".into()).await.unwrap().is_none());
  let orders = s.find_table("orders".into()).await.unwrap().unwrap();
  assert!(orders.relationships.is_empty());
  // The foreign key column stays behind as an ordinary column.
  assert!(orders.column("customer_id").is_some());
}

#[tokio::test]
async fn failed_physical_drop_keeps_metadata() {
  let s = store().await;
  let c = customers(&s).await;
  s.insert(c.clone(), row(json!({ "name": "Ada" }))).await.unwrap();

  // An unmanaged table holding a real foreign key makes the drop fail.
  s.conn
    .call(|conn| {
      conn.execute_batch(
        "CREATE TABLE pins (id INTEGER PRIMARY KEY, customer_id INTEGER REFERENCES customers(id));
         INSERT INTO pins (customer_id) VALUES (1);",
      )?;
      Ok(())
    })
    .await
    .unwrap();

  let err = s.delete_table(c.table.id).await.unwrap_err();
  assert!(matches!(err, Error::Materialization { .. }), "{err:?}");
  assert_eq!(err.kind(), ErrorKind::Materialization);

  assert!(s.get_table(c.table.id).await.unwrap().is_some());
  assert!(s.physical_columns("customers".into()).await.unwrap().is_some());
}

#[tokio::test]
async fn relationship_creates_foreign_key_column() {
  let s = store().await;
  customers(&s).await;
  orders(&s).await;

  let rel = s
    .define_relationship(RelationshipSpec {
      name:        "customer".into(),
      kind:        RelationKind::BelongsTo,
      source:      "Order".into(),
      target:      "Customer".into(),
      foreign_key: None,
    })
    .await
    .unwrap();
  assert_eq!(rel.foreign_key, "customer_id");
  assert_eq!(rel.source_table, "orders");
  assert_eq!(rel.target_table, "customers");

  let orders = s.find_table("orders".into()).await.unwrap().unwrap();
  let fk = orders.column("customer_id").unwrap();
  assert_eq!(fk.column_type, ColumnType::BigInteger);
  assert!(fk.indexed);
  assert_eq!(orders.relationship("customer").unwrap().id, rel.id);

  let inverse = s
    .define_relationship(RelationshipSpec {
      name:        "orders".into(),
      kind:        RelationKind::HasMany,
      source:      "customers".into(),
      target:      "orders".into(),
      foreign_key: None,
    })
    .await
    .unwrap();
  assert_eq!(inverse.foreign_key, "customer_id");

  let err = s.drop_column(orders.table.id, "customer_id".into()).await.unwrap_err();
  assert_eq!(err.kind(), ErrorKind::SchemaConflict);
}

#[tokio::test]
async fn relationships_and_columns_share_one_namespace() {
  let s = store().await;
  customers(&s).await;
  let o = orders(&s).await;
  let belongs_to = |name: &str| RelationshipSpec {
    name:        name.into(),
    kind:        RelationKind::BelongsTo,
    source:      "orders".into(),
    target:      "customers".into(),
    foreign_key: None,
  };

  let err = s.define_relationship(belongs_to("status")).await.unwrap_err();
  assert_eq!(err.kind(), ErrorKind::NameConflict);
  let after = s.get_table(o.table.id).await.unwrap().unwrap();
  assert!(after.relationships.is_empty());
  assert!(after.column("customer_id").is_none());

  s.define_relationship(belongs_to("customer")).await.unwrap();
  let err = s
    .define_column(o.table.id, ColumnSpec::new("customer", "string"))
    .await
    .unwrap_err();
  assert_eq!(err.kind(), ErrorKind::NameConflict);
  let physical = s.physical_columns("orders".into()).await.unwrap().unwrap();
  assert!(!physical.contains(&"customer".to_string()));
}

#[tokio::test]
async fn relationship_to_unknown_table_is_not_found() {
  let s = store().await;
  orders(&s).await;
  let err = s
    .define_relationship(RelationshipSpec {
      name:        "customer".into(),
      kind:        RelationKind::BelongsTo,
      source:      "orders".into(),
      target:      "ghosts".into(),
      foreign_key: None,
    })
    .await
    .unwrap_err();
  assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn type_change_policy() {
  let s = store().await;
  let c = customers(&s).await;

  // string → text shares a storage class.
  let changed = s
    .update_column(
      c.table.id,
      "name".into(),
      ColumnPatch { column_type: Some("text".into()), ..Default::default() },
    )
    .await
    .unwrap();
  assert_eq!(changed.column_type, ColumnType::Text);

  // email → integer needs a rebuild, allowed while empty.
  s.update_column(
    c.table.id,
    "email".into(),
    ColumnPatch { column_type: Some("integer".into()), ..Default::default() },
  )
  .await
  .unwrap();

  let c = s.get_table(c.table.id).await.unwrap().unwrap();
  s.insert(c.clone(), row(json!({ "name": "Ada", "email": 1 }))).await.unwrap();

  let err = s
    .update_column(
      c.table.id,
      "email".into(),
      ColumnPatch { column_type: Some("string".into()), ..Default::default() },
    )
    .await
    .unwrap_err();
  assert_eq!(err.kind(), ErrorKind::SchemaConflict);
}

#[tokio::test]
async fn update_table_adds_soft_delete_column() {
  let s = store().await;
  let c = customers(&s).await;
  let updated = s
    .update_table(
      c.table.id,
      TablePatch { has_soft_deletes: Some(true), ..Default::default() },
    )
    .await
    .unwrap();
  assert!(updated.table.has_soft_deletes);
  let physical = s.physical_columns("customers".into()).await.unwrap().unwrap();
  assert!(physical.contains(&"deleted_at".to_string()));
}

// ─── Materializer ────────────────────────────────────────────────────────────

#[tokio::test]
async fn materializer_operations_are_idempotent() {
  let s = store().await;
  let c = customers(&s).await;

  s.apply_create(c.clone()).await.unwrap();
  let column = c.column("name").unwrap().clone();
  s.apply_column_add("customers".into(), column.clone()).await.unwrap();
  s.apply_column_add("customers".into(), column).await.unwrap();

  s.apply_column_drop("customers".into(), "email".into()).await.unwrap();
  s.apply_column_drop("customers".into(), "email".into()).await.unwrap();
  let physical = s.physical_columns("customers".into()).await.unwrap().unwrap();
  assert!(!physical.contains(&"email".to_string()));

  s.apply_drop("customers".into()).await.unwrap();
  s.apply_drop("customers".into()).await.unwrap();
  assert!(s.physical_columns("customers".into()).await.unwrap().is_none());
}

#[tokio::test]
async fn column_add_with_different_storage_conflicts() {
  let s = store().await;
  let c = customers(&s).await;
  let mut column = c.column("name").unwrap().clone();
  column.column_type = ColumnType::Integer;
  let err = s.apply_column_add("customers".into(), column).await.unwrap_err();
  assert_eq!(err.kind(), ErrorKind::SchemaConflict);
}

#[tokio::test]
async fn repair_adds_missing_system_columns() {
  let s = store().await;
  let c = customers(&s).await;
  s.conn
    .call(|conn| {
      conn.execute_batch("ALTER TABLE customers DROP COLUMN updated_at")?;
      Ok(())
    })
    .await
    .unwrap();

  let added = s.repair_system_columns(c.table.clone()).await.unwrap();
  assert_eq!(added, vec!["updated_at"]);
  let again = s.repair_system_columns(c.table).await.unwrap();
  assert!(again.is_empty());
}

// ─── Records ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn insert_get_update_delete() {
  let s = store().await;
  let c = customers(&s).await;

  let ada = s
    .insert(c.clone(), row(json!({ "name": "Ada", "email": "ada@example.com" })))
    .await
    .unwrap();
  assert_eq!(ada.get("name"), Some(&json!("Ada")));
  assert!(ada.get("created_at").unwrap().is_string());

  let fetched = s.get(c.clone(), ada.id, false).await.unwrap().unwrap();
  assert_eq!(fetched, ada);

  let (before, after) = s
    .update(c.clone(), ada.id, row(json!({ "name": "Ada L." })))
    .await
    .unwrap()
    .unwrap();
  assert_eq!(before.get("name"), Some(&json!("Ada")));
  assert_eq!(after.get("name"), Some(&json!("Ada L.")));
  assert_eq!(after.get("email"), Some(&json!("ada@example.com")));

  let removed = s.delete(c.clone(), ada.id).await.unwrap().unwrap();
  assert_eq!(removed.id, ada.id);
  assert!(s.get(c.clone(), ada.id, true).await.unwrap().is_none());
  assert!(s.delete(c, ada.id).await.unwrap().is_none());
}

#[tokio::test]
async fn unique_columns_are_checked() {
  let s = store().await;
  let c = customers(&s).await;
  s.insert(c.clone(), row(json!({ "name": "Ada", "email": "a@x.io" })))
    .await
    .unwrap();
  let bob = s
    .insert(c.clone(), row(json!({ "name": "Bob", "email": "b@x.io" })))
    .await
    .unwrap();

  let err = s
    .insert(c.clone(), row(json!({ "name": "Eve", "email": "a@x.io" })))
    .await
    .unwrap_err();
  assert_eq!(err.kind(), ErrorKind::Validation);
  assert!(err.field_errors().unwrap().contains_key("email"));

  // Updating a row to its own value is fine.
  s.update(c.clone(), bob.id, row(json!({ "email": "b@x.io" })))
    .await
    .unwrap()
    .unwrap();
  let err = s
    .update(c, bob.id, row(json!({ "email": "a@x.io" })))
    .await
    .unwrap_err();
  assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn soft_delete_hides_rows_until_restored() {
  let s = store().await;
  let o = orders(&s).await;
  let order = s
    .insert(o.clone(), row(json!({ "total": 12.5, "status": "open" })))
    .await
    .unwrap();

  let (before, after) = s.soft_delete(o.clone(), order.id).await.unwrap().unwrap();
  assert!(!before.is_tombstoned());
  assert!(after.is_tombstoned());

  assert!(s.get(o.clone(), order.id, false).await.unwrap().is_none());
  assert!(s.get(o.clone(), order.id, true).await.unwrap().is_some());
  let page = s.list(o.clone(), ListQuery::default()).await.unwrap();
  assert_eq!(page.meta.total, 0);

  // Already tombstoned.
  assert!(s.soft_delete(o.clone(), order.id).await.unwrap().is_none());
  assert!(s.update(o.clone(), order.id, row(json!({ "total": 1 }))).await.unwrap().is_none());

  let (_, restored) = s.restore(o.clone(), order.id).await.unwrap().unwrap();
  assert!(!restored.is_tombstoned());
  assert_eq!(s.list(o, ListQuery::default()).await.unwrap().meta.total, 1);
}

#[tokio::test]
async fn soft_delete_requires_flag() {
  let s = store().await;
  let c = customers(&s).await;
  let ada = s.insert(c.clone(), row(json!({ "name": "Ada" }))).await.unwrap();
  let err = s.soft_delete(c, ada.id).await.unwrap_err();
  assert_eq!(err.kind(), ErrorKind::SchemaConflict);
}

#[tokio::test]
async fn insert_many_is_all_or_nothing() {
  let s = store().await;
  let c = customers(&s).await;
  let err = s
    .insert_many(
      c.clone(),
      vec![
        row(json!({ "name": "A", "email": "dup@x.io" })),
        row(json!({ "name": "B", "email": "dup@x.io" })),
      ],
    )
    .await
    .unwrap_err();
  assert_eq!(err.kind(), ErrorKind::Validation);
  assert_eq!(s.list(c.clone(), ListQuery::default()).await.unwrap().meta.total, 0);

  let rows = s
    .insert_many(c, vec![row(json!({ "name": "A" })), row(json!({ "name": "B" }))])
    .await
    .unwrap();
  assert_eq!(rows.len(), 2);
}

#[tokio::test]
async fn list_filters_searches_sorts_and_pages() {
  let s = store().await;
  let o = orders(&s).await;
  for (total, status) in [(5.0, "open"), (20.0, "paid"), (12.0, "open"), (40.0, "paid")] {
    s.insert(o.clone(), row(json!({ "total": total, "status": status })))
      .await
      .unwrap();
  }

  let q = ListQuery::parse(&o, &params(&[("filter[status]", "open")])).unwrap();
  let page = s.list(o.clone(), q).await.unwrap();
  assert_eq!(page.meta.total, 2);

  let q = ListQuery::parse(
    &o,
    &params(&[("filter[total][gte]", "12"), ("sort", "total"), ("order", "asc")]),
  )
  .unwrap();
  let page = s.list(o.clone(), q).await.unwrap();
  let totals: Vec<_> = page.data.iter().map(|r| r.get("total").cloned().unwrap()).collect();
  assert_eq!(totals, vec![json!(12.0), json!(20.0), json!(40.0)]);

  let q = ListQuery::parse(&o, &params(&[("search", "pa")])).unwrap();
  assert_eq!(s.list(o.clone(), q).await.unwrap().meta.total, 2);

  let q = ListQuery::parse(&o, &params(&[("per_page", "3"), ("page", "2")])).unwrap();
  let page = s.list(o.clone(), q).await.unwrap();
  assert_eq!(page.data.len(), 1);
  assert_eq!(page.meta.last_page, 2);
  assert_eq!(page.meta.current_page, 2);
  // Default order is newest first.
  assert_eq!(page.data[0].id, 1);

  let q = ListQuery::parse(&o, &params(&[("filter[status][in]", "paid,open")])).unwrap();
  assert_eq!(s.list(o, q).await.unwrap().meta.total, 4);
}

#[tokio::test]
async fn stale_schema_is_rejected() {
  let s = store().await;
  let stale = customers(&s).await;
  s.define_column(stale.table.id, ColumnSpec::new("phone", "string"))
    .await
    .unwrap();

  let err = s.list(stale, ListQuery::default()).await.unwrap_err();
  assert!(matches!(err, Error::Core(CoreError::SchemaChanged(_))), "{err:?}");
}

#[tokio::test]
async fn fetch_where_in_uses_one_statement() {
  let s = store().await;
  let c = customers(&s).await;
  for name in ["A", "B", "C"] {
    s.insert(c.clone(), row(json!({ "name": name }))).await.unwrap();
  }

  let before = s.statements_executed();
  let found = s
    .fetch_where_in(c.clone(), "id".into(), vec![3, 1, 3, 99])
    .await
    .unwrap();
  assert_eq!(s.statements_executed() - before, 1);
  assert_eq!(found.iter().map(|r| r.id).collect::<Vec<_>>(), vec![1, 3]);

  let before = s.statements_executed();
  assert!(s.fetch_where_in(c, "id".into(), vec![]).await.unwrap().is_empty());
  assert_eq!(s.statements_executed(), before);
}

// ─── Keys and settings ───────────────────────────────────────────────────────

#[tokio::test]
async fn keys_are_found_by_token_only() {
  let s = store().await;
  let mut spec = ApiKeySpec::new("reader");
  spec.kind = KeyKind::Public;
  spec.abilities = Abilities::read_only();
  spec.tables = vec!["orders".into()];

  let issued = s.create_key(spec).await.unwrap();
  assert!(issued.token.starts_with("pk_"));
  assert_eq!(issued.key.hint, issued.token[..7]);

  let found = s.find_key_by_token(issued.token.clone()).await.unwrap().unwrap();
  assert_eq!(found.id, issued.key.id);
  assert_eq!(found.abilities, Abilities::read_only());
  assert_eq!(found.tables, vec!["orders".to_string()]);
  assert!(s.find_key_by_token("pk_nope".into()).await.unwrap().is_none());

  let at = chrono::Utc::now();
  s.touch_key(found.id, at).await.unwrap();
  let listed = s.list_keys().await.unwrap();
  assert_eq!(listed.len(), 1);
  assert!(listed[0].last_used_at.is_some());

  assert!(s.revoke_key(found.id).await.unwrap());
  assert!(!s.revoke_key(found.id).await.unwrap());
  assert!(s.find_key_by_token(issued.token).await.unwrap().is_none());
}

#[tokio::test]
async fn settings_round_trip() {
  let s = store().await;
  assert!(s.get_setting("brand".into()).await.unwrap().is_none());
  s.put_setting("brand".into(), json!({ "name": "Acme" })).await.unwrap();
  s.put_setting("brand".into(), json!({ "name": "Acme Co" })).await.unwrap();
  assert_eq!(
    s.get_setting("brand".into()).await.unwrap(),
    Some(json!({ "name": "Acme Co" }))
  );
  assert_eq!(s.list_settings().await.unwrap().len(), 1);
}
