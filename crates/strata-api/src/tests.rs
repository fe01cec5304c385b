//! End-to-end tests over the router with an in-memory SQLite backend.

use std::sync::Arc;

use argon2::{Argon2, PasswordHasher, password_hash::SaltString};
use axum::{
  body::Body,
  http::{HeaderMap, Method, Request, StatusCode},
};
use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
use rand_core::OsRng;
use serde_json::{Value, json};
use strata_core::{
  access::{Abilities, ApiKeySpec, Role},
  event::ChangeAction,
  rules::RowRules,
  schema::{ColumnSpec, RelationKind, RelationshipSpec, TableSchema, TableSpec},
  store::{KeyStore, RecordStore, SchemaRegistry},
};
use strata_store_sqlite::SqliteStore;
use tower::ServiceExt as _;

use crate::{ApiConfig, AppState, api_router, cache::ResponseCache, gate::OperatorConfig};

const ADMIN_PASSWORD: &str = "correct horse";

struct Harness {
  state: AppState<SqliteStore>,
  store: Arc<SqliteStore>,
  admin: String,
}

struct Reply {
  status:  StatusCode,
  headers: HeaderMap,
  body:    Value,
}

impl Reply {
  fn cache_status(&self) -> &str {
    self
      .headers
      .get("x-cache-status")
      .and_then(|v| v.to_str().ok())
      .unwrap_or("")
  }
}

async fn harness() -> Harness {
  let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
  let salt = SaltString::generate(&mut OsRng);
  let hash = Argon2::default()
    .hash_password(ADMIN_PASSWORD.as_bytes(), &salt)
    .unwrap()
    .to_string();
  let config = ApiConfig {
    operators: vec![OperatorConfig {
      username:      "ada".to_string(),
      password_hash: hash,
      role:          Role::Admin,
    }],
    ..ApiConfig::default()
  };
  let state = AppState::new(store.clone(), config).unwrap();
  Harness {
    state,
    store,
    admin: format!("Basic {}", B64.encode(format!("ada:{ADMIN_PASSWORD}"))),
  }
}

impl Harness {
  async fn send(&self, method: Method, uri: &str, auth: Option<&str>, body: Option<Value>) -> Reply {
    self.send_with(method, uri, auth, body, &[]).await
  }

  async fn send_with(
    &self,
    method: Method,
    uri: &str,
    auth: Option<&str>,
    body: Option<Value>,
    extra: &[(&str, &str)],
  ) -> Reply {
    let mut req = Request::builder().method(method).uri(uri);
    if let Some(auth) = auth {
      let value = if auth.starts_with("Basic ") { auth.to_string() } else { format!("Bearer {auth}") };
      req = req.header("authorization", value);
    }
    for (k, v) in extra {
      req = req.header(*k, *v);
    }
    let req = match body {
      Some(body) => req
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap(),
      None => req.body(Body::empty()).unwrap(),
    };

    let res = api_router(self.state.clone()).oneshot(req).await.unwrap();
    let status = res.status();
    let headers = res.headers().clone();
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    Reply { status, headers, body }
  }

  /// Issue a key without a rate limit and return its token.
  async fn key(&self, mut spec: ApiKeySpec) -> String {
    spec.rate_limit = 0;
    self.store.create_key(spec).await.unwrap().token
  }

  async fn full_key(&self) -> String { self.key(ApiKeySpec::new("full")).await }

  /// `customers` and soft-deleting `orders`, with `orders.customer`.
  async fn shop(&self) -> (TableSchema, TableSchema) {
    let customers = self
      .store
      .define_table(
        None,
        TableSpec::new("Customer")
          .with_column(ColumnSpec::new("name", "string").required())
          .with_column(ColumnSpec::new("email", "email").unique())
          .with_column(ColumnSpec::new("notes", "text").hidden()),
      )
      .await
      .unwrap();
    self
      .store
      .define_table(
        None,
        TableSpec::new("Order")
          .soft_deletes()
          .with_column(ColumnSpec::new("total", "decimal").required())
          .with_column(ColumnSpec::new("status", "enum").options(["open", "paid"])),
      )
      .await
      .unwrap();
    self
      .store
      .define_relationship(RelationshipSpec {
        name:        "customer".into(),
        kind:        RelationKind::BelongsTo,
        source:      "orders".into(),
        target:      "customers".into(),
        foreign_key: None,
      })
      .await
      .unwrap();
    let orders = self.store.find_table("orders".into()).await.unwrap().unwrap();
    (customers, orders)
  }
}

fn row(v: Value) -> serde_json::Map<String, Value> { v.as_object().unwrap().clone() }

// ─── Access ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn health_needs_no_credentials() {
  let h = harness().await;
  let reply = h.send(Method::GET, "/health", None, None).await;
  assert_eq!(reply.status, StatusCode::OK);
  assert_eq!(reply.body["status"], "ok");
}

#[tokio::test]
async fn missing_credentials_render_json_401() {
  let h = harness().await;
  h.shop().await;
  let reply = h.send(Method::GET, "/data/customers", None, None).await;
  assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
  assert_eq!(reply.body["error"]["kind"], "unauthenticated");
  assert!(reply.headers.contains_key("www-authenticate"));
}

#[tokio::test]
async fn scope_is_checked_per_table_and_action() {
  let h = harness().await;
  h.shop().await;

  let mut reader = ApiKeySpec::new("reader");
  reader.abilities = Abilities::read_only();
  let reader = h.key(reader).await;
  let reply = h
    .send(Method::POST, "/data/customers", Some(&reader), Some(json!({ "name": "Ada" })))
    .await;
  assert_eq!(reply.status, StatusCode::FORBIDDEN);
  assert_eq!(reply.body["error"]["kind"], "forbidden");

  let mut scoped = ApiKeySpec::new("customers only");
  scoped.tables = vec!["customers".into()];
  let scoped = h.key(scoped).await;
  assert_eq!(
    h.send(Method::GET, "/data/customers", Some(&scoped), None).await.status,
    StatusCode::OK
  );
  assert_eq!(
    h.send(Method::GET, "/data/orders", Some(&scoped), None).await.status,
    StatusCode::FORBIDDEN
  );
}

#[tokio::test]
async fn management_requires_admin() {
  let h = harness().await;
  let key = h.full_key().await;
  let reply = h.send(Method::GET, "/tables", Some(&key), None).await;
  assert_eq!(reply.status, StatusCode::FORBIDDEN);
  let reply = h.send(Method::GET, "/tables", Some(&h.admin), None).await;
  assert_eq!(reply.status, StatusCode::OK);
}

// ─── Records ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn create_then_get() {
  let h = harness().await;
  h.shop().await;
  let key = h.full_key().await;

  let created = h
    .send(
      Method::POST,
      "/data/customers",
      Some(&key),
      Some(json!({ "name": "Ada", "email": "ada@example.com", "notes": "vip" })),
    )
    .await;
  assert_eq!(created.status, StatusCode::CREATED);
  let id = created.body["data"]["id"].as_i64().unwrap();
  assert_eq!(created.body["data"]["name"], "Ada");
  assert!(created.body["data"].get("notes").is_none());

  let fetched = h
    .send(Method::GET, &format!("/data/customers/{id}"), Some(&key), None)
    .await;
  assert_eq!(fetched.status, StatusCode::OK);
  assert_eq!(fetched.body["data"]["email"], "ada@example.com");

  let missing = h.send(Method::GET, "/data/customers/999", Some(&key), None).await;
  assert_eq!(missing.status, StatusCode::NOT_FOUND);
  assert_eq!(missing.body["error"]["kind"], "not_found");
}

#[tokio::test]
async fn unknown_payload_keys_are_rejected() {
  let h = harness().await;
  h.shop().await;
  let key = h.full_key().await;
  let reply = h
    .send(
      Method::POST,
      "/data/customers",
      Some(&key),
      Some(json!({ "name": "Ada", "nickname": "countess" })),
    )
    .await;
  assert_eq!(reply.status, StatusCode::UNPROCESSABLE_ENTITY);
  assert_eq!(reply.body["error"]["kind"], "validation_error");
  assert!(reply.body["error"]["fields"]["nickname"].is_array());
}

#[tokio::test]
async fn malformed_json_is_a_bad_request() {
  let h = harness().await;
  h.shop().await;
  let key = h.full_key().await;
  let req = Request::builder()
    .method(Method::POST)
    .uri("/data/customers")
    .header("authorization", format!("Bearer {key}"))
    .header("content-type", "application/json")
    .body(Body::from("{not json"))
    .unwrap();
  let res = api_router(h.state.clone()).oneshot(req).await.unwrap();
  assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn list_pages_and_filters() {
  let h = harness().await;
  let (customers, _) = h.shop().await;
  for name in ["Ada", "Alan", "Grace"] {
    h.store
      .insert(customers.clone(), row(json!({ "name": name })))
      .await
      .unwrap();
  }
  let key = h.full_key().await;

  let reply = h
    .send(Method::GET, "/data/customers?search=al&per_page=1&sort=name", Some(&key), None)
    .await;
  assert_eq!(reply.status, StatusCode::OK);
  assert_eq!(reply.body["data"][0]["name"], "Alan");
  assert_eq!(
    reply.body["meta"],
    json!({ "current_page": 1, "last_page": 1, "per_page": 1, "total": 1 })
  );

  let reply = h
    .send(Method::GET, "/data/customers?filter[name]=Grace", Some(&key), None)
    .await;
  assert_eq!(reply.body["meta"]["total"], 1);
}

#[tokio::test]
async fn undeclared_filter_fails_before_touching_storage() {
  let h = harness().await;
  h.shop().await;
  let key = h.full_key().await;

  let before = h.store.statements_executed();
  let reply = h
    .send(Method::GET, "/data/customers?filter[shoe_size]=9", Some(&key), None)
    .await;
  assert_eq!(reply.status, StatusCode::UNPROCESSABLE_ENTITY);
  assert_eq!(reply.body["error"]["kind"], "invalid_query");
  assert_eq!(h.store.statements_executed(), before);
}

#[tokio::test]
async fn include_costs_one_extra_query() {
  let h = harness().await;
  let (customers, orders) = h.shop().await;
  let ada = h
    .store
    .insert(customers.clone(), row(json!({ "name": "Ada" })))
    .await
    .unwrap();
  let alan = h
    .store
    .insert(customers.clone(), row(json!({ "name": "Alan" })))
    .await
    .unwrap();
  for (total, customer) in [(10, ada.id), (20, alan.id), (30, ada.id)] {
    h.store
      .insert(orders.clone(), row(json!({ "total": total, "customer_id": customer })))
      .await
      .unwrap();
  }
  let key = h.full_key().await;

  let before = h.store.statements_executed();
  h.send(Method::GET, "/data/orders?nocache=1", Some(&key), None).await;
  let plain = h.store.statements_executed() - before;

  let before = h.store.statements_executed();
  let reply = h
    .send(Method::GET, "/data/orders?include=customer&nocache=1", Some(&key), None)
    .await;
  let with_include = h.store.statements_executed() - before;

  assert_eq!(reply.status, StatusCode::OK);
  assert_eq!(with_include, plain + 1);
  let names = reply.body["data"]
    .as_array()
    .unwrap()
    .iter()
    .map(|o| o["customer"]["name"].as_str().unwrap().to_string())
    .collect::<Vec<_>>();
  assert_eq!(names, ["Ada", "Alan", "Ada"]);
}

#[tokio::test]
async fn soft_delete_publishes_id_only_and_restores() {
  let h = harness().await;
  h.shop().await;
  let key = h.full_key().await;
  let mut events = h.state.notifier.subscribe("orders");

  let created = h
    .send(Method::POST, "/data/orders", Some(&key), Some(json!({ "total": 12.5 })))
    .await;
  let id = created.body["data"]["id"].as_i64().unwrap();
  assert_eq!(events.recv().await.unwrap().action, ChangeAction::Created);

  let reply = h
    .send(Method::DELETE, &format!("/data/orders/{id}"), Some(&key), None)
    .await;
  assert_eq!(reply.status, StatusCode::OK);
  assert_eq!(reply.body["message"], "Record deleted successfully");

  let event = events.recv().await.unwrap();
  assert_eq!(event.action, ChangeAction::Deleted);
  assert_eq!(event.table, "orders");
  assert_eq!(event.data, json!({ "id": id }));
  assert!(events.try_recv().is_err());

  let gone = h
    .send(Method::GET, &format!("/data/orders/{id}"), Some(&key), None)
    .await;
  assert_eq!(gone.status, StatusCode::NOT_FOUND);

  let restored = h
    .send(Method::POST, &format!("/data/orders/{id}/restore"), Some(&key), None)
    .await;
  assert_eq!(restored.status, StatusCode::OK);
  assert_eq!(restored.body["data"]["deleted_at"], Value::Null);
  assert_eq!(events.recv().await.unwrap().action, ChangeAction::Updated);
}

#[tokio::test]
async fn restore_requires_soft_deletes() {
  let h = harness().await;
  let (customers, _) = h.shop().await;
  let ada = h
    .store
    .insert(customers, row(json!({ "name": "Ada" })))
    .await
    .unwrap();
  let key = h.full_key().await;
  let reply = h
    .send(Method::POST, &format!("/data/customers/{}/restore", ada.id), Some(&key), None)
    .await;
  assert_eq!(reply.status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn bulk_insert_is_all_or_nothing() {
  let h = harness().await;
  h.shop().await;
  let key = h.full_key().await;

  let reply = h
    .send(
      Method::POST,
      "/data/customers/bulk",
      Some(&key),
      Some(json!([{ "name": "Ada" }, { "name": "Alan" }])),
    )
    .await;
  assert_eq!(reply.status, StatusCode::CREATED);
  assert_eq!(reply.body["data"].as_array().unwrap().len(), 2);

  let reply = h
    .send(
      Method::POST,
      "/data/customers/bulk",
      Some(&key),
      Some(json!({ "records": [{ "name": "Grace" }, { "email": "no-name@example.com" }] })),
    )
    .await;
  assert_eq!(reply.status, StatusCode::UNPROCESSABLE_ENTITY);
  assert!(reply.body["error"]["fields"]["records.1.name"].is_array());

  let list = h
    .send(Method::GET, "/data/customers?nocache=1", Some(&key), None)
    .await;
  assert_eq!(list.body["meta"]["total"], 2);

  let too_many = (0..501).map(|i| json!({ "name": format!("c{i}") })).collect::<Vec<_>>();
  let reply = h
    .send(Method::POST, "/data/customers/bulk", Some(&key), Some(Value::Array(too_many)))
    .await;
  assert_eq!(reply.status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn describe_lists_visible_columns_and_endpoints() {
  let h = harness().await;
  h.shop().await;
  let key = h.full_key().await;
  let reply = h.send(Method::GET, "/data/customers/schema", Some(&key), None).await;
  assert_eq!(reply.status, StatusCode::OK);
  let columns = reply.body["data"]["columns"]
    .as_array()
    .unwrap()
    .iter()
    .map(|c| c["name"].as_str().unwrap().to_string())
    .collect::<Vec<_>>();
  assert_eq!(columns, ["name", "email"]);
  assert!(!reply.body["data"]["endpoints"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn list_rule_limits_rows_to_owner() {
  let h = harness().await;
  let mut spec = TableSpec::new("Note").with_column(ColumnSpec::new("owner_id", "string"));
  spec.rules = RowRules {
    list: Some("auth.id == owner_id".into()),
    ..RowRules::default()
  };
  let notes = h.store.define_table(None, spec).await.unwrap();
  for owner in ["u1", "u1", "u2"] {
    h.store
      .insert(notes.clone(), row(json!({ "owner_id": owner })))
      .await
      .unwrap();
  }

  let mut mine = ApiKeySpec::new("u1");
  mine.owner = Some("u1".into());
  let mine = h.key(mine).await;
  let reply = h.send(Method::GET, "/data/notes", Some(&mine), None).await;
  assert_eq!(reply.body["meta"]["total"], 2);

  let anonymous = h.full_key().await;
  let reply = h.send(Method::GET, "/data/notes", Some(&anonymous), None).await;
  assert_eq!(reply.status, StatusCode::FORBIDDEN);
}

// ─── Cache ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn writes_invalidate_cached_reads() {
  let h = harness().await;
  h.shop().await;
  let key = h.full_key().await;

  let first = h.send(Method::GET, "/data/customers", Some(&key), None).await;
  assert_eq!(first.cache_status(), "MISS");
  let second = h.send(Method::GET, "/data/customers", Some(&key), None).await;
  assert_eq!(second.cache_status(), "HIT");
  assert_eq!(second.body, first.body);

  h.send(Method::POST, "/data/customers", Some(&key), Some(json!({ "name": "Ada" })))
    .await;

  let third = h.send(Method::GET, "/data/customers", Some(&key), None).await;
  assert_eq!(third.cache_status(), "MISS");
  assert_eq!(third.body["meta"]["total"], 1);
}

#[tokio::test]
async fn operators_can_flush_the_cache() {
  let h = harness().await;
  h.shop().await;
  let key = h.full_key().await;

  h.send(Method::GET, "/data/customers", Some(&key), None).await;
  h.send(Method::GET, "/data/orders", Some(&key), None).await;

  assert_eq!(
    h.send(Method::DELETE, "/cache", Some(&key), None).await.status,
    StatusCode::FORBIDDEN
  );
  let reply = h.send(Method::DELETE, "/cache", Some(&h.admin), None).await;
  assert_eq!(reply.status, StatusCode::OK);
  assert_eq!(reply.body["evicted"], 2);

  let again = h.send(Method::GET, "/data/customers", Some(&key), None).await;
  assert_eq!(again.cache_status(), "MISS");
}

#[tokio::test]
async fn callers_never_share_cache_entries() {
  let h = harness().await;
  h.shop().await;
  let full = h.store.create_key(ApiKeySpec::new("full")).await.unwrap();
  let mut reader = ApiKeySpec::new("reader");
  reader.abilities = Abilities::read_only();
  let reader = h.store.create_key(reader).await.unwrap();

  let a = h.send(Method::GET, "/data/customers", Some(&full.token), None).await;
  let b = h.send(Method::GET, "/data/customers", Some(&reader.token), None).await;
  assert_eq!(a.cache_status(), "MISS");
  assert_eq!(b.cache_status(), "MISS");

  let pairs = vec![("page".to_string(), "1".to_string())];
  assert_ne!(
    ResponseCache::key("customers", &pairs, &full.key.caller()),
    ResponseCache::key("customers", &pairs, &reader.key.caller())
  );
}

#[tokio::test]
async fn nocache_bypasses_the_cache() {
  let h = harness().await;
  h.shop().await;
  let key = h.full_key().await;

  let reply = h.send(Method::GET, "/data/customers?nocache=1", Some(&key), None).await;
  assert_eq!(reply.cache_status(), "BYPASS");
  assert_eq!(reply.headers["cache-control"], "no-cache");

  let reply = h
    .send_with(
      Method::GET,
      "/data/customers",
      Some(&key),
      None,
      &[("cache-control", "no-cache")],
    )
    .await;
  assert_eq!(reply.cache_status(), "BYPASS");
  assert!(h.state.cache.is_empty());
}

// ─── Management ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn admin_manages_schema_over_http() {
  let h = harness().await;
  let admin = Some(h.admin.as_str());

  let reply = h
    .send(
      Method::POST,
      "/tables",
      admin,
      Some(json!({ "name": "Product", "columns": [{ "name": "title", "type": "string" }] })),
    )
    .await;
  assert_eq!(reply.status, StatusCode::CREATED);
  assert_eq!(reply.body["data"]["table"]["table_name"], "products");
  assert_eq!(reply.body["data"]["table"]["owner"], "ada");

  let reply = h
    .send(
      Method::POST,
      "/tables/products/columns",
      admin,
      Some(json!({ "name": "price", "type": "decimal" })),
    )
    .await;
  assert_eq!(reply.status, StatusCode::CREATED);

  let reply = h
    .send(
      Method::POST,
      "/tables/products/columns",
      admin,
      Some(json!({ "name": "shape", "type": "hologram" })),
    )
    .await;
  assert_eq!(reply.status, StatusCode::UNPROCESSABLE_ENTITY);
  assert_eq!(reply.body["error"]["kind"], "unsupported_type");

  let reply = h
    .send(Method::POST, "/tables", admin, Some(json!({ "name": "Product" })))
    .await;
  assert_eq!(reply.status, StatusCode::CONFLICT);

  let reply = h
    .send(Method::PATCH, "/tables/products", admin, Some(json!({ "display_name": "Catalog" })))
    .await;
  assert_eq!(reply.body["data"]["table"]["display_name"], "Catalog");

  let reply = h
    .send(Method::POST, "/data/products", admin, Some(json!({ "title": "Lamp", "price": 9.5 })))
    .await;
  assert_eq!(reply.status, StatusCode::CREATED);

  let reply = h.send(Method::DELETE, "/tables/products", admin, None).await;
  assert_eq!(reply.status, StatusCode::OK);
  let reply = h.send(Method::GET, "/data/products", admin, None).await;
  assert_eq!(reply.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn schema_changes_evict_cached_reads() {
  let h = harness().await;
  h.shop().await;
  let key = h.full_key().await;
  h.send(Method::GET, "/data/customers", Some(&key), None).await;
  assert!(!h.state.cache.is_empty());

  let reply = h
    .send(
      Method::POST,
      "/tables/customers/columns",
      Some(&h.admin),
      Some(json!({ "name": "phone", "type": "string" })),
    )
    .await;
  assert_eq!(reply.status, StatusCode::CREATED);
  let reply = h.send(Method::GET, "/data/customers", Some(&key), None).await;
  assert_eq!(reply.cache_status(), "MISS");
}

#[tokio::test]
async fn relationships_over_http() {
  let h = harness().await;
  let admin = Some(h.admin.as_str());
  for name in ["Author", "Book"] {
    let reply = h.send(Method::POST, "/tables", admin, Some(json!({ "name": name }))).await;
    assert_eq!(reply.status, StatusCode::CREATED);
  }

  let reply = h
    .send(
      Method::POST,
      "/tables/books/relationships",
      admin,
      Some(json!({ "name": "author", "kind": "belongs_to", "target": "authors" })),
    )
    .await;
  assert_eq!(reply.status, StatusCode::CREATED);
  assert_eq!(reply.body["data"]["foreign_key"], "author_id");

  let reply = h.send(Method::DELETE, "/tables/books/relationships/author", admin, None).await;
  assert_eq!(reply.status, StatusCode::OK);
  let reply = h.send(Method::DELETE, "/tables/books/relationships/author", admin, None).await;
  assert_eq!(reply.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn relationship_names_never_shadow_columns() {
  let h = harness().await;
  h.shop().await;
  let admin = Some(h.admin.as_str());

  let reply = h
    .send(
      Method::POST,
      "/tables/orders/columns",
      admin,
      Some(json!({ "name": "customer", "type": "string" })),
    )
    .await;
  assert_eq!(reply.status, StatusCode::CONFLICT);
  assert_eq!(reply.body["error"]["kind"], "name_conflict");

  let reply = h
    .send(
      Method::POST,
      "/tables/orders/relationships",
      admin,
      Some(json!({ "name": "status", "kind": "belongs_to", "target": "customers" })),
    )
    .await;
  assert_eq!(reply.status, StatusCode::CONFLICT);

  let key = h.full_key().await;
  let customer = h
    .send(Method::POST, "/data/customers", Some(&key), Some(json!({ "name": "Ada" })))
    .await;
  let id = customer.body["data"]["id"].clone();
  h.send(
    Method::POST,
    "/data/orders",
    Some(&key),
    Some(json!({ "total": 10, "status": "open", "customer_id": id })),
  )
  .await;
  let reply = h
    .send(Method::GET, "/data/orders?include=customer", Some(&key), None)
    .await;
  assert_eq!(reply.body["data"][0]["status"], "open");
  assert_eq!(reply.body["data"][0]["customer"]["name"], "Ada");
}

#[tokio::test]
async fn keys_are_issued_and_revoked() {
  let h = harness().await;
  h.shop().await;
  let admin = Some(h.admin.as_str());

  let reply = h
    .send(Method::POST, "/keys", admin, Some(json!({ "name": "mobile", "abilities": ["read"] })))
    .await;
  assert_eq!(reply.status, StatusCode::CREATED);
  let token = reply.body["data"]["token"].as_str().unwrap().to_string();
  let id = reply.body["data"]["id"].as_i64().unwrap();
  assert!(token.starts_with("sk_"));

  assert_eq!(
    h.send(Method::GET, "/data/customers", Some(&token), None).await.status,
    StatusCode::OK
  );

  let listed = h.send(Method::GET, "/keys", admin, None).await;
  assert!(listed.body["data"][0].get("token").is_none());

  let reply = h.send(Method::DELETE, &format!("/keys/{id}"), admin, None).await;
  assert_eq!(reply.status, StatusCode::OK);
  let reply = h.send(Method::DELETE, &format!("/keys/{id}"), admin, None).await;
  assert_eq!(reply.status, StatusCode::NOT_FOUND);
  assert_eq!(
    h.send(Method::GET, "/data/customers", Some(&token), None).await.status,
    StatusCode::UNAUTHORIZED
  );
}

#[tokio::test]
async fn settings_round_trip() {
  let h = harness().await;
  let admin = Some(h.admin.as_str());
  let reply = h
    .send(Method::PUT, "/settings/site_name", admin, Some(json!("Strata")))
    .await;
  assert_eq!(reply.status, StatusCode::OK);
  let reply = h.send(Method::GET, "/settings", admin, None).await;
  assert_eq!(reply.body["data"]["site_name"], "Strata");

  let reply = h.send(Method::PUT, "/settings/Bad-Key", admin, Some(json!(1))).await;
  assert_eq!(reply.status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn column_types_are_listed() {
  let h = harness().await;
  let reply = h.send(Method::GET, "/column-types", Some(&h.admin), None).await;
  let types = reply.body["data"].as_array().unwrap();
  assert!(types.iter().any(|t| t["type"] == "string"));
  assert!(types.iter().all(|t| t["storage"].is_string()));
}

#[tokio::test]
async fn realtime_opens_an_event_stream() {
  let h = harness().await;
  h.shop().await;
  let key = h.full_key().await;
  let req = Request::builder()
    .uri("/realtime/orders")
    .header("authorization", format!("Bearer {key}"))
    .body(Body::empty())
    .unwrap();
  let res = api_router(h.state.clone()).oneshot(req).await.unwrap();
  assert_eq!(res.status(), StatusCode::OK);
  assert!(
    res.headers()["content-type"]
      .to_str()
      .unwrap()
      .starts_with("text/event-stream")
  );

  let req = Request::builder()
    .uri("/realtime/nowhere")
    .header("authorization", format!("Bearer {key}"))
    .body(Body::empty())
    .unwrap();
  let res = api_router(h.state.clone()).oneshot(req).await.unwrap();
  assert_eq!(res.status(), StatusCode::NOT_FOUND);
}
