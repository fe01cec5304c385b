//! Dynamic record gateway.
//!
//! Every data-API operation goes through [`Gateway`]: resolve the table from
//! the registry, check the caller's scope for the table and action, apply the
//! table's row rules, then read or write through the store. Reads may be
//! served from the [`ResponseCache`]; every successful write ends in
//! [`ChangeNotifier::notify`].
//!
//! Operations are validated against the schema loaded at the start of the
//! request. If the table is altered before the store executes, the store
//! refuses and the operation is retried once against the new schema.

use std::{collections::HashMap, future::Future, sync::Arc};

use serde_json::{Map, Value, json};
use strata_core::{
  Error as CoreError,
  access::{Ability, Caller},
  error::FieldErrors,
  event::RecordChange,
  query::ListQuery,
  record::{Record, WriteMode, validate_payload},
  rules::RuleKind,
  schema::{RelationKind, RelationshipDefinition, TableSchema},
  store::Backend,
};

use crate::{
  cache::{CacheStatus, ResponseCache},
  error::ApiError,
  notifier::ChangeNotifier,
};

pub const MAX_BULK_RECORDS: usize = 500;

type Result<T, E = ApiError> = std::result::Result<T, E>;

/// A read response body and how the cache was involved in producing it.
#[derive(Debug, Clone)]
pub struct Cached {
  pub body:   Value,
  pub status: CacheStatus,
}

/// A relationship requested with `include`, with its target's schema.
struct Include {
  relationship: RelationshipDefinition,
  target:       TableSchema,
}

pub struct Gateway<S> {
  store:    Arc<S>,
  cache:    Arc<ResponseCache>,
  notifier: Arc<ChangeNotifier>,
}

impl<S: Backend> Gateway<S> {
  pub fn new(store: Arc<S>, cache: Arc<ResponseCache>, notifier: Arc<ChangeNotifier>) -> Self {
    Self { store, cache, notifier }
  }

  /// Resolve a table that is active and exposed through the data API.
  pub async fn table(&self, name: &str) -> Result<TableSchema> {
    self
      .store
      .find_table(name.to_string())
      .await
      .map_err(ApiError::store)?
      .filter(|schema| schema.table.is_active && schema.table.api_enabled)
      .ok_or_else(|| CoreError::TableNotFound(name.to_string()).into())
  }

  /// Run `op` against the current schema of `table`, retrying once if the
  /// table changed underneath it.
  async fn with_schema<T, F, Fut>(&self, table: &str, mut op: F) -> Result<T>
  where
    F: FnMut(TableSchema) -> Fut,
    Fut: Future<Output = Result<T>>,
  {
    let schema = self.table(table).await?;
    match op(schema).await {
      Err(err) if err.is_schema_changed() => {
        tracing::debug!(table, "schema changed during request, retrying");
        let schema = self.table(table).await?;
        op(schema).await
      }
      other => other,
    }
  }

  // ─── Reads ─────────────────────────────────────────────────────────────────

  /// `GET /data/{table}`
  pub async fn list(
    &self,
    caller: &Caller,
    table: &str,
    params: &[(String, String)],
    use_cache: bool,
  ) -> Result<Cached> {
    self
      .with_schema(table, |schema| async move {
        self.list_in(caller, schema, params, use_cache).await
      })
      .await
  }

  async fn list_in(
    &self,
    caller: &Caller,
    schema: TableSchema,
    params: &[(String, String)],
    use_cache: bool,
  ) -> Result<Cached> {
    caller.authorize(&schema.table, Ability::Read)?;
    let mut query = ListQuery::parse(&schema, params)?;
    apply_list_rule(caller, &schema, &mut query)?;
    let includes = self.includes(caller, &schema, &query.include).await?;

    let cache_key =
      use_cache.then(|| ResponseCache::key(schema.name(), &query.canonical_pairs(), caller));
    if let Some(key) = &cache_key
      && let Some(body) = self.cache.get(key)
    {
      tracing::debug!(cache_key = %key, "cache hit");
      return Ok(Cached { body, status: CacheStatus::Hit });
    }
    let generation = self.cache.generation(schema.name());

    let page = self
      .store
      .list(schema.clone(), query)
      .await
      .map_err(ApiError::store)?;
    let mut records = page.data;
    self.load_includes(&includes, &mut records).await?;
    let data = records
      .into_iter()
      .map(|record| present(&schema, record))
      .collect::<Result<Vec<_>>>()?;
    let body = json!({ "data": data, "meta": page.meta });

    Ok(self.remember(&schema, cache_key, body, generation))
  }

  /// `GET /data/{table}/{id}`
  pub async fn get(
    &self,
    caller: &Caller,
    table: &str,
    id: i64,
    params: &[(String, String)],
    use_cache: bool,
  ) -> Result<Cached> {
    self
      .with_schema(table, |schema| async move {
        self.get_in(caller, schema, id, params, use_cache).await
      })
      .await
  }

  async fn get_in(
    &self,
    caller: &Caller,
    schema: TableSchema,
    id: i64,
    params: &[(String, String)],
    use_cache: bool,
  ) -> Result<Cached> {
    caller.authorize(&schema.table, Ability::Read)?;
    let include_params = params
      .iter()
      .filter(|(k, _)| k == "include")
      .cloned()
      .collect::<Vec<_>>();
    let mut include = ListQuery::parse(&schema, &include_params)?.include;
    let includes = self.includes(caller, &schema, &include).await?;

    include.sort();
    let pairs = vec![
      ("id".to_string(), id.to_string()),
      ("include".to_string(), include.join(",")),
    ];
    let cache_key = use_cache.then(|| ResponseCache::key(schema.name(), &pairs, caller));
    if let Some(key) = &cache_key
      && let Some(body) = self.cache.get(key)
    {
      tracing::debug!(cache_key = %key, "cache hit");
      return Ok(Cached { body, status: CacheStatus::Hit });
    }
    let generation = self.cache.generation(schema.name());

    let record = self.existing(&schema, id, false).await?;
    schema
      .table
      .rules
      .check(RuleKind::View, caller.auth_id(), Some(&record.as_row()))?;

    let mut records = vec![record];
    self.load_includes(&includes, &mut records).await?;
    let data = records
      .pop()
      .map(|record| present(&schema, record))
      .transpose()?
      .unwrap_or(Value::Null);
    let body = json!({ "data": data });

    Ok(self.remember(&schema, cache_key, body, generation))
  }

  /// `GET /data/{table}/schema`: table metadata, visible columns,
  /// relationships and the endpoints serving the table.
  pub async fn describe(&self, caller: &Caller, table: &str) -> Result<Value> {
    let schema = self.table(table).await?;
    caller.authorize(&schema.table, Ability::Read)?;
    let rules = &schema.table.rules;
    if rules.ownership_column().is_some() {
      caller.auth_id().ok_or(CoreError::RuleDenied("list"))?;
    } else {
      rules.check(RuleKind::List, caller.auth_id(), None)?;
    }

    let t = &schema.table;
    let name = schema.name();
    let columns = schema.columns.iter().filter(|c| !c.hidden).collect::<Vec<_>>();
    let relationships = schema
      .relationships
      .iter()
      .map(|r| {
        json!({
          "name": r.name,
          "kind": r.kind,
          "target_table": r.target_table,
          "foreign_key": r.foreign_key,
        })
      })
      .collect::<Vec<_>>();
    let mut endpoints = vec![
      endpoint("GET", format!("/data/{name}"), "List records with search, filters and paging"),
      endpoint("POST", format!("/data/{name}"), "Create a record"),
      endpoint("POST", format!("/data/{name}/bulk"), "Create up to 500 records at once"),
      endpoint("GET", format!("/data/{name}/{{id}}"), "Get a record by id"),
      endpoint("PUT", format!("/data/{name}/{{id}}"), "Update a record by id"),
      endpoint("DELETE", format!("/data/{name}/{{id}}"), "Delete a record by id"),
      endpoint("GET", format!("/realtime/{name}"), "Stream change events"),
    ];
    if t.has_soft_deletes {
      endpoints.push(endpoint(
        "POST",
        format!("/data/{name}/{{id}}/restore"),
        "Restore a soft-deleted record",
      ));
    }

    Ok(json!({
      "table": {
        "name": t.name,
        "table_name": t.table_name,
        "display_name": t.display_name,
        "description": t.description,
        "icon": t.icon,
        "has_timestamps": t.has_timestamps,
        "has_soft_deletes": t.has_soft_deletes,
      },
      "columns": columns,
      "relationships": relationships,
      "endpoints": endpoints,
    }))
  }

  // ─── Writes ────────────────────────────────────────────────────────────────

  /// `POST /data/{table}`
  pub async fn create(&self, caller: &Caller, table: &str, payload: &Value) -> Result<Value> {
    self
      .with_schema(table, |schema| async move {
        caller.authorize(&schema.table, Ability::Create)?;
        let values = validate_payload(&schema, object(payload)?, WriteMode::Create)?;
        schema
          .table
          .rules
          .check(RuleKind::Create, caller.auth_id(), Some(&values))?;

        let record = self
          .store
          .insert(schema.clone(), values)
          .await
          .map_err(ApiError::store)?;
        tracing::info!(table = schema.name(), record_id = record.id, "record created");
        self.notifier.notify(&schema, &RecordChange::created(record.clone()));
        present(&schema, record)
      })
      .await
  }

  /// `POST /data/{table}/bulk`: insert every record or none. The body is an
  /// array of objects, or `{"records": [...]}`.
  pub async fn create_many(
    &self,
    caller: &Caller,
    table: &str,
    payload: &Value,
  ) -> Result<Vec<Value>> {
    self
      .with_schema(table, |schema| async move {
        caller.authorize(&schema.table, Ability::Create)?;
        let items = bulk_items(payload)?;

        let mut errors = FieldErrors::new();
        let mut rows = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
          let Value::Object(map) = item else {
            errors
              .entry(format!("records.{index}"))
              .or_default()
              .push("must be an object".to_string());
            continue;
          };
          match validate_payload(&schema, map, WriteMode::Create) {
            Ok(values) => rows.push(values),
            Err(CoreError::Validation(fields)) => {
              for (column, messages) in fields {
                errors
                  .entry(format!("records.{index}.{column}"))
                  .or_default()
                  .extend(messages);
              }
            }
            Err(other) => return Err(other.into()),
          }
        }
        if !errors.is_empty() {
          return Err(CoreError::Validation(errors).into());
        }
        for values in &rows {
          schema
            .table
            .rules
            .check(RuleKind::Create, caller.auth_id(), Some(values))?;
        }

        let records = self
          .store
          .insert_many(schema.clone(), rows)
          .await
          .map_err(ApiError::store)?;
        tracing::info!(table = schema.name(), count = records.len(), "records created");
        for record in &records {
          self.notifier.notify(&schema, &RecordChange::created(record.clone()));
        }
        records.into_iter().map(|r| present(&schema, r)).collect()
      })
      .await
  }

  /// `PUT /data/{table}/{id}`
  pub async fn update(
    &self,
    caller: &Caller,
    table: &str,
    id: i64,
    payload: &Value,
  ) -> Result<Value> {
    self
      .with_schema(table, |schema| async move {
        caller.authorize(&schema.table, Ability::Update)?;
        let values = validate_payload(&schema, object(payload)?, WriteMode::Update)?;
        let existing = self.existing(&schema, id, false).await?;
        schema
          .table
          .rules
          .check(RuleKind::Update, caller.auth_id(), Some(&existing.as_row()))?;

        let (before, after) = self
          .store
          .update(schema.clone(), id, values)
          .await
          .map_err(ApiError::store)?
          .ok_or_else(|| not_found(&schema, id))?;
        tracing::info!(table = schema.name(), record_id = id, "record updated");
        self.notifier.notify(&schema, &RecordChange::updated(before, after.clone()));
        present(&schema, after)
      })
      .await
  }

  /// `DELETE /data/{table}/{id}`: tombstones the row on soft-delete tables,
  /// removes it otherwise.
  pub async fn delete(&self, caller: &Caller, table: &str, id: i64) -> Result<()> {
    self
      .with_schema(table, |schema| async move {
        caller.authorize(&schema.table, Ability::Delete)?;
        let existing = self.existing(&schema, id, false).await?;
        schema
          .table
          .rules
          .check(RuleKind::Delete, caller.auth_id(), Some(&existing.as_row()))?;

        let change = if schema.table.has_soft_deletes {
          let (before, after) = self
            .store
            .soft_delete(schema.clone(), id)
            .await
            .map_err(ApiError::store)?
            .ok_or_else(|| not_found(&schema, id))?;
          RecordChange::updated(before, after)
        } else {
          let before = self
            .store
            .delete(schema.clone(), id)
            .await
            .map_err(ApiError::store)?
            .ok_or_else(|| not_found(&schema, id))?;
          RecordChange::removed(before)
        };
        tracing::info!(
          table = schema.name(),
          record_id = id,
          soft = schema.table.has_soft_deletes,
          "record deleted"
        );
        self.notifier.notify(&schema, &change);
        Ok(())
      })
      .await
  }

  /// `POST /data/{table}/{id}/restore`
  pub async fn restore(&self, caller: &Caller, table: &str, id: i64) -> Result<Value> {
    self
      .with_schema(table, |schema| async move {
        caller.authorize(&schema.table, Ability::Update)?;
        if !schema.table.has_soft_deletes {
          return Err(
            CoreError::SchemaConflict(format!("{} does not use soft deletes", schema.name()))
              .into(),
          );
        }
        let existing = self.existing(&schema, id, true).await?;
        schema
          .table
          .rules
          .check(RuleKind::Update, caller.auth_id(), Some(&existing.as_row()))?;

        let (before, after) = self
          .store
          .restore(schema.clone(), id)
          .await
          .map_err(ApiError::store)?
          .ok_or_else(|| not_found(&schema, id))?;
        tracing::info!(table = schema.name(), record_id = id, "record restored");
        self.notifier.notify(&schema, &RecordChange::updated(before, after.clone()));
        present(&schema, after)
      })
      .await
  }

  // ─── Helpers ───────────────────────────────────────────────────────────────

  async fn existing(&self, schema: &TableSchema, id: i64, with_trashed: bool) -> Result<Record> {
    self
      .store
      .get(schema.clone(), id, with_trashed)
      .await
      .map_err(ApiError::store)?
      .ok_or_else(|| not_found(schema, id))
  }

  /// Store a freshly built read response unless caching is bypassed.
  fn remember(
    &self,
    schema: &TableSchema,
    cache_key: Option<String>,
    body: Value,
    generation: u64,
  ) -> Cached {
    match cache_key {
      Some(key) => {
        tracing::debug!(cache_key = %key, "cache miss");
        self.cache.put(schema.name(), key, body.clone(), generation);
        Cached { body, status: CacheStatus::Miss }
      }
      None => Cached { body, status: CacheStatus::Bypass },
    }
  }

  /// Resolve the targets of the requested relationships. The caller needs
  /// read access to each target table.
  async fn includes(
    &self,
    caller: &Caller,
    schema: &TableSchema,
    names: &[String],
  ) -> Result<Vec<Include>> {
    let mut includes = Vec::with_capacity(names.len());
    for name in names {
      let relationship = schema.relationship(name).cloned().ok_or_else(|| {
        CoreError::RelationshipNotFound {
          table:        schema.name().to_string(),
          relationship: name.clone(),
        }
      })?;
      let target = self.table(&relationship.target_table).await?;
      caller.authorize(&target.table, Ability::Read)?;
      includes.push(Include { relationship, target });
    }
    Ok(includes)
  }

  /// Attach related records under each relationship's name, with one
  /// store query per relationship.
  async fn load_includes(&self, includes: &[Include], records: &mut [Record]) -> Result<()> {
    if records.is_empty() {
      return Ok(());
    }
    for Include { relationship: rel, target } in includes {
      if rel.kind.key_on_source() {
        let keys = records
          .iter()
          .filter_map(|r| foreign_key(r, &rel.foreign_key))
          .collect::<Vec<_>>();
        let related = self
          .store
          .fetch_where_in(target.clone(), "id".to_string(), keys)
          .await
          .map_err(ApiError::store)?;
        let mut by_id = HashMap::with_capacity(related.len());
        for record in related {
          by_id.insert(record.id, present(target, record)?);
        }
        for record in records.iter_mut() {
          let value = foreign_key(record, &rel.foreign_key)
            .and_then(|key| by_id.get(&key).cloned())
            .unwrap_or(Value::Null);
          record.values.insert(rel.name.clone(), value);
        }
      } else {
        let keys = records.iter().map(|r| r.id).collect::<Vec<_>>();
        let related = self
          .store
          .fetch_where_in(target.clone(), rel.foreign_key.clone(), keys)
          .await
          .map_err(ApiError::store)?;
        let mut grouped: HashMap<i64, Vec<Value>> = HashMap::new();
        for record in related {
          if let Some(key) = foreign_key(&record, &rel.foreign_key) {
            grouped.entry(key).or_default().push(present(target, record)?);
          }
        }
        for record in records.iter_mut() {
          let items = grouped.remove(&record.id).unwrap_or_default();
          let value = match rel.kind {
            RelationKind::HasOne => items.into_iter().next().unwrap_or(Value::Null),
            RelationKind::HasMany | RelationKind::BelongsTo => Value::Array(items),
          };
          record.values.insert(rel.name.clone(), value);
        }
      }
    }
    Ok(())
  }
}

/// Apply the table's list rule: an ownership rule becomes a filter on the
/// owning column, anything else is evaluated without a row.
fn apply_list_rule(caller: &Caller, schema: &TableSchema, query: &mut ListQuery) -> Result<()> {
  let rules = &schema.table.rules;
  match rules.ownership_column() {
    Some(column) => {
      let auth_id = caller.auth_id().ok_or(CoreError::RuleDenied("list"))?;
      query
        .restrict_to(schema, &column, auth_id)
        .map_err(|_| CoreError::RuleDenied("list"))?;
      Ok(())
    }
    None => Ok(rules.check(RuleKind::List, caller.auth_id(), None)?),
  }
}

/// Serialize a record for output, without hidden columns.
fn present(schema: &TableSchema, mut record: Record) -> Result<Value> {
  record.redact(&schema.hidden_columns());
  Ok(serde_json::to_value(record).map_err(CoreError::from)?)
}

fn foreign_key(record: &Record, column: &str) -> Option<i64> { record.get(column)?.as_i64() }

fn not_found(schema: &TableSchema, id: i64) -> ApiError {
  CoreError::RecordNotFound {
    table: schema.name().to_string(),
    id,
  }
  .into()
}

fn object(payload: &Value) -> Result<&Map<String, Value>> {
  payload
    .as_object()
    .ok_or_else(|| ApiError::BadRequest("request body must be a JSON object".into()))
}

fn bulk_items(payload: &Value) -> Result<&Vec<Value>> {
  let items = match payload {
    Value::Array(items) => items,
    Value::Object(map) => match map.get("records") {
      Some(Value::Array(items)) => items,
      _ => {
        return Err(CoreError::field("records", "must be an array of records").into());
      }
    },
    _ => {
      return Err(ApiError::BadRequest(
        "request body must be an array of records".into(),
      ));
    }
  };
  if items.is_empty() {
    return Err(CoreError::field("records", "must contain at least one record").into());
  }
  if items.len() > MAX_BULK_RECORDS {
    return Err(
      CoreError::field(
        "records",
        format!("may not contain more than {MAX_BULK_RECORDS} records"),
      )
      .into(),
    );
  }
  Ok(items)
}

fn endpoint(method: &str, path: String, description: &str) -> Value {
  json!({ "method": method, "path": path, "description": description })
}
