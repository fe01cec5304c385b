//! Handlers for schema management. Every route requires an admin operator.
//!
//! | Method   | Path | Notes |
//! |----------|------|-------|
//! | `GET`    | `/tables` | All registered tables, active or not |
//! | `POST`   | `/tables` | Body: [`TableSpec`]; `201` |
//! | `GET`    | `/tables/{table}` | Table with columns and relationships |
//! | `PATCH`  | `/tables/{table}` | Body: [`TablePatch`] |
//! | `DELETE` | `/tables/{table}` | Drops relationships, the physical table, then the definition |
//! | `POST`   | `/tables/{table}/columns` | Body: [`ColumnSpec`]; `201` |
//! | `PATCH`  | `/tables/{table}/columns/{column}` | Body: [`ColumnPatch`] |
//! | `DELETE` | `/tables/{table}/columns/{column}` | |
//! | `POST`   | `/tables/{table}/relationships` | Body: `{"name","kind","target","foreign_key"?}`; `201` |
//! | `DELETE` | `/tables/{table}/relationships/{name}` | |
//! | `GET`    | `/column-types` | Supported column types and their storage class |
//!
//! `{table}` accepts the logical or the physical name. Every successful
//! change evicts the cached responses of the tables it touches.

use std::collections::BTreeSet;

use axum::{
  Json,
  extract::{Path, State, rejection::JsonRejection},
  http::StatusCode,
  response::IntoResponse,
};
use serde::Deserialize;
use serde_json::{Value, json};
use strata_core::{
  Error as CoreError,
  schema::{
    ColumnPatch,
    ColumnSpec,
    ColumnType,
    RelationKind,
    RelationshipSpec,
    TablePatch,
    TableSchema,
    TableSpec,
  },
  store::Backend,
};

use crate::{
  AppState,
  error::{ApiError, data},
  gate::Admin,
};

/// Load a table by logical or physical name, whatever its state.
async fn schema_of<S: Backend>(state: &AppState<S>, name: &str) -> Result<TableSchema, ApiError> {
  state
    .store
    .find_table(name.to_string())
    .await
    .map_err(ApiError::store)?
    .ok_or_else(|| CoreError::TableNotFound(name.to_string()).into())
}

// ─── Tables ──────────────────────────────────────────────────────────────────

/// `GET /tables`
pub async fn list<S: Backend>(
  State(state): State<AppState<S>>,
  Admin(_): Admin,
) -> Result<Json<Value>, ApiError> {
  let tables = state.store.list_tables().await.map_err(ApiError::store)?;
  Ok(data(tables))
}

/// `POST /tables`
pub async fn create<S: Backend>(
  State(state): State<AppState<S>>,
  Admin(caller): Admin,
  body: Result<Json<TableSpec>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
  let Json(spec) = body?;
  let owner = caller.auth_id().map(str::to_string);
  let schema = state
    .store
    .define_table(owner, spec)
    .await
    .map_err(ApiError::store)?;
  state.cache.invalidate_table(schema.name());
  tracing::info!(table = schema.name(), by = %caller.fingerprint(), "table defined");
  Ok((StatusCode::CREATED, data(schema)))
}

/// `GET /tables/{table}`
pub async fn get_one<S: Backend>(
  State(state): State<AppState<S>>,
  Admin(_): Admin,
  Path(table): Path<String>,
) -> Result<Json<Value>, ApiError> {
  let schema = schema_of(&state, &table).await?;
  Ok(data(schema))
}

/// `PATCH /tables/{table}`
pub async fn update<S: Backend>(
  State(state): State<AppState<S>>,
  Admin(caller): Admin,
  Path(table): Path<String>,
  body: Result<Json<TablePatch>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
  let Json(patch) = body?;
  let current = schema_of(&state, &table).await?;
  let schema = state
    .store
    .update_table(current.table.id, patch)
    .await
    .map_err(ApiError::store)?;
  state.cache.invalidate_table(schema.name());
  tracing::info!(table = schema.name(), by = %caller.fingerprint(), "table updated");
  Ok(data(schema))
}

/// `DELETE /tables/{table}`
pub async fn delete_one<S: Backend>(
  State(state): State<AppState<S>>,
  Admin(caller): Admin,
  Path(table): Path<String>,
) -> Result<Json<Value>, ApiError> {
  let schema = schema_of(&state, &table).await?;
  let related = state
    .store
    .relationships_touching(schema.table.id)
    .await
    .map_err(ApiError::store)?
    .into_iter()
    .flat_map(|r| [r.source_table, r.target_table])
    .filter(|name| name != schema.name())
    .collect::<BTreeSet<_>>();

  state
    .store
    .delete_table(schema.table.id)
    .await
    .map_err(ApiError::store)?;

  state.notifier.forget(schema.name());
  for name in &related {
    state.cache.invalidate_table(name);
  }
  tracing::info!(table = schema.name(), by = %caller.fingerprint(), "table deleted");
  Ok(Json(json!({ "message": "Table deleted successfully" })))
}

// ─── Columns ─────────────────────────────────────────────────────────────────

/// `POST /tables/{table}/columns`
pub async fn add_column<S: Backend>(
  State(state): State<AppState<S>>,
  Admin(_): Admin,
  Path(table): Path<String>,
  body: Result<Json<ColumnSpec>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
  let Json(spec) = body?;
  let schema = schema_of(&state, &table).await?;
  let column = state
    .store
    .define_column(schema.table.id, spec)
    .await
    .map_err(ApiError::store)?;
  state.cache.invalidate_table(schema.name());
  tracing::info!(table = schema.name(), column = %column.name, "column defined");
  Ok((StatusCode::CREATED, data(column)))
}

/// `PATCH /tables/{table}/columns/{column}`
pub async fn update_column<S: Backend>(
  State(state): State<AppState<S>>,
  Admin(_): Admin,
  Path((table, column)): Path<(String, String)>,
  body: Result<Json<ColumnPatch>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
  let Json(patch) = body?;
  let schema = schema_of(&state, &table).await?;
  let column = state
    .store
    .update_column(schema.table.id, column, patch)
    .await
    .map_err(ApiError::store)?;
  state.cache.invalidate_table(schema.name());
  tracing::info!(table = schema.name(), column = %column.name, "column updated");
  Ok(data(column))
}

/// `DELETE /tables/{table}/columns/{column}`
pub async fn drop_column<S: Backend>(
  State(state): State<AppState<S>>,
  Admin(_): Admin,
  Path((table, column)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
  let schema = schema_of(&state, &table).await?;
  state
    .store
    .drop_column(schema.table.id, column.clone())
    .await
    .map_err(ApiError::store)?;
  state.cache.invalidate_table(schema.name());
  tracing::info!(table = schema.name(), %column, "column dropped");
  Ok(Json(json!({ "message": "Column deleted successfully" })))
}

// ─── Relationships ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RelationshipBody {
  pub name:        String,
  pub kind:        RelationKind,
  pub target:      String,
  #[serde(default)]
  pub foreign_key: Option<String>,
}

/// `POST /tables/{table}/relationships`
pub async fn add_relationship<S: Backend>(
  State(state): State<AppState<S>>,
  Admin(_): Admin,
  Path(table): Path<String>,
  body: Result<Json<RelationshipBody>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
  let Json(body) = body?;
  let relationship = state
    .store
    .define_relationship(RelationshipSpec {
      name:        body.name,
      kind:        body.kind,
      source:      table,
      target:      body.target,
      foreign_key: body.foreign_key,
    })
    .await
    .map_err(ApiError::store)?;
  state.cache.invalidate_table(&relationship.source_table);
  state.cache.invalidate_table(&relationship.target_table);
  tracing::info!(
    source = %relationship.source_table,
    target = %relationship.target_table,
    name = %relationship.name,
    "relationship defined"
  );
  Ok((StatusCode::CREATED, data(relationship)))
}

/// `DELETE /tables/{table}/relationships/{name}`
pub async fn delete_relationship<S: Backend>(
  State(state): State<AppState<S>>,
  Admin(_): Admin,
  Path((table, name)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
  let schema = schema_of(&state, &table).await?;
  let target = schema
    .relationship(&name)
    .map(|r| r.target_table.clone())
    .ok_or_else(|| CoreError::RelationshipNotFound {
      table:        schema.name().to_string(),
      relationship: name.clone(),
    })?;
  state
    .store
    .delete_relationship(schema.table.id, name)
    .await
    .map_err(ApiError::store)?;
  state.cache.invalidate_table(schema.name());
  state.cache.invalidate_table(&target);
  Ok(Json(json!({ "message": "Relationship deleted successfully" })))
}

// ─── Column types ────────────────────────────────────────────────────────────

/// `GET /column-types`
pub async fn column_types<S: Backend>(Admin(_): Admin) -> Json<Value> {
  let types = ColumnType::ALL
    .iter()
    .map(|t| json!({ "type": t.as_str(), "storage": t.storage().sql() }))
    .collect::<Vec<_>>();
  data(types)
}
