//! Handlers for the dynamic data API.
//!
//! | Method   | Path | Notes |
//! |----------|------|-------|
//! | `GET`    | `/data/{table}` | `search`, `filter[col][op]`, `sort`, `direction`, `page`, `per_page`, `include` |
//! | `POST`   | `/data/{table}` | Body: a JSON object of column values; `201` |
//! | `POST`   | `/data/{table}/bulk` | Body: `[{...}]` or `{"records":[...]}`, at most 500; `201` |
//! | `GET`    | `/data/{table}/schema` | Table description and endpoint listing |
//! | `GET`    | `/data/{table}/{id}` | Optional `?include=` |
//! | `PUT`    | `/data/{table}/{id}` | Partial update; `PATCH` is accepted too |
//! | `DELETE` | `/data/{table}/{id}` | Soft delete when the table supports it |
//! | `POST`   | `/data/{table}/{id}/restore` | Soft-delete tables only |
//!
//! Reads carry `X-Cache-Status: HIT|MISS|BYPASS`. `?nocache=1` or
//! `Cache-Control: no-cache` skips the cache for one request.

use axum::{
  Json,
  extract::{Path, RawQuery, State, rejection::JsonRejection},
  http::{HeaderMap, HeaderName, StatusCode, header},
  response::{IntoResponse, Response},
};
use serde_json::{Value, json};
use strata_core::store::Backend;

use crate::{
  AppState,
  cache::CacheStatus,
  error::{ApiError, data},
  gate::Authorized,
  gateway::Cached,
};

const X_CACHE_STATUS: HeaderName = HeaderName::from_static("x-cache-status");

fn pairs(query: Option<&str>) -> Vec<(String, String)> {
  query
    .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
    .unwrap_or_default()
}

/// Whether the request asks to skip the response cache.
fn wants_bypass(params: &[(String, String)], headers: &HeaderMap) -> bool {
  let flag = params.iter().any(|(k, v)| {
    k == "nocache" && matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
  });
  let header = headers
    .get(header::CACHE_CONTROL)
    .and_then(|v| v.to_str().ok())
    .is_some_and(|v| v.to_ascii_lowercase().contains("no-cache"));
  flag || header
}

fn record_id(table: &str, raw: &str) -> Result<i64, ApiError> {
  raw
    .parse()
    .map_err(|_| ApiError::NotFound(format!("record {raw:?} not found in {table}")))
}

fn cached_response(state_ttl: u64, cached: Cached) -> Response {
  let cache_control = match cached.status {
    CacheStatus::Bypass => "no-cache".to_string(),
    _ => format!("private, max-age={state_ttl}"),
  };
  (
    [
      (X_CACHE_STATUS, cached.status.as_str().to_string()),
      (header::CACHE_CONTROL, cache_control),
    ],
    Json(cached.body),
  )
    .into_response()
}

// ─── Reads ───────────────────────────────────────────────────────────────────

/// `GET /data/{table}`
pub async fn list<S: Backend>(
  State(state): State<AppState<S>>,
  Authorized(caller): Authorized,
  Path(table): Path<String>,
  RawQuery(query): RawQuery,
  headers: HeaderMap,
) -> Result<Response, ApiError> {
  let params = pairs(query.as_deref());
  let use_cache = !wants_bypass(&params, &headers);
  let cached = state.gateway.list(&caller, &table, &params, use_cache).await?;
  Ok(cached_response(state.cache.ttl().as_secs(), cached))
}

/// `GET /data/{table}/{id}`
pub async fn get_one<S: Backend>(
  State(state): State<AppState<S>>,
  Authorized(caller): Authorized,
  Path((table, id)): Path<(String, String)>,
  RawQuery(query): RawQuery,
  headers: HeaderMap,
) -> Result<Response, ApiError> {
  let id = record_id(&table, &id)?;
  let params = pairs(query.as_deref());
  let use_cache = !wants_bypass(&params, &headers);
  let cached = state
    .gateway
    .get(&caller, &table, id, &params, use_cache)
    .await?;
  Ok(cached_response(state.cache.ttl().as_secs(), cached))
}

/// `GET /data/{table}/schema`
pub async fn describe<S: Backend>(
  State(state): State<AppState<S>>,
  Authorized(caller): Authorized,
  Path(table): Path<String>,
) -> Result<Json<Value>, ApiError> {
  let description = state.gateway.describe(&caller, &table).await?;
  Ok(data(description))
}

// ─── Writes ──────────────────────────────────────────────────────────────────

/// `POST /data/{table}`
pub async fn create<S: Backend>(
  State(state): State<AppState<S>>,
  Authorized(caller): Authorized,
  Path(table): Path<String>,
  body: Result<Json<Value>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
  let Json(payload) = body?;
  let record = state.gateway.create(&caller, &table, &payload).await?;
  Ok((StatusCode::CREATED, data(record)))
}

/// `POST /data/{table}/bulk`
pub async fn create_many<S: Backend>(
  State(state): State<AppState<S>>,
  Authorized(caller): Authorized,
  Path(table): Path<String>,
  body: Result<Json<Value>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
  let Json(payload) = body?;
  let records = state.gateway.create_many(&caller, &table, &payload).await?;
  Ok((StatusCode::CREATED, data(records)))
}

/// `PUT /data/{table}/{id}`
pub async fn update<S: Backend>(
  State(state): State<AppState<S>>,
  Authorized(caller): Authorized,
  Path((table, id)): Path<(String, String)>,
  body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
  let id = record_id(&table, &id)?;
  let Json(payload) = body?;
  let record = state.gateway.update(&caller, &table, id, &payload).await?;
  Ok(data(record))
}

/// `DELETE /data/{table}/{id}`
pub async fn delete_one<S: Backend>(
  State(state): State<AppState<S>>,
  Authorized(caller): Authorized,
  Path((table, id)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
  let id = record_id(&table, &id)?;
  state.gateway.delete(&caller, &table, id).await?;
  Ok(Json(json!({ "message": "Record deleted successfully" })))
}

/// `POST /data/{table}/{id}/restore`
pub async fn restore<S: Backend>(
  State(state): State<AppState<S>>,
  Authorized(caller): Authorized,
  Path((table, id)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
  let id = record_id(&table, &id)?;
  let record = state.gateway.restore(&caller, &table, id).await?;
  Ok(data(record))
}
