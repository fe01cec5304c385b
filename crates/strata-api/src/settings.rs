//! Handlers for instance settings. Every route requires an admin operator.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/settings` | All settings as one object |
//! | `PUT`  | `/settings/{key}` | Body: any JSON value |
//! | `DELETE` | `/cache` | Flush every cached response |

use axum::{
  Json,
  extract::{Path, State, rejection::JsonRejection},
};
use serde_json::{Map, Value, json};
use strata_core::{Error as CoreError, naming, store::Backend};

use crate::{
  AppState,
  error::{ApiError, data},
  gate::Admin,
};

/// `GET /settings`
pub async fn list<S: Backend>(
  State(state): State<AppState<S>>,
  Admin(_): Admin,
) -> Result<Json<Value>, ApiError> {
  let settings = state.store.list_settings().await.map_err(ApiError::store)?;
  Ok(data(settings))
}

/// `PUT /settings/{key}`
pub async fn put_one<S: Backend>(
  State(state): State<AppState<S>>,
  Admin(_): Admin,
  Path(key): Path<String>,
  body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
  if !naming::is_identifier(&key) {
    return Err(CoreError::field("key", "must be a lowercase identifier").into());
  }
  let Json(value) = body?;
  state
    .store
    .put_setting(key.clone(), value.clone())
    .await
    .map_err(ApiError::store)?;
  let mut body = Map::new();
  body.insert(key, value);
  Ok(data(body))
}

/// `DELETE /cache`
pub async fn flush_cache<S: Backend>(
  State(state): State<AppState<S>>,
  Admin(caller): Admin,
) -> Json<Value> {
  let evicted = state.cache.invalidate_all();
  tracing::info!(by = %caller.fingerprint(), evicted, "cache flushed by operator");
  Json(json!({ "message": "Cache flushed", "evicted": evicted }))
}
