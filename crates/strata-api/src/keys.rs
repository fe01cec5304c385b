//! Handlers for API key management. Every route requires an admin operator.
//!
//! | Method   | Path | Notes |
//! |----------|------|-------|
//! | `GET`    | `/keys` | Key metadata; tokens are never returned |
//! | `POST`   | `/keys` | Body: [`ApiKeySpec`]; `201`, the token is shown once |
//! | `DELETE` | `/keys/{id}` | 404 if no such key |

use axum::{
  Json,
  extract::{Path, State, rejection::JsonRejection},
  http::StatusCode,
  response::IntoResponse,
};
use serde_json::{Value, json};
use strata_core::{access::ApiKeySpec, store::Backend};

use crate::{
  AppState,
  error::{ApiError, data},
  gate::Admin,
};

/// `GET /keys`
pub async fn list<S: Backend>(
  State(state): State<AppState<S>>,
  Admin(_): Admin,
) -> Result<Json<Value>, ApiError> {
  let keys = state.store.list_keys().await.map_err(ApiError::store)?;
  Ok(data(keys))
}

/// `POST /keys`
pub async fn create<S: Backend>(
  State(state): State<AppState<S>>,
  Admin(caller): Admin,
  body: Result<Json<ApiKeySpec>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
  let Json(spec) = body?;
  let issued = state.store.create_key(spec).await.map_err(ApiError::store)?;
  tracing::info!(
    key_id = issued.key.id,
    hint = %issued.key.hint,
    by = %caller.fingerprint(),
    "api key issued"
  );
  Ok((StatusCode::CREATED, data(issued)))
}

/// `DELETE /keys/{id}`
pub async fn revoke<S: Backend>(
  State(state): State<AppState<S>>,
  Admin(caller): Admin,
  Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
  let not_found = || ApiError::NotFound(format!("api key {id} not found"));
  let key_id: i64 = id.parse().map_err(|_| not_found())?;
  if !state.store.revoke_key(key_id).await.map_err(ApiError::store)? {
    return Err(not_found());
  }
  tracing::info!(key_id, by = %caller.fingerprint(), "api key revoked");
  Ok(Json(json!({ "message": "API key revoked" })))
}
