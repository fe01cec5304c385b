//! API error type and [`axum::response::IntoResponse`] implementation.
//!
//! Every error renders as
//! `{"error": {"kind": "...", "message": "...", "fields": {...}}}`, where
//! `fields` is only present for validation failures.

use axum::{
  Json,
  extract::rejection::JsonRejection,
  http::{HeaderValue, StatusCode, header},
  response::{IntoResponse, Response},
};
use serde_json::{Value, json};
use strata_core::{DomainError, ErrorKind};
use thiserror::Error;

/// An error returned by an API handler.
#[derive(Debug, Error)]
pub enum ApiError {
  #[error("{0}")]
  Unauthenticated(String),

  #[error("{0}")]
  Forbidden(String),

  #[error("too many requests")]
  RateLimited { retry_after: u64 },

  #[error("{0}")]
  NotFound(String),

  #[error("{0}")]
  BadRequest(String),

  /// Any error raised by the domain layer or a store backend.
  #[error("{0}")]
  Store(Box<dyn DomainError>),
}

impl ApiError {
  pub fn store<E: DomainError>(err: E) -> Self { ApiError::Store(Box::new(err)) }

  /// Whether retrying against a freshly loaded schema may succeed.
  pub fn is_schema_changed(&self) -> bool {
    matches!(self, ApiError::Store(e) if e.is_schema_changed())
  }

  pub fn status(&self) -> StatusCode {
    match self {
      ApiError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
      ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
      ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
      ApiError::NotFound(_) => StatusCode::NOT_FOUND,
      ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
      ApiError::Store(e) => status_for(e.kind()),
    }
  }

  fn kind(&self) -> &'static str {
    match self {
      ApiError::Unauthenticated(_) => "unauthenticated",
      ApiError::Forbidden(_) => "forbidden",
      ApiError::RateLimited { .. } => "rate_limited",
      ApiError::NotFound(_) => "not_found",
      ApiError::BadRequest(_) => "bad_request",
      ApiError::Store(e) => e.kind().as_str(),
    }
  }
}

fn status_for(kind: ErrorKind) -> StatusCode {
  match kind {
    ErrorKind::NotFound => StatusCode::NOT_FOUND,
    ErrorKind::NameConflict | ErrorKind::SchemaConflict => StatusCode::CONFLICT,
    ErrorKind::InvalidSpec
    | ErrorKind::UnsupportedType
    | ErrorKind::InvalidQuery
    | ErrorKind::Validation => StatusCode::UNPROCESSABLE_ENTITY,
    ErrorKind::Forbidden => StatusCode::FORBIDDEN,
    ErrorKind::Materialization | ErrorKind::Storage => StatusCode::INTERNAL_SERVER_ERROR,
  }
}

impl From<strata_core::Error> for ApiError {
  fn from(err: strata_core::Error) -> Self { ApiError::store(err) }
}

impl From<JsonRejection> for ApiError {
  fn from(rejection: JsonRejection) -> Self { ApiError::BadRequest(rejection.body_text()) }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let status = self.status();

    let message = if status.is_server_error() {
      tracing::error!(error = %self, kind = self.kind(), "request failed");
      match &self {
        ApiError::Store(e) if e.kind() == ErrorKind::Materialization => {
          "the schema change could not be applied".to_string()
        }
        _ => "internal server error".to_string(),
      }
    } else {
      self.to_string()
    };

    let mut error = json!({ "kind": self.kind(), "message": message });
    if let ApiError::Store(e) = &self
      && let Some(fields) = e.field_errors()
    {
      error["fields"] = json!(fields);
    }

    let mut res = (status, Json(json!({ "error": error }))).into_response();
    match &self {
      ApiError::Unauthenticated(_) => {
        res.headers_mut().insert(
          header::WWW_AUTHENTICATE,
          HeaderValue::from_static("Bearer realm=\"strata\""),
        );
      }
      ApiError::RateLimited { retry_after } => {
        if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
          res.headers_mut().insert(header::RETRY_AFTER, value);
        }
      }
      _ => {}
    }
    res
  }
}

/// Body of a successful single-record or list response.
pub fn data(value: impl serde::Serialize) -> Json<Value> { Json(json!({ "data": value })) }
