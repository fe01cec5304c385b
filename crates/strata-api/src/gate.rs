//! Access gate: resolves every request to a [`Caller`].
//!
//! Two credential forms are accepted:
//!
//! - HTTP Basic for operators listed in the configuration, verified against
//!   an argon2 PHC hash. The operator's role decides its abilities.
//! - API keys, looked up by the SHA-256 of the token. The token is read from
//!   `Authorization: Bearer`, then `x-api-key`, then `?api_key=`.
//!
//! Missing or unknown credentials are `401`; a key that is inactive, expired
//! or over its rate limit is refused with `403`/`429`.

use std::{
  sync::Arc,
  time::{Duration, Instant},
};

use argon2::{Argon2, PasswordHash, PasswordVerifier};
use axum::{
  extract::FromRequestParts,
  http::{HeaderMap, header, request::Parts},
};
use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
use chrono::Utc;
use dashmap::DashMap;
use serde::Deserialize;
use strata_core::{
  access::{Caller, Role},
  store::{Backend, KeyStore},
};

use crate::{AppState, error::ApiError, limiter::RateLimiter};

/// `last_used_at` is written at most this often per key.
const TOUCH_INTERVAL: Duration = Duration::from_secs(60);

/// An operator allowed to sign in with HTTP Basic.
#[derive(Debug, Clone, Deserialize)]
pub struct OperatorConfig {
  pub username:      String,
  /// PHC string produced by argon2, e.g. `$argon2id$v=19$…`
  pub password_hash: String,
  pub role:          Role,
}

pub struct AccessGate {
  operators: Vec<OperatorConfig>,
  limiter:   RateLimiter,
  touched:   DashMap<i64, Instant>,
}

impl AccessGate {
  pub fn new(operators: Vec<OperatorConfig>) -> Self {
    Self {
      operators,
      limiter: RateLimiter::new(),
      touched: DashMap::new(),
    }
  }

  /// Resolve the caller for a request with the given headers and raw query
  /// string.
  pub async fn authenticate<S>(
    &self,
    store: &Arc<S>,
    headers: &HeaderMap,
    query: Option<&str>,
  ) -> Result<Caller, ApiError>
  where
    S: KeyStore + 'static,
  {
    let authorization = headers
      .get(header::AUTHORIZATION)
      .and_then(|v| v.to_str().ok());

    if let Some(encoded) = authorization.and_then(|v| v.strip_prefix("Basic ")) {
      return self.verify_operator(encoded);
    }

    let token = authorization
      .and_then(|v| v.strip_prefix("Bearer "))
      .map(|t| t.trim().to_string())
      .or_else(|| {
        headers
          .get("x-api-key")
          .and_then(|v| v.to_str().ok())
          .map(|t| t.trim().to_string())
      })
      .or_else(|| query.and_then(query_token))
      .filter(|t| !t.is_empty())
      .ok_or_else(|| ApiError::Unauthenticated("missing credentials".into()))?;

    let key = store
      .find_key_by_token(token)
      .await
      .map_err(ApiError::store)?
      .ok_or_else(|| ApiError::Unauthenticated("invalid API key".into()))?;

    if !key.is_active {
      return Err(ApiError::Forbidden("API key is inactive".into()));
    }
    if key.is_expired(Utc::now()) {
      return Err(ApiError::Forbidden("API key has expired".into()));
    }
    self
      .limiter
      .check(key.id, key.rate_limit)
      .map_err(|retry_after| ApiError::RateLimited { retry_after })?;

    self.touch(store, key.id);
    Ok(key.caller())
  }

  fn verify_operator(&self, encoded: &str) -> Result<Caller, ApiError> {
    let unauthorized = || ApiError::Unauthenticated("invalid credentials".into());

    let decoded = B64.decode(encoded.trim()).map_err(|_| unauthorized())?;
    let creds = std::str::from_utf8(&decoded).map_err(|_| unauthorized())?;
    let (username, password) = creds.split_once(':').ok_or_else(unauthorized)?;

    let operator = self
      .operators
      .iter()
      .find(|op| op.username == username)
      .ok_or_else(unauthorized)?;

    let parsed_hash = PasswordHash::new(&operator.password_hash).map_err(|_| unauthorized())?;
    Argon2::default()
      .verify_password(password.as_bytes(), &parsed_hash)
      .map_err(|_| unauthorized())?;

    Ok(Caller::operator(&operator.username, operator.role))
  }

  /// Record key usage in the background, at most once per interval.
  fn touch<S>(&self, store: &Arc<S>, key_id: i64)
  where
    S: KeyStore + 'static,
  {
    let now = Instant::now();
    let due = self
      .touched
      .get(&key_id)
      .is_none_or(|at| now.duration_since(*at) >= TOUCH_INTERVAL);
    if !due {
      return;
    }
    self.touched.insert(key_id, now);

    let store = store.clone();
    tokio::spawn(async move {
      if let Err(e) = store.touch_key(key_id, Utc::now()).await {
        tracing::warn!(key_id, error = %e, "failed to record key usage");
      }
    });
  }
}

fn query_token(query: &str) -> Option<String> {
  url::form_urlencoded::parse(query.as_bytes())
    .find(|(k, _)| k == "api_key")
    .map(|(_, v)| v.trim().to_string())
}

// ─── Extractors ──────────────────────────────────────────────────────────────

/// An authenticated caller. Table and ability checks happen in the gateway.
pub struct Authorized(pub Caller);

impl<S: Backend> FromRequestParts<AppState<S>> for Authorized {
  type Rejection = ApiError;

  async fn from_request_parts(
    parts: &mut Parts,
    state: &AppState<S>,
  ) -> Result<Self, Self::Rejection> {
    let caller = state
      .gate
      .authenticate(&state.store, &parts.headers, parts.uri.query())
      .await?;
    Ok(Authorized(caller))
  }
}

/// An authenticated caller allowed to manage schema, keys and settings.
pub struct Admin(pub Caller);

impl<S: Backend> FromRequestParts<AppState<S>> for Admin {
  type Rejection = ApiError;

  async fn from_request_parts(
    parts: &mut Parts,
    state: &AppState<S>,
  ) -> Result<Self, Self::Rejection> {
    let Authorized(caller) = Authorized::from_request_parts(parts, state).await?;
    if !caller.can_manage_schema() {
      return Err(ApiError::Forbidden("admin role required".into()));
    }
    Ok(Admin(caller))
  }
}

#[cfg(test)]
mod tests {
  use argon2::{PasswordHasher, password_hash::SaltString};
  use axum::http::HeaderValue;
  use rand_core::OsRng;
  use strata_core::{
    access::{ApiKeySpec, Identity},
    store::KeyStore,
  };
  use strata_store_sqlite::SqliteStore;

  use super::*;

  fn gate(password: &str) -> AccessGate {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
      .hash_password(password.as_bytes(), &salt)
      .unwrap()
      .to_string();
    AccessGate::new(vec![OperatorConfig {
      username:      "ada".to_string(),
      password_hash: hash,
      role:          Role::Editor,
    }])
  }

  fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (k, v) in pairs {
      map.insert(*k, HeaderValue::from_str(v).unwrap());
    }
    map
  }

  fn basic(user: &str, pass: &str) -> String {
    format!("Basic {}", B64.encode(format!("{user}:{pass}")))
  }

  #[tokio::test]
  async fn operator_credentials() {
    let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
    let gate = gate("secret");

    let ok = headers(&[("authorization", &basic("ada", "secret"))]);
    let caller = gate.authenticate(&store, &ok, None).await.unwrap();
    assert!(matches!(caller.identity, Identity::Operator { role: Role::Editor, .. }));

    let wrong = headers(&[("authorization", &basic("ada", "nope"))]);
    let err = gate.authenticate(&store, &wrong, None).await.unwrap_err();
    assert!(matches!(err, ApiError::Unauthenticated(_)));

    let garbage = headers(&[("authorization", "Basic !!!not-base64!!!")]);
    assert!(gate.authenticate(&store, &garbage, None).await.is_err());
  }

  #[tokio::test]
  async fn token_sources() {
    let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
    let issued = store.create_key(ApiKeySpec::new("app")).await.unwrap();
    let gate = gate("secret");

    let bearer = format!("Bearer {}", issued.token);
    for (hs, query) in [
      (headers(&[("authorization", &bearer)]), None),
      (headers(&[("x-api-key", &issued.token)]), None),
      (HeaderMap::new(), Some(format!("page=2&api_key={}", issued.token))),
    ] {
      let caller = gate.authenticate(&store, &hs, query.as_deref()).await.unwrap();
      assert_eq!(caller.fingerprint(), format!("key:{}", issued.key.id));
    }
  }

  #[tokio::test]
  async fn missing_and_unknown_tokens_are_unauthenticated() {
    let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
    let gate = gate("secret");

    let err = gate.authenticate(&store, &HeaderMap::new(), None).await.unwrap_err();
    assert!(matches!(err, ApiError::Unauthenticated(_)));

    let unknown = headers(&[("x-api-key", "sk_0000")]);
    let err = gate.authenticate(&store, &unknown, None).await.unwrap_err();
    assert!(matches!(err, ApiError::Unauthenticated(_)));
  }

  #[tokio::test]
  async fn expired_key_is_forbidden() {
    let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
    let mut spec = ApiKeySpec::new("old");
    spec.expires_at = Some(Utc::now() - chrono::Duration::hours(1));
    let issued = store.create_key(spec).await.unwrap();

    let hs = headers(&[("x-api-key", &issued.token)]);
    let err = gate("secret").authenticate(&store, &hs, None).await.unwrap_err();
    assert!(matches!(err, ApiError::Forbidden(_)));
  }

  #[tokio::test]
  async fn rate_limit_applies_per_key() {
    let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
    let mut spec = ApiKeySpec::new("tight");
    spec.rate_limit = 2;
    let issued = store.create_key(spec).await.unwrap();
    let gate = gate("secret");

    let hs = headers(&[("x-api-key", &issued.token)]);
    assert!(gate.authenticate(&store, &hs, None).await.is_ok());
    assert!(gate.authenticate(&store, &hs, None).await.is_ok());
    let err = gate.authenticate(&store, &hs, None).await.unwrap_err();
    assert!(matches!(err, ApiError::RateLimited { .. }));
  }
}
