//! JSON REST API for Strata.
//!
//! Exposes an axum [`Router`] backed by any [`strata_core::store::Backend`]:
//! the management API for tables, columns, relationships, keys and settings,
//! the dynamic data API under `/data/{table}`, and realtime change streams
//! under `/realtime/{table}`.
//!
//! TLS and transport concerns are the caller's responsibility.
//!
//! # Mounting
//!
//! ```rust,ignore
//! let state = strata_api::AppState::new(store.clone(), strata_api::ApiConfig::default())?;
//! let app = Router::new().nest("/api", strata_api::api_router(state));
//! ```

pub mod cache;
pub mod data;
pub mod error;
pub mod gate;
pub mod gateway;
pub mod keys;
pub mod limiter;
pub mod notifier;
pub mod realtime;
pub mod settings;
pub mod tables;
pub mod webhooks;

#[cfg(test)]
mod tests;

use std::{sync::Arc, time::Duration};

use axum::{
  Json,
  Router,
  routing::{delete, get, patch, post, put},
};
use serde_json::{Value, json};
use strata_core::store::Backend;

pub use error::ApiError;

use crate::{
  cache::ResponseCache,
  gate::{AccessGate, OperatorConfig},
  gateway::Gateway,
  notifier::ChangeNotifier,
  webhooks::{WebhookConfig, WebhookDispatcher, WebhookError},
};

/// Runtime settings for the API layer.
#[derive(Debug, Clone)]
pub struct ApiConfig {
  pub cache_ttl:         Duration,
  pub cache_max_entries: usize,
  /// Per-channel capacity for realtime and webhook subscribers.
  pub event_buffer:      usize,
  pub operators:         Vec<OperatorConfig>,
  pub webhooks:          Vec<WebhookConfig>,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      cache_ttl:         cache::DEFAULT_TTL,
      cache_max_entries: cache::DEFAULT_MAX_ENTRIES,
      event_buffer:      notifier::DEFAULT_EVENT_BUFFER,
      operators:         Vec::new(),
      webhooks:          Vec::new(),
    }
  }
}

/// Shared state handed to every handler.
pub struct AppState<S> {
  pub store:    Arc<S>,
  pub gate:     Arc<AccessGate>,
  pub gateway:  Arc<Gateway<S>>,
  pub cache:    Arc<ResponseCache>,
  pub notifier: Arc<ChangeNotifier>,
}

impl<S> Clone for AppState<S> {
  fn clone(&self) -> Self {
    Self {
      store:    self.store.clone(),
      gate:     self.gate.clone(),
      gateway:  self.gateway.clone(),
      cache:    self.cache.clone(),
      notifier: self.notifier.clone(),
    }
  }
}

impl<S: Backend> AppState<S> {
  /// Wire up the cache, notifier and gateway for `store`.
  ///
  /// When webhooks are configured their dispatcher is spawned onto the
  /// current tokio runtime.
  pub fn new(store: Arc<S>, config: ApiConfig) -> Result<Self, WebhookError> {
    let cache = Arc::new(ResponseCache::new(config.cache_ttl, config.cache_max_entries));
    let notifier = Arc::new(ChangeNotifier::new(cache.clone(), config.event_buffer));

    let webhooks = WebhookDispatcher::new(config.webhooks)?;
    if !webhooks.is_empty() {
      Arc::new(webhooks).spawn(notifier.subscribe_all());
    }

    let gateway = Arc::new(Gateway::new(store.clone(), cache.clone(), notifier.clone()));
    Ok(Self {
      store,
      gate: Arc::new(AccessGate::new(config.operators)),
      gateway,
      cache,
      notifier,
    })
  }
}

/// Build a fully-materialised API router.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router<S: Backend>(state: AppState<S>) -> Router<()> {
  Router::new()
    .route("/health", get(health))
    // Management
    .route("/column-types", get(tables::column_types::<S>))
    .route("/tables", get(tables::list::<S>).post(tables::create::<S>))
    .route(
      "/tables/{table}",
      get(tables::get_one::<S>)
        .patch(tables::update::<S>)
        .delete(tables::delete_one::<S>),
    )
    .route("/tables/{table}/columns", post(tables::add_column::<S>))
    .route(
      "/tables/{table}/columns/{column}",
      patch(tables::update_column::<S>).delete(tables::drop_column::<S>),
    )
    .route("/tables/{table}/relationships", post(tables::add_relationship::<S>))
    .route(
      "/tables/{table}/relationships/{name}",
      delete(tables::delete_relationship::<S>),
    )
    .route("/keys", get(keys::list::<S>).post(keys::create::<S>))
    .route("/keys/{id}", delete(keys::revoke::<S>))
    .route("/settings", get(settings::list::<S>))
    .route("/settings/{key}", put(settings::put_one::<S>))
    .route("/cache", delete(settings::flush_cache::<S>))
    // Data
    .route("/data/{table}", get(data::list::<S>).post(data::create::<S>))
    .route("/data/{table}/bulk", post(data::create_many::<S>))
    .route("/data/{table}/schema", get(data::describe::<S>))
    .route(
      "/data/{table}/{id}",
      get(data::get_one::<S>)
        .put(data::update::<S>)
        .patch(data::update::<S>)
        .delete(data::delete_one::<S>),
    )
    .route("/data/{table}/{id}/restore", post(data::restore::<S>))
    // Realtime
    .route("/realtime/{table}", get(realtime::stream::<S>))
    .with_state(state)
}

/// `GET /health`
async fn health() -> Json<Value> { Json(json!({ "status": "ok" })) }
