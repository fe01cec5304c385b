//! Configuration and application assembly for the Strata server binary.

use std::{
  path::{Path, PathBuf},
  time::Duration,
};

use axum::Router;
use serde::Deserialize;
use strata_api::{ApiConfig, AppState, gate::OperatorConfig, webhooks::WebhookConfig};
use strata_core::store::Backend;
use tower_http::trace::TraceLayer;

// ─── Configuration ────────────────────────────────────────────────────────────

/// Runtime server configuration, deserialised from `config.toml` and
/// `STRATA_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
  #[serde(default = "default_host")]
  pub host:              String,
  #[serde(default = "default_port")]
  pub port:              u16,
  #[serde(default = "default_store_path")]
  pub store_path:        PathBuf,
  #[serde(default = "default_cache_ttl_secs")]
  pub cache_ttl_secs:    u64,
  #[serde(default = "default_cache_max_entries")]
  pub cache_max_entries: usize,
  #[serde(default = "default_event_buffer")]
  pub event_buffer:      usize,
  #[serde(default)]
  pub operators:         Vec<OperatorConfig>,
  #[serde(default)]
  pub webhooks:          Vec<WebhookConfig>,
}

fn default_host() -> String { "127.0.0.1".to_string() }
fn default_port() -> u16 { 8080 }
fn default_store_path() -> PathBuf { PathBuf::from("strata.db") }
fn default_cache_ttl_secs() -> u64 { strata_api::cache::DEFAULT_TTL.as_secs() }
fn default_cache_max_entries() -> usize { strata_api::cache::DEFAULT_MAX_ENTRIES }
fn default_event_buffer() -> usize { strata_api::notifier::DEFAULT_EVENT_BUFFER }

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      host:              default_host(),
      port:              default_port(),
      store_path:        default_store_path(),
      cache_ttl_secs:    default_cache_ttl_secs(),
      cache_max_entries: default_cache_max_entries(),
      event_buffer:      default_event_buffer(),
      operators:         Vec::new(),
      webhooks:          Vec::new(),
    }
  }
}

impl ServerConfig {
  /// Read `path` if it exists, then apply `STRATA_*` overrides.
  pub fn load(path: &Path) -> Result<Self, config::ConfigError> {
    config::Config::builder()
      .add_source(config::File::from(path).required(false))
      .add_source(config::Environment::with_prefix("STRATA").try_parsing(true))
      .build()?
      .try_deserialize()
  }

  pub fn address(&self) -> String { format!("{}:{}", self.host, self.port) }

  pub fn api_config(&self) -> ApiConfig {
    ApiConfig {
      cache_ttl:         Duration::from_secs(self.cache_ttl_secs),
      cache_max_entries: self.cache_max_entries,
      event_buffer:      self.event_buffer,
      operators:         self.operators.clone(),
      webhooks:          self.webhooks.clone(),
    }
  }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}

// ─── Router ───────────────────────────────────────────────────────────────────

/// The API router with request tracing.
pub fn app<S: Backend>(state: AppState<S>) -> Router {
  strata_api::api_router(state).layer(TraceLayer::new_for_http())
}
