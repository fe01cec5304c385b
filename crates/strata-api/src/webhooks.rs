//! Outbound webhooks for change events.
//!
//! Hooks come from the server configuration. The dispatcher listens on the
//! notifier's all-tables channel and POSTs
//! `{"event", "table", "data", "timestamp"}` to every hook registered for the
//! event's table. Each delivery runs in its own task with a 10 second
//! timeout; a hook that fails ten times in a row is disabled until restart.
//!
//! A hook with a `secret` also gets `X-Webhook-Signature: sha256=<hex>`, the
//! HMAC-SHA256 of the exact request body.

use std::{
  collections::BTreeMap,
  sync::{
    Arc,
    atomic::{AtomicU32, Ordering},
  },
  time::Duration,
};

use axum::http::header;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::{Value, json};
use sha2::Sha256;
use strata_core::event::{ChangeAction, ChangeEvent};
use thiserror::Error;
use tokio::{
  sync::broadcast::{self, error::RecvError},
  task::JoinHandle,
};
use url::Url;

pub const MAX_CONSECUTIVE_FAILURES: u32 = 10;
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);
const USER_AGENT: &str = concat!("strata-webhook/", env!("CARGO_PKG_VERSION"));
pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";

#[derive(Debug, Error)]
pub enum WebhookError {
  #[error("webhook url {url:?} is invalid: {reason}")]
  InvalidUrl { url: String, reason: String },

  #[error("failed to build HTTP client: {0}")]
  Client(#[from] reqwest::Error),

  #[error("webhook secret for {url:?} is empty")]
  EmptySecret { url: String },
}

/// One configured webhook.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
  /// Physical table name the hook listens to.
  pub table:   String,
  pub url:     String,
  /// Actions to deliver; empty means all of them.
  #[serde(default)]
  pub events:  Vec<ChangeAction>,
  /// Extra headers sent with every delivery.
  #[serde(default)]
  pub headers: BTreeMap<String, String>,
  /// Key for the body signature; unsigned when absent.
  #[serde(default)]
  pub secret:  Option<String>,
}

struct Hook {
  config:   WebhookConfig,
  url:      Url,
  failures: AtomicU32,
}

impl Hook {
  fn wants(&self, event: &ChangeEvent) -> bool {
    self.config.table == event.table
      && (self.config.events.is_empty() || self.config.events.contains(&event.action))
  }

  fn is_disabled(&self) -> bool {
    self.failures.load(Ordering::Relaxed) >= MAX_CONSECUTIVE_FAILURES
  }

  async fn deliver(&self, client: &reqwest::Client, event: &ChangeEvent, body: &[u8]) {
    let mut request = client
      .post(self.url.clone())
      .header(header::CONTENT_TYPE, "application/json")
      .header("X-Webhook-Event", event.action.as_str())
      .body(body.to_vec());
    if let Some(signature) = self.config.secret.as_deref().and_then(|s| sign(s, body)) {
      request = request.header(SIGNATURE_HEADER, format!("sha256={signature}"));
    }
    for (name, value) in &self.config.headers {
      request = request.header(name, value);
    }

    let outcome = match request.send().await {
      Ok(res) if res.status().is_success() => Ok(()),
      Ok(res) => Err(format!("status {}", res.status())),
      Err(e) => Err(e.to_string()),
    };

    match outcome {
      Ok(()) => {
        self.failures.store(0, Ordering::Relaxed);
        tracing::debug!(url = %self.url, table = %event.table, "webhook delivered");
      }
      Err(reason) => {
        let failures = self.failures.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::warn!(url = %self.url, table = %event.table, failures, %reason, "webhook failed");
        if failures == MAX_CONSECUTIVE_FAILURES {
          tracing::warn!(url = %self.url, "webhook disabled after repeated failures");
        }
      }
    }
  }
}

pub struct WebhookDispatcher {
  client: reqwest::Client,
  hooks:  Vec<Arc<Hook>>,
}

impl WebhookDispatcher {
  pub fn new(configs: Vec<WebhookConfig>) -> Result<Self, WebhookError> {
    let hooks = configs
      .into_iter()
      .map(|config| {
        let url = validate_url(&config.url)?;
        if config.secret.as_deref().is_some_and(str::is_empty) {
          return Err(WebhookError::EmptySecret { url: config.url });
        }
        Ok(Arc::new(Hook {
          config,
          url,
          failures: AtomicU32::new(0),
        }))
      })
      .collect::<Result<Vec<_>, WebhookError>>()?;

    let client = reqwest::Client::builder()
      .timeout(DELIVERY_TIMEOUT)
      .user_agent(USER_AGENT)
      .build()?;
    Ok(Self { client, hooks })
  }

  pub fn is_empty(&self) -> bool { self.hooks.is_empty() }

  /// Deliver events from `rx` until the channel closes.
  pub fn spawn(self: Arc<Self>, mut rx: broadcast::Receiver<ChangeEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
      loop {
        match rx.recv().await {
          Ok(event) => self.dispatch(&event),
          Err(RecvError::Lagged(skipped)) => {
            tracing::warn!(skipped, "webhook dispatcher lagged, events dropped");
          }
          Err(RecvError::Closed) => break,
        }
      }
    })
  }

  fn dispatch(&self, event: &ChangeEvent) {
    let body: Arc<[u8]> = match serde_json::to_vec(&payload(event)) {
      Ok(body) => body.into(),
      Err(e) => {
        tracing::error!(table = %event.table, "failed to encode webhook payload: {e}");
        return;
      }
    };
    for hook in self.hooks.iter().filter(|h| h.wants(event) && !h.is_disabled()) {
      let hook = hook.clone();
      let client = self.client.clone();
      let event = event.clone();
      let body = body.clone();
      tokio::spawn(async move { hook.deliver(&client, &event, &body).await });
    }
  }
}

fn payload(event: &ChangeEvent) -> Value {
  json!({
    "event": event.action.as_str(),
    "table": event.table,
    "data": event.data,
    "timestamp": event.timestamp,
  })
}

/// Hex HMAC-SHA256 of `body` under `secret`.
pub fn sign(secret: &str, body: &[u8]) -> Option<String> {
  let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(secret.as_bytes()).ok()?;
  mac.update(body);
  Some(hex::encode(mac.finalize().into_bytes()))
}

fn validate_url(raw: &str) -> Result<Url, WebhookError> {
  let invalid = |reason: &str| WebhookError::InvalidUrl {
    url:    raw.to_string(),
    reason: reason.to_string(),
  };
  let url = Url::parse(raw).map_err(|e| invalid(&e.to_string()))?;
  if !matches!(url.scheme(), "http" | "https") {
    return Err(invalid("only http and https are allowed"));
  }
  if url.host_str().is_none() {
    return Err(invalid("missing host"));
  }
  Ok(url)
}
