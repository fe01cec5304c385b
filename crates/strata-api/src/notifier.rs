//! Change notification: cache invalidation followed by event broadcast.
//!
//! Every record write in the gateway ends in [`ChangeNotifier::notify`]. The
//! table's cache entries are evicted first, then a [`ChangeEvent`] goes out
//! on the table's channel and on the all-tables channel that feeds webhooks.
//! Sends never block and never fail the caller; a channel without receivers
//! simply drops the event.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use strata_core::{
  event::{ChangeEvent, RecordChange},
  schema::TableSchema,
};
use tokio::sync::broadcast;

use crate::cache::ResponseCache;

pub const DEFAULT_EVENT_BUFFER: usize = 1024;

pub struct ChangeNotifier {
  cache:    Arc<ResponseCache>,
  channels: DashMap<String, broadcast::Sender<ChangeEvent>>,
  all:      broadcast::Sender<ChangeEvent>,
  capacity: usize,
}

impl ChangeNotifier {
  pub fn new(cache: Arc<ResponseCache>, capacity: usize) -> Self {
    let capacity = capacity.max(1);
    let (all, _) = broadcast::channel(capacity);
    Self {
      cache,
      channels: DashMap::new(),
      all,
      capacity,
    }
  }

  /// Receive change events for one table.
  pub fn subscribe(&self, table: &str) -> broadcast::Receiver<ChangeEvent> {
    self
      .channels
      .entry(table.to_string())
      .or_insert_with(|| broadcast::channel(self.capacity).0)
      .subscribe()
  }

  /// Receive change events for every table.
  pub fn subscribe_all(&self) -> broadcast::Receiver<ChangeEvent> { self.all.subscribe() }

  /// Invalidate the table's cache entries, then publish the event for
  /// `change`, if it describes one.
  pub fn notify(&self, schema: &TableSchema, change: &RecordChange) {
    self.cache.invalidate_table(schema.name());
    match ChangeEvent::from_change(schema, change, Utc::now()) {
      Some(event) => self.publish(event),
      None => tracing::warn!(table = schema.name(), "write produced no change event"),
    }
  }

  /// Evict a dropped table's cache entries and close its channel.
  pub fn forget(&self, table: &str) {
    self.cache.invalidate_table(table);
    self.channels.remove(table);
  }

  fn publish(&self, event: ChangeEvent) {
    tracing::debug!(
      table = %event.table,
      action = event.action.as_str(),
      "publishing change event"
    );

    if let Some(tx) = self.channels.get(&event.table)
      && tx.send(event.clone()).is_err()
    {
      tracing::trace!(table = %event.table, "no realtime subscribers");
    }
    let _ = self.all.send(event);
  }
}
