//! In-process response cache for record reads.
//!
//! Keys are `data:{table}:{digest}`, where the digest covers the canonical
//! query pairs and the caller fingerprint, so two callers never share an
//! entry. Each table keeps an index of its live keys plus a generation
//! counter: invalidating a table evicts exactly those keys and bumps the
//! generation, and a `put` computed under an older generation is dropped.

use std::{
  collections::HashSet,
  time::{Duration, Instant},
};

use dashmap::DashMap;
use serde_json::Value;
use sha2::{Digest as _, Sha256};
use strata_core::access::Caller;

pub const DEFAULT_TTL: Duration = Duration::from_secs(300);
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// Reported to clients in `X-Cache-Status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
  Hit,
  Miss,
  Bypass,
}

impl CacheStatus {
  pub fn as_str(self) -> &'static str {
    match self {
      CacheStatus::Hit => "HIT",
      CacheStatus::Miss => "MISS",
      CacheStatus::Bypass => "BYPASS",
    }
  }
}

struct Entry {
  table:      String,
  value:      Value,
  expires_at: Instant,
}

#[derive(Default)]
struct TableSlot {
  generation: u64,
  keys:       HashSet<String>,
}

pub struct ResponseCache {
  entries:     DashMap<String, Entry>,
  tables:      DashMap<String, TableSlot>,
  ttl:         Duration,
  max_entries: usize,
}

impl ResponseCache {
  pub fn new(ttl: Duration, max_entries: usize) -> Self {
    Self {
      entries: DashMap::new(),
      tables: DashMap::new(),
      ttl,
      max_entries,
    }
  }

  pub fn ttl(&self) -> Duration { self.ttl }

  /// Build the key for a read of `table` described by `pairs`.
  pub fn key(table: &str, pairs: &[(String, String)], caller: &Caller) -> String {
    let mut hasher = Sha256::new();
    for (k, v) in pairs {
      hasher.update(k.as_bytes());
      hasher.update([0x1f]);
      hasher.update(v.as_bytes());
      hasher.update([0x1e]);
    }
    hasher.update(caller.fingerprint().as_bytes());
    format!("data:{table}:{}", hex::encode(hasher.finalize()))
  }

  /// Current generation of `table`; pass it back to [`ResponseCache::put`].
  pub fn generation(&self, table: &str) -> u64 {
    self.tables.get(table).map(|slot| slot.generation).unwrap_or(0)
  }

  pub fn get(&self, key: &str) -> Option<Value> {
    let now = Instant::now();
    let entry = self.entries.get(key)?;
    if entry.expires_at > now {
      return Some(entry.value.clone());
    }
    drop(entry);
    if let Some((key, entry)) = self.entries.remove_if(key, |_, entry| entry.expires_at <= now) {
      self.unindex(&entry.table, &key);
    }
    None
  }

  /// Store `value` unless `table` was invalidated since `generation` was
  /// read. Returns whether the value was stored.
  pub fn put(&self, table: &str, key: String, value: Value, generation: u64) -> bool {
    if self.entries.len() >= self.max_entries {
      self.evict_expired();
      if self.entries.len() >= self.max_entries {
        tracing::debug!(cache_key = %key, "response cache full, not storing");
        return false;
      }
    }

    let mut slot = self.tables.entry(table.to_string()).or_default();
    if slot.generation != generation {
      return false;
    }
    slot.keys.insert(key.clone());
    self.entries.insert(key, Entry {
      table: table.to_string(),
      value,
      expires_at: Instant::now() + self.ttl,
    });
    true
  }

  /// Evict every entry for `table`. Returns the number of keys evicted.
  pub fn invalidate_table(&self, table: &str) -> usize {
    let keys = {
      let mut slot = self.tables.entry(table.to_string()).or_default();
      slot.generation += 1;
      std::mem::take(&mut slot.keys)
    };
    for key in &keys {
      self.entries.remove(key);
    }
    tracing::debug!(table, evicted = keys.len(), "invalidated table cache");
    keys.len()
  }

  /// Evict everything. Every table's generation moves on, so reads already
  /// in flight are not stored either.
  pub fn invalidate_all(&self) -> usize {
    for mut slot in self.tables.iter_mut() {
      slot.generation += 1;
      slot.keys.clear();
    }
    let evicted = self.entries.len();
    self.entries.clear();
    tracing::info!(evicted, "flushed response cache");
    evicted
  }

  pub fn is_empty(&self) -> bool { self.entries.is_empty() }

  fn evict_expired(&self) {
    let now = Instant::now();
    let mut expired = Vec::new();
    self.entries.retain(|key, entry| {
      let live = entry.expires_at > now;
      if !live {
        expired.push((entry.table.clone(), key.clone()));
      }
      live
    });
    for (table, key) in expired {
      self.unindex(&table, &key);
    }
  }

  fn unindex(&self, table: &str, key: &str) {
    if let Some(mut slot) = self.tables.get_mut(table) {
      slot.keys.remove(key);
    }
  }

  #[cfg(test)]
  fn indexed_keys(&self, table: &str) -> usize {
    self.tables.get(table).map(|slot| slot.keys.len()).unwrap_or(0)
  }
}

impl Default for ResponseCache {
  fn default() -> Self { Self::new(DEFAULT_TTL, DEFAULT_MAX_ENTRIES) }
}
