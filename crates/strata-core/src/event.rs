//! Change events published after every record write.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{record::Record, schema::TableSchema};

/// Substrings that mark a column as unsafe to broadcast.
const SENSITIVE_MARKERS: [&str; 5] = ["password", "secret", "token", "key", "credential"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
  Created,
  Updated,
  Deleted,
}

impl ChangeAction {
  pub fn as_str(self) -> &'static str {
    match self {
      ChangeAction::Created => "created",
      ChangeAction::Updated => "updated",
      ChangeAction::Deleted => "deleted",
    }
  }
}

/// Wire shape delivered to real-time subscribers and webhooks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
  pub table:     String,
  pub action:    ChangeAction,
  pub data:      Value,
  pub timestamp: DateTime<Utc>,
}

/// A record transition as observed by the gateway: `before` is absent for
/// inserts, `after` is absent for hard deletes.
#[derive(Debug, Clone)]
pub struct RecordChange {
  pub before: Option<Record>,
  pub after:  Option<Record>,
}

impl RecordChange {
  pub fn created(record: Record) -> Self { Self { before: None, after: Some(record) } }

  pub fn updated(before: Record, after: Record) -> Self {
    Self { before: Some(before), after: Some(after) }
  }

  pub fn removed(before: Record) -> Self { Self { before: Some(before), after: None } }

  pub fn id(&self) -> Option<i64> {
    self.after.as_ref().or(self.before.as_ref()).map(|r| r.id)
  }

  /// Classify the transition. On soft-delete tables a tombstone that becomes
  /// set is a delete, regardless of the row still existing.
  pub fn action(&self, soft_deletes: bool) -> Option<ChangeAction> {
    match (&self.before, &self.after) {
      (None, Some(_)) => Some(ChangeAction::Created),
      (Some(_), None) => Some(ChangeAction::Deleted),
      (Some(before), Some(after)) => {
        if soft_deletes && !before.is_tombstoned() && after.is_tombstoned() {
          Some(ChangeAction::Deleted)
        } else {
          Some(ChangeAction::Updated)
        }
      }
      (None, None) => None,
    }
  }
}

impl ChangeEvent {
  /// Build the event for `change`. Deletes carry only the id; other actions
  /// carry the record without hidden or sensitive columns.
  pub fn from_change(
    schema: &TableSchema,
    change: &RecordChange,
    at: DateTime<Utc>,
  ) -> Option<Self> {
    let action = change.action(schema.table.has_soft_deletes)?;
    let data = match action {
      ChangeAction::Deleted => json!({ "id": change.id()? }),
      ChangeAction::Created | ChangeAction::Updated => {
        let mut record = change.after.clone()?;
        record.redact(&schema.hidden_columns());
        record.values.retain(|name, _| !is_sensitive_key(name));
        serde_json::to_value(record).ok()?
      }
    };
    Some(ChangeEvent {
      table: schema.name().to_string(),
      action,
      data,
      timestamp: at,
    })
  }
}

pub fn is_sensitive_key(name: &str) -> bool {
  let lower = name.to_ascii_lowercase();
  SENSITIVE_MARKERS.iter().any(|m| lower.contains(m))
}

#[cfg(test)]
mod tests {
  use serde_json::{Map, json};

  use super::*;

  fn record(id: i64, values: Value) -> Record {
    Record {
      id,
      values: values.as_object().cloned().unwrap_or_else(Map::new),
    }
  }

  #[test]
  fn tombstone_transition_is_a_delete() {
    let before = record(5, json!({ "deleted_at": null }));
    let after = record(5, json!({ "deleted_at": "2024-05-01T00:00:00Z" }));
    let change = RecordChange::updated(before, after);
    assert_eq!(change.action(true), Some(ChangeAction::Deleted));
    assert_eq!(change.action(false), Some(ChangeAction::Updated));
  }

  #[test]
  fn restore_is_an_update() {
    let before = record(5, json!({ "deleted_at": "2024-05-01T00:00:00Z" }));
    let after = record(5, json!({ "deleted_at": null }));
    assert_eq!(RecordChange::updated(before, after).action(true), Some(ChangeAction::Updated));
  }

  #[test]
  fn sensitive_keys() {
    assert!(is_sensitive_key("password_hash"));
    assert!(is_sensitive_key("API_KEY"));
    assert!(!is_sensitive_key("total"));
    assert!(!is_sensitive_key("author"));
    assert!(!is_sensitive_key("authorized_at"));
  }
}
