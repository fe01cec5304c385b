//! Callers, abilities and API keys.
//!
//! A [`Caller`] is what the access gate hands to the gateway: who is asking
//! and what they may do. It is resolved either from an API key or from an
//! operator session.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result, schema::TableDefinition};

// ─── Abilities ───────────────────────────────────────────────────────────────

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Ability {
  Read,
  Create,
  Update,
  Delete,
}

impl Ability {
  pub const ALL: [Ability; 4] = [Ability::Read, Ability::Create, Ability::Update, Ability::Delete];

  pub fn as_str(self) -> &'static str {
    match self {
      Ability::Read => "read",
      Ability::Create => "create",
      Ability::Update => "update",
      Ability::Delete => "delete",
    }
  }

  pub fn parse(s: &str) -> Result<Self> {
    match s {
      "read" => Ok(Ability::Read),
      "create" => Ok(Ability::Create),
      "update" => Ok(Ability::Update),
      "delete" => Ok(Ability::Delete),
      other => Err(Error::InvalidSpec(format!("unknown ability {other:?}"))),
    }
  }
}

/// `*` or an explicit set. Serialized as a list of strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub enum Abilities {
  All,
  Only(BTreeSet<Ability>),
}

impl Abilities {
  pub fn allows(&self, ability: Ability) -> bool {
    match self {
      Abilities::All => true,
      Abilities::Only(set) => set.contains(&ability),
    }
  }

  pub fn read_only() -> Self { Abilities::Only(BTreeSet::from([Ability::Read])) }
}

impl Default for Abilities {
  fn default() -> Self { Abilities::All }
}

impl TryFrom<Vec<String>> for Abilities {
  type Error = Error;

  /// An empty list or one containing `*` grants everything.
  fn try_from(list: Vec<String>) -> Result<Self> {
    if list.is_empty() || list.iter().any(|a| a == "*") {
      return Ok(Abilities::All);
    }
    list
      .iter()
      .map(|a| Ability::parse(a.trim()))
      .collect::<Result<BTreeSet<_>>>()
      .map(Abilities::Only)
  }
}

impl From<Abilities> for Vec<String> {
  fn from(abilities: Abilities) -> Self {
    match abilities {
      Abilities::All => vec!["*".to_string()],
      Abilities::Only(set) => set.into_iter().map(|a| a.as_str().to_string()).collect(),
    }
  }
}

// ─── Roles ───────────────────────────────────────────────────────────────────

/// Role of a session-authenticated operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
  /// Everything, including schema and key management.
  Admin,
  /// Read and write records.
  Editor,
  /// Read records.
  Viewer,
}

impl Role {
  pub fn abilities(self) -> Abilities {
    match self {
      Role::Admin | Role::Editor => Abilities::All,
      Role::Viewer => Abilities::read_only(),
    }
  }
}

// ─── Caller ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
  ApiKey { key_id: i64, owner: Option<String> },
  Operator { username: String, role: Role },
}

/// A resolved, authenticated caller and its scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
  pub identity:  Identity,
  pub abilities: Abilities,
  /// Physical or logical table names the caller may touch; `None` means all.
  pub tables:    Option<BTreeSet<String>>,
}

impl Caller {
  pub fn operator(username: impl Into<String>, role: Role) -> Self {
    Self {
      identity:  Identity::Operator { username: username.into(), role },
      abilities: role.abilities(),
      tables:    None,
    }
  }

  /// Stable identity string; part of every cache key.
  pub fn fingerprint(&self) -> String {
    match &self.identity {
      Identity::ApiKey { key_id, .. } => format!("key:{key_id}"),
      Identity::Operator { username, .. } => format!("operator:{username}"),
    }
  }

  /// Identity that row rules compare against (`auth.id`).
  pub fn auth_id(&self) -> Option<&str> {
    match &self.identity {
      Identity::ApiKey { owner, .. } => owner.as_deref(),
      Identity::Operator { username, .. } => Some(username),
    }
  }

  pub fn can_manage_schema(&self) -> bool {
    matches!(self.identity, Identity::Operator { role: Role::Admin, .. })
  }

  pub fn can_access_table(&self, table: &TableDefinition) -> bool {
    match &self.tables {
      None => true,
      Some(allowed) => allowed.contains(&table.table_name) || allowed.contains(&table.name),
    }
  }

  /// Check `ability` on `table`, failing with `Forbidden`.
  pub fn authorize(&self, table: &TableDefinition, ability: Ability) -> Result<()> {
    if !self.can_access_table(table) {
      return Err(Error::Forbidden(format!(
        "access to table {} is not allowed",
        table.table_name
      )));
    }
    if !self.abilities.allows(ability) {
      return Err(Error::Forbidden(format!(
        "missing {} permission",
        ability.as_str()
      )));
    }
    Ok(())
  }
}

// ─── API keys ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyKind {
  #[default]
  Secret,
  Public,
}

impl KeyKind {
  /// Token prefix identifying the kind.
  pub fn prefix(self) -> &'static str {
    match self {
      KeyKind::Secret => "sk_",
      KeyKind::Public => "pk_",
    }
  }
}

pub const DEFAULT_RATE_LIMIT: u32 = 60;

fn default_rate_limit() -> u32 { DEFAULT_RATE_LIMIT }

/// A stored API key. The plaintext token is never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKey {
  pub id:           i64,
  pub name:         String,
  pub owner:        Option<String>,
  pub kind:         KeyKind,
  /// First characters of the token, for display.
  pub hint:         String,
  pub abilities:    Abilities,
  /// Empty means every table.
  pub tables:       Vec<String>,
  /// Requests per minute.
  pub rate_limit:   u32,
  pub is_active:    bool,
  pub expires_at:   Option<DateTime<Utc>>,
  pub last_used_at: Option<DateTime<Utc>>,
  pub created_at:   DateTime<Utc>,
}

impl ApiKey {
  pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
    self.expires_at.is_some_and(|at| at <= now)
  }

  pub fn caller(&self) -> Caller {
    Caller {
      identity:  Identity::ApiKey {
        key_id: self.id,
        owner:  self.owner.clone(),
      },
      abilities: self.abilities.clone(),
      tables:    (!self.tables.is_empty()).then(|| self.tables.iter().cloned().collect()),
    }
  }
}

/// Input for issuing a new key.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiKeySpec {
  pub name:       String,
  #[serde(default)]
  pub owner:      Option<String>,
  #[serde(default)]
  pub kind:       KeyKind,
  #[serde(default)]
  pub abilities:  Abilities,
  #[serde(default)]
  pub tables:     Vec<String>,
  #[serde(default = "default_rate_limit")]
  pub rate_limit: u32,
  #[serde(default)]
  pub expires_at: Option<DateTime<Utc>>,
}

impl ApiKeySpec {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name:       name.into(),
      owner:      None,
      kind:       KeyKind::Secret,
      abilities:  Abilities::All,
      tables:     Vec::new(),
      rate_limit: DEFAULT_RATE_LIMIT,
      expires_at: None,
    }
  }
}

/// A freshly issued key together with its plaintext token, shown once.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedKey {
  #[serde(flatten)]
  pub key:   ApiKey,
  pub token: String,
}

#[cfg(test)]
mod tests {
  use chrono::{Duration, Utc};
  use serde_json::Map;

  use super::*;
  use crate::rules::RowRules;

  fn table(name: &str, table_name: &str) -> TableDefinition {
    TableDefinition {
      id:               1,
      owner:            None,
      name:             name.into(),
      table_name:       table_name.into(),
      display_name:     name.into(),
      description:      None,
      icon:             "table".into(),
      is_active:        true,
      has_timestamps:   true,
      has_soft_deletes: false,
      api_enabled:      true,
      settings:         Map::new(),
      rules:            RowRules::default(),
      schema_version:   1,
      created_at:       Utc::now(),
      updated_at:       Utc::now(),
    }
  }

  fn key(abilities: Abilities, tables: Vec<String>) -> ApiKey {
    ApiKey {
      id: 7,
      name: "test".into(),
      owner: Some("42".into()),
      kind: KeyKind::Secret,
      hint: "sk_abcd".into(),
      abilities,
      tables,
      rate_limit: 60,
      is_active: true,
      expires_at: None,
      last_used_at: None,
      created_at: Utc::now(),
    }
  }

  #[test]
  fn abilities_from_strings() {
    assert_eq!(Abilities::try_from(vec!["*".to_string()]).unwrap(), Abilities::All);
    assert_eq!(Abilities::try_from(Vec::new()).unwrap(), Abilities::All);
    assert_eq!(
      Abilities::try_from(vec!["read".to_string()]).unwrap(),
      Abilities::read_only()
    );
    assert!(Abilities::try_from(vec!["admin".to_string()]).is_err());
  }

  #[test]
  fn scoped_key_authorization() {
    let caller = key(Abilities::read_only(), vec!["customers".into()]).caller();
    let customers = table("Customer", "customers");
    let orders = table("Order", "orders");

    assert!(caller.authorize(&customers, Ability::Read).is_ok());
    assert!(caller.authorize(&customers, Ability::Create).is_err());
    assert!(caller.authorize(&orders, Ability::Read).is_err());
  }

  #[test]
  fn fingerprints_differ_per_key() {
    let a = key(Abilities::All, vec![]).caller();
    let mut other = key(Abilities::read_only(), vec![]);
    other.id = 8;
    assert_ne!(a.fingerprint(), other.caller().fingerprint());
    assert_eq!(a.auth_id(), Some("42"));
  }

  #[test]
  fn roles() {
    let viewer = Caller::operator("vera", Role::Viewer);
    let orders = table("Order", "orders");
    assert!(viewer.authorize(&orders, Ability::Read).is_ok());
    assert!(viewer.authorize(&orders, Ability::Delete).is_err());
    assert!(!viewer.can_manage_schema());
    assert!(Caller::operator("ada", Role::Admin).can_manage_schema());
  }

  #[test]
  fn expiry() {
    let mut k = key(Abilities::All, vec![]);
    let now = Utc::now();
    assert!(!k.is_expired(now));
    k.expires_at = Some(now - Duration::minutes(1));
    assert!(k.is_expired(now));
  }
}
