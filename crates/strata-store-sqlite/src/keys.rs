//! API key and settings persistence.
//!
//! Tokens are `sk_`/`pk_` followed by 40 hex characters. Only the hex SHA-256
//! of a token is stored; lookups hash the presented token and match on that.

use chrono::{DateTime, Utc};
use rand_core::{OsRng, RngCore as _};
use rusqlite::{Connection, OptionalExtension as _};
use serde_json::{Map, Value};
use sha2::{Digest as _, Sha256};
use strata_core::access::{ApiKey, ApiKeySpec, IssuedKey, KeyKind};

use crate::{
  Result,
  encode::{API_KEY_COLUMNS, RawApiKey, encode_dt, encode_key_kind},
};

const TOKEN_BYTES: usize = 20;
const HINT_LEN: usize = 7;

pub fn generate_token(kind: KeyKind) -> String {
  let mut bytes = [0u8; TOKEN_BYTES];
  OsRng.fill_bytes(&mut bytes);
  format!("{}{}", kind.prefix(), hex::encode(bytes))
}

pub fn hash_token(token: &str) -> String { hex::encode(Sha256::digest(token.as_bytes())) }

// ─── Keys ────────────────────────────────────────────────────────────────────

pub fn create_key(conn: &Connection, spec: ApiKeySpec, now: DateTime<Utc>) -> Result<IssuedKey> {
  let token = generate_token(spec.kind);
  let hint = token.chars().take(HINT_LEN).collect::<String>();
  let abilities: Vec<String> = spec.abilities.clone().into();

  conn.execute(
    "INSERT INTO strata_api_keys (
       name, owner, kind, hint, token_hash, abilities, tables, rate_limit,
       is_active, expires_at, created_at
     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1, ?9, ?10)",
    rusqlite::params![
      spec.name,
      spec.owner,
      encode_key_kind(spec.kind),
      hint,
      hash_token(&token),
      serde_json::to_string(&abilities)?,
      serde_json::to_string(&spec.tables)?,
      spec.rate_limit,
      spec.expires_at.map(encode_dt),
      encode_dt(now),
    ],
  )?;

  let key = ApiKey {
    id: conn.last_insert_rowid(),
    name: spec.name,
    owner: spec.owner,
    kind: spec.kind,
    hint,
    abilities: spec.abilities,
    tables: spec.tables,
    rate_limit: spec.rate_limit,
    is_active: true,
    expires_at: spec.expires_at,
    last_used_at: None,
    created_at: now,
  };
  tracing::info!(key_id = key.id, name = %key.name, "issued api key");
  Ok(IssuedKey { key, token })
}

pub fn find_key_by_token(conn: &Connection, token: &str) -> Result<Option<ApiKey>> {
  conn
    .query_row(
      &format!("SELECT {API_KEY_COLUMNS} FROM strata_api_keys WHERE token_hash = ?1"),
      rusqlite::params![hash_token(token)],
      RawApiKey::from_row,
    )
    .optional()?
    .map(RawApiKey::into_key)
    .transpose()
}

pub fn list_keys(conn: &Connection) -> Result<Vec<ApiKey>> {
  let mut stmt = conn.prepare(&format!(
    "SELECT {API_KEY_COLUMNS} FROM strata_api_keys ORDER BY id"
  ))?;
  let raws = stmt
    .query_map([], RawApiKey::from_row)?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  raws.into_iter().map(RawApiKey::into_key).collect()
}

pub fn revoke_key(conn: &Connection, key_id: i64) -> Result<bool> {
  let removed = conn.execute(
    "DELETE FROM strata_api_keys WHERE id = ?1",
    rusqlite::params![key_id],
  )?;
  Ok(removed > 0)
}

pub fn touch_key(conn: &Connection, key_id: i64, at: DateTime<Utc>) -> Result<()> {
  conn.execute(
    "UPDATE strata_api_keys SET last_used_at = ?2 WHERE id = ?1",
    rusqlite::params![key_id, encode_dt(at)],
  )?;
  Ok(())
}

// ─── Settings ────────────────────────────────────────────────────────────────

pub fn get_setting(conn: &Connection, key: &str) -> Result<Option<Value>> {
  let raw: Option<String> = conn
    .query_row(
      "SELECT value FROM strata_settings WHERE key = ?1",
      rusqlite::params![key],
      |row| row.get(0),
    )
    .optional()?;
  Ok(raw.as_deref().map(serde_json::from_str).transpose()?)
}

pub fn put_setting(conn: &Connection, key: &str, value: &Value, now: DateTime<Utc>) -> Result<()> {
  conn.execute(
    "INSERT INTO strata_settings (key, value, updated_at) VALUES (?1, ?2, ?3)
     ON CONFLICT (key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
    rusqlite::params![key, serde_json::to_string(value)?, encode_dt(now)],
  )?;
  Ok(())
}

pub fn list_settings(conn: &Connection) -> Result<Map<String, Value>> {
  let mut stmt = conn.prepare("SELECT key, value FROM strata_settings ORDER BY key")?;
  let rows = stmt
    .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  rows
    .into_iter()
    .map(|(k, v)| -> Result<(String, Value)> { Ok((k, serde_json::from_str(&v)?)) })
    .collect()
}
