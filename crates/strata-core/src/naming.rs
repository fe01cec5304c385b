//! Identifier rules and the name derivations used for physical tables and
//! foreign keys.
//!
//! Every table and column name that reaches SQL has passed one of the
//! `validate_*` functions here. The store still quotes identifiers, but the
//! character set is restricted so quoting is never load-bearing.

use crate::{Error, Result};

pub const MAX_IDENTIFIER_LEN: usize = 63;

/// Columns managed by the system on every physical table.
pub const SYSTEM_COLUMNS: [&str; 4] = ["id", "created_at", "updated_at", "deleted_at"];

const RESERVED_PREFIXES: [&str; 2] = ["sqlite_", "strata_"];

const IRREGULAR: [(&str, &str); 4] = [
  ("person", "people"),
  ("child", "children"),
  ("mouse", "mice"),
  ("datum", "data"),
];

// ─── Validation ──────────────────────────────────────────────────────────────

/// `^[a-z][a-z0-9_]{0,62}$`
pub fn is_identifier(name: &str) -> bool {
  let mut chars = name.chars();
  let Some(first) = chars.next() else {
    return false;
  };
  name.len() <= MAX_IDENTIFIER_LEN
    && first.is_ascii_lowercase()
    && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Logical model names are PascalCase-ish: `^[A-Za-z][A-Za-z0-9]*$`.
pub fn validate_model_name(name: &str) -> Result<()> {
  let mut chars = name.chars();
  let valid = match chars.next() {
    Some(first) => {
      first.is_ascii_alphabetic()
        && chars.all(|c| c.is_ascii_alphanumeric())
        && name.len() <= MAX_IDENTIFIER_LEN
    }
    None => false,
  };
  if valid {
    Ok(())
  } else {
    Err(Error::InvalidSpec(format!(
      "model name {name:?} must start with a letter and contain only letters and digits"
    )))
  }
}

pub fn validate_table_name(name: &str) -> Result<()> {
  if !is_identifier(name) {
    return Err(Error::InvalidSpec(format!(
      "table name {name:?} must match ^[a-z][a-z0-9_]*$ and be at most {MAX_IDENTIFIER_LEN} characters"
    )));
  }
  if RESERVED_PREFIXES.iter().any(|p| name.starts_with(p)) {
    return Err(Error::InvalidSpec(format!(
      "table name {name:?} uses a reserved prefix"
    )));
  }
  Ok(())
}

pub fn validate_column_name(name: &str) -> Result<()> {
  if !is_identifier(name) {
    return Err(Error::InvalidSpec(format!(
      "column name {name:?} must match ^[a-z][a-z0-9_]*$ and be at most {MAX_IDENTIFIER_LEN} characters"
    )));
  }
  if is_system_column(name) {
    return Err(Error::InvalidSpec(format!(
      "column name {name:?} is reserved for system use"
    )));
  }
  Ok(())
}

pub fn is_system_column(name: &str) -> bool { SYSTEM_COLUMNS.contains(&name) }

// ─── Derivation ──────────────────────────────────────────────────────────────

/// `OrderItem` → `order_item`, `HTTPLog` → `http_log`.
pub fn snake_case(name: &str) -> String {
  let chars: Vec<char> = name.chars().collect();
  let mut out = String::with_capacity(name.len() + 4);
  for (i, &c) in chars.iter().enumerate() {
    if c.is_ascii_uppercase() {
      let prev_lower = i > 0
        && (chars[i - 1].is_ascii_lowercase() || chars[i - 1].is_ascii_digit());
      let next_lower = chars.get(i + 1).is_some_and(|n| n.is_ascii_lowercase());
      let prev_upper = i > 0 && chars[i - 1].is_ascii_uppercase();
      if prev_lower || (prev_upper && next_lower) {
        out.push('_');
      }
      out.push(c.to_ascii_lowercase());
    } else {
      out.push(c);
    }
  }
  out
}

pub fn pluralize(word: &str) -> String {
  for (singular, plural) in IRREGULAR {
    if let Some(stem) = word.strip_suffix(singular) {
      return format!("{stem}{plural}");
    }
  }
  if let Some(stem) = word.strip_suffix('y')
    && !stem.ends_with(['a', 'e', 'i', 'o', 'u'])
  {
    return format!("{stem}ies");
  }
  if word.ends_with(['s', 'x', 'z']) || word.ends_with("ch") || word.ends_with("sh") {
    return format!("{word}es");
  }
  format!("{word}s")
}

pub fn singularize(word: &str) -> String {
  for (singular, plural) in IRREGULAR {
    if let Some(stem) = word.strip_suffix(plural) {
      return format!("{stem}{singular}");
    }
  }
  if let Some(stem) = word.strip_suffix("ies") {
    return format!("{stem}y");
  }
  for suffix in ["sses", "shes", "ches", "xes", "zes", "uses"] {
    if word.ends_with(suffix) {
      return word[..word.len() - 2].to_string();
    }
  }
  if word.ends_with("ss") {
    return word.to_string();
  }
  word.strip_suffix('s').unwrap_or(word).to_string()
}

/// Physical table name derived from a logical model name.
pub fn table_name_for(model_name: &str) -> String { pluralize(&snake_case(model_name)) }

/// Conventional foreign-key column pointing at rows of `table_name`.
pub fn default_foreign_key(table_name: &str) -> String {
  format!("{}_id", singularize(table_name))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn identifiers() {
    assert!(is_identifier("orders"));
    assert!(is_identifier("order_items2"));
    assert!(!is_identifier("Orders"));
    assert!(!is_identifier("2orders"));
    assert!(!is_identifier("orders; drop table x"));
    assert!(!is_identifier(""));
    assert!(!is_identifier(&"a".repeat(64)));
  }

  #[test]
  fn reserved_names_rejected() {
    assert!(validate_table_name("sqlite_master").is_err());
    assert!(validate_table_name("strata_tables").is_err());
    assert!(validate_column_name("id").is_err());
    assert!(validate_column_name("deleted_at").is_err());
    assert!(validate_column_name("total").is_ok());
  }

  #[test]
  fn model_names() {
    assert!(validate_model_name("Order").is_ok());
    assert!(validate_model_name("OrderItem2").is_ok());
    assert!(validate_model_name("order_item").is_err());
    assert!(validate_model_name("1Order").is_err());
  }

  #[test]
  fn derives_table_names() {
    assert_eq!(table_name_for("Order"), "orders");
    assert_eq!(table_name_for("OrderItem"), "order_items");
    assert_eq!(table_name_for("Category"), "categories");
    assert_eq!(table_name_for("Box"), "boxes");
    assert_eq!(table_name_for("Person"), "people");
    assert_eq!(table_name_for("HTTPLog"), "http_logs");
    assert_eq!(table_name_for("Day"), "days");
  }

  #[test]
  fn derives_foreign_keys() {
    assert_eq!(default_foreign_key("customers"), "customer_id");
    assert_eq!(default_foreign_key("categories"), "category_id");
    assert_eq!(default_foreign_key("addresses"), "address_id");
    assert_eq!(default_foreign_key("people"), "person_id");
    assert_eq!(default_foreign_key("statuses"), "status_id");
  }
}
