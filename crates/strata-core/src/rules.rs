//! Row-level access rules attached to a table.
//!
//! A rule is a small boolean expression over the caller's auth id and the
//! row being accessed:
//!
//! ```text
//! rule  := conj ( "||" conj )*
//! conj  := term ( "&&" term )*
//! term  := "true" | "false"
//!        | "auth.id" ("==" | "!=") ( "null" | <column> )
//! ```
//!
//! An unset rule imposes no restriction. `&&` binds tighter than `||`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Error, Result, naming};

/// The operation a rule guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
  List,
  View,
  Create,
  Update,
  Delete,
}

impl RuleKind {
  pub fn as_str(self) -> &'static str {
    match self {
      RuleKind::List => "list",
      RuleKind::View => "view",
      RuleKind::Create => "create",
      RuleKind::Update => "update",
      RuleKind::Delete => "delete",
    }
  }
}

/// Optional rule expressions, one per operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowRules {
  #[serde(default, alias = "list_rule")]
  pub list:   Option<String>,
  #[serde(default, alias = "view_rule")]
  pub view:   Option<String>,
  #[serde(default, alias = "create_rule")]
  pub create: Option<String>,
  #[serde(default, alias = "update_rule")]
  pub update: Option<String>,
  #[serde(default, alias = "delete_rule")]
  pub delete: Option<String>,
}

impl RowRules {
  pub fn get(&self, kind: RuleKind) -> Option<&str> {
    let rule = match kind {
      RuleKind::List => &self.list,
      RuleKind::View => &self.view,
      RuleKind::Create => &self.create,
      RuleKind::Update => &self.update,
      RuleKind::Delete => &self.delete,
    };
    rule.as_deref().map(str::trim).filter(|r| !r.is_empty())
  }

  /// Check that every set rule parses.
  pub fn validate(&self) -> Result<()> {
    for kind in [
      RuleKind::List,
      RuleKind::View,
      RuleKind::Create,
      RuleKind::Update,
      RuleKind::Delete,
    ] {
      if let Some(expr) = self.get(kind) {
        Rule::parse(expr)?;
      }
    }
    Ok(())
  }

  /// Evaluate the rule for `kind`. `row` is the stored row for view, update
  /// and delete, and the validated payload for create.
  pub fn check(
    &self,
    kind: RuleKind,
    auth_id: Option<&str>,
    row: Option<&Map<String, Value>>,
  ) -> Result<()> {
    let Some(expr) = self.get(kind) else {
      return Ok(());
    };
    // Stored rules were validated on write; an unparsable one denies.
    let allowed = Rule::parse(expr)
      .map(|rule| rule.evaluate(auth_id, row))
      .unwrap_or(false);
    if allowed { Ok(()) } else { Err(Error::RuleDenied(kind.as_str())) }
  }

  /// Column the list rule restricts to the caller's own rows, if the rule is
  /// a plain `auth.id == <column>`.
  pub fn ownership_column(&self) -> Option<String> {
    let rule = Rule::parse(self.get(RuleKind::List)?).ok()?;
    match rule.0.as_slice() {
      [conj] => match conj.as_slice() {
        [Term::AuthEq(column)] => Some(column.clone()),
        _ => None,
      },
      _ => None,
    }
  }
}

// ─── Expression ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
enum Term {
  True,
  False,
  AuthPresent,
  AuthAbsent,
  AuthEq(String),
  AuthNe(String),
}

/// Disjunction of conjunctions.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Rule(Vec<Vec<Term>>);

impl Rule {
  fn parse(expr: &str) -> Result<Self> {
    let disjuncts = expr
      .split("||")
      .map(|conj| conj.split("&&").map(Term::parse).collect::<Result<Vec<_>>>())
      .collect::<Result<Vec<_>>>()?;
    Ok(Rule(disjuncts))
  }

  fn evaluate(&self, auth_id: Option<&str>, row: Option<&Map<String, Value>>) -> bool {
    self
      .0
      .iter()
      .any(|conj| conj.iter().all(|term| term.evaluate(auth_id, row)))
  }
}

impl Term {
  fn parse(raw: &str) -> Result<Self> {
    let text = raw.trim().to_ascii_lowercase();
    match text.as_str() {
      "true" => return Ok(Term::True),
      "false" => return Ok(Term::False),
      _ => {}
    }

    let invalid = || Error::InvalidSpec(format!("invalid rule term {:?}", raw.trim()));
    let rest = text.strip_prefix("auth.id").ok_or_else(invalid)?.trim_start();
    let (negated, operand) = if let Some(r) = rest.strip_prefix("!==") {
      (true, r)
    } else if let Some(r) = rest.strip_prefix("!=") {
      (true, r)
    } else if let Some(r) = rest.strip_prefix("===") {
      (false, r)
    } else if let Some(r) = rest.strip_prefix("==") {
      (false, r)
    } else {
      return Err(invalid());
    };

    let operand = operand.trim();
    if operand == "null" {
      return Ok(if negated { Term::AuthPresent } else { Term::AuthAbsent });
    }
    if !naming::is_identifier(operand) {
      return Err(invalid());
    }
    let column = operand.to_string();
    Ok(if negated { Term::AuthNe(column) } else { Term::AuthEq(column) })
  }

  fn evaluate(&self, auth_id: Option<&str>, row: Option<&Map<String, Value>>) -> bool {
    match self {
      Term::True => true,
      Term::False => false,
      Term::AuthPresent => auth_id.is_some(),
      Term::AuthAbsent => auth_id.is_none(),
      Term::AuthEq(column) => match (auth_id, field_text(row, column)) {
        (Some(id), Some(value)) => id == value,
        _ => false,
      },
      Term::AuthNe(column) => match (auth_id, field_text(row, column)) {
        (Some(id), Some(value)) => id != value,
        (Some(_), None) => true,
        (None, _) => false,
      },
    }
  }
}

fn field_text(row: Option<&Map<String, Value>>, column: &str) -> Option<String> {
  match row?.get(column)? {
    Value::String(s) => Some(s.clone()),
    Value::Number(n) => Some(n.to_string()),
    Value::Bool(b) => Some(b.to_string()),
    _ => None,
  }
}
