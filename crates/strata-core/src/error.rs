//! Error types for `strata-core`.

use std::collections::BTreeMap;

use thiserror::Error;

/// Per-column validation messages, keyed by column name.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

/// Coarse classification shared by every crate's error type.
///
/// The HTTP layer maps a kind to a status code without knowing which backend
/// produced the error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  NotFound,
  NameConflict,
  SchemaConflict,
  InvalidSpec,
  UnsupportedType,
  InvalidQuery,
  Validation,
  Forbidden,
  Materialization,
  Storage,
}

impl ErrorKind {
  /// Machine-readable identifier used in API error bodies.
  pub fn as_str(self) -> &'static str {
    match self {
      ErrorKind::NotFound => "not_found",
      ErrorKind::NameConflict => "name_conflict",
      ErrorKind::SchemaConflict => "schema_conflict",
      ErrorKind::InvalidSpec => "invalid_spec",
      ErrorKind::UnsupportedType => "unsupported_type",
      ErrorKind::InvalidQuery => "invalid_query",
      ErrorKind::Validation => "validation_error",
      ErrorKind::Forbidden => "forbidden",
      ErrorKind::Materialization => "materialization_failure",
      ErrorKind::Storage => "storage_error",
    }
  }
}

/// Implemented by every error type a store backend can return.
pub trait DomainError: std::error::Error + Send + Sync + 'static {
  fn kind(&self) -> ErrorKind;

  /// Per-column messages, present only for validation failures.
  fn field_errors(&self) -> Option<&FieldErrors> { None }

  /// The table was altered between validation and execution; the request can
  /// be retried against a fresh schema.
  fn is_schema_changed(&self) -> bool { false }
}

#[derive(Debug, Error)]
pub enum Error {
  #[error("table not found: {0}")]
  TableNotFound(String),

  #[error("column {column:?} not found on {table}")]
  ColumnNotFound { table: String, column: String },

  #[error("record {id} not found in {table}")]
  RecordNotFound { table: String, id: i64 },

  #[error("relationship {relationship:?} not found on {table}")]
  RelationshipNotFound { table: String, relationship: String },

  #[error("name already in use: {0}")]
  NameConflict(String),

  #[error("column {column:?} already exists on {table}")]
  ColumnNameConflict { table: String, column: String },

  #[error("schema conflict: {0}")]
  SchemaConflict(String),

  #[error("invalid definition: {0}")]
  InvalidSpec(String),

  #[error("unsupported column type: {0:?}")]
  UnsupportedType(String),

  #[error("invalid foreign key: {0}")]
  InvalidForeignKey(String),

  #[error("invalid query: {0}")]
  InvalidQuery(String),

  #[error("the given data was invalid")]
  Validation(FieldErrors),

  #[error("forbidden: {0}")]
  Forbidden(String),

  #[error("access denied by {0} rule")]
  RuleDenied(&'static str),

  #[error("schema of {0} changed while the request was in flight")]
  SchemaChanged(String),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

impl Error {
  /// A validation failure with a single message for a single column.
  pub fn field(column: impl Into<String>, message: impl Into<String>) -> Self {
    let mut errors = FieldErrors::new();
    errors.insert(column.into(), vec![message.into()]);
    Error::Validation(errors)
  }
}

impl DomainError for Error {
  fn kind(&self) -> ErrorKind {
    match self {
      Error::TableNotFound(_)
      | Error::ColumnNotFound { .. }
      | Error::RecordNotFound { .. }
      | Error::RelationshipNotFound { .. } => ErrorKind::NotFound,
      Error::NameConflict(_) | Error::ColumnNameConflict { .. } => {
        ErrorKind::NameConflict
      }
      Error::SchemaConflict(_)
      | Error::InvalidForeignKey(_)
      | Error::SchemaChanged(_) => ErrorKind::SchemaConflict,
      Error::InvalidSpec(_) => ErrorKind::InvalidSpec,
      Error::UnsupportedType(_) => ErrorKind::UnsupportedType,
      Error::InvalidQuery(_) => ErrorKind::InvalidQuery,
      Error::Validation(_) => ErrorKind::Validation,
      Error::Forbidden(_) | Error::RuleDenied(_) => ErrorKind::Forbidden,
      Error::Serialization(_) => ErrorKind::Storage,
    }
  }

  fn field_errors(&self) -> Option<&FieldErrors> {
    match self {
      Error::Validation(errors) => Some(errors),
      _ => None,
    }
  }

  fn is_schema_changed(&self) -> bool { matches!(self, Error::SchemaChanged(_)) }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
