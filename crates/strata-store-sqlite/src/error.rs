//! Error type for `strata-store-sqlite`.

use strata_core::{DomainError, ErrorKind, error::FieldErrors};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error(transparent)]
  Core(#[from] strata_core::Error),

  #[error("database error: {0}")]
  Database(tokio_rusqlite::Error),

  #[error("sqlite error: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  /// A physical schema change failed; the catalog was left untouched.
  #[error("failed to materialize {table}: {message}")]
  Materialization { table: String, message: String },

  #[error("corrupt catalog row: {0}")]
  Corrupt(String),
}

impl Error {
  pub(crate) fn materialization(table: &str, err: impl std::fmt::Display) -> Self {
    Error::Materialization {
      table:   table.to_string(),
      message: err.to_string(),
    }
  }
}

/// Domain errors raised inside a connection closure travel back boxed in
/// `tokio_rusqlite::Error::Other`; unwrap them here.
impl From<tokio_rusqlite::Error> for Error {
  fn from(err: tokio_rusqlite::Error) -> Self {
    match err {
      tokio_rusqlite::Error::Other(boxed) => match boxed.downcast::<Error>() {
        Ok(inner) => *inner,
        Err(other) => match other.downcast::<strata_core::Error>() {
          Ok(core) => Error::Core(*core),
          Err(other) => Error::Database(tokio_rusqlite::Error::Other(other)),
        },
      },
      tokio_rusqlite::Error::Rusqlite(e) => Error::Sqlite(e),
      other => Error::Database(other),
    }
  }
}

impl DomainError for Error {
  fn kind(&self) -> ErrorKind {
    match self {
      Error::Core(e) => e.kind(),
      Error::Materialization { .. } => ErrorKind::Materialization,
      Error::Database(_)
      | Error::Sqlite(_)
      | Error::Json(_)
      | Error::DateParse(_)
      | Error::Corrupt(_) => ErrorKind::Storage,
    }
  }

  fn field_errors(&self) -> Option<&FieldErrors> {
    match self {
      Error::Core(e) => e.field_errors(),
      _ => None,
    }
  }

  fn is_schema_changed(&self) -> bool {
    matches!(self, Error::Core(e) if e.is_schema_changed())
  }
}

/// Box a crate error for the trip out of a `Connection::call` closure.
pub(crate) fn lift<T>(result: Result<T>) -> tokio_rusqlite::Result<T> {
  result.map_err(|e| tokio_rusqlite::Error::Other(Box::new(e)))
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
