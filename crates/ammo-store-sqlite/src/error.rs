//! Error type for `ammo-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] ammo_core::Error),

  #[error("database error: {0}")]
  Database(#[from] rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("i/o error: {0}")]
  Io(#[from] std::io::Error),

  #[error("timestamp out of range: {0}")]
  Timestamp(i64),

  /// A request row referenced by id does not exist.
  #[error("{table} request not found: {id}")]
  RequestNotFound { table: &'static str, id: i64 },
}

impl Error {
  /// Whether the ledger file itself is unusable and should be archived.
  pub fn is_corruption(&self) -> bool {
    use rusqlite::ErrorCode;
    matches!(
      self,
      Self::Database(rusqlite::Error::SqliteFailure(e, _))
        if matches!(
          e.code,
          ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase | ErrorCode::SystemIoFailure
        )
    )
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
