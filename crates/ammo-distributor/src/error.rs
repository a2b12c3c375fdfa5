//! Error types for the distributor.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("ledger error: {0}")]
  Store(#[from] ammo_store_sqlite::Error),

  #[error("codec error: {0}")]
  Codec(#[from] ammo_codec::Error),

  #[error("core error: {0}")]
  Core(#[from] ammo_core::Error),

  #[error("{0} queue is full")]
  QueueFull(&'static str),

  #[error("distributor is shutting down")]
  ShuttingDown,

  #[error("tuple {0:?} no longer exists")]
  TupleNotFound(String),

  #[error("no schema for topic {0:?}")]
  UnknownTopic(String),

  #[error("tuple store error: {0}")]
  TupleStore(String),

  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
