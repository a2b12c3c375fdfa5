//! Error types for the ammo-codec crate.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] ammo_core::Error),

  #[error("JSON error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("field {field:?} declared {expected} but holds {found}")]
  TypeMismatch {
    field:    String,
    expected: String,
    found:    String,
  },

  #[error("field {field:?} is {len} bytes, over the {max}-byte limit")]
  TooLong { field: String, len: usize, max: usize },


  #[error("no adaptor registered for custom encoding {0:?}")]
  UnknownAdaptor(String),

  #[error("custom adaptor {name:?} failed: {reason}")]
  Adaptor { name: String, reason: String },

  #[error("payload truncated: wanted {wanted} bytes at offset {offset}")]
  Truncated { offset: usize, wanted: usize },

  #[error("malformed varint at offset {0}")]
  Varint(usize),

  #[error("unsupported wire type {wire_type} for field {field}")]
  WireType { field: u32, wire_type: u8 },

  #[error("unknown message type {0}")]
  UnknownMessageType(u64),

  #[error("envelope has no {0} body")]
  MissingBody(&'static str),

  #[error("invalid UTF-8 in field {0}")]
  Utf8(u32),

  #[error("bad frame magic {0}")]
  BadMagic(String),

  #[error("header checksum mismatch")]
  HeaderChecksum,

  #[error("payload checksum mismatch: expected {expected}, computed {computed}")]
  PayloadChecksum { expected: String, computed: String },
}

impl Error {
  /// Errors that mean the bytes were damaged in transit.
  pub fn is_checksum(&self) -> bool {
    matches!(self, Self::HeaderChecksum | Self::PayloadChecksum { .. })
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
