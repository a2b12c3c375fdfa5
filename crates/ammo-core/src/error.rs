//! Error types for `ammo-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("unknown disposal state code: {0:#06x}")]
  UnknownDisposalState(i64),

  #[error("unknown disposition code: {0:#04x}")]
  UnknownDisposition(i64),

  #[error("unknown channel state code: {0}")]
  UnknownChannelState(i64),

  #[error("unknown request type code: {0}")]
  UnknownRequestType(i64),

  #[error("unknown routing category: {0:?}")]
  UnknownCategory(String),

  #[error("unknown field type: {0:?}")]
  UnknownFieldType(String),

  #[error("invalid {field_type} value: {text:?}")]
  InvalidValue { field_type: String, text: String },

  #[error("invalid priority: {0:?}")]
  InvalidPriority(String),

  #[error("invalid policy: {0}")]
  InvalidPolicy(String),

  #[error("policy XML error: {0}")]
  Xml(#[from] quick_xml::Error),

  #[error("policy attribute error: {0}")]
  XmlAttr(#[from] quick_xml::events::attributes::AttrError),

  #[error("i/o error: {0}")]
  Io(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
