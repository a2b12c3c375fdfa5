//! Tuples exchanged with the external tuple store, and their schemas.
//!
//! A [`Tuple`] holds named [`Value`]s. Blob fields whose content lives
//! outside the row (see `BlobKind::Large` in `ammo-codec`) keep a placeholder
//! in `values` and their real bytes in `blobs`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

use crate::{Error, Result};

// ─── FieldType ───────────────────────────────────────────────────────────────

/// Declared type of a schema field, as named in contract descriptions.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  AsRefStr,
  EnumIter,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldType {
  Null,
  Bool,
  Blob,
  Float,
  Integer,
  Long,
  Text,
  Real,
  Fk,
  Guid,
  Exclusive,
  Inclusive,
  Timestamp,
  Short,
  File,
}

impl FieldType {
  pub const fn code(self) -> i32 {
    match self {
      Self::Null => 0,
      Self::Bool => 1,
      Self::Blob => 2,
      Self::Float => 3,
      Self::Integer => 4,
      Self::Long => 5,
      Self::Text => 6,
      Self::Real => 7,
      Self::Fk => 8,
      Self::Guid => 9,
      Self::Exclusive => 10,
      Self::Inclusive => 11,
      Self::Timestamp => 12,
      Self::Short => 13,
      Self::File => 14,
    }
  }

  /// Parse a contract type name, e.g. `"TEXT"` or `"timestamp"`.
  pub fn parse(name: &str) -> Result<Self> {
    name.trim().parse().map_err(|_| Error::UnknownFieldType(name.to_owned()))
  }
}

// ─── Value ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
  Null,
  Bool(bool),
  Blob(Vec<u8>),
  Float(f64),
  Integer(i32),
  Long(i64),
  Text(String),
  Real(f64),
  ForeignKey(i64),
  Guid(String),
  Exclusive(i32),
  Inclusive(i32),
  /// Milliseconds since the Unix epoch.
  Timestamp(i64),
  Short(i16),
  /// Path of a file whose content travels as a blob.
  File(String),
}

impl Value {
  pub fn field_type(&self) -> FieldType {
    match self {
      Self::Null => FieldType::Null,
      Self::Bool(_) => FieldType::Bool,
      Self::Blob(_) => FieldType::Blob,
      Self::Float(_) => FieldType::Float,
      Self::Integer(_) => FieldType::Integer,
      Self::Long(_) => FieldType::Long,
      Self::Text(_) => FieldType::Text,
      Self::Real(_) => FieldType::Real,
      Self::ForeignKey(_) => FieldType::Fk,
      Self::Guid(_) => FieldType::Guid,
      Self::Exclusive(_) => FieldType::Exclusive,
      Self::Inclusive(_) => FieldType::Inclusive,
      Self::Timestamp(_) => FieldType::Timestamp,
      Self::Short(_) => FieldType::Short,
      Self::File(_) => FieldType::File,
    }
  }

  /// Text form used by self-describing encodings. Blobs and nulls have none.
  pub fn to_text(&self) -> Option<String> {
    Some(match self {
      Self::Null | Self::Blob(_) => return None,
      Self::Bool(v) => v.to_string(),
      Self::Float(v) | Self::Real(v) => v.to_string(),
      Self::Integer(v) | Self::Exclusive(v) | Self::Inclusive(v) => v.to_string(),
      Self::Long(v) | Self::ForeignKey(v) | Self::Timestamp(v) => v.to_string(),
      Self::Short(v) => v.to_string(),
      Self::Text(v) | Self::Guid(v) | Self::File(v) => v.clone(),
    })
  }

  /// Inverse of [`Value::to_text`] for a declared field type.
  pub fn from_text(field_type: FieldType, text: &str) -> Result<Self> {
    let bad = || Error::InvalidValue {
      field_type: field_type.to_string(),
      text:       text.to_owned(),
    };
    Ok(match field_type {
      FieldType::Null => Self::Null,
      FieldType::Bool => Self::Bool(match text {
        "true" | "1" => true,
        "false" | "0" => false,
        _ => return Err(bad()),
      }),
      FieldType::Blob => Self::Blob(text.as_bytes().to_vec()),
      FieldType::Float => Self::Float(text.parse().map_err(|_| bad())?),
      FieldType::Real => Self::Real(text.parse().map_err(|_| bad())?),
      FieldType::Integer => Self::Integer(text.parse().map_err(|_| bad())?),
      FieldType::Exclusive => Self::Exclusive(text.parse().map_err(|_| bad())?),
      FieldType::Inclusive => Self::Inclusive(text.parse().map_err(|_| bad())?),
      FieldType::Long => Self::Long(text.parse().map_err(|_| bad())?),
      FieldType::Fk => Self::ForeignKey(text.parse().map_err(|_| bad())?),
      FieldType::Timestamp => Self::Timestamp(text.parse().map_err(|_| bad())?),
      FieldType::Short => Self::Short(text.parse().map_err(|_| bad())?),
      FieldType::Text => Self::Text(text.to_owned()),
      FieldType::Guid => Self::Guid(text.to_owned()),
      FieldType::File => Self::File(text.to_owned()),
    })
  }
}

// ─── Tuple ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tuple {
  pub values: BTreeMap<String, Value>,
  /// Out-of-row blob content, keyed by field name.
  pub blobs:  BTreeMap<String, Vec<u8>>,
}

impl Tuple {
  pub fn new() -> Self { Self::default() }

  pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
    self.values.insert(name.into(), value);
    self
  }

  /// Attach out-of-row content for `name` and leave its placeholder in the row.
  pub fn with_large_blob(mut self, name: impl Into<String>, content: Vec<u8>) -> Self {
    let name = name.into();
    self.values.insert(name.clone(), Value::Blob(name.as_bytes().to_vec()));
    self.blobs.insert(name, content);
    self
  }

  pub fn get(&self, name: &str) -> Option<&Value> { self.values.get(name) }
}

// ─── Schema ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
  pub name:       String,
  pub field_type: FieldType,
}

/// Ordered field list for one topic; order is the terse wire order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
  pub fields: Vec<Field>,
}

impl Schema {
  pub fn new<I, S>(fields: I) -> Self
  where
    I: IntoIterator<Item = (S, FieldType)>,
    S: Into<String>,
  {
    Self {
      fields: fields
        .into_iter()
        .map(|(name, field_type)| Field { name: name.into(), field_type })
        .collect(),
    }
  }

  pub fn names(&self) -> impl Iterator<Item = &str> { self.fields.iter().map(|f| f.name.as_str()) }

  pub fn types(&self) -> impl Iterator<Item = FieldType> + '_ {
    self.fields.iter().map(|f| f.field_type)
  }
}
