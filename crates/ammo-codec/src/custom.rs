//! Pluggable encodings and the [`Codec`] facade that dispatches on
//! [`Encoding`].

use std::{collections::HashMap, fmt, sync::Arc};

use ammo_core::{
  policy::Encoding,
  tuple::{Schema, Tuple},
};

use crate::{Error, Result, blob::BlobMap, terse, verbose};

/// An encoding supplied by the embedding application.
pub trait CustomAdaptor: Send + Sync {
  fn serialize(&self, tuple: &Tuple, schema: &Schema) -> Result<Vec<u8>>;
  fn deserialize(&self, bytes: &[u8], schema: &Schema) -> Result<(Tuple, BlobMap)>;
}

/// Named custom adaptors.
#[derive(Clone, Default)]
pub struct AdaptorRegistry {
  adaptors: HashMap<String, Arc<dyn CustomAdaptor>>,
}

impl AdaptorRegistry {
  pub fn new() -> Self { Self::default() }

  /// Register `adaptor` under `name`, replacing any previous one.
  pub fn register(&mut self, name: impl Into<String>, adaptor: Arc<dyn CustomAdaptor>) {
    self.adaptors.insert(name.into(), adaptor);
  }

  pub fn get(&self, name: &str) -> Result<&Arc<dyn CustomAdaptor>> {
    self.adaptors.get(name).ok_or_else(|| Error::UnknownAdaptor(name.to_owned()))
  }

  pub fn contains(&self, name: &str) -> bool { self.adaptors.contains_key(name) }
}

impl fmt::Debug for AdaptorRegistry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_set().entries(self.adaptors.keys()).finish()
  }
}

/// Serializes tuples with whichever encoding a routing literal names.
#[derive(Debug, Clone, Default)]
pub struct Codec {
  registry: AdaptorRegistry,
}

impl Codec {
  pub fn new(registry: AdaptorRegistry) -> Self { Self { registry } }

  pub fn registry(&self) -> &AdaptorRegistry { &self.registry }

  pub fn serialize(&self, tuple: &Tuple, encoding: &Encoding, schema: &Schema) -> Result<Vec<u8>> {
    match encoding {
      Encoding::Terse => terse::serialize(tuple, schema),
      Encoding::Json => verbose::serialize(tuple, schema),
      Encoding::Custom(name) => self.registry.get(name)?.serialize(tuple, schema),
    }
  }

  pub fn deserialize(
    &self,
    bytes: &[u8],
    encoding: &Encoding,
    schema: &Schema,
  ) -> Result<(Tuple, BlobMap)> {
    match encoding {
      Encoding::Terse => terse::deserialize(bytes, schema),
      Encoding::Json => verbose::deserialize(bytes, schema),
      Encoding::Custom(name) => self.registry.get(name)?.deserialize(bytes, schema),
    }
  }
}

#[cfg(test)]
mod tests {
  use ammo_core::tuple::{FieldType, Value};

  use super::*;

  /// Writes the text field reversed, to prove the adaptor was used.
  struct Reverse;

  impl CustomAdaptor for Reverse {
    fn serialize(&self, tuple: &Tuple, _: &Schema) -> Result<Vec<u8>> {
      match tuple.get("word") {
        Some(Value::Text(s)) => Ok(s.bytes().rev().collect()),
        _ => Err(Error::Adaptor { name: "reverse".into(), reason: "no word".into() }),
      }
    }

    fn deserialize(&self, bytes: &[u8], _: &Schema) -> Result<(Tuple, BlobMap)> {
      let word: String = bytes.iter().rev().map(|b| *b as char).collect();
      Ok((Tuple::new().with("word", Value::Text(word)), BlobMap::new()))
    }
  }

  #[test]
  fn custom_encoding_dispatches_by_name() {
    let mut registry = AdaptorRegistry::new();
    registry.register("reverse", Arc::new(Reverse));
    let codec = Codec::new(registry);

    let schema = Schema::new([("word", FieldType::Text)]);
    let tuple = Tuple::new().with("word", Value::Text("abc".into()));
    let encoding: Encoding = "reverse".parse().unwrap();

    let bytes = codec.serialize(&tuple, &encoding, &schema).unwrap();
    assert_eq!(bytes, b"cba");
    let (back, _) = codec.deserialize(&bytes, &encoding, &schema).unwrap();
    assert_eq!(back, tuple);
  }

  #[test]
  fn unknown_adaptor_is_an_error() {
    let codec = Codec::default();
    let schema = Schema::default();
    let err = codec
      .serialize(&Tuple::new(), &Encoding::Custom("nope".into()), &schema)
      .unwrap_err();
    assert!(matches!(err, Error::UnknownAdaptor(name) if name == "nope"));
  }
}
