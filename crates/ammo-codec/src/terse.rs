//! Compact positional binary encoding.
//!
//! Fields are written in schema order with no names on the wire, all
//! integers big-endian:
//!
//! | type                           | layout                               |
//! |--------------------------------|--------------------------------------|
//! | NULL                           | nothing                              |
//! | BOOL                           | 1 byte                               |
//! | INTEGER, EXCLUSIVE, INCLUSIVE  | i32                                  |
//! | LONG, FK                       | i64                                  |
//! | FLOAT, REAL                    | f64                                  |
//! | SHORT                          | i16                                  |
//! | TIMESTAMP                      | i32 seconds                          |
//! | TEXT, GUID, FILE               | u16 length + UTF-8                   |
//! | BLOB                           | u16 length (high bit: LARGE) + bytes |
//!
//! A zero length means the field is absent.

use ammo_core::tuple::{FieldType, Schema, Tuple, Value};
use bytes::{Buf, BufMut, BytesMut};

use crate::{
  Error, Result,
  blob::{BlobKind, BlobMap},
};

const MAX_TEXT: usize = i16::MAX as usize;
const LARGE_FLAG: u16 = 0x8000;

pub fn serialize(tuple: &Tuple, schema: &Schema) -> Result<Vec<u8>> {
  let mut buf = BytesMut::with_capacity(64);

  for field in &schema.fields {
    let name = field.name.as_str();
    let value = tuple.get(name);

    match (field.field_type, value) {
      (FieldType::Null, _) => {}
      (FieldType::Bool, Some(Value::Bool(v))) => buf.put_u8(u8::from(*v)),
      (FieldType::Bool, None) => buf.put_u8(0),
      (FieldType::Integer, Some(Value::Integer(v)))
      | (FieldType::Exclusive, Some(Value::Exclusive(v)))
      | (FieldType::Inclusive, Some(Value::Inclusive(v))) => buf.put_i32(*v),
      (FieldType::Integer | FieldType::Exclusive | FieldType::Inclusive, None) => buf.put_i32(0),
      (FieldType::Long, Some(Value::Long(v))) | (FieldType::Fk, Some(Value::ForeignKey(v))) => {
        buf.put_i64(*v)
      }
      (FieldType::Long | FieldType::Fk, None) => buf.put_i64(0),
      (FieldType::Float, Some(Value::Float(v))) | (FieldType::Real, Some(Value::Real(v))) => {
        buf.put_f64(*v)
      }
      (FieldType::Float | FieldType::Real, None) => buf.put_f64(0.0),
      (FieldType::Short, Some(Value::Short(v))) => buf.put_i16(*v),
      (FieldType::Short, None) => buf.put_i16(0),
      (FieldType::Timestamp, Some(Value::Timestamp(ms))) => {
        buf.put_i32(i32::try_from(ms / 1000).unwrap_or(i32::MAX))
      }
      (FieldType::Timestamp, None) => buf.put_i32(0),
      (FieldType::Text, Some(Value::Text(s)))
      | (FieldType::Guid, Some(Value::Guid(s)))
      | (FieldType::File, Some(Value::File(s))) => put_text(&mut buf, name, s)?,
      (FieldType::Text | FieldType::Guid | FieldType::File, None) => buf.put_u16(0),
      (FieldType::Blob, Some(Value::Blob(b))) => put_blob(&mut buf, tuple, name, b)?,
      (FieldType::Blob, None) => buf.put_u16(0),
      (expected, Some(found)) => {
        return Err(Error::TypeMismatch {
          field:    name.to_owned(),
          expected: expected.to_string(),
          found:    found.field_type().to_string(),
        });
      }
    }
  }

  Ok(buf.to_vec())
}

fn put_text(buf: &mut BytesMut, name: &str, s: &str) -> Result<()> {
  if s.len() > MAX_TEXT {
    return Err(Error::TooLong { field: name.to_owned(), len: s.len(), max: MAX_TEXT });
  }
  buf.put_u16(s.len() as u16);
  buf.put_slice(s.as_bytes());
  Ok(())
}

fn put_blob(buf: &mut BytesMut, tuple: &Tuple, name: &str, in_row: &[u8]) -> Result<()> {
  let (flag, content) = match BlobKind::infer(name, in_row) {
    BlobKind::Small => (0, in_row),
    BlobKind::Large => match tuple.blobs.get(name) {
      Some(content) => (LARGE_FLAG, content.as_slice()),
      None => {
        tracing::debug!(field = name, "large blob has no content, sending as absent");
        buf.put_u16(0);
        return Ok(());
      }
    },
  };
  if content.len() > MAX_TEXT {
    return Err(Error::TooLong { field: name.to_owned(), len: content.len(), max: MAX_TEXT });
  }
  buf.put_u16(flag | content.len() as u16);
  buf.put_slice(content);
  Ok(())
}

// ─── Decode ──────────────────────────────────────────────────────────────────

pub fn deserialize(bytes: &[u8], schema: &Schema) -> Result<(Tuple, BlobMap)> {
  let mut reader = Reader { buf: bytes, offset: 0 };
  let mut tuple = Tuple::new();
  let mut blobs = BlobMap::new();

  for field in &schema.fields {
    let name = field.name.clone();
    let value = match field.field_type {
      FieldType::Null => Value::Null,
      FieldType::Bool => Value::Bool(reader.take(1)?.get_u8() != 0),
      FieldType::Integer => Value::Integer(reader.take(4)?.get_i32()),
      FieldType::Exclusive => Value::Exclusive(reader.take(4)?.get_i32()),
      FieldType::Inclusive => Value::Inclusive(reader.take(4)?.get_i32()),
      FieldType::Long => Value::Long(reader.take(8)?.get_i64()),
      FieldType::Fk => Value::ForeignKey(reader.take(8)?.get_i64()),
      FieldType::Float => Value::Float(reader.take(8)?.get_f64()),
      FieldType::Real => Value::Real(reader.take(8)?.get_f64()),
      FieldType::Short => Value::Short(reader.take(2)?.get_i16()),
      FieldType::Timestamp => Value::Timestamp(i64::from(reader.take(4)?.get_i32()) * 1000),
      FieldType::Text | FieldType::Guid | FieldType::File => {
        let len = usize::from(reader.take(2)?.get_u16());
        if len == 0 {
          continue;
        }
        let text = String::from_utf8_lossy(reader.take(len)?).into_owned();
        match field.field_type {
          FieldType::Text => Value::Text(text),
          FieldType::Guid => Value::Guid(text),
          _ => Value::File(text),
        }
      }
      FieldType::Blob => {
        let word = reader.take(2)?.get_u16();
        let len = usize::from(word & !LARGE_FLAG);
        if len == 0 {
          continue;
        }
        let content = reader.take(len)?.to_vec();
        if word & LARGE_FLAG != 0 {
          blobs.insert(name.clone(), BlobKind::Large);
          tuple.blobs.insert(name.clone(), content);
          Value::Blob(name.as_bytes().to_vec())
        } else {
          blobs.insert(name.clone(), BlobKind::Small);
          Value::Blob(content)
        }
      }
    };
    tuple.values.insert(name, value);
  }

  if reader.offset < bytes.len() {
    tracing::trace!(extra = bytes.len() - reader.offset, "ignoring trailing terse bytes");
  }
  Ok((tuple, blobs))
}

struct Reader<'a> {
  buf:    &'a [u8],
  offset: usize,
}

impl<'a> Reader<'a> {
  fn take(&mut self, n: usize) -> Result<&'a [u8]> {
    let end = self.offset + n;
    let slice = self
      .buf
      .get(self.offset..end)
      .ok_or(Error::Truncated { offset: self.offset, wanted: n })?;
    self.offset = end;
    Ok(slice)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn schema() -> Schema {
    Schema::new([
      ("id", FieldType::Long),
      ("label", FieldType::Text),
      ("flag", FieldType::Bool),
      ("when", FieldType::Timestamp),
    ])
  }

  #[test]
  fn layout_is_positional_big_endian() {
    let tuple = Tuple::new()
      .with("id", Value::Long(258))
      .with("label", Value::Text("ab".into()))
      .with("flag", Value::Bool(true))
      .with("when", Value::Timestamp(5_999));

    let bytes = serialize(&tuple, &schema()).unwrap();
    assert_eq!(bytes, vec![0, 0, 0, 0, 0, 0, 1, 2, 0, 2, b'a', b'b', 1, 0, 0, 0, 5]);
  }

  #[test]
  fn absent_text_decodes_as_absent() {
    let tuple = Tuple::new().with("id", Value::Long(1));
    let bytes = serialize(&tuple, &schema()).unwrap();
    let (back, _) = deserialize(&bytes, &schema()).unwrap();
    assert!(back.get("label").is_none());
    assert_eq!(back.get("flag"), Some(&Value::Bool(false)));
  }

  #[test]
  fn type_mismatch_is_rejected() {
    let tuple = Tuple::new().with("id", Value::Text("nope".into()));
    assert!(matches!(serialize(&tuple, &schema()), Err(Error::TypeMismatch { .. })));
  }

  #[test]
  fn truncated_input_is_an_error() {
    let err = deserialize(&[0, 0, 0], &schema()).unwrap_err();
    assert!(matches!(err, Error::Truncated { offset: 0, wanted: 8 }));
  }
}
