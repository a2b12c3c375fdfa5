//! Self-describing encoding: a JSON object followed by appended blobs.
//!
//! ```text
//! {"name":"value",...} 0x00 ( name 0x00 len:u32 bytes marker len[1..4] )*
//! ```
//!
//! Every non-blob value is a JSON string. The blob section is present only
//! when the tuple carries blob content. `marker` is `0xFF` for a SMALL blob
//! and `0x00` for a LARGE one; the three bytes after it repeat the low bytes
//! of the length and act as a check on the record.

use ammo_core::tuple::{FieldType, Schema, Tuple, Value};
use bytes::{Buf, BufMut, BytesMut};
use serde_json::{Map, Value as Json};

use crate::{
  Error, Result,
  blob::{BlobKind, BlobMap},
};

pub fn serialize(tuple: &Tuple, schema: &Schema) -> Result<Vec<u8>> {
  let mut object = Map::new();
  let mut blobs: Vec<(&str, &[u8], BlobKind)> = Vec::new();

  for field in &schema.fields {
    let name = field.name.as_str();
    let Some(value) = tuple.get(name) else { continue };

    if value.field_type() != field.field_type && *value != Value::Null {
      return Err(Error::TypeMismatch {
        field:    name.to_owned(),
        expected: field.field_type.to_string(),
        found:    value.field_type().to_string(),
      });
    }

    match value {
      Value::Blob(in_row) => match BlobKind::infer(name, in_row) {
        BlobKind::Small => blobs.push((name, in_row, BlobKind::Small)),
        BlobKind::Large => match tuple.blobs.get(name) {
          Some(content) => blobs.push((name, content, BlobKind::Large)),
          None => tracing::debug!(field = name, "large blob has no content, skipping"),
        },
      },
      Value::File(path) => {
        object.insert(name.to_owned(), Json::String(path.clone()));
        if let Some(content) = tuple.blobs.get(name) {
          blobs.push((name, content, BlobKind::Large));
        }
      }
      other => {
        if let Some(text) = other.to_text() {
          object.insert(name.to_owned(), Json::String(text));
        }
      }
    }
  }

  let json = serde_json::to_vec(&Json::Object(object))?;
  let blob_len: usize = blobs.iter().map(|(n, b, _)| n.len() + b.len() + 9).sum();
  let mut buf = BytesMut::with_capacity(json.len() + 1 + blob_len);
  buf.put_slice(&json);

  if !blobs.is_empty() {
    buf.put_u8(0);
    for (name, content, kind) in blobs {
      let len = u32::try_from(content.len()).map_err(|_| Error::TooLong {
        field: name.to_owned(),
        len:   content.len(),
        max:   u32::MAX as usize,
      })?;
      buf.put_slice(name.as_bytes());
      buf.put_u8(0);
      buf.put_u32(len);
      buf.put_slice(content);
      let len_bytes = len.to_be_bytes();
      buf.put_u8(kind.marker());
      buf.put_slice(&len_bytes[1..]);
    }
  }

  Ok(buf.to_vec())
}

// ─── Decode ──────────────────────────────────────────────────────────────────

pub fn deserialize(bytes: &[u8], schema: &Schema) -> Result<(Tuple, BlobMap)> {
  let split = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
  let (json_part, rest) = bytes.split_at(split);

  let object = match serde_json::from_slice::<Json>(json_part)? {
    Json::Object(map) => map,
    other => {
      return Err(Error::TypeMismatch {
        field:    String::new(),
        expected: "object".into(),
        found:    json_kind(&other).into(),
      });
    }
  };

  let mut tuple = Tuple::new();
  for field in &schema.fields {
    if field.field_type == FieldType::Null {
      tuple.values.insert(field.name.clone(), Value::Null);
      continue;
    }
    if field.field_type == FieldType::Blob {
      continue;
    }
    let text = match object.get(&field.name) {
      Some(Json::String(s)) => s.clone(),
      Some(Json::Null) | None => continue,
      Some(other) => other.to_string(),
    };
    tuple.values.insert(field.name.clone(), Value::from_text(field.field_type, &text)?);
  }

  let mut blob_map = BlobMap::new();
  let mut rest = rest.get(1..).unwrap_or_default();
  while !rest.is_empty() {
    match read_blob(&mut rest) {
      Some((name, content, kind)) => {
        let declared = schema.fields.iter().find(|f| f.name == name).map(|f| f.field_type);
        match (kind, declared) {
          (BlobKind::Small, _) => {
            tuple.values.insert(name.clone(), Value::Blob(content));
          }
          (BlobKind::Large, Some(FieldType::File)) => {
            tuple.blobs.insert(name.clone(), content);
          }
          (BlobKind::Large, _) => {
            tuple.values.insert(name.clone(), Value::Blob(name.as_bytes().to_vec()));
            tuple.blobs.insert(name.clone(), content);
          }
        }
        blob_map.insert(name, kind);
      }
      None => {
        tracing::warn!(remaining = rest.len(), "malformed blob record, ignoring the rest");
        break;
      }
    }
  }

  Ok((tuple, blob_map))
}

/// Read one blob record, or `None` if it is truncated or fails its check.
fn read_blob(buf: &mut &[u8]) -> Option<(String, Vec<u8>, BlobKind)> {
  let name_end = buf.iter().position(|b| *b == 0)?;
  let name = String::from_utf8_lossy(&buf[..name_end]).into_owned();
  buf.advance(name_end + 1);

  if buf.remaining() < 4 {
    return None;
  }
  let len = buf.get_u32();
  let size = len as usize;
  if buf.remaining() < size + 4 {
    return None;
  }
  let content = buf[..size].to_vec();
  buf.advance(size);

  let kind = BlobKind::from_marker(buf.get_u8());
  let mut check = [0u8; 3];
  buf.copy_to_slice(&mut check);
  if check != len.to_be_bytes()[1..] {
    return None;
  }
  Some((name, content, kind))
}

fn json_kind(v: &Json) -> &'static str {
  match v {
    Json::Null => "null",
    Json::Bool(_) => "bool",
    Json::Number(_) => "number",
    Json::String(_) => "string",
    Json::Array(_) => "array",
    Json::Object(_) => "object",
  }
}
