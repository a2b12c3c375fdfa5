//! SMALL/LARGE blob classification.
//!
//! A tuple row may hold a blob inline (SMALL) or only a placeholder whose
//! real content is stored as a separate blob cell (LARGE). The placeholder is
//! either empty or the field's own name, optionally zero-padded.

use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobKind {
  Small,
  Large,
}

impl BlobKind {
  /// Classify the in-row bytes of blob field `name`.
  pub fn infer(name: &str, blob: &[u8]) -> Self {
    let name = name.as_bytes();
    if blob.is_empty() {
      return Self::Large;
    }
    if blob.len() < name.len() {
      return Self::Small;
    }
    let (head, tail) = blob.split_at(name.len());
    if head == name && tail.iter().all(|b| *b == 0) {
      Self::Large
    } else {
      Self::Small
    }
  }

  /// Marker byte written after a blob in the verbose encoding.
  pub(crate) const fn marker(self) -> u8 {
    match self {
      Self::Small => 0xFF,
      Self::Large => 0x00,
    }
  }

  pub(crate) const fn from_marker(byte: u8) -> Self {
    if byte == 0xFF { Self::Small } else { Self::Large }
  }
}

/// Blob fields found while decoding, with their classification.
pub type BlobMap = BTreeMap<String, BlobKind>;
