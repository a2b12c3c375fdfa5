//! Checksummed frame around each envelope on the gateway link.
//!
//! ```text
//! ED BE EF | FE | size:u32 | priority:u8 | 000000 | payload sum:4 | header sum:4
//! ```
//!
//! Checksums are the first four bytes of the SHA-256 digest. The header sum
//! covers the sixteen bytes before it.

use bytes::{BufMut, Bytes, BytesMut};
use sha2::{Digest, Sha256};

use crate::{Error, Result};

pub const MAGIC: [u8; 3] = [0xED, 0xBE, 0xEF];
pub const VERSION: u8 = 0xFE;
pub const HEADER_LEN: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
  pub size:             u32,
  pub priority:         u8,
  pub payload_checksum: [u8; 4],
}

pub fn checksum(data: &[u8]) -> [u8; 4] {
  let digest = Sha256::digest(data);
  [digest[0], digest[1], digest[2], digest[3]]
}

/// Frame `payload`, copying it once into a buffer sized for header and body.
pub fn encode_frame(priority: u8, payload: &[u8]) -> Result<Bytes> {
  let size = u32::try_from(payload.len()).map_err(|_| Error::TooLong {
    field: "frame".into(),
    len:   payload.len(),
    max:   u32::MAX as usize,
  })?;

  let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
  buf.put_slice(&MAGIC);
  buf.put_u8(VERSION);
  buf.put_u32(size);
  buf.put_u8(priority);
  buf.put_bytes(0, 3);
  buf.put_slice(&checksum(payload));
  let header_sum = checksum(&buf[..HEADER_LEN - 4]);
  buf.put_slice(&header_sum);
  buf.put_slice(payload);
  Ok(buf.freeze())
}

/// Parse and verify a frame header.
pub fn decode_header(buf: &[u8]) -> Result<FrameHeader> {
  let header = buf
    .get(..HEADER_LEN)
    .ok_or(Error::Truncated { offset: 0, wanted: HEADER_LEN })?;

  if header[..3] != MAGIC || header[3] != VERSION {
    return Err(Error::BadMagic(hex::encode(&header[..4])));
  }
  if checksum(&header[..16]) != header[16..20] {
    return Err(Error::HeaderChecksum);
  }

  Ok(FrameHeader {
    size:             u32::from_be_bytes([header[4], header[5], header[6], header[7]]),
    priority:         header[8],
    payload_checksum: [header[12], header[13], header[14], header[15]],
  })
}

/// Verify a whole frame and return its header and payload. The payload
/// is a slice of `buf`.
pub fn decode_frame(buf: Bytes) -> Result<(FrameHeader, Bytes)> {
  let header = decode_header(&buf)?;
  let end = HEADER_LEN + header.size as usize;
  if buf.len() < end {
    return Err(Error::Truncated { offset: HEADER_LEN, wanted: header.size as usize });
  }

  let payload = buf.slice(HEADER_LEN..end);
  let computed = checksum(&payload);
  if computed != header.payload_checksum {
    return Err(Error::PayloadChecksum {
      expected: hex::encode(header.payload_checksum),
      computed: hex::encode(computed),
    });
  }
  Ok((header, payload))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn header_layout() {
    let frame = encode_frame(7, b"hello").unwrap();
    assert_eq!(frame.len(), HEADER_LEN + 5);
    assert_eq!(&frame[..4], &[0xED, 0xBE, 0xEF, 0xFE]);
    assert_eq!(&frame[4..8], &5u32.to_be_bytes());
    assert_eq!(frame[8], 7);
    assert_eq!(&frame[9..12], &[0, 0, 0]);
    assert_eq!(&frame[HEADER_LEN..], b"hello");
  }

  #[test]
  fn verified_payload_is_sliced() {
    let frame = encode_frame(1, b"payload").unwrap();
    let (header, payload) = decode_frame(frame.clone()).unwrap();
    assert_eq!(header.priority, 1);
    assert_eq!(payload.as_ref(), b"payload");
    assert_eq!(payload.as_ptr(), frame[HEADER_LEN..].as_ptr());
  }

  #[test]
  fn damaged_payload_fails_checksum() {
    let mut frame = encode_frame(1, b"payload").unwrap().to_vec();
    frame[HEADER_LEN] ^= 1;
    let err = decode_frame(Bytes::from(frame)).unwrap_err();
    assert!(err.is_checksum());
  }

  #[test]
  fn damaged_header_fails_checksum() {
    let mut frame = encode_frame(1, b"payload").unwrap().to_vec();
    frame[8] = 2;
    let err = decode_frame(Bytes::from(frame)).unwrap_err();
    assert!(matches!(err, Error::HeaderChecksum));
  }

  #[test]
  fn bad_magic_is_not_a_checksum_error() {
    let err = decode_header(&[0u8; HEADER_LEN]).unwrap_err();
    assert!(matches!(err, Error::BadMagic(_)));
    assert!(!err.is_checksum());
  }

  #[test]
  fn short_input_is_truncated() {
    assert!(matches!(decode_header(&[0xED, 0xBE]), Err(Error::Truncated { .. })));
  }
}
