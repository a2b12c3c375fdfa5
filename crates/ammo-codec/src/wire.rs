//! Gateway message envelope.
//!
//! The envelope is protobuf-compatible: a wrapper with the message type
//! (field 1), a priority (field 2) and exactly one sub-message (fields
//! 10-17). Payload-bearing messages are framed so the payload is copied once
//! on the way out and sliced, not copied, on the way in.

use bytes::{BufMut, Bytes, BytesMut};

use crate::{Error, Result};

const VARINT: u8 = 0;
const FIXED64: u8 = 1;
const LEN: u8 = 2;
const FIXED32: u8 = 5;

// ─── Message types ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
  Data,
  Terse,
  PullRequest,
  PullResponse,
  Subscribe,
  PushAck,
  AuthResult,
  Heartbeat,
}

impl MessageType {
  pub const fn code(self) -> u64 {
    match self {
      Self::Data => 1,
      Self::Terse => 2,
      Self::PullRequest => 3,
      Self::PullResponse => 4,
      Self::Subscribe => 5,
      Self::PushAck => 6,
      Self::AuthResult => 7,
      Self::Heartbeat => 8,
    }
  }

  pub fn from_code(code: u64) -> Result<Self> {
    Ok(match code {
      1 => Self::Data,
      2 => Self::Terse,
      3 => Self::PullRequest,
      4 => Self::PullResponse,
      5 => Self::Subscribe,
      6 => Self::PushAck,
      7 => Self::AuthResult,
      8 => Self::Heartbeat,
      other => return Err(Error::UnknownMessageType(other)),
    })
  }

  /// Wrapper field number carrying this type's sub-message.
  const fn body_field(self) -> u32 { self.code() as u32 + 9 }

  const fn body_name(self) -> &'static str {
    match self {
      Self::Data => "data_message",
      Self::Terse => "terse_message",
      Self::PullRequest => "pull_request",
      Self::PullResponse => "pull_response",
      Self::Subscribe => "subscribe_message",
      Self::PushAck => "push_acknowledgement",
      Self::AuthResult => "authentication_result",
      Self::Heartbeat => "heartbeat",
    }
  }
}

// ─── Sub-messages ────────────────────────────────────────────────────────────

/// Which delivery points the sender wants to hear back from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Thresholds {
  pub device_delivered:  bool,
  pub gateway_delivered: bool,
  pub plugin_delivered:  bool,
}

impl Thresholds {
  pub fn any(&self) -> bool {
    self.device_delivered || self.gateway_delivered || self.plugin_delivered
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataMessage {
  pub uri:           String,
  pub mime_type:     String,
  pub encoding:      String,
  pub data:          Bytes,
  pub user_id:       String,
  pub origin_device: String,
  pub thresholds:    Option<Thresholds>,
}

/// Compact data message; `mime_type` is a numeric topic code.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TerseMessage {
  pub mime_type: u32,
  pub data:      Bytes,
  pub user_id:   String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullRequest {
  pub request_uid:   String,
  pub mime_type:     String,
  pub query:         String,
  pub max_results:   u32,
  pub projection:    String,
  pub origin_device: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullResponse {
  pub request_uid:   String,
  pub mime_type:     String,
  pub encoding:      String,
  pub data:          Bytes,
  pub origin_device: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscribeMessage {
  pub mime_type:     String,
  pub query:         String,
  pub origin_device: String,
  pub origin_user:   String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PushStatus {
  #[default]
  Success,
  Failure,
  Rejected,
}

impl PushStatus {
  const fn code(self) -> u64 {
    match self {
      Self::Success => 1,
      Self::Failure => 2,
      Self::Rejected => 3,
    }
  }

  fn from_code(code: u64) -> Self {
    match code {
      2 => Self::Failure,
      3 => Self::Rejected,
      _ => Self::Success,
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushAcknowledgement {
  pub uri:         String,
  pub threshold:   Thresholds,
  pub dest_device: String,
  pub dest_user:   String,
  pub ack_device:  String,
  pub ack_user:    String,
  pub status:      PushStatus,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AuthStatus {
  #[default]
  Success,
  Failure,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthenticationResult {
  pub result:  AuthStatus,
  pub message: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Heartbeat {
  pub sequence: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
  Data(DataMessage),
  Terse(TerseMessage),
  PullRequest(PullRequest),
  PullResponse(PullResponse),
  Subscribe(SubscribeMessage),
  PushAck(PushAcknowledgement),
  AuthResult(AuthenticationResult),
  Heartbeat(Heartbeat),
}

impl Body {
  pub fn message_type(&self) -> MessageType {
    match self {
      Self::Data(_) => MessageType::Data,
      Self::Terse(_) => MessageType::Terse,
      Self::PullRequest(_) => MessageType::PullRequest,
      Self::PullResponse(_) => MessageType::PullResponse,
      Self::Subscribe(_) => MessageType::Subscribe,
      Self::PushAck(_) => MessageType::PushAck,
      Self::AuthResult(_) => MessageType::AuthResult,
      Self::Heartbeat(_) => MessageType::Heartbeat,
    }
  }

  /// Write every field except the payload; return the payload's field
  /// number and bytes, if this message carries one.
  fn encode_head(&self, head: &mut BytesMut) -> Option<(u32, &Bytes)> {
    match self {
      Self::Data(m) => {
        put_str(head, 1, &m.uri);
        put_str(head, 2, &m.mime_type);
        put_str(head, 3, &m.encoding);
        put_str(head, 5, &m.user_id);
        put_str(head, 6, &m.origin_device);
        if let Some(t) = &m.thresholds {
          put_message(head, 7, &encode_thresholds(t));
        }
        Some((4, &m.data))
      }
      Self::Terse(m) => {
        put_uint(head, 1, m.mime_type.into());
        put_str(head, 3, &m.user_id);
        Some((2, &m.data))
      }
      Self::PullRequest(m) => {
        put_str(head, 1, &m.request_uid);
        put_str(head, 2, &m.mime_type);
        put_str(head, 3, &m.query);
        put_uint(head, 4, m.max_results.into());
        put_str(head, 5, &m.projection);
        put_str(head, 6, &m.origin_device);
        None
      }
      Self::PullResponse(m) => {
        put_str(head, 1, &m.request_uid);
        put_str(head, 2, &m.mime_type);
        put_str(head, 3, &m.encoding);
        put_str(head, 5, &m.origin_device);
        Some((4, &m.data))
      }
      Self::Subscribe(m) => {
        put_str(head, 1, &m.mime_type);
        put_str(head, 2, &m.query);
        put_str(head, 3, &m.origin_device);
        put_str(head, 4, &m.origin_user);
        None
      }
      Self::PushAck(m) => {
        put_str(head, 1, &m.uri);
        put_message(head, 2, &encode_thresholds(&m.threshold));
        put_str(head, 3, &m.dest_device);
        put_str(head, 4, &m.dest_user);
        put_str(head, 5, &m.ack_device);
        put_str(head, 6, &m.ack_user);
        put_uint(head, 7, m.status.code());
        None
      }
      Self::AuthResult(m) => {
        let code = match m.result {
          AuthStatus::Success => 1,
          AuthStatus::Failure => 2,
        };
        put_uint(head, 1, code);
        put_str(head, 2, &m.message);
        None
      }
      Self::Heartbeat(m) => {
        put_uint(head, 1, m.sequence);
        None
      }
    }
  }
}

// ─── Envelope ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
  pub priority: u32,
  pub body:     Body,
}

impl Envelope {
  pub fn new(body: Body) -> Self { Self { priority: 0, body } }

  pub fn with_priority(mut self, priority: u32) -> Self {
    self.priority = priority;
    self
  }

  pub fn message_type(&self) -> MessageType { self.body.message_type() }

  /// Encode into a buffer sized up front; the payload is copied exactly once.
  pub fn encode(&self) -> Bytes {
    let kind = self.message_type();
    let mut head = BytesMut::new();
    let payload = self.body.encode_head(&mut head).filter(|(_, data)| !data.is_empty());

    let payload_frame = payload.map_or(0, |(field, data)| {
      varint_len(key(field, LEN)) + varint_len(data.len() as u64) + data.len()
    });
    let body_len = head.len() + payload_frame;

    let mut buf = BytesMut::with_capacity(body_len + 4 * 4);
    put_uint(&mut buf, 1, kind.code());
    put_uint(&mut buf, 2, self.priority.into());
    put_varint(&mut buf, key(kind.body_field(), LEN));
    put_varint(&mut buf, body_len as u64);
    buf.extend_from_slice(&head);
    if let Some((field, data)) = payload {
      put_varint(&mut buf, key(field, LEN));
      put_varint(&mut buf, data.len() as u64);
      buf.extend_from_slice(data);
    }
    buf.freeze()
  }

  /// Decode an envelope. Payload fields are slices of `buf`.
  pub fn decode(buf: Bytes) -> Result<Self> {
    let mut cursor = WireCursor::new(buf);
    let mut type_code = None;
    let mut priority = 0;
    let mut bodies: Vec<(u32, Bytes)> = Vec::new();

    while !cursor.is_empty() {
      let (field, wire_type) = cursor.read_tag()?;
      match (field, wire_type) {
        (1, VARINT) => type_code = Some(cursor.read_varint()?),
        (2, VARINT) => priority = cursor.read_varint()? as u32,
        (10..=17, LEN) => bodies.push((field, cursor.read_len_delimited()?)),
        _ => cursor.skip(field, wire_type)?,
      }
    }

    let kind = MessageType::from_code(type_code.unwrap_or(0))?;
    let body = bodies
      .into_iter()
      .rev()
      .find(|(field, _)| *field == kind.body_field())
      .map(|(_, bytes)| bytes)
      .ok_or(Error::MissingBody(kind.body_name()))?;

    let body = decode_body(kind, WireCursor::new(body))?;
    Ok(Self { priority, body })
  }
}

fn decode_body(kind: MessageType, mut c: WireCursor) -> Result<Body> {
  Ok(match kind {
    MessageType::Data => {
      let mut m = DataMessage::default();
      while let Some((field, wt)) = c.next_field()? {
        match (field, wt) {
          (1, LEN) => m.uri = c.read_string(field)?,
          (2, LEN) => m.mime_type = c.read_string(field)?,
          (3, LEN) => m.encoding = c.read_string(field)?,
          (4, LEN) => m.data = c.read_len_delimited()?,
          (5, LEN) => m.user_id = c.read_string(field)?,
          (6, LEN) => m.origin_device = c.read_string(field)?,
          (7, LEN) => m.thresholds = Some(decode_thresholds(c.read_len_delimited()?)?),
          _ => c.skip(field, wt)?,
        }
      }
      Body::Data(m)
    }
    MessageType::Terse => {
      let mut m = TerseMessage::default();
      while let Some((field, wt)) = c.next_field()? {
        match (field, wt) {
          (1, VARINT) => m.mime_type = c.read_varint()? as u32,
          (2, LEN) => m.data = c.read_len_delimited()?,
          (3, LEN) => m.user_id = c.read_string(field)?,
          _ => c.skip(field, wt)?,
        }
      }
      Body::Terse(m)
    }
    MessageType::PullRequest => {
      let mut m = PullRequest::default();
      while let Some((field, wt)) = c.next_field()? {
        match (field, wt) {
          (1, LEN) => m.request_uid = c.read_string(field)?,
          (2, LEN) => m.mime_type = c.read_string(field)?,
          (3, LEN) => m.query = c.read_string(field)?,
          (4, VARINT) => m.max_results = c.read_varint()? as u32,
          (5, LEN) => m.projection = c.read_string(field)?,
          (6, LEN) => m.origin_device = c.read_string(field)?,
          _ => c.skip(field, wt)?,
        }
      }
      Body::PullRequest(m)
    }
    MessageType::PullResponse => {
      let mut m = PullResponse::default();
      while let Some((field, wt)) = c.next_field()? {
        match (field, wt) {
          (1, LEN) => m.request_uid = c.read_string(field)?,
          (2, LEN) => m.mime_type = c.read_string(field)?,
          (3, LEN) => m.encoding = c.read_string(field)?,
          (4, LEN) => m.data = c.read_len_delimited()?,
          (5, LEN) => m.origin_device = c.read_string(field)?,
          _ => c.skip(field, wt)?,
        }
      }
      Body::PullResponse(m)
    }
    MessageType::Subscribe => {
      let mut m = SubscribeMessage::default();
      while let Some((field, wt)) = c.next_field()? {
        match (field, wt) {
          (1, LEN) => m.mime_type = c.read_string(field)?,
          (2, LEN) => m.query = c.read_string(field)?,
          (3, LEN) => m.origin_device = c.read_string(field)?,
          (4, LEN) => m.origin_user = c.read_string(field)?,
          _ => c.skip(field, wt)?,
        }
      }
      Body::Subscribe(m)
    }
    MessageType::PushAck => {
      let mut m = PushAcknowledgement::default();
      while let Some((field, wt)) = c.next_field()? {
        match (field, wt) {
          (1, LEN) => m.uri = c.read_string(field)?,
          (2, LEN) => m.threshold = decode_thresholds(c.read_len_delimited()?)?,
          (3, LEN) => m.dest_device = c.read_string(field)?,
          (4, LEN) => m.dest_user = c.read_string(field)?,
          (5, LEN) => m.ack_device = c.read_string(field)?,
          (6, LEN) => m.ack_user = c.read_string(field)?,
          (7, VARINT) => m.status = PushStatus::from_code(c.read_varint()?),
          _ => c.skip(field, wt)?,
        }
      }
      Body::PushAck(m)
    }
    MessageType::AuthResult => {
      let mut m = AuthenticationResult::default();
      while let Some((field, wt)) = c.next_field()? {
        match (field, wt) {
          (1, VARINT) => {
            m.result = match c.read_varint()? {
              1 => AuthStatus::Success,
              _ => AuthStatus::Failure,
            }
          }
          (2, LEN) => m.message = c.read_string(field)?,
          _ => c.skip(field, wt)?,
        }
      }
      Body::AuthResult(m)
    }
    MessageType::Heartbeat => {
      let mut m = Heartbeat::default();
      while let Some((field, wt)) = c.next_field()? {
        match (field, wt) {
          (1, VARINT) => m.sequence = c.read_varint()?,
          _ => c.skip(field, wt)?,
        }
      }
      Body::Heartbeat(m)
    }
  })
}

fn encode_thresholds(t: &Thresholds) -> BytesMut {
  let mut buf = BytesMut::with_capacity(6);
  put_uint(&mut buf, 1, t.device_delivered.into());
  put_uint(&mut buf, 2, t.gateway_delivered.into());
  put_uint(&mut buf, 3, t.plugin_delivered.into());
  buf
}

fn decode_thresholds(bytes: Bytes) -> Result<Thresholds> {
  let mut c = WireCursor::new(bytes);
  let mut t = Thresholds::default();
  while let Some((field, wt)) = c.next_field()? {
    match (field, wt) {
      (1, VARINT) => t.device_delivered = c.read_varint()? != 0,
      (2, VARINT) => t.gateway_delivered = c.read_varint()? != 0,
      (3, VARINT) => t.plugin_delivered = c.read_varint()? != 0,
      _ => c.skip(field, wt)?,
    }
  }
  Ok(t)
}

// ─── Cursor ──────────────────────────────────────────────────────────────────

/// Reads protobuf fields out of a shared buffer.
#[derive(Debug, Clone)]
pub struct WireCursor {
  buf: Bytes,
  pos: usize,
}

impl WireCursor {
  pub fn new(buf: Bytes) -> Self { Self { buf, pos: 0 } }

  pub fn is_empty(&self) -> bool { self.pos >= self.buf.len() }

  pub fn position(&self) -> usize { self.pos }

  pub fn read_varint(&mut self) -> Result<u64> {
    let start = self.pos;
    let mut value = 0u64;
    for shift in (0..64).step_by(7) {
      let byte = *self
        .buf
        .get(self.pos)
        .ok_or(Error::Truncated { offset: self.pos, wanted: 1 })?;
      self.pos += 1;
      value |= u64::from(byte & 0x7F) << shift;
      if byte & 0x80 == 0 {
        return Ok(value);
      }
    }
    Err(Error::Varint(start))
  }

  pub fn read_tag(&mut self) -> Result<(u32, u8)> {
    let key = self.read_varint()?;
    Ok(((key >> 3) as u32, (key & 0x7) as u8))
  }

  fn next_field(&mut self) -> Result<Option<(u32, u8)>> {
    if self.is_empty() { Ok(None) } else { self.read_tag().map(Some) }
  }

  /// The next length-delimited value, as a slice of the underlying buffer.
  pub fn read_len_delimited(&mut self) -> Result<Bytes> {
    let len = self.read_varint()? as usize;
    self.take(len)
  }

  pub fn read_string(&mut self, field: u32) -> Result<String> {
    let bytes = self.read_len_delimited()?;
    String::from_utf8(bytes.to_vec()).map_err(|_| Error::Utf8(field))
  }

  pub fn skip(&mut self, field: u32, wire_type: u8) -> Result<()> {
    match wire_type {
      VARINT => self.read_varint().map(drop),
      FIXED64 => self.take(8).map(drop),
      LEN => self.read_len_delimited().map(drop),
      FIXED32 => self.take(4).map(drop),
      other => Err(Error::WireType { field, wire_type: other }),
    }
  }

  fn take(&mut self, len: usize) -> Result<Bytes> {
    let end = self.pos.checked_add(len).filter(|end| *end <= self.buf.len());
    let end = end.ok_or(Error::Truncated { offset: self.pos, wanted: len })?;
    let slice = self.buf.slice(self.pos..end);
    self.pos = end;
    Ok(slice)
  }
}

// ─── Writing ─────────────────────────────────────────────────────────────────

const fn key(field: u32, wire_type: u8) -> u64 { ((field as u64) << 3) | wire_type as u64 }

fn varint_len(mut v: u64) -> usize {
  let mut n = 1;
  while v >= 0x80 {
    v >>= 7;
    n += 1;
  }
  n
}

fn put_varint(buf: &mut BytesMut, mut v: u64) {
  while v >= 0x80 {
    buf.put_u8((v as u8 & 0x7F) | 0x80);
    v >>= 7;
  }
  buf.put_u8(v as u8);
}

fn put_uint(buf: &mut BytesMut, field: u32, v: u64) {
  if v != 0 {
    put_varint(buf, key(field, VARINT));
    put_varint(buf, v);
  }
}

fn put_str(buf: &mut BytesMut, field: u32, s: &str) {
  if !s.is_empty() {
    put_varint(buf, key(field, LEN));
    put_varint(buf, s.len() as u64);
    buf.put_slice(s.as_bytes());
  }
}

fn put_message(buf: &mut BytesMut, field: u32, inner: &[u8]) {
  put_varint(buf, key(field, LEN));
  put_varint(buf, inner.len() as u64);
  buf.put_slice(inner);
}

#[cfg(test)]
mod tests {
  use super::*;

  fn data_envelope(payload: &[u8]) -> Envelope {
    Envelope::new(Body::Data(DataMessage {
      uri: "ammo://postal/7".into(),
      mime_type: "ammo/sensor".into(),
      encoding: "json".into(),
      data: Bytes::copy_from_slice(payload),
      user_id: "u1".into(),
      origin_device: "dev-a".into(),
      thresholds: Some(Thresholds { device_delivered: true, ..Default::default() }),
    }))
    .with_priority(64)
  }

  #[test]
  fn data_message_layout() {
    let bytes = data_envelope(b"xyz").encode();
    // type = Data, priority = 64, then field 10 length-delimited
    assert_eq!(&bytes[..5], &[0x08, 0x01, 0x10, 0x40, 0x52]);
    // the payload is the last thing written
    assert_eq!(&bytes[bytes.len() - 5..], &[0x22, 0x03, b'x', b'y', b'z']);
  }

  #[test]
  fn decoded_payload_shares_the_input_buffer() {
    let payload = vec![0xAB; 4096];
    let wire = data_envelope(&payload).encode();
    let range = wire.as_ptr() as usize..wire.as_ptr() as usize + wire.len();

    let env = Envelope::decode(wire.clone()).unwrap();
    let Body::Data(msg) = &env.body else { panic!("expected data") };
    assert_eq!(msg.data.as_ref(), payload.as_slice());
    assert!(range.contains(&(msg.data.as_ptr() as usize)));
    assert_eq!(env, data_envelope(&payload));
  }

  #[test]
  fn encoded_size_is_payload_plus_head() {
    let payload = vec![1u8; 1 << 16];
    let wire = data_envelope(&payload).encode();
    assert!(wire.len() > payload.len());
    assert!(wire.len() <= payload.len() + 64 + 16);
  }

  #[test]
  fn every_message_type_decodes() {
    let bodies = [
      Body::Terse(TerseMessage { mime_type: 17, data: Bytes::from_static(b"t"), user_id: "u".into() }),
      Body::PullRequest(PullRequest {
        request_uid: "r1".into(),
        mime_type: "ammo/x".into(),
        query: "a = 1".into(),
        max_results: 10,
        projection: "a".into(),
        origin_device: "d".into(),
      }),
      Body::PullResponse(PullResponse {
        request_uid: "r1".into(),
        mime_type: "ammo/x".into(),
        encoding: "terse".into(),
        data: Bytes::from_static(&[1, 2, 3]),
        origin_device: "d".into(),
      }),
      Body::Subscribe(SubscribeMessage {
        mime_type: "ammo/x".into(),
        query: String::new(),
        origin_device: "d".into(),
        origin_user: "u".into(),
      }),
      Body::PushAck(PushAcknowledgement {
        uri: "ammo://postal/1".into(),
        threshold: Thresholds { device_delivered: true, ..Default::default() },
        dest_device: "d2".into(),
        dest_user: "u2".into(),
        ack_device: "d".into(),
        ack_user: "u".into(),
        status: PushStatus::Rejected,
      }),
      Body::AuthResult(AuthenticationResult { result: AuthStatus::Failure, message: "no".into() }),
      Body::Heartbeat(Heartbeat { sequence: 300 }),
    ];
    for body in bodies {
      let env = Envelope::new(body);
      assert_eq!(Envelope::decode(env.encode()).unwrap(), env);
    }
  }

  #[test]
  fn unknown_fields_are_skipped() {
    let mut buf = BytesMut::new();
    put_uint(&mut buf, 1, MessageType::Heartbeat.code());
    put_str(&mut buf, 99, "future");
    put_message(&mut buf, 17, &[0x08, 0x05, 0x15, 0, 0, 0, 0]);
    let env = Envelope::decode(buf.freeze()).unwrap();
    assert_eq!(env.body, Body::Heartbeat(Heartbeat { sequence: 5 }));
  }

  #[test]
  fn missing_body_and_bad_type() {
    let mut buf = BytesMut::new();
    put_uint(&mut buf, 1, MessageType::Data.code());
    assert!(matches!(Envelope::decode(buf.freeze()), Err(Error::MissingBody("data_message"))));

    let mut buf = BytesMut::new();
    put_uint(&mut buf, 1, 42);
    assert!(matches!(Envelope::decode(buf.freeze()), Err(Error::UnknownMessageType(42))));
  }

  #[test]
  fn truncated_payload_is_an_error() {
    let wire = data_envelope(b"abcdef").encode();
    let cut = wire.slice(..wire.len() - 2);
    assert!(matches!(Envelope::decode(cut), Err(Error::Truncated { .. })));
  }
}
