//! Request kinds, priorities and retrieval continuity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};
use uuid::Uuid;

use crate::{Error, Result, disposal::DisposalTotalState, notice::Notice};

// ─── RequestType ─────────────────────────────────────────────────────────────

/// The three persisted request kinds, one ledger table each.
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
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum RequestType {
  Postal,
  Retrieval,
  Subscribe,
}

impl RequestType {
  /// Discriminant stored in `disposal.type`.
  pub const fn code(self) -> i64 {
    match self {
      Self::Postal => 1,
      Self::Retrieval => 2,
      Self::Subscribe => 3,
    }
  }

  pub fn from_code(code: i64) -> Result<Self> {
    match code {
      1 => Ok(Self::Postal),
      2 => Ok(Self::Retrieval),
      3 => Ok(Self::Subscribe),
      other => Err(Error::UnknownRequestType(other)),
    }
  }

  /// Ledger table holding requests of this kind.
  pub const fn table(self) -> &'static str {
    match self {
      Self::Postal => "postal",
      Self::Retrieval => "retrieval",
      Self::Subscribe => "subscribe",
    }
  }
}

// ─── Priority ────────────────────────────────────────────────────────────────

/// Named priority levels; larger values are more urgent.
pub mod priority {
  pub const FLASH: i32 = 0x80;
  pub const URGENT: i32 = 0x40;
  pub const IMPORTANT: i32 = 0x20;
  pub const NORMAL: i32 = 0x10;
  pub const BACKGROUND: i32 = 0x08;

  /// Parse a priority name or an integer literal.
  pub fn parse(text: &str) -> crate::Result<i32> {
    match text.trim().to_ascii_lowercase().as_str() {
      "flash" => Ok(FLASH),
      "urgent" => Ok(URGENT),
      "high" | "important" => Ok(IMPORTANT),
      "normal" | "default" => Ok(NORMAL),
      "low" | "background" => Ok(BACKGROUND),
      other => other
        .parse::<i32>()
        .map_err(|_| crate::Error::InvalidPriority(text.to_owned())),
    }
  }
}

// ─── Continuity ──────────────────────────────────────────────────────────────

/// How long a retrieval keeps answering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Continuity {
  /// Answer once, then the request is spent.
  #[default]
  Once,
  /// Keep answering until the given number of seconds elapse.
  Temporal(i64),
  /// Keep answering until the given number of rows are delivered.
  Quantity(i64),
}

impl Continuity {
  pub fn into_parts(self) -> (i64, i64) {
    match self {
      Self::Once => (1, 0),
      Self::Temporal(v) => (2, v),
      Self::Quantity(v) => (3, v),
    }
  }

  pub fn from_parts(kind: i64, value: i64) -> Self {
    match kind {
      2 => Self::Temporal(value),
      3 => Self::Quantity(value),
      _ => Self::Once,
    }
  }
}

// ─── Request ─────────────────────────────────────────────────────────────────

/// Retrieval parameters: which rows to pull and for how long.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RetrievalQuery {
  pub projection: Option<String>,
  pub selection:  Option<String>,
  pub args:       Option<String>,
  pub ordering:   Option<String>,
  pub limit:      Option<i64>,
  pub continuity: Continuity,
}

/// What distinguishes one request kind from another.
#[derive(Debug, Clone, PartialEq)]
pub enum Detail {
  Postal,
  Retrieval(RetrievalQuery),
  Subscribe { selection: Option<String> },
}

/// A persisted application request.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
  /// Ledger row id; `None` until stored.
  pub id:             Option<i64>,
  pub uuid:           Uuid,
  /// Application-supplied id, echoed in notices.
  pub auid:           Option<String>,
  pub topic:          String,
  /// Reference to the tuple in the external tuple store.
  pub provider:       String,
  /// Inline payload, when the application supplied one directly.
  pub payload:        Option<Vec<u8>>,
  pub priority:       i32,
  pub created:        DateTime<Utc>,
  pub expiration:     DateTime<Utc>,
  pub disposition:    DisposalTotalState,
  pub channel_filter: Option<String>,
  pub notice:         Notice,
  pub detail:         Detail,
}

impl Request {
  pub fn new(detail: Detail, topic: impl Into<String>, provider: impl Into<String>) -> Self {
    let now = Utc::now();
    Self {
      id: None,
      uuid: Uuid::new_v4(),
      auid: None,
      topic: topic.into(),
      provider: provider.into(),
      payload: None,
      priority: priority::NORMAL,
      created: now,
      expiration: DateTime::<Utc>::MAX_UTC,
      disposition: DisposalTotalState::New,
      channel_filter: None,
      notice: Notice::default(),
      detail,
    }
  }

  pub fn request_type(&self) -> RequestType {
    match self.detail {
      Detail::Postal => RequestType::Postal,
      Detail::Retrieval(_) => RequestType::Retrieval,
      Detail::Subscribe { .. } => RequestType::Subscribe,
    }
  }

  pub fn selection(&self) -> Option<&str> {
    match &self.detail {
      Detail::Postal => None,
      Detail::Retrieval(q) => q.selection.as_deref(),
      Detail::Subscribe { selection } => selection.as_deref(),
    }
  }
}
