//! Conversions between core types and SQLite column values.
//!
//! Timestamps are integer milliseconds, UUIDs hyphenated lowercase strings,
//! notices compact JSON, and enums their stable integer codes.

use ammo_core::{
  disposal::DisposalTotalState,
  notice::Notice,
  request::{Continuity, Detail, Request, RequestType, RetrievalQuery},
};
use chrono::{DateTime, Utc};
use rusqlite::types::Value as SqlValue;
use uuid::Uuid;

use crate::{Error, Result};

// ─── Scalars ─────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

pub fn encode_millis(dt: DateTime<Utc>) -> i64 { dt.timestamp_millis() }

pub fn decode_millis(ms: i64) -> Result<DateTime<Utc>> {
  DateTime::from_timestamp_millis(ms).ok_or(Error::Timestamp(ms))
}

pub fn encode_notice(n: &Notice) -> Result<String> { Ok(serde_json::to_string(n)?) }

pub fn decode_notice(s: &str) -> Result<Notice> { Ok(serde_json::from_str(s)?) }

// ─── Columns ─────────────────────────────────────────────────────────────────

const COMMON: &str = "id, uuid, auid, topic, provider, payload, priority, created, \
                      expiration, disposition, channel, notice";

/// `SELECT` column list for a request table, in [`RawRequest`] order.
pub fn select_columns(t: RequestType) -> String {
  match t {
    RequestType::Postal => COMMON.to_owned(),
    RequestType::Retrieval => format!(
      "{COMMON}, projection, selection, args, ordering, row_limit, \
       continuity_type, continuity_value"
    ),
    RequestType::Subscribe => format!("{COMMON}, selection"),
  }
}

/// Columns forming the natural key used by upsert.
pub fn key_columns(t: RequestType) -> &'static [&'static str] {
  match t {
    RequestType::Retrieval => &["uuid", "topic", "provider"],
    RequestType::Postal | RequestType::Subscribe => &["topic", "provider"],
  }
}

fn text(s: &Option<String>) -> SqlValue {
  s.clone().map_or(SqlValue::Null, SqlValue::Text)
}

/// Column/value pairs written by upsert. Excludes `id` and `created`.
pub fn request_columns(r: &Request, now: DateTime<Utc>) -> Result<Vec<(&'static str, SqlValue)>> {
  let mut cols = vec![
    ("uuid", SqlValue::Text(encode_uuid(r.uuid))),
    ("auid", text(&r.auid)),
    ("topic", SqlValue::Text(r.topic.clone())),
    ("provider", SqlValue::Text(r.provider.clone())),
    ("payload", r.payload.clone().map_or(SqlValue::Null, SqlValue::Blob)),
    ("priority", SqlValue::Integer(r.priority.into())),
    ("modified", SqlValue::Integer(encode_millis(now))),
    ("expiration", SqlValue::Integer(encode_millis(r.expiration))),
    ("disposition", SqlValue::Integer(r.disposition.code())),
    ("channel", text(&r.channel_filter)),
    ("notice", SqlValue::Text(encode_notice(&r.notice)?)),
  ];

  match &r.detail {
    Detail::Postal => {}
    Detail::Retrieval(q) => {
      let (kind, value) = q.continuity.into_parts();
      cols.extend([
        ("projection", text(&q.projection)),
        ("selection", text(&q.selection)),
        ("args", text(&q.args)),
        ("ordering", text(&q.ordering)),
        ("row_limit", q.limit.map_or(SqlValue::Null, SqlValue::Integer)),
        ("continuity_type", SqlValue::Integer(kind)),
        ("continuity_value", SqlValue::Integer(value)),
      ]);
    }
    Detail::Subscribe { selection } => cols.push(("selection", text(selection))),
  }
  Ok(cols)
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw values read from a request row.
pub struct RawRequest {
  pub id:          i64,
  pub uuid:        String,
  pub auid:        Option<String>,
  pub topic:       String,
  pub provider:    String,
  pub payload:     Option<Vec<u8>>,
  pub priority:    i32,
  pub created:     i64,
  pub expiration:  i64,
  pub disposition: i64,
  pub channel:     Option<String>,
  pub notice:      String,
  pub detail:      RawDetail,
}

pub enum RawDetail {
  Postal,
  Retrieval {
    projection:       Option<String>,
    selection:        Option<String>,
    args:             Option<String>,
    ordering:         Option<String>,
    row_limit:        Option<i64>,
    continuity_type:  i64,
    continuity_value: i64,
  },
  Subscribe {
    selection: Option<String>,
  },
}

impl RawRequest {
  /// Read a row selected with [`select_columns`].
  pub fn from_row(t: RequestType, row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    let detail = match t {
      RequestType::Postal => RawDetail::Postal,
      RequestType::Retrieval => RawDetail::Retrieval {
        projection:       row.get(12)?,
        selection:        row.get(13)?,
        args:             row.get(14)?,
        ordering:         row.get(15)?,
        row_limit:        row.get(16)?,
        continuity_type:  row.get(17)?,
        continuity_value: row.get(18)?,
      },
      RequestType::Subscribe => RawDetail::Subscribe { selection: row.get(12)? },
    };

    Ok(Self {
      id:          row.get(0)?,
      uuid:        row.get(1)?,
      auid:        row.get(2)?,
      topic:       row.get(3)?,
      provider:    row.get(4)?,
      payload:     row.get(5)?,
      priority:    row.get(6)?,
      created:     row.get(7)?,
      expiration:  row.get(8)?,
      disposition: row.get(9)?,
      channel:     row.get(10)?,
      notice:      row.get(11)?,
      detail,
    })
  }

  pub fn into_request(self) -> Result<Request> {
    let detail = match self.detail {
      RawDetail::Postal => Detail::Postal,
      RawDetail::Retrieval {
        projection,
        selection,
        args,
        ordering,
        row_limit,
        continuity_type,
        continuity_value,
      } => Detail::Retrieval(RetrievalQuery {
        projection,
        selection,
        args,
        ordering,
        limit: row_limit,
        continuity: Continuity::from_parts(continuity_type, continuity_value),
      }),
      RawDetail::Subscribe { selection } => Detail::Subscribe { selection },
    };

    Ok(Request {
      id: Some(self.id),
      uuid: decode_uuid(&self.uuid)?,
      auid: self.auid,
      topic: self.topic,
      provider: self.provider,
      payload: self.payload,
      priority: self.priority,
      created: decode_millis(self.created)?,
      expiration: decode_millis(self.expiration)?,
      disposition: DisposalTotalState::from_code(self.disposition)?,
      channel_filter: self.channel,
      notice: decode_notice(&self.notice)?,
      detail,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn millis_round_trip_at_the_far_future() {
    let max = DateTime::<Utc>::MAX_UTC;
    let back = decode_millis(encode_millis(max)).unwrap();
    assert_eq!(back.timestamp_millis(), max.timestamp_millis());
    assert!(encode_millis(max) > encode_millis(Utc::now()));
  }

  #[test]
  fn column_lists_line_up() {
    let retrieval = Request::new(Detail::Retrieval(RetrievalQuery::default()), "t", "p");
    let cols = request_columns(&retrieval, Utc::now()).unwrap();
    // every selected column except id and created is written
    let selected = select_columns(RequestType::Retrieval).split(", ").count();
    assert_eq!(cols.len(), selected - 2 + 1);
  }
}
