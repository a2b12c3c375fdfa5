//! [`DistributorStore`]: the persistent disposition ledger.

use std::path::Path;

use ammo_core::{
  channel::ChannelState,
  dispersal::Dispersal,
  disposal::{DisposalState, DisposalTotalState},
  request::{Request, RequestType},
};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension as _, ToSql, params, params_from_iter};
use uuid::Uuid;

use crate::{
  Error, Result,
  encode::{RawRequest, encode_millis, encode_uuid, key_columns, request_columns, select_columns},
  schema::SCHEMA,
};

/// File name a corrupted ledger is moved to before a fresh one is created.
pub const CORRUPTED_NAME: &str = "corrupted.db";

const ALL_TYPES: [RequestType; 3] =
  [RequestType::Postal, RequestType::Retrieval, RequestType::Subscribe];

// ─── Records ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRecord {
  pub name:  String,
  pub state: ChannelState,
}

/// Rows removed by one garbage-collection sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcReport {
  pub requests:  usize,
  pub disposals: usize,
}

/// Row counts for operator display.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerStats {
  pub requests:  Vec<(RequestType, usize)>,
  pub disposals: Vec<(DisposalState, usize)>,
  pub channels:  usize,
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// The distributor ledger backed by a single SQLite file.
#[derive(Debug)]
pub struct DistributorStore {
  conn: Connection,
}

impl DistributorStore {
  /// Open (or create) a ledger at `path` and run schema initialisation.
  pub fn open(path: impl AsRef<Path>) -> Result<Self> {
    let store = Self { conn: Connection::open(path)? };
    store.init_schema()?;
    Ok(store)
  }

  /// Open an in-memory ledger, for tests.
  pub fn open_in_memory() -> Result<Self> {
    let store = Self { conn: Connection::open_in_memory()? };
    store.init_schema()?;
    Ok(store)
  }

  /// Open the ledger at `path`; if the file is corrupt, move it aside as
  /// [`CORRUPTED_NAME`] in the same directory and start an empty ledger.
  pub fn open_or_recover(path: impl AsRef<Path>) -> Result<Self> {
    let path = path.as_ref();
    match Self::open(path) {
      Ok(store) => Ok(store),
      Err(e) if e.is_corruption() => {
        let archive = path.with_file_name(CORRUPTED_NAME);
        tracing::error!(
          ?path,
          ?archive,
          "ledger is corrupt, archiving it and starting empty; pending requests are lost: {e}"
        );
        std::fs::rename(path, &archive)?;
        for suffix in ["-wal", "-shm"] {
          let mut side = path.as_os_str().to_owned();
          side.push(suffix);
          let _ = std::fs::remove_file(side);
        }
        Self::open(path)
      }
      Err(e) => Err(e),
    }
  }

  fn init_schema(&self) -> Result<()> {
    self.conn.execute_batch(SCHEMA)?;
    Ok(())
  }

  // ── Requests ──────────────────────────────────────────────────────────────

  /// Update-or-insert `request` by its natural key, then upsert one disposal
  /// row per dispersal entry. Returns the row id.
  pub fn upsert(&self, request: &Request, dispersal: &Dispersal) -> Result<i64> {
    let t = request.request_type();
    let table = t.table();
    let now = Utc::now();
    let cols = request_columns(request, now)?;

    let tx = self.conn.unchecked_transaction()?;

    let keys = key_columns(t);
    let key_values: Vec<_> = keys
      .iter()
      .filter_map(|k| cols.iter().find(|(c, _)| c == k).map(|(_, v)| v.clone()))
      .collect();
    let key_where = keys
      .iter()
      .enumerate()
      .map(|(i, k)| format!("{k} = ?{}", i + 1))
      .collect::<Vec<_>>()
      .join(" AND ");

    let existing: Option<i64> = tx
      .query_row(
        &format!("SELECT id FROM {table} WHERE {key_where} ORDER BY id LIMIT 1"),
        params_from_iter(key_values.iter()),
        |r| r.get(0),
      )
      .optional()?;

    let id = match existing {
      Some(id) => {
        let assignments = cols
          .iter()
          .enumerate()
          .map(|(i, (c, _))| format!("{c} = ?{}", i + 1))
          .collect::<Vec<_>>()
          .join(", ");
        let mut values: Vec<_> = cols.iter().map(|(_, v)| v.clone()).collect();
        values.push(id.into());
        tx.execute(
          &format!("UPDATE {table} SET {assignments} WHERE id = ?{}", values.len()),
          params_from_iter(values.iter()),
        )?;
        id
      }
      None => {
        let names = cols.iter().map(|(c, _)| *c).collect::<Vec<_>>().join(", ");
        let marks = (1..=cols.len() + 1).map(|i| format!("?{i}")).collect::<Vec<_>>().join(", ");
        let mut values: Vec<_> = cols.iter().map(|(_, v)| v.clone()).collect();
        values.push(encode_millis(request.created).into());
        tx.execute(
          &format!("INSERT INTO {table} ({names}, created) VALUES ({marks})"),
          params_from_iter(values.iter()),
        )?;
        tx.last_insert_rowid()
      }
    };

    for (channel, state) in dispersal.iter() {
      upsert_disposal_row(&tx, t, id, channel, state)?;
    }
    tx.commit()?;

    tracing::debug!(%t, id, topic = %request.topic, "upserted request");
    Ok(id)
  }

  pub fn get(&self, t: RequestType, id: i64) -> Result<Option<Request>> {
    self.select_one(t, "id = ?1", params![id])
  }

  pub fn get_by_uuid(&self, t: RequestType, uuid: Uuid) -> Result<Option<Request>> {
    self.select_one(t, "uuid = ?1", params![encode_uuid(uuid)])
  }

  /// Newest subscription on exactly `topic`.
  pub fn get_subscribe_by_topic(&self, topic: &str) -> Result<Option<Request>> {
    let sql = format!(
      "SELECT {} FROM subscribe WHERE topic = ?1 ORDER BY id DESC LIMIT 1",
      select_columns(RequestType::Subscribe)
    );
    let raw = self
      .conn
      .query_row(&sql, params![topic], |row| RawRequest::from_row(RequestType::Subscribe, row))
      .optional()?;
    raw.map(RawRequest::into_request).transpose()
  }

  fn select_one(&self, t: RequestType, cond: &str, params: impl rusqlite::Params) -> Result<Option<Request>> {
    let sql = format!("SELECT {} FROM {} WHERE {cond}", select_columns(t), t.table());
    let raw = self
      .conn
      .query_row(&sql, params, |row| RawRequest::from_row(t, row))
      .optional()?;
    raw.map(RawRequest::into_request).transpose()
  }

  /// Requests with outstanding work on a currently active channel, most
  /// urgent first.
  ///
  /// Outstanding means `REJECTED`, `BUSY` or `PENDING`, plus `TOLD` for
  /// postal requests whose channel never confirmed the send. A `COMPLETE`
  /// request is only picked up again for a `TOLD` row; leftovers from
  /// literals its rule no longer needed stay put.
  pub fn query_ready(&self, t: RequestType) -> Result<Vec<Request>> {
    let mut states = vec![DisposalState::Rejected, DisposalState::Busy, DisposalState::Pending];
    if t == RequestType::Postal {
      states.push(DisposalState::Told);
    }
    let state_list = states.iter().map(|s| s.code().to_string()).collect::<Vec<_>>().join(", ");

    let sql = format!(
      "SELECT {cols} FROM {table} r
       WHERE EXISTS (
         SELECT 1 FROM disposal d
         JOIN channel c ON c.name = d.channel
         WHERE d.type = ?1 AND d.parent = r.id
           AND d.state IN ({state_list})
           AND c.state = ?2
           AND (r.disposition != ?3 OR d.state = ?4)
       )
       ORDER BY r.priority DESC, r.id ASC",
      cols = select_columns(t)
        .split(", ")
        .map(|c| format!("r.{c}"))
        .collect::<Vec<_>>()
        .join(", "),
      table = t.table(),
    );

    let mut stmt = self.conn.prepare(&sql)?;
    let raws = stmt
      .query_map(
        params![
          t.code(),
          ChannelState::Active.code(),
          DisposalTotalState::Complete.code(),
          DisposalState::Told.code()
        ],
        |row| RawRequest::from_row(t, row),
      )?
      .collect::<rusqlite::Result<Vec<_>>>()?;

    raws.into_iter().map(RawRequest::into_request).collect()
  }

  /// Every stored request of one kind, oldest first.
  pub fn list(&self, t: RequestType) -> Result<Vec<Request>> {
    let sql = format!("SELECT {} FROM {} ORDER BY id", select_columns(t), t.table());
    let mut stmt = self.conn.prepare(&sql)?;
    let raws = stmt
      .query_map([], |row| RawRequest::from_row(t, row))?
      .collect::<rusqlite::Result<Vec<_>>>()?;
    raws.into_iter().map(RawRequest::into_request).collect()
  }

  pub fn update_disposition(&self, t: RequestType, id: i64, state: DisposalTotalState) -> Result<()> {
    let n = self.conn.execute(
      &format!("UPDATE {} SET disposition = ?1, modified = ?2 WHERE id = ?3", t.table()),
      params![state.code(), encode_millis(Utc::now()), id],
    )?;
    if n == 0 {
      return Err(Error::RequestNotFound { table: t.table(), id });
    }
    Ok(())
  }

  /// Write back an evaluated dispersal: every disposal row plus the
  /// aggregate disposition. Returns the disposition written.
  pub fn update_by_key(&self, t: RequestType, id: i64, dispersal: &Dispersal) -> Result<DisposalTotalState> {
    let disposition = dispersal.aggregate();
    let tx = self.conn.unchecked_transaction()?;
    for (channel, state) in dispersal.iter() {
      upsert_disposal_row(&tx, t, id, channel, state)?;
    }
    let n = tx.execute(
      &format!("UPDATE {} SET disposition = ?1, modified = ?2 WHERE id = ?3", t.table()),
      params![disposition.code(), encode_millis(Utc::now()), id],
    )?;
    if n == 0 {
      return Err(Error::RequestNotFound { table: t.table(), id });
    }
    tx.commit()?;
    Ok(disposition)
  }

  pub fn delete(&self, t: RequestType, id: i64) -> Result<usize> {
    Ok(self.conn.execute(&format!("DELETE FROM {} WHERE id = ?1", t.table()), params![id])?)
  }

  /// Delete by `(provider, topic)`; disposals go with their parents.
  pub fn cancel(&self, t: RequestType, provider: &str, topic: &str) -> Result<usize> {
    let n = self.conn.execute(
      &format!("DELETE FROM {} WHERE provider = ?1 AND topic = ?2", t.table()),
      params![provider, topic],
    )?;
    tracing::debug!(%t, provider, topic, rows = n, "cancelled");
    Ok(n)
  }

  /// Clear a request table and all of its disposals.
  pub fn purge(&self, t: RequestType) -> Result<usize> {
    let tx = self.conn.unchecked_transaction()?;
    let n = tx.execute(&format!("DELETE FROM {}", t.table()), [])?;
    tx.execute("DELETE FROM disposal WHERE type = ?1", params![t.code()])?;
    tx.commit()?;
    Ok(n)
  }

  // ── Disposals ─────────────────────────────────────────────────────────────

  pub fn upsert_disposal(&self, t: RequestType, id: i64, channel: &str, state: DisposalState) -> Result<()> {
    upsert_disposal_row(&self.conn, t, id, channel, state)
  }

  /// Recorded `(channel, state)` pairs for one request.
  pub fn disposals(&self, t: RequestType, id: i64) -> Result<Vec<(String, DisposalState)>> {
    let mut stmt = self
      .conn
      .prepare("SELECT channel, state FROM disposal WHERE type = ?1 AND parent = ?2 ORDER BY id")?;
    let rows = stmt
      .query_map(params![t.code(), id], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?
      .collect::<rusqlite::Result<Vec<_>>>()?;
    rows
      .into_iter()
      .map(|(c, s)| Ok((c, DisposalState::from_code(s)?)))
      .collect()
  }

  /// Reset subscriptions on `channel` to `PENDING` so they are re-asserted
  /// once it reconnects. `BAD` rows and other request kinds are untouched.
  pub fn deactivate_by_channel(&self, channel: &str) -> Result<usize> {
    let tx = self.conn.unchecked_transaction()?;
    let matching = "type = ?1 AND channel = ?2 AND state != ?3";
    let t = RequestType::Subscribe;

    reopen_parents(&tx, t, matching, params![t.code(), channel, DisposalState::Bad.code()])?;
    let n = tx.execute(
      &format!("UPDATE disposal SET state = ?4 WHERE {matching}"),
      params![t.code(), channel, DisposalState::Bad.code(), DisposalState::Pending.code()],
    )?;
    tx.commit()?;

    tracing::debug!(channel, rows = n, "reset subscriptions");
    Ok(n)
  }

  /// Reset every `BAD` disposal on `channel` to `PENDING`.
  pub fn repair_by_channel(&self, channel: &str) -> Result<usize> {
    let tx = self.conn.unchecked_transaction()?;
    let matching = "type = ?1 AND channel = ?2 AND state = ?3";

    let mut n = 0;
    for t in ALL_TYPES {
      reopen_parents(&tx, t, matching, params![t.code(), channel, DisposalState::Bad.code()])?;
      n += tx.execute(
        &format!("UPDATE disposal SET state = ?4 WHERE {matching}"),
        params![t.code(), channel, DisposalState::Bad.code(), DisposalState::Pending.code()],
      )?;
    }
    tx.commit()?;

    tracing::debug!(channel, rows = n, "repaired disposals");
    Ok(n)
  }

  /// Delete requests that expired before `now` and any disposal whose
  /// parent no longer exists.
  pub fn garbage_collect(&self, now: DateTime<Utc>) -> Result<GcReport> {
    let tx = self.conn.unchecked_transaction()?;
    let mut report = GcReport::default();
    let cutoff = encode_millis(now);

    for t in ALL_TYPES {
      report.requests += tx.execute(
        &format!("DELETE FROM {} WHERE expiration < ?1", t.table()),
        params![cutoff],
      )?;
    }
    for t in ALL_TYPES {
      report.disposals += tx.execute(
        &format!(
          "DELETE FROM disposal WHERE type = ?1 AND parent NOT IN (SELECT id FROM {})",
          t.table()
        ),
        params![t.code()],
      )?;
    }
    tx.commit()?;

    if report.requests > 0 || report.disposals > 0 {
      tracing::info!(requests = report.requests, orphans = report.disposals, "garbage collected");
    }
    Ok(report)
  }

  // ── Channels ──────────────────────────────────────────────────────────────

  pub fn upsert_channel(&self, name: &str, state: ChannelState) -> Result<()> {
    self.conn.execute(
      "INSERT INTO channel (name, state) VALUES (?1, ?2)
       ON CONFLICT(name) DO UPDATE SET state = excluded.state",
      params![name, state.code()],
    )?;
    Ok(())
  }

  pub fn channel_state(&self, name: &str) -> Result<Option<ChannelState>> {
    let code: Option<i64> = self
      .conn
      .query_row("SELECT state FROM channel WHERE name = ?1", params![name], |r| r.get(0))
      .optional()?;
    Ok(code.map(ChannelState::from_code).transpose()?)
  }

  pub fn channels(&self) -> Result<Vec<ChannelRecord>> {
    let mut stmt = self.conn.prepare("SELECT name, state FROM channel ORDER BY name")?;
    let rows = stmt
      .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?
      .collect::<rusqlite::Result<Vec<_>>>()?;
    rows
      .into_iter()
      .map(|(name, s)| Ok(ChannelRecord { name, state: ChannelState::from_code(s)? }))
      .collect()
  }

  // ── Stats ─────────────────────────────────────────────────────────────────

  pub fn stats(&self) -> Result<LedgerStats> {
    let mut stats = LedgerStats::default();
    for t in ALL_TYPES {
      let n: i64 = self
        .conn
        .query_row(&format!("SELECT COUNT(*) FROM {}", t.table()), [], |r| r.get(0))?;
      stats.requests.push((t, n as usize));
    }

    let mut stmt = self
      .conn
      .prepare("SELECT state, COUNT(*) FROM disposal GROUP BY state ORDER BY state")?;
    let rows = stmt
      .query_map([], |r| Ok((r.get::<_, i64>(0)?, r.get::<_, i64>(1)?)))?
      .collect::<rusqlite::Result<Vec<_>>>()?;
    for (code, n) in rows {
      stats.disposals.push((DisposalState::from_code(code)?, n as usize));
    }

    stats.channels = self
      .conn
      .query_row("SELECT COUNT(*) FROM channel", [], |r| r.get::<_, i64>(0))? as usize;
    Ok(stats)
  }
}

/// Mark the finished parents of the disposals `matching` selects as
/// `DISTRIBUTE`, so the ready sweep sees them again. `matching` binds
/// `?1..=?3`.
fn reopen_parents(
  conn: &Connection,
  t: RequestType,
  matching: &str,
  args: &[&dyn ToSql],
) -> Result<usize> {
  let distribute = DisposalTotalState::Distribute.code();
  let modified = encode_millis(Utc::now());
  let complete = DisposalTotalState::Complete.code();
  let failed = DisposalTotalState::Failed.code();

  let mut values = args.to_vec();
  values.extend([
    &distribute as &dyn ToSql,
    &modified as &dyn ToSql,
    &complete as &dyn ToSql,
    &failed as &dyn ToSql,
  ]);
  let n = conn.execute(
    &format!(
      "UPDATE {} SET disposition = ?4, modified = ?5
       WHERE disposition IN (?6, ?7)
         AND id IN (SELECT parent FROM disposal WHERE {matching})",
      t.table()
    ),
    values.as_slice(),
  )?;
  Ok(n)
}

fn upsert_disposal_row(
  conn:    &Connection,
  t:       RequestType,
  id:      i64,
  channel: &str,
  state:   DisposalState,
) -> Result<()> {
  conn.execute(
    "INSERT INTO disposal (type, parent, channel, state) VALUES (?1, ?2, ?3, ?4)
     ON CONFLICT(type, parent, channel) DO UPDATE SET state = excluded.state",
    params![t.code(), id, channel, state.code()],
  )?;
  Ok(())
}
