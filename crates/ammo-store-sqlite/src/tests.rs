//! Integration tests for `DistributorStore` against an in-memory database.

use ammo_core::{
  channel::ChannelState,
  dispersal::Dispersal,
  disposal::{DisposalState, DisposalTotalState},
  notice::{Notice, Via},
  request::{Continuity, Detail, Request, RequestType, RetrievalQuery, priority},
};
use chrono::{TimeDelta, Utc};

use crate::{CORRUPTED_NAME, DistributorStore};

fn store() -> DistributorStore {
  DistributorStore::open_in_memory().expect("in-memory store")
}

fn postal(topic: &str, provider: &str) -> Request {
  Request::new(Detail::Postal, topic, provider)
}

fn subscribe(topic: &str) -> Request {
  Request::new(Detail::Subscribe { selection: Some("x > 1".into()) }, topic, "content://sub")
}

fn dispersal(channels: &[(&str, DisposalState)]) -> Dispersal {
  Dispersal::new(None).restore(channels.iter().copied())
}

// ─── Upsert ──────────────────────────────────────────────────────────────────

#[test]
fn upsert_and_get_round_trip() {
  let s = store();
  let mut req = postal("ammo/gps", "content://gps/1");
  req.payload = Some(vec![1, 2, 3]);
  req.auid = Some("app-7".into());
  req.channel_filter = Some("gw".into());
  req.notice = Notice { at_send: Via::LOG, ..Notice::default() };
  req.expiration = Utc::now() + TimeDelta::hours(1);

  let id = s.upsert(&req, &dispersal(&[("gw", DisposalState::Pending)])).unwrap();
  let back = s.get(RequestType::Postal, id).unwrap().unwrap();

  assert_eq!(back.id, Some(id));
  assert_eq!(back.uuid, req.uuid);
  assert_eq!(back.payload, req.payload);
  assert_eq!(back.auid, req.auid);
  assert_eq!(back.channel_filter.as_deref(), Some("gw"));
  assert_eq!(back.notice, req.notice);
  assert_eq!(back.expiration.timestamp_millis(), req.expiration.timestamp_millis());
  assert_eq!(back.disposition, DisposalTotalState::New);

  let by_uuid = s.get_by_uuid(RequestType::Postal, req.uuid).unwrap().unwrap();
  assert_eq!(by_uuid.id, Some(id));
}

#[test]
fn upsert_is_idempotent_on_natural_key() {
  let s = store();
  let channels = dispersal(&[("ch1", DisposalState::Pending), ("ch2", DisposalState::Pending)]);

  let mut first = postal("ammo/msg", "content://msg/1");
  first.payload = Some(b"first".to_vec());
  let id1 = s.upsert(&first, &channels).unwrap();

  let mut second = postal("ammo/msg", "content://msg/1");
  second.payload = Some(b"second".to_vec());
  let id2 = s.upsert(&second, &channels).unwrap();

  assert_eq!(id1, id2);
  let rows = s.list(RequestType::Postal).unwrap();
  assert_eq!(rows.len(), 1);
  assert_eq!(rows[0].payload.as_deref(), Some(&b"second"[..]));
  assert_eq!(s.disposals(RequestType::Postal, id1).unwrap().len(), 2);
}

#[test]
fn retrieval_key_includes_uuid() {
  let s = store();
  let query = RetrievalQuery {
    projection: Some("a,b".into()),
    selection:  Some("a = ?".into()),
    args:       Some("1".into()),
    ordering:   Some("a DESC".into()),
    limit:      Some(20),
    continuity: Continuity::Temporal(60),
  };
  let a = Request::new(Detail::Retrieval(query.clone()), "ammo/pull", "content://p");
  let b = Request::new(Detail::Retrieval(query.clone()), "ammo/pull", "content://p");

  let empty = Dispersal::new(None);
  let id_a = s.upsert(&a, &empty).unwrap();
  let id_b = s.upsert(&b, &empty).unwrap();
  assert_ne!(id_a, id_b);

  let back = s.get(RequestType::Retrieval, id_a).unwrap().unwrap();
  assert_eq!(back.detail, Detail::Retrieval(query));
}

// ─── Ready query ─────────────────────────────────────────────────────────────

#[test]
fn ready_requires_an_active_channel() {
  let s = store();
  let id = s.upsert(&postal("t", "p"), &dispersal(&[("gw", DisposalState::Pending)])).unwrap();

  assert!(s.query_ready(RequestType::Postal).unwrap().is_empty());

  s.upsert_channel("gw", ChannelState::Inactive).unwrap();
  assert!(s.query_ready(RequestType::Postal).unwrap().is_empty());

  s.upsert_channel("gw", ChannelState::Active).unwrap();
  let ready = s.query_ready(RequestType::Postal).unwrap();
  assert_eq!(ready.len(), 1);
  assert_eq!(ready[0].id, Some(id));

  s.upsert_disposal(RequestType::Postal, id, "gw", DisposalState::Sent).unwrap();
  assert!(s.query_ready(RequestType::Postal).unwrap().is_empty());
}

#[test]
fn ready_is_ordered_by_priority_then_age() {
  let s = store();
  s.upsert_channel("gw", ChannelState::Active).unwrap();
  let pending = dispersal(&[("gw", DisposalState::Busy)]);

  let mut ids = Vec::new();
  for (provider, p) in [("a", priority::NORMAL), ("b", priority::URGENT), ("c", priority::NORMAL)] {
    let mut req = postal("t", provider);
    req.priority = p;
    ids.push(s.upsert(&req, &pending).unwrap());
  }

  let order: Vec<_> = s
    .query_ready(RequestType::Postal)
    .unwrap()
    .into_iter()
    .map(|r| r.id.unwrap())
    .collect();
  assert_eq!(order, vec![ids[1], ids[0], ids[2]]);
}

#[test]
fn told_is_outstanding_only_for_postal() {
  let s = store();
  s.upsert_channel("gw", ChannelState::Active).unwrap();
  let told = dispersal(&[("gw", DisposalState::Told)]);

  s.upsert(&postal("t", "p"), &told).unwrap();
  s.upsert(&subscribe("t"), &told).unwrap();

  assert_eq!(s.query_ready(RequestType::Postal).unwrap().len(), 1);
  assert!(s.query_ready(RequestType::Subscribe).unwrap().is_empty());
}

#[test]
fn complete_requests_wait_only_on_told_rows() {
  let s = store();
  s.upsert_channel("gw", ChannelState::Active).unwrap();
  s.upsert_channel("mc", ChannelState::Active).unwrap();

  let mut done = postal("t", "left-over");
  done.disposition = DisposalTotalState::Complete;
  s.upsert(&done, &dispersal(&[("gw", DisposalState::Sent), ("mc", DisposalState::Pending)]))
    .unwrap();
  assert!(s.query_ready(RequestType::Postal).unwrap().is_empty());

  let mut told = postal("t", "unconfirmed");
  told.disposition = DisposalTotalState::Complete;
  let id = s.upsert(&told, &dispersal(&[("gw", DisposalState::Told)])).unwrap();
  let ready = s.query_ready(RequestType::Postal).unwrap();
  assert_eq!(ready.len(), 1);
  assert_eq!(ready[0].id, Some(id));
}

// ─── Channel resets ──────────────────────────────────────────────────────────

#[test]
fn deactivate_resets_only_subscriptions() {
  let s = store();
  let sent = dispersal(&[("ch1", DisposalState::Sent), ("ch2", DisposalState::Sent)]);

  let post = s.upsert(&postal("t", "p"), &sent).unwrap();
  let pull = s
    .upsert(&Request::new(Detail::Retrieval(RetrievalQuery::default()), "t", "p"), &sent)
    .unwrap();
  let sub = s.upsert(&subscribe("t"), &sent).unwrap();
  let bad = s
    .upsert(&subscribe("u"), &dispersal(&[("ch1", DisposalState::Bad)]))
    .unwrap();

  assert_eq!(s.deactivate_by_channel("ch1").unwrap(), 1);

  let state = |t, id, ch: &str| {
    s.disposals(t, id)
      .unwrap()
      .into_iter()
      .find(|(c, _)| c == ch)
      .map(|(_, st)| st)
      .unwrap()
  };
  assert_eq!(state(RequestType::Subscribe, sub, "ch1"), DisposalState::Pending);
  assert_eq!(state(RequestType::Subscribe, sub, "ch2"), DisposalState::Sent);
  assert_eq!(state(RequestType::Postal, post, "ch1"), DisposalState::Sent);
  assert_eq!(state(RequestType::Retrieval, pull, "ch1"), DisposalState::Sent);
  assert_eq!(state(RequestType::Subscribe, bad, "ch1"), DisposalState::Bad);
}

#[test]
fn repair_resets_bad_rows_on_one_channel() {
  let s = store();
  let id = s
    .upsert(
      &postal("t", "p"),
      &dispersal(&[("ch1", DisposalState::Bad), ("ch2", DisposalState::Bad)]),
    )
    .unwrap();

  assert_eq!(s.repair_by_channel("ch1").unwrap(), 1);
  assert_eq!(
    s.disposals(RequestType::Postal, id).unwrap(),
    vec![("ch1".to_owned(), DisposalState::Pending), ("ch2".to_owned(), DisposalState::Bad)]
  );
}

#[test]
fn channel_resets_reopen_finished_requests() {
  let s = store();
  s.upsert_channel("ch1", ChannelState::Active).unwrap();

  let mut sub = subscribe("t");
  sub.disposition = DisposalTotalState::Complete;
  let sub = s.upsert(&sub, &dispersal(&[("ch1", DisposalState::Sent)])).unwrap();
  let mut post = postal("t", "p");
  post.disposition = DisposalTotalState::Failed;
  let post = s
    .upsert(&post, &dispersal(&[("ch1", DisposalState::Bad), ("ch2", DisposalState::Sent)]))
    .unwrap();
  let mut other = postal("t", "elsewhere");
  other.disposition = DisposalTotalState::Complete;
  let other = s.upsert(&other, &dispersal(&[("ch2", DisposalState::Bad)])).unwrap();

  let disposition = |t, id| s.get(t, id).unwrap().unwrap().disposition;

  s.deactivate_by_channel("ch1").unwrap();
  assert_eq!(disposition(RequestType::Subscribe, sub), DisposalTotalState::Distribute);
  assert_eq!(disposition(RequestType::Postal, post), DisposalTotalState::Failed);
  assert_eq!(s.query_ready(RequestType::Subscribe).unwrap().len(), 1);

  s.repair_by_channel("ch1").unwrap();
  assert_eq!(disposition(RequestType::Postal, post), DisposalTotalState::Distribute);
  assert_eq!(disposition(RequestType::Postal, other), DisposalTotalState::Complete);
  assert_eq!(s.query_ready(RequestType::Postal).unwrap().len(), 1);
}

// ─── Deletion ────────────────────────────────────────────────────────────────

#[test]
fn garbage_collect_removes_expired_requests_and_orphans() {
  let s = store();
  let now = Utc::now();
  let channels = dispersal(&[("gw", DisposalState::Pending)]);

  let mut expired = postal("t", "old");
  expired.expiration = now - TimeDelta::minutes(1);
  let old_id = s.upsert(&expired, &channels).unwrap();

  let live_id = s.upsert(&postal("t", "new"), &channels).unwrap();

  // a disposal whose parent never existed
  s.upsert_disposal(RequestType::Retrieval, 999, "gw", DisposalState::Pending).unwrap();

  let report = s.garbage_collect(now).unwrap();
  assert_eq!(report.requests, 1);
  assert_eq!(report.disposals, 1);

  assert!(s.get(RequestType::Postal, old_id).unwrap().is_none());
  assert!(s.disposals(RequestType::Postal, old_id).unwrap().is_empty());
  assert!(s.disposals(RequestType::Retrieval, 999).unwrap().is_empty());
  assert_eq!(s.disposals(RequestType::Postal, live_id).unwrap().len(), 1);
}

#[test]
fn cancel_cascades_to_disposals() {
  let s = store();
  let id = s.upsert(&subscribe("ammo/chat"), &dispersal(&[("gw", DisposalState::Sent)])).unwrap();

  assert_eq!(s.cancel(RequestType::Subscribe, "content://sub", "ammo/chat").unwrap(), 1);
  assert!(s.get(RequestType::Subscribe, id).unwrap().is_none());
  assert!(s.disposals(RequestType::Subscribe, id).unwrap().is_empty());
  assert_eq!(s.cancel(RequestType::Subscribe, "content://sub", "ammo/chat").unwrap(), 0);
}

#[test]
fn purge_clears_one_table() {
  let s = store();
  let channels = dispersal(&[("gw", DisposalState::Pending)]);
  s.upsert(&subscribe("a"), &channels).unwrap();
  s.upsert(&subscribe("b"), &channels).unwrap();
  let post = s.upsert(&postal("a", "p"), &channels).unwrap();

  assert_eq!(s.purge(RequestType::Subscribe).unwrap(), 2);
  assert!(s.list(RequestType::Subscribe).unwrap().is_empty());
  assert_eq!(s.disposals(RequestType::Postal, post).unwrap().len(), 1);
}

// ─── Write-back ──────────────────────────────────────────────────────────────

#[test]
fn update_by_key_writes_aggregate() {
  let s = store();
  let id = s.upsert(&postal("t", "p"), &dispersal(&[("gw", DisposalState::Pending)])).unwrap();

  let outcome = dispersal(&[("gw", DisposalState::Busy), ("mc", DisposalState::Sent)]);
  assert_eq!(
    s.update_by_key(RequestType::Postal, id, &outcome).unwrap(),
    DisposalTotalState::Incomplete
  );
  let back = s.get(RequestType::Postal, id).unwrap().unwrap();
  assert_eq!(back.disposition, DisposalTotalState::Incomplete);
  assert_eq!(s.disposals(RequestType::Postal, id).unwrap().len(), 2);

  assert!(s.update_by_key(RequestType::Postal, id + 1, &outcome).is_err());
}

#[test]
fn subscribe_lookup_by_topic_returns_newest() {
  let s = store();
  let empty = Dispersal::new(None);
  s.upsert(&subscribe("ammo/chat"), &empty).unwrap();
  let mut newer = subscribe("ammo/chat");
  newer.provider = "content://other".into();
  let newer_id = s.upsert(&newer, &empty).unwrap();

  let found = s.get_subscribe_by_topic("ammo/chat").unwrap().unwrap();
  assert_eq!(found.id, Some(newer_id));
  assert_eq!(found.selection(), Some("x > 1"));
  assert!(s.get_subscribe_by_topic("ammo/none").unwrap().is_none());
}

// ─── Channels & stats ────────────────────────────────────────────────────────

#[test]
fn channel_records_upsert() {
  let s = store();
  s.upsert_channel("gw", ChannelState::Active).unwrap();
  s.upsert_channel("mc", ChannelState::Busy).unwrap();
  s.upsert_channel("gw", ChannelState::Inactive).unwrap();

  let channels = s.channels().unwrap();
  assert_eq!(channels.len(), 2);
  assert_eq!(s.channel_state("gw").unwrap(), Some(ChannelState::Inactive));
  assert_eq!(s.channel_state("nope").unwrap(), None);
}

#[test]
fn stats_count_rows() {
  let s = store();
  s.upsert(&postal("t", "p"), &dispersal(&[("gw", DisposalState::Sent)])).unwrap();
  s.upsert(&subscribe("t"), &dispersal(&[("gw", DisposalState::Pending)])).unwrap();
  s.upsert_channel("gw", ChannelState::Active).unwrap();

  let stats = s.stats().unwrap();
  assert!(stats.requests.contains(&(RequestType::Postal, 1)));
  assert!(stats.requests.contains(&(RequestType::Retrieval, 0)));
  assert!(stats.disposals.contains(&(DisposalState::Sent, 1)));
  assert_eq!(stats.channels, 1);
}

// ─── Recovery ────────────────────────────────────────────────────────────────

#[test]
fn corrupt_ledger_is_archived_and_recreated() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("distributor.db");
  std::fs::write(&path, vec![0xAB; 4096]).unwrap();

  assert!(DistributorStore::open(&path).unwrap_err().is_corruption());

  let s = DistributorStore::open_or_recover(&path).unwrap();
  assert!(dir.path().join(CORRUPTED_NAME).exists());
  s.upsert(&postal("t", "p"), &Dispersal::new(None)).unwrap();
  assert_eq!(s.list(RequestType::Postal).unwrap().len(), 1);
}

#[test]
fn ledger_survives_reopen() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("distributor.db");

  let id = {
    let s = DistributorStore::open(&path).unwrap();
    s.upsert(&postal("t", "p"), &dispersal(&[("gw", DisposalState::Pending)])).unwrap()
  };

  let s = DistributorStore::open_or_recover(&path).unwrap();
  assert!(s.get(RequestType::Postal, id).unwrap().is_some());
  assert!(!dir.path().join(CORRUPTED_NAME).exists());
}
