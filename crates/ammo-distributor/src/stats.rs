//! Counters shared by the coordinator, its producers and the pool.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct DistributorStats {
  corrupt_packets:   AtomicU64,
  dropped_requests:  AtomicU64,
  dropped_responses: AtomicU64,
  dropped_acks:      AtomicU64,
  caller_runs:       AtomicU64,
  deserialized:      AtomicU64,
}

/// Point-in-time copy of [`DistributorStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
  pub corrupt_packets:   u64,
  pub dropped_requests:  u64,
  pub dropped_responses: u64,
  pub dropped_acks:      u64,
  pub caller_runs:       u64,
  pub deserialized:      u64,
}

impl DistributorStats {
  pub fn snapshot(&self) -> StatsSnapshot {
    StatsSnapshot {
      corrupt_packets:   self.corrupt_packets.load(Ordering::Relaxed),
      dropped_requests:  self.dropped_requests.load(Ordering::Relaxed),
      dropped_responses: self.dropped_responses.load(Ordering::Relaxed),
      dropped_acks:      self.dropped_acks.load(Ordering::Relaxed),
      caller_runs:       self.caller_runs.load(Ordering::Relaxed),
      deserialized:      self.deserialized.load(Ordering::Relaxed),
    }
  }

  pub(crate) fn corrupt_packet(&self) { self.corrupt_packets.fetch_add(1, Ordering::Relaxed); }

  pub(crate) fn dropped_request(&self) { self.dropped_requests.fetch_add(1, Ordering::Relaxed); }

  pub(crate) fn dropped_response(&self) { self.dropped_responses.fetch_add(1, Ordering::Relaxed); }

  pub(crate) fn dropped_ack(&self) { self.dropped_acks.fetch_add(1, Ordering::Relaxed); }

  pub(crate) fn caller_ran(&self) { self.caller_runs.fetch_add(1, Ordering::Relaxed); }

  pub(crate) fn deserialized(&self) { self.deserialized.fetch_add(1, Ordering::Relaxed); }
}
