//! Priority-ordered worker pool for inbound payloads.
//!
//! Tasks drain highest priority first and FIFO within a priority. When the
//! backlog is at capacity the submitting thread runs the task itself, which
//! slows the coordinator down instead of dropping inbound data.

use std::{
  cmp::Ordering,
  collections::BinaryHeap,
  sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
  thread::{self, JoinHandle},
  time::Duration,
};

use ammo_codec::Codec;
use ammo_core::{
  policy::Encoding,
  request::{Detail, Request},
};
use bytes::Bytes;
use chrono::{TimeDelta, Utc};

use crate::{
  Result,
  coordinator::DistributorHandle,
  request::AppRequest,
  stats::DistributorStats,
  tuple_store::TupleStore,
};

/// How long a relayed post stays eligible for delivery.
const RELAY_LIFESPAN_MS: i64 = 1000;

#[derive(Debug, Clone, PartialEq)]
pub enum Task {
  /// Decode a payload and insert it under `provider`.
  ToStore { provider: String, topic: String, encoding: Encoding, payload: Bytes },
  /// Decode a payload and post it onward, skipping the channel it came from.
  ToReroute { topic: String, encoding: Encoding, payload: Bytes, arrived_on: String },
}

/// Where a task is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Runner {
  Worker,
  /// The submitting thread, because the backlog was full.
  Caller,
}

/// Executes tasks, on a worker or on the submitting thread.
pub trait TaskHandler: Send + Sync {
  fn handle(&self, priority: i32, task: Task, runner: Runner);
}

// ─── Queue ───────────────────────────────────────────────────────────────────

struct Queued {
  priority: i32,
  seq:      u64,
  task:     Task,
}

impl Ord for Queued {
  fn cmp(&self, other: &Self) -> Ordering {
    self.priority.cmp(&other.priority).then_with(|| other.seq.cmp(&self.seq))
  }
}

impl PartialOrd for Queued {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> { Some(self.cmp(other)) }
}

impl PartialEq for Queued {
  fn eq(&self, other: &Self) -> bool { self.cmp(other) == Ordering::Equal }
}

impl Eq for Queued {}

/// Max-heap on `(priority, -arrival)`.
#[derive(Default)]
pub(crate) struct TaskQueue {
  heap:     BinaryHeap<Queued>,
  next_seq: u64,
}

impl TaskQueue {
  pub(crate) fn push(&mut self, priority: i32, task: Task) {
    let seq = self.next_seq;
    self.next_seq += 1;
    self.heap.push(Queued { priority, seq, task });
  }

  pub(crate) fn pop(&mut self) -> Option<(i32, Task)> {
    self.heap.pop().map(|q| (q.priority, q.task))
  }

  pub(crate) fn len(&self) -> usize { self.heap.len() }
}

// ─── Pool ────────────────────────────────────────────────────────────────────

struct Shared {
  state:    Mutex<PoolState>,
  ready:    Condvar,
  capacity: usize,
  handler:  Arc<dyn TaskHandler>,
  stats:    Arc<DistributorStats>,
}

#[derive(Default)]
struct PoolState {
  queue:    TaskQueue,
  shutdown: bool,
}

impl Shared {
  fn lock(&self) -> MutexGuard<'_, PoolState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

pub struct DeserializerPool {
  shared:  Arc<Shared>,
  workers: Vec<JoinHandle<()>>,
}

impl DeserializerPool {
  pub fn new(
    size: usize,
    capacity: usize,
    handler: Arc<dyn TaskHandler>,
    stats: Arc<DistributorStats>,
  ) -> Result<Self> {
    let shared = Arc::new(Shared {
      state: Mutex::new(PoolState::default()),
      ready: Condvar::new(),
      capacity: capacity.max(1),
      handler,
      stats,
    });

    let workers = (0..size)
      .map(|i| {
        let shared = Arc::clone(&shared);
        thread::Builder::new()
          .name(format!("ammo-deserializer-{i}"))
          .spawn(move || work(&shared))
      })
      .collect::<std::io::Result<Vec<_>>>()?;

    tracing::debug!(size, capacity, "deserializer pool started");
    Ok(Self { shared, workers })
  }

  pub fn submit(&self, priority: i32, task: Task) {
    let mut state = self.shared.lock();
    if state.shutdown || state.queue.len() >= self.shared.capacity {
      drop(state);
      self.shared.stats.caller_ran();
      tracing::debug!(priority, "deserializer pool saturated, running on caller");
      self.shared.handler.handle(priority, task, Runner::Caller);
      return;
    }
    state.queue.push(priority, task);
    drop(state);
    self.shared.ready.notify_one();
  }

  pub fn backlog(&self) -> usize { self.shared.lock().queue.len() }

  /// Let workers finish the backlog, then join them.
  pub fn shutdown(&mut self) {
    self.shared.lock().shutdown = true;
    self.shared.ready.notify_all();
    for worker in self.workers.drain(..) {
      if worker.join().is_err() {
        tracing::error!("deserializer worker panicked");
      }
    }
  }
}

impl Drop for DeserializerPool {
  fn drop(&mut self) { self.shutdown(); }
}

fn work(shared: &Shared) {
  loop {
    let next = {
      let mut state = shared.lock();
      loop {
        if let Some(item) = state.queue.pop() {
          break Some(item);
        }
        if state.shutdown {
          break None;
        }
        state = shared.ready.wait(state).unwrap_or_else(PoisonError::into_inner);
      }
    };
    match next {
      Some((priority, task)) => shared.handler.handle(priority, task, Runner::Worker),
      None => return,
    }
  }
}

// ─── TupleWriter ─────────────────────────────────────────────────────────────

/// The production handler: writes into the tuple store and feeds relayed
/// posts back to the coordinator. Never touches the ledger.
pub struct TupleWriter {
  tuples: Arc<dyn TupleStore>,
  codec:  Codec,
  handle: DistributorHandle,
  stats:  Arc<DistributorStats>,
}

impl TupleWriter {
  pub fn new(
    tuples: Arc<dyn TupleStore>,
    codec: Codec,
    handle: DistributorHandle,
    stats: Arc<DistributorStats>,
  ) -> Self {
    Self { tuples, codec, handle, stats }
  }

  fn store(&self, provider: &str, topic: &str, encoding: &Encoding, payload: &[u8]) -> Result<()> {
    let schema = self.tuples.fields_for(topic)?;
    let (tuple, _) = self.codec.deserialize(payload, encoding, &schema)?;
    let row = self.tuples.insert(provider, tuple)?;
    self.stats.deserialized();
    tracing::info!(provider, topic, %row, "inserted received tuple");
    Ok(())
  }

  fn reroute(
    &self,
    priority: i32,
    topic: &str,
    encoding: &Encoding,
    payload: &[u8],
    arrived_on: String,
    runner: Runner,
  ) -> Result<()> {
    let schema = self.tuples.fields_for(topic)?;
    let (tuple, _) = self.codec.deserialize(payload, encoding, &schema)?;
    let content = self.codec.serialize(&tuple, &Encoding::Json, &schema)?;

    let mut request = Request::new(Detail::Postal, topic, "");
    request.provider = format!("relay:{}", request.uuid);
    request.payload = Some(content);
    request.priority = priority;
    request.expiration = Utc::now() + TimeDelta::milliseconds(RELAY_LIFESPAN_MS);

    tracing::debug!(topic, %arrived_on, "relaying received tuple");
    let relay = AppRequest::Relay { request, arrived_on };
    match runner {
      Runner::Worker => self.handle.submit(relay),
      // on the coordinator thread, which is the only consumer of its own queue
      Runner::Caller => self.handle.submit_within(relay, Duration::ZERO),
    }
  }
}

impl TaskHandler for TupleWriter {
  fn handle(&self, priority: i32, task: Task, runner: Runner) {
    let result = match task {
      Task::ToStore { provider, topic, encoding, payload } => {
        self.store(&provider, &topic, &encoding, &payload)
      }
      Task::ToReroute { topic, encoding, payload, arrived_on } => {
        self.reroute(priority, &topic, &encoding, &payload, arrived_on, runner)
      }
    };
    if let Err(e) = result {
      tracing::error!(error = %e, "deserialization task failed");
    }
  }
}

#[cfg(test)]
mod tests {
  use std::time::Instant;

  use super::*;

  fn task(n: u8) -> Task {
    Task::ToStore {
      provider: format!("p{n}"),
      topic:    "t".into(),
      encoding: Encoding::Json,
      payload:  Bytes::new(),
    }
  }

  fn provider(task: &Task) -> String {
    match task {
      Task::ToStore { provider, .. } => provider.clone(),
      Task::ToReroute { arrived_on, .. } => arrived_on.clone(),
    }
  }

  #[derive(Default)]
  struct Recorder {
    seen: Mutex<Vec<(i32, String, String)>>,
  }

  impl TaskHandler for Recorder {
    fn handle(&self, priority: i32, task: Task, runner: Runner) {
      let thread = match runner {
        Runner::Worker => thread::current().name().unwrap_or_default().to_owned(),
        Runner::Caller => "caller".to_owned(),
      };
      self.seen.lock().unwrap().push((priority, provider(&task), thread));
    }
  }

  #[test]
  fn drains_by_priority_then_arrival() {
    let mut queue = TaskQueue::default();
    for (i, p) in [5, 1, 5, 3].into_iter().enumerate() {
      queue.push(p, task(i as u8));
    }

    let order: Vec<_> = std::iter::from_fn(|| queue.pop()).map(|(_, t)| provider(&t)).collect();
    assert_eq!(order, ["p0", "p2", "p3", "p1"]);
  }

  #[test]
  fn saturated_pool_runs_on_the_caller() {
    let recorder = Arc::new(Recorder::default());
    let stats = Arc::new(DistributorStats::default());
    // no workers: the backlog never drains
    let pool = DeserializerPool::new(0, 1, recorder.clone(), stats.clone()).unwrap();

    pool.submit(1, task(0));
    pool.submit(1, task(1));

    assert_eq!(pool.backlog(), 1);
    let seen = recorder.seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].1, "p1");
    assert_eq!(seen[0].2, "caller");
    assert_eq!(stats.snapshot().caller_runs, 1);
  }

  #[test]
  fn workers_drain_the_backlog() {
    let recorder = Arc::new(Recorder::default());
    let stats = Arc::new(DistributorStats::default());
    let mut pool = DeserializerPool::new(2, 16, recorder.clone(), stats).unwrap();

    for i in 0..8 {
      pool.submit(i, task(i as u8));
    }

    let deadline = Instant::now() + Duration::from_secs(5);
    while recorder.seen.lock().unwrap().len() < 8 && Instant::now() < deadline {
      thread::sleep(Duration::from_millis(5));
    }
    pool.shutdown();

    let seen = recorder.seen.lock().unwrap();
    assert_eq!(seen.len(), 8);
    assert!(seen.iter().all(|(_, _, thread)| thread.starts_with("ammo-deserializer-")));
  }
}
