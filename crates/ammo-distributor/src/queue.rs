//! Bounded input queues that share one wake-up monitor.
//!
//! Producers block for at most the offer timeout when a queue is full, then
//! give up. Every successful offer signals the [`Monitor`] so the coordinator
//! wakes no matter which queue received work.

use std::{
  collections::VecDeque,
  sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
  time::{Duration, Instant},
};

use crate::{Error, Result};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> { m.lock().unwrap_or_else(PoisonError::into_inner) }

// ─── Monitor ─────────────────────────────────────────────────────────────────

/// A latched signal: a notify that arrives before the wait is not lost.
#[derive(Debug, Default)]
pub struct Monitor {
  signaled: Mutex<bool>,
  cond:     Condvar,
}

impl Monitor {
  pub fn notify(&self) {
    *lock(&self.signaled) = true;
    self.cond.notify_all();
  }

  /// Wait until notified or `timeout` elapses, then clear the signal.
  /// Returns whether a signal was received.
  pub fn wait(&self, timeout: Duration) -> bool {
    let guard = lock(&self.signaled);
    let (mut guard, _) = self
      .cond
      .wait_timeout_while(guard, timeout, |signaled| !*signaled)
      .unwrap_or_else(PoisonError::into_inner);
    std::mem::replace(&mut *guard, false)
  }
}

// ─── BoundedQueue ────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct BoundedQueue<T> {
  name:     &'static str,
  capacity: usize,
  items:    Mutex<VecDeque<T>>,
  not_full: Condvar,
  monitor:  Arc<Monitor>,
}

impl<T> BoundedQueue<T> {
  pub fn new(name: &'static str, capacity: usize, monitor: Arc<Monitor>) -> Self {
    Self {
      name,
      capacity: capacity.max(1),
      items: Mutex::new(VecDeque::with_capacity(capacity)),
      not_full: Condvar::new(),
      monitor,
    }
  }

  pub fn name(&self) -> &'static str { self.name }

  /// Append `item`, waiting up to `timeout` for room.
  pub fn offer(&self, item: T, timeout: Duration) -> Result<()> {
    let deadline = Instant::now() + timeout;
    let mut items = lock(&self.items);
    while items.len() >= self.capacity {
      let left = deadline.saturating_duration_since(Instant::now());
      if left.is_zero() {
        tracing::error!(queue = self.name, capacity = self.capacity, "queue full, dropping");
        return Err(Error::QueueFull(self.name));
      }
      items = self
        .not_full
        .wait_timeout(items, left)
        .unwrap_or_else(PoisonError::into_inner)
        .0;
    }
    items.push_back(item);
    drop(items);
    self.monitor.notify();
    Ok(())
  }

  /// Take the oldest item without blocking.
  pub fn poll(&self) -> Option<T> {
    let item = lock(&self.items).pop_front();
    if item.is_some() {
      self.not_full.notify_one();
    }
    item
  }

  pub fn len(&self) -> usize { lock(&self.items).len() }

  pub fn is_empty(&self) -> bool { self.len() == 0 }
}

#[cfg(test)]
mod tests {
  use std::thread;

  use super::*;

  #[test]
  fn offer_times_out_when_full() {
    let q = BoundedQueue::new("test", 2, Arc::new(Monitor::default()));
    q.offer(1, Duration::ZERO).unwrap();
    q.offer(2, Duration::ZERO).unwrap();

    let err = q.offer(3, Duration::from_millis(20)).unwrap_err();
    assert!(matches!(err, Error::QueueFull("test")));
    assert_eq!(q.poll(), Some(1));
    assert_eq!(q.poll(), Some(2));
    assert_eq!(q.poll(), None);
  }

  #[test]
  fn blocked_offer_resumes_when_drained() {
    let q = Arc::new(BoundedQueue::new("test", 1, Arc::new(Monitor::default())));
    q.offer(1, Duration::ZERO).unwrap();

    let producer = {
      let q = Arc::clone(&q);
      thread::spawn(move || q.offer(2, Duration::from_secs(5)))
    };
    thread::sleep(Duration::from_millis(20));
    assert_eq!(q.poll(), Some(1));
    producer.join().unwrap().unwrap();
    assert_eq!(q.poll(), Some(2));
  }

  #[test]
  fn notify_before_wait_is_latched() {
    let monitor = Monitor::default();
    monitor.notify();
    assert!(monitor.wait(Duration::from_secs(5)));
    assert!(!monitor.wait(Duration::from_millis(10)));
  }

  #[test]
  fn offer_wakes_the_monitor() {
    let monitor = Arc::new(Monitor::default());
    let q = BoundedQueue::new("test", 4, Arc::clone(&monitor));
    q.offer("x", Duration::ZERO).unwrap();
    assert!(monitor.wait(Duration::from_secs(5)));
  }
}
