//! The external tuple store collaborator, plus an in-memory implementation.

use std::{
  collections::HashMap,
  sync::{Mutex, PoisonError},
};

use ammo_core::tuple::{Schema, Tuple};

use crate::{Error, Result};

/// Where application tuples live.
///
/// `provider` is an opaque reference: a postal request points at the tuple
/// to send, a subscription or retrieval at the collection that receives
/// inbound tuples.
pub trait TupleStore: Send + Sync {
  /// Rows under `provider`, optionally narrowed by `selection`. A provider
  /// that no longer exists is [`Error::TupleNotFound`].
  fn query(&self, provider: &str, selection: Option<&str>) -> Result<Vec<Tuple>>;

  /// Store `tuple` under `provider` and return a reference to the new row.
  fn insert(&self, provider: &str, tuple: Tuple) -> Result<String>;

  /// Declared fields for `topic`, in wire order.
  fn fields_for(&self, topic: &str) -> Result<Schema>;

  /// Topic registered under a numeric terse-message code.
  fn topic_for_code(&self, _code: u32) -> Option<String> { None }
}

/// A [`TupleStore`] kept in process memory.
#[derive(Debug, Default)]
pub struct MemoryTupleStore {
  inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
  schemas: HashMap<String, Schema>,
  codes:   HashMap<u32, String>,
  rows:    HashMap<String, Vec<Tuple>>,
}

impl MemoryTupleStore {
  pub fn new() -> Self { Self::default() }

  pub fn define(&self, topic: impl Into<String>, schema: Schema) -> &Self {
    self.lock().schemas.insert(topic.into(), schema);
    self
  }

  pub fn define_code(&self, code: u32, topic: impl Into<String>) -> &Self {
    self.lock().codes.insert(code, topic.into());
    self
  }

  /// Replace the rows under `provider`.
  pub fn put(&self, provider: impl Into<String>, rows: Vec<Tuple>) -> &Self {
    self.lock().rows.insert(provider.into(), rows);
    self
  }

  pub fn remove(&self, provider: &str) { self.lock().rows.remove(provider); }

  pub fn rows(&self, provider: &str) -> Vec<Tuple> {
    self.lock().rows.get(provider).cloned().unwrap_or_default()
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
    self.inner.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

impl TupleStore for MemoryTupleStore {
  fn query(&self, provider: &str, _selection: Option<&str>) -> Result<Vec<Tuple>> {
    self
      .lock()
      .rows
      .get(provider)
      .cloned()
      .ok_or_else(|| Error::TupleNotFound(provider.to_owned()))
  }

  fn insert(&self, provider: &str, tuple: Tuple) -> Result<String> {
    let mut inner = self.lock();
    let rows = inner.rows.entry(provider.to_owned()).or_default();
    rows.push(tuple);
    Ok(format!("{provider}/{}", rows.len()))
  }

  fn fields_for(&self, topic: &str) -> Result<Schema> {
    self
      .lock()
      .schemas
      .get(topic)
      .cloned()
      .ok_or_else(|| Error::UnknownTopic(topic.to_owned()))
  }

  fn topic_for_code(&self, code: u32) -> Option<String> { self.lock().codes.get(&code).cloned() }
}
