//! Which devices and operators have been heard from, and what they
//! subscribe to.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Presence {
  pub device:      String,
  pub operator:    String,
  pub first_seen:  DateTime<Utc>,
  pub latest_seen: DateTime<Utc>,
  pub count:       u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Capability {
  pub device:      String,
  pub operator:    String,
  pub topic:       String,
  pub first_seen:  DateTime<Utc>,
  pub latest_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PresenceSnapshot {
  pub presence:     Vec<Presence>,
  pub capabilities: Vec<Capability>,
}

#[derive(Debug, Default)]
pub struct PresenceRegistry {
  presence:     HashMap<(String, String), Presence>,
  capabilities: HashMap<(String, String, String), Capability>,
}

impl PresenceRegistry {
  pub fn seen(&mut self, device: &str, operator: &str, at: DateTime<Utc>) {
    self
      .presence
      .entry((device.to_owned(), operator.to_owned()))
      .and_modify(|p| {
        p.latest_seen = at;
        p.count += 1;
      })
      .or_insert_with(|| Presence {
        device:      device.to_owned(),
        operator:    operator.to_owned(),
        first_seen:  at,
        latest_seen: at,
        count:       1,
      });
  }

  pub fn subscribed(&mut self, device: &str, operator: &str, topic: &str, at: DateTime<Utc>) {
    self
      .capabilities
      .entry((device.to_owned(), operator.to_owned(), topic.to_owned()))
      .and_modify(|c| c.latest_seen = at)
      .or_insert_with(|| Capability {
        device:      device.to_owned(),
        operator:    operator.to_owned(),
        topic:       topic.to_owned(),
        first_seen:  at,
        latest_seen: at,
      });
  }

  /// Entries sorted by device, then operator (then topic).
  pub fn snapshot(&self) -> PresenceSnapshot {
    let mut presence: Vec<_> = self.presence.values().cloned().collect();
    presence.sort_by(|a, b| (&a.device, &a.operator).cmp(&(&b.device, &b.operator)));
    let mut capabilities: Vec<_> = self.capabilities.values().cloned().collect();
    capabilities.sort_by(|a, b| {
      (&a.device, &a.operator, &a.topic).cmp(&(&b.device, &b.operator, &b.topic))
    });
    PresenceSnapshot { presence, capabilities }
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeDelta;

  use super::*;

  #[test]
  fn repeat_sightings_accumulate() {
    let t0 = Utc::now();
    let t1 = t0 + TimeDelta::seconds(5);
    let mut reg = PresenceRegistry::default();
    reg.seen("dev-a", "op", t0);
    reg.seen("dev-a", "op", t1);
    reg.seen("dev-b", "op", t1);

    let snap = reg.snapshot();
    assert_eq!(snap.presence.len(), 2);
    assert_eq!(snap.presence[0].device, "dev-a");
    assert_eq!(snap.presence[0].count, 2);
    assert_eq!(snap.presence[0].first_seen, t0);
    assert_eq!(snap.presence[0].latest_seen, t1);
  }

  #[test]
  fn capabilities_are_per_topic() {
    let now = Utc::now();
    let mut reg = PresenceRegistry::default();
    reg.subscribed("dev-a", "op", "ammo/b", now);
    reg.subscribed("dev-a", "op", "ammo/a", now);
    reg.subscribed("dev-a", "op", "ammo/a", now);

    let topics: Vec<_> = reg.snapshot().capabilities.into_iter().map(|c| c.topic).collect();
    assert_eq!(topics, ["ammo/a", "ammo/b"]);
  }
}
