//! Runtime configuration, deserialised from `ammo.toml` and `AMMO_*`
//! environment variables.

use std::{path::PathBuf, time::Duration};

use ammo_core::policy::DEFAULT_CHANNEL;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DistributorConfig {
  /// Ledger database file.
  pub store_path:            PathBuf,
  /// XML routing policy; without one every topic uses the default rule.
  pub policy_path:           Option<PathBuf>,
  /// Channel named by the default rule.
  pub default_channel:       String,
  /// Identity stamped on outbound envelopes.
  pub device_id:             String,
  pub operator_id:           String,
  pub queue_capacity:        usize,
  pub offer_timeout_ms:      u64,
  pub idle_wait_ms:          u64,
  pub gc_initial_delay_secs: u64,
  pub gc_interval_secs:      u64,
  pub pool_size:             usize,
}

impl Default for DistributorConfig {
  fn default() -> Self {
    Self {
      store_path:            PathBuf::from("ammo.db"),
      policy_path:           None,
      default_channel:       DEFAULT_CHANNEL.to_owned(),
      device_id:             "ammo-device".to_owned(),
      operator_id:           "ammo-operator".to_owned(),
      queue_capacity:        200,
      offer_timeout_ms:      2000,
      idle_wait_ms:          20_000,
      gc_initial_delay_secs: 3600,
      gc_interval_secs:      600,
      pool_size:             4,
    }
  }
}

impl DistributorConfig {
  pub fn offer_timeout(&self) -> Duration { Duration::from_millis(self.offer_timeout_ms) }

  pub fn idle_wait(&self) -> Duration { Duration::from_millis(self.idle_wait_ms) }

  pub fn gc_initial_delay(&self) -> Duration { Duration::from_secs(self.gc_initial_delay_secs) }

  pub fn gc_interval(&self) -> Duration { Duration::from_secs(self.gc_interval_secs) }
}
