//! The AMMO distributor.
//!
//! Applications submit posts, retrievals and subscriptions through a
//! [`DistributorHandle`]. A single [`Coordinator`] thread matches each one
//! against the routing [`Policy`], records it in the SQLite ledger, and hands
//! it to whichever [`Channels`] the policy and their live status allow.
//! Inbound frames are decoded on the coordinator and their payloads are
//! deserialized into the [`TupleStore`] by a priority worker pool.

pub mod channel;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod pool;
pub mod presence;
pub mod queue;
pub mod request;
pub mod stats;
pub mod tuple_store;

pub use channel::{AckHandler, Channels};
pub use config::DistributorConfig;
pub use coordinator::{ChannelAck, Collaborators, Coordinator, DistributorHandle};
pub use error::{Error, Result};
pub use request::AppRequest;
pub use tuple_store::{MemoryTupleStore, TupleStore};

use ammo_core::{policy::Policy, policy_xml};

/// The routing policy named by `config`, or an empty policy that routes
/// everything to the default channel.
pub fn load_policy(config: &DistributorConfig) -> Result<Policy> {
  match &config.policy_path {
    Some(path) => {
      let policy = policy_xml::load_policy(path, &config.default_channel)?;
      tracing::info!(path = %path.display(), topics = policy.len(), "loaded routing policy");
      Ok(policy)
    }
    None => {
      tracing::info!(channel = %config.default_channel, "no policy file, routing to the default channel");
      Ok(Policy::new(config.default_channel.clone()))
    }
  }
}
