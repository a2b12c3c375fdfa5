//! The channel collaborator: live status and asynchronous send.

use ammo_core::{channel::ChannelStatus, disposal::DisposalState};
use bytes::Bytes;

/// Invoked by a channel once it knows what became of a send.
pub type AckHandler = Box<dyn FnOnce(&str, DisposalState) + Send>;

/// Transport-side view of the network channels.
///
/// `send` must not block on the network: it hands the frame over and
/// reports the state the channel accepted it in (typically `QUEUED`, or
/// `BUSY` when its own queue is full). The final outcome arrives later
/// through `on_ack`.
pub trait Channels: Send + Sync {
  fn check_status(&self, channel: &str) -> ChannelStatus;

  fn send(&self, channel: &str, frame: Bytes, on_ack: AckHandler) -> DisposalState;
}
