//! Per-channel disposal states and the aggregate request disposition.
//!
//! Both enums carry stable integer codes; the codes are what the ledger
//! persists, so they must never be renumbered.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

use crate::{Error, Result, policy::Goal};

// ─── DisposalState ───────────────────────────────────────────────────────────

/// Outcome of considering one channel for one request.
///
/// The codes are single bits so that a set of states can be folded into a
/// mask when aggregating.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  AsRefStr,
  EnumIter,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisposalState {
  /// Recorded before any channel was reachable.
  New,
  /// The channel refused the message (typically because it is down).
  Rejected,
  /// Waiting to be attempted.
  Pending,
  /// Accepted into the channel's send queue.
  Queued,
  /// Written to the wire.
  Sent,
  /// The channel acknowledged the request but has not yet sent it.
  Told,
  /// Confirmed delivered at the far end.
  Delivered,
  /// Failed in a way retrying will not fix.
  Bad,
  /// The channel's send queue was full.
  Busy,
}

impl DisposalState {
  pub const fn code(self) -> i64 {
    match self {
      Self::New => 0x0001,
      Self::Rejected => 0x0002,
      Self::Pending => 0x0004,
      Self::Queued => 0x0008,
      Self::Sent => 0x0010,
      Self::Told => 0x0020,
      Self::Delivered => 0x0040,
      Self::Bad => 0x0080,
      Self::Busy => 0x0100,
    }
  }

  pub fn from_code(code: i64) -> Result<Self> {
    match code {
      0x0001 => Ok(Self::New),
      0x0002 => Ok(Self::Rejected),
      0x0004 => Ok(Self::Pending),
      0x0008 => Ok(Self::Queued),
      0x0010 => Ok(Self::Sent),
      0x0020 => Ok(Self::Told),
      0x0040 => Ok(Self::Delivered),
      0x0080 => Ok(Self::Bad),
      0x0100 => Ok(Self::Busy),
      other => Err(Error::UnknownDisposalState(other)),
    }
  }

  /// Whether this state meets a literal's goal condition.
  ///
  /// `NEW` and `TOLD` satisfy neither goal: the outcome is still open.
  pub fn satisfies(self, goal: Goal) -> bool {
    match self {
      Self::Queued | Self::Sent | Self::Delivered => goal == Goal::Delivered,
      Self::Pending | Self::Rejected | Self::Busy | Self::Bad => {
        goal == Goal::NotDelivered
      }
      Self::New | Self::Told => false,
    }
  }

  /// States for which the evaluator will (re)attempt the channel.
  pub fn is_attemptable(self) -> bool {
    matches!(self, Self::New | Self::Pending | Self::Rejected | Self::Busy)
  }

  /// States the ledger's ready query treats as outstanding work.
  pub fn is_retryable(self) -> bool {
    matches!(self, Self::Rejected | Self::Busy | Self::Pending)
  }
}

// ─── DisposalTotalState ──────────────────────────────────────────────────────

/// Aggregate disposition of a request across all of its channels.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  AsRefStr,
  EnumIter,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisposalTotalState {
  New,
  Distribute,
  Expired,
  Complete,
  Incomplete,
  Failed,
}

impl DisposalTotalState {
  pub const fn code(self) -> i64 {
    match self {
      Self::New => 0x01,
      Self::Distribute => 0x02,
      Self::Expired => 0x04,
      Self::Complete => 0x08,
      Self::Incomplete => 0x10,
      Self::Failed => 0x20,
    }
  }

  pub fn from_code(code: i64) -> Result<Self> {
    match code {
      0x01 => Ok(Self::New),
      0x02 => Ok(Self::Distribute),
      0x04 => Ok(Self::Expired),
      0x08 => Ok(Self::Complete),
      0x10 => Ok(Self::Incomplete),
      0x20 => Ok(Self::Failed),
      other => Err(Error::UnknownDisposition(other)),
    }
  }

  /// Terminal dispositions are never revisited by the ready sweep.
  pub fn is_terminal(self) -> bool {
    matches!(self, Self::Complete | Self::Failed | Self::Expired)
  }
}
