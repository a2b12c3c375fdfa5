//! Channel status, stored channel state, and lifecycle changes.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::{Error, Result, disposal::DisposalState};

/// Live status reported by a channel when the evaluator probes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelStatus {
  Ready,
  Empty,
  Down,
  Full,
}

impl ChannelStatus {
  /// Disposal recorded for a literal whose channel was not `READY`.
  ///
  /// `EMPTY` means the channel exists but has nothing to carry the message
  /// on yet, so the literal stays pending.
  pub fn infer_disposal(self) -> DisposalState {
    match self {
      Self::Ready | Self::Empty => DisposalState::Pending,
      Self::Down => DisposalState::Rejected,
      Self::Full => DisposalState::Busy,
    }
  }
}

/// Channel activity as recorded in the ledger's `channel` table.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelState {
  Active,
  Inactive,
  Busy,
}

impl ChannelState {
  pub const fn code(self) -> i64 {
    match self {
      Self::Active => 1,
      Self::Inactive => 2,
      Self::Busy => 3,
    }
  }

  pub fn from_code(code: i64) -> Result<Self> {
    match code {
      1 => Ok(Self::Active),
      2 => Ok(Self::Inactive),
      3 => Ok(Self::Busy),
      other => Err(Error::UnknownChannelState(other)),
    }
  }
}

/// A lifecycle event reported by a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ChannelChange {
  /// The channel connected and can carry traffic.
  Activate,
  /// The channel disconnected.
  Deactivate,
  /// Operator request to retry everything the channel marked `BAD`.
  Repair,
}

impl ChannelChange {
  /// Stored state after the change is applied.
  pub fn resulting_state(self) -> ChannelState {
    match self {
      Self::Activate | Self::Repair => ChannelState::Active,
      Self::Deactivate => ChannelState::Inactive,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn unavailable_channels_map_to_retryable_states() {
    assert_eq!(ChannelStatus::Down.infer_disposal(), DisposalState::Rejected);
    assert_eq!(ChannelStatus::Full.infer_disposal(), DisposalState::Busy);
    assert_eq!(ChannelStatus::Empty.infer_disposal(), DisposalState::Pending);
  }

  #[test]
  fn change_parses_from_operator_text() {
    assert_eq!("REPAIR".parse::<ChannelChange>().unwrap(), ChannelChange::Repair);
    assert_eq!(ChannelChange::Deactivate.resulting_state(), ChannelState::Inactive);
  }
}
