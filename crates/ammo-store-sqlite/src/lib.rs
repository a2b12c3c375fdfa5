//! SQLite disposition ledger for the AMMO distributor.
//!
//! Owns one synchronous [`rusqlite::Connection`]. The coordinator thread is
//! the only writer, so the store needs no locking of its own.

mod encode;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::{CORRUPTED_NAME, ChannelRecord, DistributorStore, GcReport, LedgerStats};

#[cfg(test)]
mod tests;
