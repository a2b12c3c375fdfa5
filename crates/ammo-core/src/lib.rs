//! Core types for the AMMO store-and-forward distributor.
//!
//! Holds the routing policy and its DNF dispersal evaluator, the disposition
//! and channel state enums shared with the ledger, the tuple model consumed by
//! the codecs, and the notice model. Free of database and wire dependencies.

pub mod channel;
pub mod disposal;
pub mod dispersal;
pub mod error;
pub mod notice;
pub mod policy;
pub mod policy_xml;
pub mod request;
pub mod tuple;

pub use error::{Error, Result};
