//! Tuple serialization and gateway wire framing for AMMO.
//!
//! Converts [`ammo_core::tuple::Tuple`]s to and from bytes in the encodings a
//! routing literal can name, and frames those bytes for the gateway link.
//! Pure synchronous; no database or thread dependencies.
//!
//! # Quick start
//!
//! ```no_run
//! use ammo_codec::Codec;
//! use ammo_core::{
//!   policy::Encoding,
//!   tuple::{FieldType, Schema, Tuple, Value},
//! };
//!
//! let schema = Schema::new([("name", FieldType::Text)]);
//! let tuple = Tuple::new().with("name", Value::Text("alpha".into()));
//! let bytes = Codec::default().serialize(&tuple, &Encoding::Terse, &schema).unwrap();
//! ```

pub mod blob;
pub mod custom;
pub mod error;
pub mod frame;
pub mod terse;
pub mod verbose;
pub mod wire;

pub use blob::{BlobKind, BlobMap};
pub use custom::{AdaptorRegistry, Codec, CustomAdaptor};
pub use error::{Error, Result};
pub use wire::{Body, Envelope, MessageType};
