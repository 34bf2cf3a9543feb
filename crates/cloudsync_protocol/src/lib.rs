//! # CloudSync Protocol
//!
//! Data model and remote blob formats for CloudSync.
//!
//! This crate provides:
//! - `Value` / `Document` for entity payloads
//! - `EntityId` for global entity identity
//! - `EntityChange` (upsert or delete) and `Patch` (deduplicated change set)
//! - `Conflict` for pairing local and remote changes to one entity
//! - `CloudState` / `PullResult` for the device's position in the remote chain
//! - CBOR encoding of the init descriptor and patch files
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod blob;
mod change;
mod conflict;
mod entity;
mod error;
mod patch;
mod state;
mod value;

pub use blob::{InitFile, PatchFile, FORMAT_VERSION};
pub use change::{ChangeKind, EntityChange};
pub use conflict::{Conflict, ConflictResolution};
pub use entity::EntityId;
pub use error::{ProtocolError, ProtocolResult};
pub use patch::Patch;
pub use state::{CloudState, PullResult};
pub use value::{Document, Value, ID_FIELD};
