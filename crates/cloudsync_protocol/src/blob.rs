//! Remote blob formats.
//!
//! The remote store holds one init descriptor and a singly-linked chain of
//! patch files. Both are CBOR documents wrapped in a versioned envelope:
//!
//! ```text
//! init:          { format_version, cloud_state: { next_patch_id } }
//! patch/<id>:    { format_version, next_patch_id, changes: [EntityChange] }
//! ```
//!
//! A patch file's `next_patch_id` is the name of the file that follows it in
//! the chain.

use crate::error::{ProtocolError, ProtocolResult};
use crate::patch::Patch;
use crate::state::CloudState;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Version of the blob format written by this build.
pub const FORMAT_VERSION: u16 = 1;

/// The bootstrap descriptor: the chain's first slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitFile {
    /// Format version of this blob.
    pub format_version: u16,
    /// Position of the first patch file.
    pub cloud_state: CloudState,
}

impl InitFile {
    /// Creates a descriptor for a new chain.
    pub fn new(cloud_state: CloudState) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            cloud_state,
        }
    }

    /// Encodes to CBOR bytes.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        encode_cbor(self)
    }

    /// Decodes from CBOR bytes, rejecting unknown format versions.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        let file: Self = decode_cbor(bytes)?;
        check_version(file.format_version)?;
        Ok(file)
    }
}

/// One link of the remote chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchFile {
    /// Format version of this blob.
    pub format_version: u16,
    /// Name of the patch file that follows this one.
    pub next_patch_id: String,
    /// Changes carried by this file.
    pub changes: Patch,
}

impl PatchFile {
    /// Creates a patch file pointing forward to `next_patch_id`.
    pub fn new(changes: Patch, next_patch_id: impl Into<String>) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            next_patch_id: next_patch_id.into(),
            changes,
        }
    }

    /// Encodes to CBOR bytes.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        encode_cbor(self)
    }

    /// Decodes from CBOR bytes, rejecting unknown format versions and
    /// duplicate changes.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        let file: Self = decode_cbor(bytes)?;
        check_version(file.format_version)?;
        Ok(file)
    }
}

fn encode_cbor<T: Serialize>(value: &T) -> ProtocolResult<Vec<u8>> {
    let mut bytes = Vec::new();
    ciborium::into_writer(value, &mut bytes)
        .map_err(|e| ProtocolError::Encoding(e.to_string()))?;
    Ok(bytes)
}

fn decode_cbor<T: DeserializeOwned>(bytes: &[u8]) -> ProtocolResult<T> {
    ciborium::from_reader(bytes).map_err(|e| ProtocolError::Decoding(e.to_string()))
}

fn check_version(found: u16) -> ProtocolResult<()> {
    if found == FORMAT_VERSION {
        Ok(())
    } else {
        Err(ProtocolError::UnsupportedVersion {
            found,
            supported: FORMAT_VERSION,
        })
    }
}
