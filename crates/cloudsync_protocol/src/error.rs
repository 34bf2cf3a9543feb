//! Error types for the protocol crate.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while building patches, conflicts or remote blobs.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    /// The collection name or id of an entity is not usable as an identity.
    #[error("invalid entity id: {reason}")]
    InvalidEntityId {
        /// Why the id was rejected.
        reason: String,
    },

    /// A document has no `_id` field.
    #[error("document in collection '{collection}' has no _id field")]
    MissingId {
        /// Collection the document was added to.
        collection: String,
    },

    /// A patch already holds a change for this entity.
    #[error("patch already contains a change for {id}")]
    DuplicateChange {
        /// Debug form of the entity id.
        id: String,
    },

    /// A conflict was built from changes to two different entities.
    #[error("conflicting changes refer to different entities: local {local}, remote {remote}")]
    EntityMismatch {
        /// Debug form of the local entity id.
        local: String,
        /// Debug form of the remote entity id.
        remote: String,
    },

    /// A merged document does not carry the conflicting entity's id.
    #[error("merged document id {actual} does not match conflict id {expected}")]
    MergeIdMismatch {
        /// Id of the conflicting entity.
        expected: String,
        /// Id found in the merged document (or `<missing>`).
        actual: String,
    },

    /// A patch has no change for the requested entity.
    #[error("patch has no change for {id}")]
    ChangeNotFound {
        /// Debug form of the entity id.
        id: String,
    },

    /// Failed to encode a remote blob.
    #[error("encoding failed: {0}")]
    Encoding(String),

    /// Failed to decode a remote blob.
    #[error("decoding failed: {0}")]
    Decoding(String),

    /// A remote blob was written with a format this build does not read.
    #[error("unsupported blob format version {found} (supported: {supported})")]
    UnsupportedVersion {
        /// Version found in the blob.
        found: u16,
        /// Version this build writes and reads.
        supported: u16,
    },
}

impl ProtocolError {
    /// Creates an invalid entity id error.
    pub fn invalid_entity_id(reason: impl Into<String>) -> Self {
        Self::InvalidEntityId {
            reason: reason.into(),
        }
    }
}
