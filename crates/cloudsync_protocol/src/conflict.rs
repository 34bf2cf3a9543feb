//! Conflicts between a local and a remote change to the same entity.

use crate::change::EntityChange;
use crate::entity::EntityId;
use crate::error::{ProtocolError, ProtocolResult};
use crate::value::Document;

/// How a conflict was resolved.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConflictResolution {
    /// No decision yet.
    #[default]
    Unresolved,
    /// The local change wins; the remote change is discarded.
    KeepLocal,
    /// The remote change wins; the local change is discarded.
    KeepRemote,
    /// Both sides are replaced by this document.
    Merge(Document),
}

impl ConflictResolution {
    /// Returns true once a decision has been made.
    pub fn is_resolved(&self) -> bool {
        !matches!(self, ConflictResolution::Unresolved)
    }
}

/// A local and a remote change that touched the same entity.
#[derive(Debug, Clone, PartialEq)]
pub struct Conflict {
    local: EntityChange,
    remote: EntityChange,
    resolution: ConflictResolution,
}

impl Conflict {
    /// Creates an unresolved conflict.
    ///
    /// # Errors
    ///
    /// Fails with [`ProtocolError::EntityMismatch`] if the two changes are for
    /// different entities.
    pub fn new(local: EntityChange, remote: EntityChange) -> ProtocolResult<Self> {
        if local.id() != remote.id() {
            return Err(ProtocolError::EntityMismatch {
                local: local.id().to_string(),
                remote: remote.id().to_string(),
            });
        }

        Ok(Self {
            local,
            remote,
            resolution: ConflictResolution::Unresolved,
        })
    }

    /// The conflicting entity.
    pub fn id(&self) -> &EntityId {
        self.local.id()
    }

    /// The change made on this device.
    pub fn local(&self) -> &EntityChange {
        &self.local
    }

    /// The change pulled from the remote store.
    pub fn remote(&self) -> &EntityChange {
        &self.remote
    }

    /// The current resolution.
    pub fn resolution(&self) -> &ConflictResolution {
        &self.resolution
    }

    /// Returns true once a resolution was chosen.
    pub fn is_resolved(&self) -> bool {
        self.resolution.is_resolved()
    }

    /// Returns false only when both sides made the same change: same kind and,
    /// for upserts, field-for-field equal documents.
    ///
    /// The synchronizer does not consult this; resolvers may use it to settle
    /// trivial conflicts early.
    pub fn has_differences(&self) -> bool {
        self.local != self.remote
    }

    /// Keep the local change.
    pub fn resolve_keep_local(&mut self) {
        self.resolution = ConflictResolution::KeepLocal;
    }

    /// Keep the remote change.
    pub fn resolve_keep_remote(&mut self) {
        self.resolution = ConflictResolution::KeepRemote;
    }

    /// Replace both sides with a merged document.
    ///
    /// # Errors
    ///
    /// Fails with [`ProtocolError::MergeIdMismatch`] if the document's `_id`
    /// is missing or differs from the conflicting entity's id. The previous
    /// resolution is kept in that case.
    pub fn resolve_merged(&mut self, document: Document) -> ProtocolResult<()> {
        let expected = self.id().id();
        match document.id() {
            Some(actual) if actual == expected => {
                self.resolution = ConflictResolution::Merge(document);
                Ok(())
            }
            actual => Err(ProtocolError::MergeIdMismatch {
                expected: expected.to_string(),
                actual: actual.map_or_else(|| "<missing>".to_string(), ToString::to_string),
            }),
        }
    }
}
