//! Entity changes.

use crate::entity::EntityId;
use crate::value::Document;
use serde::{Deserialize, Serialize};

/// Kind of an entity change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// Entity was created or updated.
    Upsert,
    /// Entity was deleted.
    Delete,
}

/// A single mutation of a single entity.
///
/// `EntityChange` is what a [`Patch`](crate::Patch) holds per entity: either
/// the full new document or a tombstone. Changes are built when a local
/// mutation is collected or a remote patch file is decoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityChange {
    /// The entity now has this document.
    Upsert {
        /// Entity being written.
        id: EntityId,
        /// Full document after the write.
        document: Document,
    },
    /// The entity was removed.
    Delete {
        /// Entity being removed.
        id: EntityId,
    },
}

impl EntityChange {
    /// Creates an upsert change.
    pub fn upsert(id: EntityId, document: Document) -> Self {
        EntityChange::Upsert { id, document }
    }

    /// Creates a delete change.
    pub fn delete(id: EntityId) -> Self {
        EntityChange::Delete { id }
    }

    /// The entity this change applies to.
    pub fn id(&self) -> &EntityId {
        match self {
            EntityChange::Upsert { id, .. } | EntityChange::Delete { id } => id,
        }
    }

    /// The kind of change.
    pub fn kind(&self) -> ChangeKind {
        match self {
            EntityChange::Upsert { .. } => ChangeKind::Upsert,
            EntityChange::Delete { .. } => ChangeKind::Delete,
        }
    }

    /// The written document, for upserts.
    pub fn document(&self) -> Option<&Document> {
        match self {
            EntityChange::Upsert { document, .. } => Some(document),
            EntityChange::Delete { .. } => None,
        }
    }

    /// Returns true for upserts.
    pub fn is_upsert(&self) -> bool {
        matches!(self, EntityChange::Upsert { .. })
    }

    /// Returns true for deletes.
    pub fn is_delete(&self) -> bool {
        matches!(self, EntityChange::Delete { .. })
    }
}
