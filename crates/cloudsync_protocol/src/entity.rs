//! Global entity identity.

use crate::error::{ProtocolError, ProtocolResult};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Identity of a synced document across devices: collection name plus the
/// document's native id.
///
/// # Invariants
///
/// - The collection name is not empty
/// - The id is not `Null`, `MinValue` or `MaxValue`
///
/// Collection names compare case-insensitively (ASCII), ids compare
/// structurally. The original spelling of the collection name is kept for
/// display and for writing back into the local store.
#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "RawEntityId", into = "RawEntityId")]
pub struct EntityId {
    collection: String,
    id: Value,
}

impl EntityId {
    /// Creates an entity id, validating both components.
    pub fn new(collection: impl Into<String>, id: impl Into<Value>) -> ProtocolResult<Self> {
        let collection = collection.into();
        let id = id.into();

        if collection.trim().is_empty() {
            return Err(ProtocolError::invalid_entity_id("collection name is empty"));
        }
        if id.is_sentinel() {
            return Err(ProtocolError::invalid_entity_id(format!(
                "{} cannot be used as a document id",
                id.type_name()
            )));
        }

        Ok(Self { collection, id })
    }

    /// The collection name as originally spelled.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// The native document id.
    pub fn id(&self) -> &Value {
        &self.id
    }

    /// Returns true if this entity lives in the given collection.
    pub fn in_collection(&self, collection: &str) -> bool {
        self.collection.eq_ignore_ascii_case(collection)
    }
}

impl PartialEq for EntityId {
    fn eq(&self, other: &Self) -> bool {
        self.collection.eq_ignore_ascii_case(&other.collection) && self.id == other.id
    }
}

impl Eq for EntityId {}

impl Hash for EntityId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for byte in self.collection.bytes() {
            byte.to_ascii_lowercase().hash(state);
        }
        self.id.hash(state);
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId{self}")
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(Collection: {}, Id: {})", self.collection, self.id)
    }
}

/// Unvalidated wire form of an [`EntityId`].
#[derive(Serialize, Deserialize)]
struct RawEntityId {
    collection: String,
    id: Value,
}

impl TryFrom<RawEntityId> for EntityId {
    type Error = ProtocolError;

    fn try_from(raw: RawEntityId) -> ProtocolResult<Self> {
        EntityId::new(raw.collection, raw.id)
    }
}

impl From<EntityId> for RawEntityId {
    fn from(id: EntityId) -> Self {
        Self {
            collection: id.collection,
            id: id.id,
        }
    }
}
