//! Patches: deduplicated sets of entity changes.

use crate::change::EntityChange;
use crate::conflict::Conflict;
use crate::entity::EntityId;
use crate::error::{ProtocolError, ProtocolResult};
use crate::value::Document;
use indexmap::map::Entry;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A set of entity changes keyed by [`EntityId`].
///
/// A patch is either "everything changed locally since the last sync" or
/// "the combined effect of one or more remote patch files".
///
/// # Invariants
///
/// - At most one change per entity
/// - Building a patch never overwrites: adding a second change for the same
///   entity is an error. Only [`Patch::combine`] applies last-write-wins.
/// - After construction the patch is only mutated through
///   [`Patch::remove_change`] and [`Patch::replace_change`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "Vec<EntityChange>", try_from = "Vec<EntityChange>")]
pub struct Patch {
    changes: IndexMap<EntityId, EntityChange>,
}

impl Patch {
    /// Creates an empty patch.
    pub fn new() -> Self {
        Self {
            changes: IndexMap::new(),
        }
    }

    /// Adds an upsert for every document, keyed by its `_id` field.
    ///
    /// # Errors
    ///
    /// Fails if a document has no `_id`, its id is not a valid entity id, or
    /// the patch already holds a change for that entity.
    pub fn add_changes<I>(&mut self, collection: &str, documents: I) -> ProtocolResult<()>
    where
        I: IntoIterator<Item = Document>,
    {
        for document in documents {
            let id = document
                .id()
                .cloned()
                .ok_or_else(|| ProtocolError::MissingId {
                    collection: collection.to_string(),
                })?;
            let entity_id = EntityId::new(collection, id)?;
            self.insert(EntityChange::upsert(entity_id, document))?;
        }
        Ok(())
    }

    /// Adds a delete for every entity.
    ///
    /// # Errors
    ///
    /// Fails if the patch already holds a change for one of the entities.
    pub fn add_deletes<I>(&mut self, deleted: I) -> ProtocolResult<()>
    where
        I: IntoIterator<Item = EntityId>,
    {
        for id in deleted {
            self.insert(EntityChange::delete(id))?;
        }
        Ok(())
    }

    /// Adds one change.
    ///
    /// # Errors
    ///
    /// Fails with [`ProtocolError::DuplicateChange`] if the entity already
    /// has a change in this patch.
    pub fn insert(&mut self, change: EntityChange) -> ProtocolResult<()> {
        match self.changes.entry(change.id().clone()) {
            Entry::Occupied(entry) => Err(ProtocolError::DuplicateChange {
                id: entry.key().to_string(),
            }),
            Entry::Vacant(entry) => {
                entry.insert(change);
                Ok(())
            }
        }
    }

    /// Merges patches in order; for each entity the change from the latest
    /// patch wins.
    ///
    /// This is how consecutive remote patch files are folded into one. It is
    /// not a CRDT merge: the caller's ordering decides the outcome.
    pub fn combine<I>(patches: I) -> Patch
    where
        I: IntoIterator<Item = Patch>,
    {
        let mut combined = Patch::new();
        for patch in patches {
            for (id, change) in patch.changes {
                combined.changes.insert(id, change);
            }
        }
        combined
    }

    /// Builds a conflict for every entity changed in both patches.
    ///
    /// Entities present on only one side are not conflicts. Conflicts are
    /// returned in the local patch's order.
    pub fn get_conflicts(local: &Patch, remote: &Patch) -> ProtocolResult<Vec<Conflict>> {
        local
            .changes
            .iter()
            .filter_map(|(id, local_change)| {
                remote
                    .changes
                    .get(id)
                    .map(|remote_change| Conflict::new(local_change.clone(), remote_change.clone()))
            })
            .collect()
    }

    /// Removes the change for an entity, returning it.
    pub fn remove_change(&mut self, id: &EntityId) -> Option<EntityChange> {
        self.changes.shift_remove(id)
    }

    /// Replaces the change for an entity with an upsert of `document`.
    ///
    /// # Errors
    ///
    /// Fails with [`ProtocolError::ChangeNotFound`] if the entity has no change
    /// in this patch.
    pub fn replace_change(&mut self, id: &EntityId, document: Document) -> ProtocolResult<()> {
        let slot = self
            .changes
            .get_mut(id)
            .ok_or_else(|| ProtocolError::ChangeNotFound { id: id.to_string() })?;
        let entity = slot.id().clone();
        *slot = EntityChange::upsert(entity, document);
        Ok(())
    }

    /// Returns true if the patch holds at least one change.
    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }

    /// Number of changes.
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Returns true if the patch is empty.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// The change for an entity.
    pub fn get(&self, id: &EntityId) -> Option<&EntityChange> {
        self.changes.get(id)
    }

    /// Returns true if the entity has a change.
    pub fn contains(&self, id: &EntityId) -> bool {
        self.changes.contains_key(id)
    }

    /// Iterates over changes in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &EntityChange> {
        self.changes.values()
    }

    /// Iterates over the entities with a change.
    pub fn ids(&self) -> impl Iterator<Item = &EntityId> {
        self.changes.keys()
    }
}

impl From<Patch> for Vec<EntityChange> {
    fn from(patch: Patch) -> Self {
        patch.changes.into_values().collect()
    }
}

impl TryFrom<Vec<EntityChange>> for Patch {
    type Error = ProtocolError;

    fn try_from(changes: Vec<EntityChange>) -> ProtocolResult<Self> {
        let mut patch = Patch::new();
        for change in changes {
            patch.insert(change)?;
        }
        Ok(patch)
    }
}

impl IntoIterator for Patch {
    type Item = EntityChange;
    type IntoIter = indexmap::map::IntoValues<EntityId, EntityChange>;

    fn into_iter(self) -> Self::IntoIter {
        self.changes.into_values()
    }
}
