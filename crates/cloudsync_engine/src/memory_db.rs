//! In-memory local replica.

use crate::database::{SyncDatabase, SyncTransaction};
use crate::error::{SyncError, SyncResult};
use crate::mapper::DocumentMapper;
use async_trait::async_trait;
use cloudsync_protocol::{CloudState, Document, EntityChange, EntityId, Patch, Value};
use indexmap::{IndexMap, IndexSet};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone)]
struct MemoryCollection {
    name: String,
    documents: IndexMap<Value, Document>,
    dirty: IndexSet<Value>,
    deleted: IndexSet<Value>,
}

impl MemoryCollection {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            documents: IndexMap::new(),
            dirty: IndexSet::new(),
            deleted: IndexSet::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    collections: IndexMap<String, MemoryCollection>,
    cloud_state: Option<CloudState>,
}

impl MemoryState {
    fn collection(&self, name: &str) -> Option<&MemoryCollection> {
        self.collections.get(&collection_key(name))
    }

    fn collection_mut(&mut self, name: &str) -> SyncResult<&mut MemoryCollection> {
        self.collections
            .get_mut(&collection_key(name))
            .ok_or_else(|| SyncError::database(format!("collection '{name}' is not synced")))
    }
}

fn collection_key(name: &str) -> String {
    name.to_ascii_lowercase()
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<MemoryState>,
    lock: Arc<tokio::sync::Mutex<()>>,
    commits: AtomicU64,
    rollbacks: AtomicU64,
}

/// A local replica held entirely in memory.
///
/// Collections must be registered with
/// [`MemorySyncDatabase::register_collection`] before they can be written.
/// Every local write marks the entity dirty (or pending-delete) until a sync
/// cycle pushes it or a remote change overwrites it.
///
/// Writers take the same exclusive lock as a sync cycle, so a write issued
/// while a cycle is running waits for the cycle to finish. Reads do not lock
/// and may observe a cycle's uncommitted changes.
///
/// Clones share the same replica.
#[derive(Debug, Clone, Default)]
pub struct MemorySyncDatabase {
    shared: Arc<Shared>,
    mapper: DocumentMapper,
}

impl MemorySyncDatabase {
    /// Creates an empty replica with no synced collections.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a collection as synced. Registering twice is a no-op.
    pub fn register_collection(&self, name: &str) -> SyncResult<()> {
        if name.trim().is_empty() {
            return Err(SyncError::database("collection name is empty"));
        }
        self.shared
            .state
            .lock()
            .collections
            .entry(collection_key(name))
            .or_insert_with(|| MemoryCollection::new(name));
        Ok(())
    }

    /// Names of the synced collections, in registration order.
    pub fn collection_names(&self) -> Vec<String> {
        self.shared
            .state
            .lock()
            .collections
            .values()
            .map(|c| c.name.clone())
            .collect()
    }

    /// Inserts or replaces an entity.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidEntity`] if `T` does not map to a document
    /// with a valid `_id`.
    pub async fn upsert<T: Serialize>(&self, collection: &str, entity: &T) -> SyncResult<()> {
        let document = self.mapper.to_document(entity)?;
        let entity_id = self.mapper.entity_id(collection, entity)?;
        let _guard = self.shared.lock.lock().await;
        self.write_document(entity_id, document)
    }

    /// Inserts or replaces a raw document.
    pub async fn upsert_document(&self, collection: &str, document: Document) -> SyncResult<()> {
        let id = document
            .id()
            .cloned()
            .ok_or_else(|| SyncError::database(format!("document in '{collection}' has no id")))?;
        let entity_id = EntityId::new(collection, id)?;
        let _guard = self.shared.lock.lock().await;
        self.write_document(entity_id, document)
    }

    fn write_document(&self, entity_id: EntityId, document: Document) -> SyncResult<()> {
        let mut state = self.shared.state.lock();
        let collection = state.collection_mut(entity_id.collection())?;
        let id = entity_id.id().clone();
        collection.deleted.shift_remove(&id);
        collection.dirty.insert(id.clone());
        collection.documents.insert(id, document);
        Ok(())
    }

    /// Deletes an entity. Returns false if it did not exist.
    pub async fn delete(&self, collection: &str, id: impl Into<Value>) -> SyncResult<bool> {
        let entity_id = EntityId::new(collection, id)?;
        let _guard = self.shared.lock.lock().await;
        let mut state = self.shared.state.lock();
        let collection = state.collection_mut(entity_id.collection())?;
        let id = entity_id.id();
        if collection.documents.shift_remove(id).is_none() {
            return Ok(false);
        }
        collection.dirty.shift_remove(id);
        collection.deleted.insert(id.clone());
        Ok(true)
    }

    /// Reads an entity.
    pub async fn get<T: DeserializeOwned>(
        &self,
        collection: &str,
        id: impl Into<Value>,
    ) -> SyncResult<Option<T>> {
        self.document(collection, id)
            .map(|document| self.mapper.from_document(&document))
            .transpose()
    }

    /// Reads every entity of a collection, in insertion order.
    pub async fn find_all<T: DeserializeOwned>(&self, collection: &str) -> SyncResult<Vec<T>> {
        self.documents(collection)
            .iter()
            .map(|document| self.mapper.from_document(document))
            .collect()
    }

    /// Reads a raw document.
    pub fn document(&self, collection: &str, id: impl Into<Value>) -> Option<Document> {
        let id = id.into();
        self.shared
            .state
            .lock()
            .collection(collection)
            .and_then(|c| c.documents.get(&id).cloned())
    }

    /// Reads every raw document of a collection.
    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.shared
            .state
            .lock()
            .collection(collection)
            .map(|c| c.documents.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of dirty entities plus pending deletes.
    pub fn pending_change_count(&self) -> usize {
        self.shared
            .state
            .lock()
            .collections
            .values()
            .map(|c| c.dirty.len() + c.deleted.len())
            .sum()
    }

    /// Number of committed transactions.
    pub fn commit_count(&self) -> u64 {
        self.shared.commits.load(Ordering::SeqCst)
    }

    /// Number of rolled back transactions, including dropped ones.
    pub fn rollback_count(&self) -> u64 {
        self.shared.rollbacks.load(Ordering::SeqCst)
    }

    /// The saved checkpoint.
    pub fn cloud_state(&self) -> Option<CloudState> {
        self.shared.state.lock().cloud_state.clone()
    }
}

#[async_trait]
impl SyncDatabase for MemorySyncDatabase {
    type Lock = OwnedMutexGuard<()>;
    type Transaction = MemoryTransaction;

    async fn local_cloud_state(&self) -> SyncResult<Option<CloudState>> {
        Ok(self.cloud_state())
    }

    async fn save_local_cloud_state(&self, state: &CloudState) -> SyncResult<()> {
        self.shared.state.lock().cloud_state = Some(state.clone());
        Ok(())
    }

    async fn lock_exclusive(&self) -> Self::Lock {
        Arc::clone(&self.shared.lock).lock_owned().await
    }

    async fn local_changes(&self, ct: &CancellationToken) -> SyncResult<Patch> {
        if ct.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let state = self.shared.state.lock();
        let mut patch = Patch::new();
        for collection in state.collections.values() {
            let dirty = collection
                .dirty
                .iter()
                .filter_map(|id| collection.documents.get(id).cloned());
            patch.add_changes(&collection.name, dirty)?;

            let deleted = collection
                .deleted
                .iter()
                .map(|id| EntityId::new(&collection.name, id.clone()))
                .collect::<Result<Vec<_>, _>>()?;
            patch.add_deletes(deleted)?;
        }
        Ok(patch)
    }

    async fn apply_changes(&self, patch: &Patch, ct: &CancellationToken) -> SyncResult<()> {
        if ct.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let mut state = self.shared.state.lock();
        for change in patch.iter() {
            let entity_id = change.id();
            let key = collection_key(entity_id.collection());
            let collection = state.collections.entry(key).or_insert_with(|| {
                debug!(collection = entity_id.collection(), "creating collection for remote change");
                MemoryCollection::new(entity_id.collection())
            });
            let id = entity_id.id();
            collection.dirty.shift_remove(id);
            collection.deleted.shift_remove(id);
            match change {
                EntityChange::Upsert { document, .. } => {
                    collection.documents.insert(id.clone(), document.clone());
                }
                EntityChange::Delete { .. } => {
                    collection.documents.shift_remove(id);
                }
            }
        }
        Ok(())
    }

    async fn clear_local_changes(&self, patch: &Patch) -> SyncResult<()> {
        let mut state = self.shared.state.lock();
        for change in patch.iter() {
            let entity_id = change.id();
            if let Some(collection) = state.collections.get_mut(&collection_key(entity_id.collection())) {
                match change {
                    EntityChange::Upsert { .. } => collection.dirty.shift_remove(entity_id.id()),
                    EntityChange::Delete { .. } => collection.deleted.shift_remove(entity_id.id()),
                };
            }
        }
        Ok(())
    }

    async fn begin_transaction(&self) -> SyncResult<Self::Transaction> {
        let snapshot = self.shared.state.lock().clone();
        Ok(MemoryTransaction {
            shared: Arc::clone(&self.shared),
            snapshot: Some(snapshot),
        })
    }

    fn mapper(&self) -> &DocumentMapper {
        &self.mapper
    }
}

/// Snapshot transaction over a [`MemorySyncDatabase`].
#[derive(Debug)]
pub struct MemoryTransaction {
    shared: Arc<Shared>,
    snapshot: Option<MemoryState>,
}

impl MemoryTransaction {
    fn restore(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            *self.shared.state.lock() = snapshot;
            self.shared.rollbacks.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl SyncTransaction for MemoryTransaction {
    fn commit(mut self) -> SyncResult<()> {
        if self.snapshot.take().is_some() {
            self.shared.commits.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn rollback(mut self) -> SyncResult<()> {
        self.restore();
        Ok(())
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        self.restore();
    }
}
