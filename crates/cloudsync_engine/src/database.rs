//! Local store boundary used by the synchronizer.

use crate::error::SyncResult;
use crate::mapper::DocumentMapper;
use async_trait::async_trait;
use cloudsync_protocol::{CloudState, Patch};
use tokio_util::sync::CancellationToken;

/// The local replica as seen by a sync cycle.
///
/// A cycle reads the checkpoint, takes the exclusive lock, collects local
/// changes and then, inside one transaction, applies remote changes, clears
/// pushed changes and saves the new checkpoint.
///
/// # Invariants
///
/// - While the guard returned by [`SyncDatabase::lock_exclusive`] is alive,
///   no other writer mutates synced collections
/// - Everything done after [`SyncDatabase::begin_transaction`] is undone if
///   the transaction is rolled back or dropped
#[async_trait]
pub trait SyncDatabase: Send + Sync {
    /// Guard for the exclusive lock. Releasing it is dropping it.
    type Lock: Send;

    /// Local transaction handle.
    type Transaction: SyncTransaction;

    /// Reads the last saved checkpoint. `None` means this device never synced.
    async fn local_cloud_state(&self) -> SyncResult<Option<CloudState>>;

    /// Saves the checkpoint.
    async fn save_local_cloud_state(&self, state: &CloudState) -> SyncResult<()>;

    /// Waits for the exclusive lock on all synced collections.
    async fn lock_exclusive(&self) -> Self::Lock;

    /// Collects dirty entities and pending deletes across synced collections.
    async fn local_changes(&self, ct: &CancellationToken) -> SyncResult<Patch>;

    /// Writes remote changes into the local collections and clears the dirty
    /// markers of the entities it touched.
    async fn apply_changes(&self, patch: &Patch, ct: &CancellationToken) -> SyncResult<()>;

    /// Clears the dirty markers of changes that were pushed.
    async fn clear_local_changes(&self, patch: &Patch) -> SyncResult<()>;

    /// Opens a transaction.
    async fn begin_transaction(&self) -> SyncResult<Self::Transaction>;

    /// Mapper handed to conflict resolvers.
    fn mapper(&self) -> &DocumentMapper;
}

/// A local transaction.
///
/// Dropping a transaction that was neither committed nor rolled back rolls it
/// back.
pub trait SyncTransaction: Send {
    /// Makes every change since the transaction began permanent.
    fn commit(self) -> SyncResult<()>;

    /// Undoes every change since the transaction began.
    fn rollback(self) -> SyncResult<()>;
}
