//! The sync cycle.

use crate::client::CloudClient;
use crate::config::SyncConfig;
use crate::database::{SyncDatabase, SyncTransaction};
use crate::error::{SyncError, SyncResult};
use crate::provider::CloudProvider;
use crate::resolver::ConflictResolver;
use cloudsync_protocol::{CloudState, ConflictResolution, Patch, PullResult};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Where a running cycle is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// No cycle is running.
    Idle,
    /// Downloading the remote chain.
    Pulling,
    /// Resolving conflicts and applying remote changes.
    Resolving,
    /// Uploading local changes.
    Pushing,
    /// Saving the checkpoint and committing.
    Committing,
}

impl SyncPhase {
    /// Returns true while a cycle is running.
    pub fn is_active(&self) -> bool {
        !matches!(self, SyncPhase::Idle)
    }
}

/// Outcome of one successful cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// Remote changes applied locally.
    pub pulled: usize,
    /// Local changes pushed.
    pub pushed: usize,
    /// Conflicts handed to the resolver.
    pub conflicts: usize,
    /// Push attempts made, including lost races.
    pub push_attempts: u32,
    /// Checkpoint after the cycle.
    pub cloud_state: CloudState,
}

impl SyncReport {
    fn new(cloud_state: CloudState) -> Self {
        Self {
            pulled: 0,
            pushed: 0,
            conflicts: 0,
            push_attempts: 0,
            cloud_state,
        }
    }

    /// Returns true if the cycle moved any data.
    pub fn has_changes(&self) -> bool {
        self.pulled > 0 || self.pushed > 0
    }
}

/// Reconciles a local replica with the remote chain.
///
/// # Cycle
///
/// 1. Read the checkpoint and pull everything after it
/// 2. Take the exclusive lock and collect local changes
/// 3. If neither side changed, save the pulled checkpoint if it moved and
///    stop
/// 4. Otherwise open a transaction and loop: resolve conflicts, apply remote
///    changes, push local changes. A lost push race re-pulls and loops
///    again, at most `max_push_retry_count` times
/// 5. Clear pushed changes, save the checkpoint and commit
///
/// Any failure after step 4 begins rolls the transaction back, so a failed
/// cycle leaves the replica as it was. The transaction is always released
/// before the lock.
///
/// `Synchronizer` does not prevent overlapping cycles on its own; the
/// exclusive lock serializes them. Use [`crate::SyncController`] to share one
/// in-flight cycle between callers.
pub struct Synchronizer<D, P, R> {
    database: Arc<D>,
    client: CloudClient<P>,
    resolver: R,
    config: SyncConfig,
    phase: RwLock<SyncPhase>,
}

impl<D, P, R> Synchronizer<D, P, R>
where
    D: SyncDatabase,
    P: CloudProvider,
    R: ConflictResolver,
{
    /// Creates a synchronizer.
    pub fn new(database: Arc<D>, client: CloudClient<P>, resolver: R, config: SyncConfig) -> Self {
        Self {
            database,
            client,
            resolver,
            config,
            phase: RwLock::new(SyncPhase::Idle),
        }
    }

    /// The local replica.
    pub fn database(&self) -> &Arc<D> {
        &self.database
    }

    /// The cloud client.
    pub fn client(&self) -> &CloudClient<P> {
        &self.client
    }

    /// The configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// The current phase.
    pub fn phase(&self) -> SyncPhase {
        *self.phase.read()
    }

    fn set_phase(&self, phase: SyncPhase) {
        *self.phase.write() = phase;
    }

    /// Runs one sync cycle.
    pub async fn synchronize(&self, ct: &CancellationToken) -> SyncResult<SyncReport> {
        let result = {
            let _idle = ResetPhase(&self.phase);
            self.run(ct).await
        };
        match &result {
            Ok(report) => info!(
                pulled = report.pulled,
                pushed = report.pushed,
                conflicts = report.conflicts,
                push_attempts = report.push_attempts,
                "sync cycle finished"
            ),
            Err(err) => warn!(error = %err, "sync cycle failed"),
        }
        result
    }

    async fn run(&self, ct: &CancellationToken) -> SyncResult<SyncReport> {
        check_cancelled(ct)?;
        let checkpoint = self.database.local_cloud_state().await?;
        info!(
            checkpoint = checkpoint.as_ref().map_or("<none>", |s| s.next_patch_id.as_str()),
            "sync cycle starting"
        );

        self.set_phase(SyncPhase::Pulling);
        let pull = self.client.pull(checkpoint.as_ref(), ct).await?;

        let _lock = self.database.lock_exclusive().await;
        let mut local = self.database.local_changes(ct).await?;
        debug!(
            remote = pull.remote_patch.len(),
            local = local.len(),
            "collected changes"
        );

        if !pull.has_changes() && !local.has_changes() {
            if pull.cloud_state_changed() {
                self.set_phase(SyncPhase::Committing);
                self.database
                    .save_local_cloud_state(&pull.cloud_state)
                    .await?;
            }
            return Ok(SyncReport::new(pull.cloud_state));
        }

        let transaction = self.database.begin_transaction().await?;
        match self
            .reconcile(pull, &mut local, checkpoint.as_ref(), ct)
            .await
        {
            Ok(report) => {
                transaction.commit()?;
                Ok(report)
            }
            Err(err) => {
                if let Err(rollback_err) = transaction.rollback() {
                    warn!(error = %rollback_err, "rollback failed");
                }
                Err(err)
            }
        }
    }

    async fn reconcile(
        &self,
        pull: PullResult,
        local: &mut Patch,
        checkpoint: Option<&CloudState>,
        ct: &CancellationToken,
    ) -> SyncResult<SyncReport> {
        let PullResult {
            remote_patch: mut remote,
            cloud_state: mut current,
            ..
        } = pull;
        let mut report = SyncReport::new(current.clone());
        let mut pushed = false;

        loop {
            self.set_phase(SyncPhase::Resolving);
            report.conflicts += self.resolve_conflicts(local, &mut remote, ct)?;

            if remote.has_changes() {
                self.database.apply_changes(&remote, ct).await?;
                report.pulled += remote.len();
                debug!(changes = remote.len(), "applied remote changes");
            }

            if !local.has_changes() {
                break;
            }

            self.set_phase(SyncPhase::Pushing);
            report.push_attempts += 1;
            match self.client.push(&current, local, ct).await {
                Ok(head) => {
                    report.pushed = local.len();
                    current = head;
                    pushed = true;
                    break;
                }
                Err(err) if err.is_conflict() => {
                    let attempts = report.push_attempts;
                    if attempts >= self.config.max_push_attempts() {
                        warn!(attempts, "giving up after repeated push conflicts");
                        return Err(SyncError::ConflictRetryCountExceeded {
                            attempts,
                            source: Box::new(err),
                        });
                    }
                    warn!(attempt = attempts, error = %err, "push lost a race, pulling again");

                    let delay = self.config.retry.delay_for_attempt(attempts);
                    if !delay.is_zero() {
                        tokio::select! {
                            () = ct.cancelled() => return Err(SyncError::Cancelled),
                            () = tokio::time::sleep(delay) => {}
                        }
                    }

                    self.set_phase(SyncPhase::Pulling);
                    let again = self.client.pull(Some(&current), ct).await?;
                    remote = again.remote_patch;
                    current = again.cloud_state;
                }
                Err(err) => return Err(err),
            }
        }

        self.set_phase(SyncPhase::Committing);
        if pushed {
            self.database.clear_local_changes(local).await?;
        }
        if checkpoint != Some(&current) {
            self.database.save_local_cloud_state(&current).await?;
        }
        report.cloud_state = current;
        Ok(report)
    }

    /// Resolves every conflict between the two patches in place.
    fn resolve_conflicts(
        &self,
        local: &mut Patch,
        remote: &mut Patch,
        ct: &CancellationToken,
    ) -> SyncResult<usize> {
        let conflicts = Patch::get_conflicts(local, remote)?;
        let count = conflicts.len();

        for mut conflict in conflicts {
            check_cancelled(ct)?;
            self.resolver.resolve(&mut conflict, self.database.mapper())?;

            let id = conflict.id().clone();
            match conflict.resolution() {
                ConflictResolution::Unresolved => {
                    return Err(SyncError::ConflictNotResolved { entity: id });
                }
                ConflictResolution::KeepLocal => {
                    remote.remove_change(&id);
                }
                ConflictResolution::KeepRemote => {
                    local.remove_change(&id);
                }
                ConflictResolution::Merge(document) => {
                    local.replace_change(&id, document.clone())?;
                    remote.replace_change(&id, document.clone())?;
                }
            }
            debug!(entity = %id, resolution = ?conflict.resolution(), "resolved conflict");
        }
        Ok(count)
    }
}

/// Puts the phase back to idle when a cycle ends, including by panic or drop.
struct ResetPhase<'a>(&'a RwLock<SyncPhase>);

impl Drop for ResetPhase<'_> {
    fn drop(&mut self) {
        *self.0.write() = SyncPhase::Idle;
    }
}

fn check_cancelled(ct: &CancellationToken) -> SyncResult<()> {
    if ct.is_cancelled() {
        Err(SyncError::Cancelled)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_db::MemorySyncDatabase;
    use crate::provider::MemoryCloudProvider;
    use crate::resolver::{KeepLocalResolver, KeepRemoteResolver};
    use cloudsync_protocol::{Document, ID_FIELD};

    fn device<R: ConflictResolver>(
        provider: &MemoryCloudProvider,
        resolver: R,
    ) -> Synchronizer<MemorySyncDatabase, MemoryCloudProvider, R> {
        let db = MemorySyncDatabase::new();
        db.register_collection("Coll").unwrap();
        Synchronizer::new(
            Arc::new(db),
            CloudClient::new(provider.clone()),
            resolver,
            SyncConfig::default(),
        )
    }

    fn doc(id: i64, text: &str) -> Document {
        Document::new().with(ID_FIELD, id).with("Text", text)
    }

    #[tokio::test]
    async fn first_sync_bootstraps_without_transaction() {
        let provider = MemoryCloudProvider::new();
        let sync = device(&provider, KeepLocalResolver);
        let ct = CancellationToken::new();

        let report = sync.synchronize(&ct).await.unwrap();
        assert!(!report.has_changes());
        assert_eq!(sync.database().cloud_state(), Some(report.cloud_state));
        assert_eq!(sync.database().commit_count(), 0);
        assert_eq!(sync.phase(), SyncPhase::Idle);
    }

    #[tokio::test]
    async fn push_then_pull_on_second_device() {
        let provider = MemoryCloudProvider::new();
        let a = device(&provider, KeepLocalResolver);
        let b = device(&provider, KeepLocalResolver);
        let ct = CancellationToken::new();

        a.database().upsert_document("Coll", doc(1, "x")).await.unwrap();
        let pushed = a.synchronize(&ct).await.unwrap();
        assert_eq!(pushed.pushed, 1);
        assert_eq!(pushed.push_attempts, 1);
        assert_eq!(a.database().pending_change_count(), 0);

        let pulled = b.synchronize(&ct).await.unwrap();
        assert_eq!(pulled.pulled, 1);
        assert_eq!(pulled.cloud_state, pushed.cloud_state);
        assert_eq!(b.database().document("Coll", 1), Some(doc(1, "x")));
    }

    #[tokio::test]
    async fn keep_local_pushes_local_value() {
        let provider = MemoryCloudProvider::new();
        let a = device(&provider, KeepLocalResolver);
        let b = device(&provider, KeepLocalResolver);
        let ct = CancellationToken::new();
        a.synchronize(&ct).await.unwrap();
        b.synchronize(&ct).await.unwrap();

        a.database().upsert_document("Coll", doc(1, "a")).await.unwrap();
        a.synchronize(&ct).await.unwrap();
        b.database().upsert_document("Coll", doc(1, "b")).await.unwrap();
        let report = b.synchronize(&ct).await.unwrap();
        assert_eq!(report.conflicts, 1);
        assert_eq!(report.pulled, 0);
        assert_eq!(report.pushed, 1);

        a.synchronize(&ct).await.unwrap();
        assert_eq!(a.database().document("Coll", 1), Some(doc(1, "b")));
        assert_eq!(b.database().document("Coll", 1), Some(doc(1, "b")));
    }

    #[tokio::test]
    async fn keep_remote_skips_push() {
        let provider = MemoryCloudProvider::new();
        let a = device(&provider, KeepLocalResolver);
        let b = device(&provider, KeepRemoteResolver);
        let ct = CancellationToken::new();
        a.synchronize(&ct).await.unwrap();
        b.synchronize(&ct).await.unwrap();

        a.database().upsert_document("Coll", doc(1, "A")).await.unwrap();
        a.synchronize(&ct).await.unwrap();
        let patches = provider.patch_count();

        b.database().upsert_document("Coll", doc(1, "B")).await.unwrap();
        let report = b.synchronize(&ct).await.unwrap();
        assert_eq!(report.pushed, 0);
        assert_eq!(report.push_attempts, 0);
        assert_eq!(provider.patch_count(), patches);
        assert_eq!(b.database().document("Coll", 1), Some(doc(1, "A")));
        assert_eq!(b.database().pending_change_count(), 0);
    }

    #[tokio::test]
    async fn unresolved_conflict_rolls_back() {
        let provider = MemoryCloudProvider::new();
        let a = device(&provider, KeepLocalResolver);
        let undecided = |_: &mut cloudsync_protocol::Conflict,
                         _: &crate::mapper::DocumentMapper|
         -> SyncResult<()> { Ok(()) };
        let b = device(&provider, undecided);
        let ct = CancellationToken::new();
        a.synchronize(&ct).await.unwrap();
        b.synchronize(&ct).await.unwrap();
        let checkpoint = b.database().cloud_state();

        a.database().upsert_document("Coll", doc(1, "A")).await.unwrap();
        a.database().upsert_document("Coll", doc(2, "A2")).await.unwrap();
        a.synchronize(&ct).await.unwrap();
        b.database().upsert_document("Coll", doc(1, "B")).await.unwrap();

        let err = b.synchronize(&ct).await.unwrap_err();
        assert!(matches!(err, SyncError::ConflictNotResolved { .. }));
        assert_eq!(b.database().document("Coll", 1), Some(doc(1, "B")));
        assert_eq!(b.database().document("Coll", 2), None);
        assert_eq!(b.database().cloud_state(), checkpoint);
        assert_eq!(b.database().rollback_count(), 1);
        assert_eq!(b.phase(), SyncPhase::Idle);
    }

    #[tokio::test]
    async fn panicking_resolver_unwinds_cleanly() {
        use futures::FutureExt;

        let provider = MemoryCloudProvider::new();
        let a = device(&provider, KeepLocalResolver);
        let failing = |_: &mut cloudsync_protocol::Conflict,
                       _: &crate::mapper::DocumentMapper|
         -> SyncResult<()> { panic!("resolver bug") };
        let b = device(&provider, failing);
        let ct = CancellationToken::new();
        a.synchronize(&ct).await.unwrap();
        b.synchronize(&ct).await.unwrap();

        a.database().upsert_document("Coll", doc(1, "A")).await.unwrap();
        a.synchronize(&ct).await.unwrap();
        b.database().upsert_document("Coll", doc(1, "B")).await.unwrap();

        let outcome = std::panic::AssertUnwindSafe(b.synchronize(&ct))
            .catch_unwind()
            .await;
        assert!(outcome.is_err());
        assert_eq!(b.phase(), SyncPhase::Idle);
        assert_eq!(b.database().rollback_count(), 1);
        assert_eq!(b.database().document("Coll", 1), Some(doc(1, "B")));
    }

    #[tokio::test]
    async fn cancelled_cycle_touches_nothing() {
        let provider = MemoryCloudProvider::new();
        let sync = device(&provider, KeepLocalResolver);
        let ct = CancellationToken::new();
        ct.cancel();

        assert!(matches!(sync.synchronize(&ct).await, Err(SyncError::Cancelled)));
        assert!(!provider.has_init_file());
        assert_eq!(sync.database().cloud_state(), None);
    }
}
