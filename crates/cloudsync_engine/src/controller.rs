//! Single-flight sync entry point with events and statistics.

use crate::database::SyncDatabase;
use crate::error::SyncError;
use crate::provider::CloudProvider;
use crate::resolver::ConflictResolver;
use crate::synchronizer::{SyncPhase, SyncReport, Synchronizer};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::error;

/// Outcome of a cycle as seen by every caller that joined it.
pub type SharedSyncResult = Result<SyncReport, Arc<SyncError>>;

type InFlight = Shared<BoxFuture<'static, SharedSyncResult>>;

const EVENT_CAPACITY: usize = 64;

/// Lifecycle notifications.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// A cycle started.
    Started,
    /// A cycle finished. `error` is set if it failed.
    Finished {
        /// The failure, if any.
        error: Option<Arc<SyncError>>,
    },
}

/// Statistics about sync cycles.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Cycles that finished successfully.
    pub cycles_completed: u64,
    /// Cycles that failed.
    pub cycles_failed: u64,
    /// Remote changes applied locally.
    pub changes_pulled: u64,
    /// Local changes pushed.
    pub changes_pushed: u64,
    /// Conflicts handed to the resolver.
    pub conflicts_encountered: u64,
    /// Push attempts that lost a race and were retried.
    pub push_retries: u64,
    /// When the last cycle finished.
    pub last_sync_time: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Owns a [`Synchronizer`] and makes sure at most one cycle runs at a time.
///
/// A call to [`SyncController::synchronize`] while a cycle is in flight joins
/// that cycle instead of starting another one; every caller receives the same
/// result. Cycles run on a spawned task, so a cycle finishes even if all
/// callers stop waiting for it.
///
/// Requires a Tokio runtime.
pub struct SyncController<D, P, R> {
    synchronizer: Arc<Synchronizer<D, P, R>>,
    in_flight: Arc<Mutex<Option<InFlight>>>,
    events: broadcast::Sender<SyncEvent>,
    stats: Arc<RwLock<SyncStats>>,
}

impl<D, P, R> SyncController<D, P, R>
where
    D: SyncDatabase + 'static,
    P: CloudProvider + 'static,
    R: ConflictResolver + 'static,
{
    /// Creates a controller.
    pub fn new(synchronizer: Synchronizer<D, P, R>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            synchronizer: Arc::new(synchronizer),
            in_flight: Arc::new(Mutex::new(None)),
            events,
            stats: Arc::new(RwLock::new(SyncStats::default())),
        }
    }

    /// The wrapped synchronizer.
    pub fn synchronizer(&self) -> &Synchronizer<D, P, R> {
        &self.synchronizer
    }

    /// Runs a cycle, or joins the one in flight.
    ///
    /// When joining, `ct` is ignored: the running cycle keeps the token it was
    /// started with.
    pub async fn synchronize(&self, ct: CancellationToken) -> SharedSyncResult {
        self.join_or_start(ct).await
    }

    /// Starts a cycle, or joins the one in flight, without waiting for it.
    ///
    /// The outcome is only reported through [`SyncEvent::Finished`].
    pub fn start_synchronize(&self, ct: CancellationToken) {
        drop(self.join_or_start(ct));
    }

    /// Subscribes to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Returns true while a cycle is in flight.
    pub fn is_synchronizing(&self) -> bool {
        self.in_flight.lock().is_some()
    }

    /// The phase of the running cycle.
    pub fn phase(&self) -> SyncPhase {
        self.synchronizer.phase()
    }

    /// Statistics since the controller was created.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    fn join_or_start(&self, ct: CancellationToken) -> InFlight {
        // The slot stays locked until the new cycle is stored in it, so the
        // task cannot clear the slot before it is filled.
        let mut slot = self.in_flight.lock();
        if let Some(running) = slot.as_ref() {
            return running.clone();
        }

        let synchronizer = Arc::clone(&self.synchronizer);
        let in_flight = Arc::clone(&self.in_flight);
        let events = self.events.clone();
        let stats = Arc::clone(&self.stats);

        // Nobody listening is fine.
        let _ = events.send(SyncEvent::Started);

        let cycle = tokio::spawn(async move { synchronizer.synchronize(&ct).await });

        // Bookkeeping runs in its own task so the slot is cleared and the
        // finished event is sent even if the cycle panics or nobody awaits it.
        let task = tokio::spawn(async move {
            let result = match cycle.await {
                Ok(result) => result.map_err(Arc::new),
                Err(join_err) => Err(Arc::new(aborted(join_err))),
            };
            record(&stats, &result);
            if let Err(err) = &result {
                error!(error = %err, "background sync failed");
            }
            in_flight.lock().take();
            let _ = events.send(SyncEvent::Finished {
                error: result.as_ref().err().cloned(),
            });
            result
        });

        let joined = async move {
            match task.await {
                Ok(result) => result,
                Err(join_err) => Err(Arc::new(aborted(join_err))),
            }
        }
        .boxed()
        .shared();

        *slot = Some(joined.clone());
        joined
    }
}

fn aborted(join_err: tokio::task::JoinError) -> SyncError {
    let reason = if join_err.is_panic() {
        "cycle panicked".to_string()
    } else {
        join_err.to_string()
    };
    SyncError::Aborted { reason }
}

fn record(stats: &RwLock<SyncStats>, result: &SharedSyncResult) {
    let mut stats = stats.write();
    stats.last_sync_time = Some(Instant::now());
    match result {
        Ok(report) => {
            stats.cycles_completed += 1;
            stats.changes_pulled += report.pulled as u64;
            stats.changes_pushed += report.pushed as u64;
            stats.conflicts_encountered += report.conflicts as u64;
            stats.push_retries += u64::from(report.push_attempts.saturating_sub(1));
            stats.last_error = None;
        }
        Err(err) => {
            stats.cycles_failed += 1;
            stats.last_error = Some(err.to_string());
        }
    }
}
