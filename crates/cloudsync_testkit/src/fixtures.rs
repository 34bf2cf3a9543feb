//! Test fixtures: entities, simulated devices and shares.
//!
//! A [`TestDevice`] is a complete replica (an in-memory database behind a
//! [`SyncController`]) so tests can simulate several devices syncing through
//! one provider.

use cloudsync_engine::{
    CloudClient, CloudProvider, ConflictResolver, FileShareProvider, KeepLocalResolver,
    MemorySyncDatabase, SharedSyncResult, SyncConfig, SyncController, SyncReport, Synchronizer,
};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Once};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Collection used by [`Note`] fixtures.
pub const NOTES: &str = "Notes";

/// A minimal synced entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    /// Entity id.
    #[serde(rename = "_id")]
    pub id: i64,
    /// Payload.
    pub text: String,
}

impl Note {
    /// Creates a note.
    pub fn new(id: i64, text: impl Into<String>) -> Self {
        Self {
            id,
            text: text.into(),
        }
    }
}

static TRACING: Once = Once::new();

/// Installs a test-friendly tracing subscriber once per process.
///
/// Honors `RUST_LOG`; defaults to `warn`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// A simulated device with its own replica.
pub struct TestDevice<P, R = KeepLocalResolver> {
    /// The device's replica.
    pub db: Arc<MemorySyncDatabase>,
    /// The device's sync entry point.
    pub controller: SyncController<MemorySyncDatabase, P, R>,
}

impl<P: CloudProvider + 'static> TestDevice<P, KeepLocalResolver> {
    /// Creates a device that keeps its own changes on conflict.
    pub fn new(provider: P) -> Self {
        Self::with_resolver(provider, KeepLocalResolver)
    }
}

impl<P, R> TestDevice<P, R>
where
    P: CloudProvider + 'static,
    R: ConflictResolver + 'static,
{
    /// Creates a device with a custom resolver.
    pub fn with_resolver(provider: P, resolver: R) -> Self {
        Self::with_config(provider, resolver, SyncConfig::default())
    }

    /// Creates a device with a custom resolver and configuration.
    pub fn with_config(provider: P, resolver: R, config: SyncConfig) -> Self {
        init_tracing();
        let db = MemorySyncDatabase::new();
        db.register_collection(NOTES)
            .expect("Failed to register notes collection");
        let db = Arc::new(db);
        let synchronizer = Synchronizer::new(
            Arc::clone(&db),
            CloudClient::new(provider),
            resolver,
            config,
        );
        Self {
            db,
            controller: SyncController::new(synchronizer),
        }
    }

    /// Runs a cycle and panics if it fails.
    pub async fn sync(&self) -> SyncReport {
        self.try_sync().await.expect("Sync cycle failed")
    }

    /// Runs a cycle.
    pub async fn try_sync(&self) -> SharedSyncResult {
        self.controller.synchronize(CancellationToken::new()).await
    }

    /// Writes a note locally.
    pub async fn write(&self, id: i64, text: &str) {
        self.db
            .upsert(NOTES, &Note::new(id, text))
            .await
            .expect("Failed to write note");
    }

    /// Deletes a note locally.
    pub async fn remove(&self, id: i64) -> bool {
        self.db.delete(NOTES, id).await.expect("Failed to delete note")
    }

    /// Reads a note.
    pub async fn note(&self, id: i64) -> Option<Note> {
        self.db.get(NOTES, id).await.expect("Failed to read note")
    }

    /// Reads every note, sorted by id.
    pub async fn notes(&self) -> Vec<Note> {
        let mut notes: Vec<Note> = self.db.find_all(NOTES).await.expect("Failed to read notes");
        notes.sort_by_key(|n| n.id);
        notes
    }
}

/// A file share in a temporary directory, removed on drop.
pub struct TempShare {
    dir: TempDir,
}

impl TempShare {
    /// Creates an empty share.
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Root directory of the share.
    pub fn path(&self) -> &std::path::Path {
        self.dir.path()
    }

    /// A provider over this share. Every device gets its own.
    pub fn provider(&self) -> FileShareProvider {
        FileShareProvider::new(self.dir.path())
    }
}

impl Default for TempShare {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudsync_engine::MemoryCloudProvider;

    #[tokio::test]
    async fn two_devices_share_notes() {
        let remote = MemoryCloudProvider::new();
        let a = TestDevice::new(remote.clone());
        let b = TestDevice::new(remote.clone());

        a.write(1, "hello").await;
        a.sync().await;
        b.sync().await;

        assert_eq!(b.note(1).await, Some(Note::new(1, "hello")));
    }

    #[tokio::test]
    async fn temp_share_devices_converge() {
        let share = TempShare::new();
        let a = TestDevice::new(share.provider());
        let b = TestDevice::new(share.provider());

        a.write(1, "on disk").await;
        a.sync().await;
        b.sync().await;

        assert_eq!(b.notes().await, vec![Note::new(1, "on disk")]);
        assert!(share.path().join("init.cbor").exists());
    }
}
