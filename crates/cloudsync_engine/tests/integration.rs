//! Integration tests for the sync engine.
//!
//! Devices are simulated with in-memory replicas syncing through one shared
//! remote.

use cloudsync_engine::protocol::{Conflict, Document, EntityId, ID_FIELD};
use cloudsync_engine::{
    CloudClient, CloudOperation, DocumentMapper, KeepRemoteResolver, RetryConfig, SyncConfig,
    SyncDatabase, SyncError, SyncEvent, SyncPhase, SyncResult,
};
use cloudsync_testkit::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Barrier;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_two_devices_exchange_changes() {
    let remote = MemoryCloudProvider::new();
    let a = TestDevice::new(remote.clone());
    let b = TestDevice::new(remote.clone());

    a.write(1, "from a").await;
    let report = a.sync().await;
    assert_eq!(report.pushed, 1);

    b.write(2, "from b").await;
    let report = b.sync().await;
    assert_eq!(report.pulled, 1);
    assert_eq!(report.pushed, 1);

    a.sync().await;
    let expected = vec![Note::new(1, "from a"), Note::new(2, "from b")];
    assert_eq!(a.notes().await, expected);
    assert_eq!(b.notes().await, expected);
    assert_eq!(a.db.cloud_state(), b.db.cloud_state());
}

#[tokio::test]
async fn test_deletes_propagate() {
    let remote = MemoryCloudProvider::new();
    let a = TestDevice::new(remote.clone());
    let b = TestDevice::new(remote.clone());

    a.write(1, "short lived").await;
    a.sync().await;
    b.sync().await;
    assert!(b.note(1).await.is_some());

    assert!(b.remove(1).await);
    b.sync().await;
    a.sync().await;
    assert!(a.note(1).await.is_none());
}

#[tokio::test]
async fn test_idle_sync_is_a_no_op() {
    let remote = MemoryCloudProvider::new();
    let device = TestDevice::new(remote.clone());
    device.write(1, "x").await;
    let first = device.sync().await;

    let uploads = remote.upload_count();
    let second = device.sync().await;
    assert!(!second.has_changes());
    assert_eq!(second.cloud_state, first.cloud_state);
    assert_eq!(remote.upload_count(), uploads);
    assert_eq!(device.db.commit_count(), 1);
}

#[tokio::test]
async fn test_pull_twice_without_remote_changes() {
    let remote = MemoryCloudProvider::new();
    let device = TestDevice::new(remote.clone());
    device.write(1, "x").await;
    device.sync().await;

    let client = CloudClient::new(remote.clone());
    let state = device.db.cloud_state();
    let ct = CancellationToken::new();
    for _ in 0..2 {
        let result = client.pull(state.as_ref(), &ct).await.unwrap();
        assert!(!result.has_changes());
        assert!(!result.cloud_state_changed());
    }
}

#[tokio::test]
async fn test_push_retry_bound() {
    let remote = FaultyProvider::always_conflicting(MemoryCloudProvider::new());
    let device = TestDevice::new(remote.clone());
    device.write(1, "never lands").await;

    let err = device.try_sync().await.unwrap_err();
    match &*err {
        SyncError::ConflictRetryCountExceeded { attempts, source } => {
            assert_eq!(*attempts, 4);
            assert!(source.is_conflict());
        }
        other => panic!("expected retry count exceeded, got {other:?}"),
    }
    assert_eq!(remote.calls(FaultPoint::UploadPatch), 4);
    assert_eq!(device.db.commit_count(), 0);
    assert_eq!(device.db.rollback_count(), 1);
    assert_eq!(device.db.cloud_state(), None);
    assert_eq!(device.db.pending_change_count(), 1);
}

#[tokio::test]
async fn test_push_retry_bound_follows_config() {
    let remote = FaultyProvider::always_conflicting(MemoryCloudProvider::new());
    let device = TestDevice::with_config(
        remote.clone(),
        cloudsync_engine::KeepLocalResolver,
        SyncConfig::new().with_max_push_retry_count(0),
    );
    device.write(1, "x").await;

    let err = device.try_sync().await.unwrap_err();
    assert!(matches!(
        &*err,
        SyncError::ConflictRetryCountExceeded { attempts: 1, .. }
    ));
    assert_eq!(remote.calls(FaultPoint::UploadPatch), 1);
}

#[tokio::test]
async fn test_lost_races_are_retried() {
    let remote = FaultyProvider::new(MemoryCloudProvider::new());
    remote.fail(FaultPoint::UploadPatch, Fault::Conflict, 2);
    let device = TestDevice::new(remote.clone());
    device.write(1, "eventually").await;

    let report = device.sync().await;
    assert_eq!(report.push_attempts, 3);
    assert_eq!(report.pushed, 1);
    assert_eq!(remote.inner().patch_count(), 1);
    assert_eq!(device.controller.stats().push_retries, 2);
}

#[tokio::test]
async fn test_retry_picks_up_concurrent_push() {
    let shared = MemoryCloudProvider::new();
    let a = TestDevice::new(shared.clone());
    let b = TestDevice::new(shared.clone());
    a.sync().await;
    b.sync().await;

    // b fills the slot after a's checkpoint, so a must pull b's note and
    // push into the following slot.
    a.write(1, "a").await;
    b.write(2, "b").await;
    b.sync().await;

    let report = a.sync().await;
    assert_eq!(report.pulled, 1);
    assert_eq!(report.pushed, 1);
    assert_eq!(report.push_attempts, 1);

    b.sync().await;
    assert_eq!(a.notes().await, b.notes().await);
    assert_eq!(a.notes().await.len(), 2);
}

#[tokio::test]
async fn test_first_device_bootstrap_race() {
    let remote = MemoryCloudProvider::new();
    let barrier = Arc::new(Barrier::new(2));
    let a = TestDevice::new(BarrierProvider::new(remote.clone(), Arc::clone(&barrier)));
    let b = TestDevice::new(BarrierProvider::new(remote.clone(), Arc::clone(&barrier)));

    let (ra, rb) = tokio::join!(a.try_sync(), b.try_sync());
    let (ra, rb) = (ra.unwrap(), rb.unwrap());

    assert_eq!(ra.cloud_state, rb.cloud_state);
    assert_eq!(remote.upload_count(), 1);
    assert_eq!(a.db.cloud_state(), b.db.cloud_state());
    assert!(a.db.cloud_state().is_some());
}

#[tokio::test]
async fn test_keep_remote_applies_remote_and_skips_push() {
    let remote = MemoryCloudProvider::new();
    let a = TestDevice::new(remote.clone());
    let b = TestDevice::with_resolver(remote.clone(), KeepRemoteResolver);
    a.sync().await;
    b.sync().await;

    a.write(1, "A").await;
    a.sync().await;
    let patches = remote.patch_count();

    b.write(1, "B").await;
    let report = b.sync().await;

    assert_eq!(report.conflicts, 1);
    assert_eq!(report.pushed, 0);
    assert_eq!(b.note(1).await, Some(Note::new(1, "A")));
    assert_eq!(remote.patch_count(), patches);
}

#[tokio::test]
async fn test_merge_resolution_applies_and_pushes_merged_document() {
    let remote = MemoryCloudProvider::new();
    let merge = |conflict: &mut Conflict, mapper: &DocumentMapper| -> SyncResult<()> {
        let local: Note = mapper.from_document(conflict.local().document().unwrap_or(&Document::new()))?;
        let remote: Note = mapper.from_document(conflict.remote().document().unwrap_or(&Document::new()))?;
        let merged = Note::new(local.id, format!("{}+{}", remote.text, local.text));
        conflict.resolve_merged(mapper.to_document(&merged)?)?;
        Ok(())
    };
    let a = TestDevice::new(remote.clone());
    let b = TestDevice::with_resolver(remote.clone(), merge);
    a.sync().await;
    b.sync().await;

    a.write(1, "A").await;
    a.sync().await;
    b.write(1, "B").await;
    let report = b.sync().await;
    assert_eq!(report.conflicts, 1);
    assert_eq!(report.pulled, 1);
    assert_eq!(report.pushed, 1);

    a.sync().await;
    assert_eq!(b.note(1).await, Some(Note::new(1, "A+B")));
    assert_eq!(a.note(1).await, Some(Note::new(1, "A+B")));
}

#[tokio::test]
async fn test_resolver_sees_identical_changes() {
    let remote = MemoryCloudProvider::new();
    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let recorder = {
        let seen = Arc::clone(&seen);
        move |conflict: &mut Conflict, _: &DocumentMapper| -> SyncResult<()> {
            seen.lock().push(conflict.has_differences());
            conflict.resolve_keep_local();
            Ok(())
        }
    };
    let a = TestDevice::new(remote.clone());
    let b = TestDevice::with_resolver(remote.clone(), recorder);
    a.sync().await;
    b.sync().await;

    a.write(1, "same").await;
    a.sync().await;
    b.write(1, "same").await;
    b.sync().await;

    assert_eq!(*seen.lock(), vec![false]);
}

#[tokio::test]
async fn test_unresolved_conflict_is_fatal_and_rolls_back() {
    let remote = MemoryCloudProvider::new();
    let undecided = |_: &mut Conflict, _: &DocumentMapper| -> SyncResult<()> { Ok(()) };
    let a = TestDevice::new(remote.clone());
    let b = TestDevice::with_resolver(remote.clone(), undecided);
    a.sync().await;
    b.sync().await;
    let checkpoint = b.db.cloud_state();

    a.write(1, "A").await;
    a.write(2, "other").await;
    a.sync().await;
    b.write(1, "B").await;

    let err = b.try_sync().await.unwrap_err();
    match &*err {
        SyncError::ConflictNotResolved { entity } => {
            assert_eq!(entity, &EntityId::new(NOTES, 1).unwrap());
        }
        other => panic!("expected unresolved conflict, got {other:?}"),
    }
    assert_eq!(b.notes().await, vec![Note::new(1, "B")]);
    assert_eq!(b.db.cloud_state(), checkpoint);
    assert_eq!(b.db.pending_change_count(), 1);
}

#[tokio::test]
async fn test_failed_push_rolls_back_applied_changes() {
    let shared = MemoryCloudProvider::new();
    let a = TestDevice::new(shared.clone());
    let faulty = FaultyProvider::new(shared.clone());
    let b = TestDevice::new(faulty.clone());
    a.sync().await;
    b.sync().await;
    let checkpoint = b.db.cloud_state();

    a.write(1, "remote").await;
    a.sync().await;
    b.write(2, "local").await;
    faulty.fail(FaultPoint::UploadPatch, Fault::Io, 1);

    let err = b.try_sync().await.unwrap_err();
    assert!(matches!(
        &*err,
        SyncError::CloudOperationFailed {
            operation: CloudOperation::UploadPatch,
            ..
        }
    ));
    assert!(err.is_retryable());
    assert_eq!(b.notes().await, vec![Note::new(2, "local")]);
    assert_eq!(b.db.cloud_state(), checkpoint);
    assert_eq!(b.db.commit_count(), 0);

    b.sync().await;
    assert_eq!(
        b.notes().await,
        vec![Note::new(1, "remote"), Note::new(2, "local")]
    );
}

#[tokio::test]
async fn test_auth_failure_names_provider() {
    let faulty = FaultyProvider::new(MemoryCloudProvider::new());
    faulty.fail_always(FaultPoint::DownloadInit, Fault::Unauthorized);
    let device = TestDevice::new(faulty);

    let err = device.try_sync().await.unwrap_err();
    match &*err {
        SyncError::CloudAuthFailed { provider, .. } => assert_eq!(provider, "faulty"),
        other => panic!("expected auth failure, got {other:?}"),
    }
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_cancelled_sync_changes_nothing() {
    let remote = MemoryCloudProvider::new();
    let device = TestDevice::new(remote.clone());
    device.write(1, "x").await;

    let ct = CancellationToken::new();
    ct.cancel();
    let err = device.controller.synchronize(ct).await.unwrap_err();

    assert!(matches!(&*err, SyncError::Cancelled));
    assert!(!remote.has_init_file());
    assert_eq!(remote.download_count(), 0);
    assert_eq!(device.db.pending_change_count(), 1);
}

#[tokio::test]
async fn test_cancel_during_retry_backoff() {
    let remote = FaultyProvider::always_conflicting(MemoryCloudProvider::new());
    let device = TestDevice::with_config(
        remote.clone(),
        cloudsync_engine::KeepLocalResolver,
        SyncConfig::new().with_retry(RetryConfig::backoff(Duration::from_secs(30))),
    );
    device.write(1, "x").await;

    let ct = CancellationToken::new();
    let canceller = {
        let ct = ct.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            ct.cancel();
        })
    };

    let err = tokio::time::timeout(Duration::from_secs(5), device.controller.synchronize(ct))
        .await
        .expect("Cancellation did not interrupt the backoff")
        .unwrap_err();
    canceller.await.unwrap();

    assert!(matches!(&*err, SyncError::Cancelled));
    assert_eq!(remote.calls(FaultPoint::UploadPatch), 1);
    assert_eq!(device.db.rollback_count(), 1);
}

#[tokio::test]
async fn test_same_id_in_different_collections_stays_separate() {
    let remote = MemoryCloudProvider::new();
    let a = TestDevice::new(remote.clone());
    let b = TestDevice::new(remote.clone());
    a.db.register_collection("Tasks").unwrap();

    a.write(1, "note").await;
    a.db.upsert_document("Tasks", Document::new().with(ID_FIELD, 1).with("title", "task"))
        .await
        .unwrap();
    let report = a.sync().await;
    assert_eq!(report.pushed, 2);

    b.sync().await;
    assert_eq!(b.note(1).await, Some(Note::new(1, "note")));
    assert_eq!(
        b.db.document("tasks", 1),
        Some(Document::new().with(ID_FIELD, 1).with("title", "task"))
    );
}

#[tokio::test]
async fn test_concurrent_synchronize_calls_share_one_cycle() {
    let remote = MemoryCloudProvider::new();
    let device = TestDevice::new(remote.clone());
    device.write(1, "once").await;

    let (first, second) = tokio::join!(
        device.controller.synchronize(CancellationToken::new()),
        device.controller.synchronize(CancellationToken::new()),
    );

    assert_eq!(first.unwrap(), second.unwrap());
    assert_eq!(device.controller.stats().cycles_completed, 1);
    assert_eq!(remote.patch_count(), 1);
    assert!(!device.controller.is_synchronizing());

    device.sync().await;
    assert_eq!(device.controller.stats().cycles_completed, 2);
}

#[tokio::test]
async fn test_start_synchronize_reports_through_events() {
    let remote = FaultyProvider::always_conflicting(MemoryCloudProvider::new());
    let device = TestDevice::new(remote);
    device.write(1, "x").await;
    let mut events = device.controller.subscribe();

    device.controller.start_synchronize(CancellationToken::new());

    assert!(matches!(events.recv().await.unwrap(), SyncEvent::Started));
    match events.recv().await.unwrap() {
        SyncEvent::Finished { error: Some(err) } => {
            assert!(matches!(*err, SyncError::ConflictRetryCountExceeded { .. }))
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(device.controller.phase(), SyncPhase::Idle);
    let stats = device.controller.stats();
    assert_eq!(stats.cycles_failed, 1);
    assert!(stats.last_error.is_some());
}

#[tokio::test]
async fn test_checkpoint_survives_in_database() {
    let remote = MemoryCloudProvider::new();
    let device = TestDevice::new(remote.clone());
    device.write(1, "x").await;
    let report = device.sync().await;

    let saved = device.db.local_cloud_state().await.unwrap();
    assert_eq!(saved, Some(report.cloud_state));
}
