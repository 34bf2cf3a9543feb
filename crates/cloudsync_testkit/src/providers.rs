//! Fault-injecting provider wrappers.
//!
//! These wrap a real provider (usually a shared
//! [`cloudsync_engine::MemoryCloudProvider`]) and make chosen calls fail or
//! pause, so tests can force races and failures deterministically.

use async_trait::async_trait;
use cloudsync_engine::{CloudProvider, ProviderError, ProviderResult};
use parking_lot::Mutex;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::Barrier;
use tokio_util::sync::CancellationToken;

/// A provider call that can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultPoint {
    /// `download_init_file`
    DownloadInit,
    /// `upload_init_file`
    UploadInit,
    /// `download_patch_file`
    DownloadPatch,
    /// `upload_patch_file`
    UploadPatch,
}

impl FaultPoint {
    fn index(self) -> usize {
        match self {
            FaultPoint::DownloadInit => 0,
            FaultPoint::UploadInit => 1,
            FaultPoint::DownloadPatch => 2,
            FaultPoint::UploadPatch => 3,
        }
    }
}

/// How an injected call fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The create-only target already exists.
    Conflict,
    /// The connection timed out.
    Io,
    /// Credentials were rejected.
    Unauthorized,
}

impl Fault {
    fn to_error(self) -> ProviderError {
        match self {
            Fault::Conflict => ProviderError::AlreadyExists,
            Fault::Io => ProviderError::Io(io::Error::new(io::ErrorKind::TimedOut, "injected timeout")),
            Fault::Unauthorized => ProviderError::Unauthorized("injected".into()),
        }
    }
}

#[derive(Debug)]
struct Rule {
    point: FaultPoint,
    fault: Fault,
    /// `None` fails forever.
    remaining: Option<u32>,
}

/// Wraps a provider and fails chosen calls.
///
/// Failing calls never reach the inner provider. Every call is counted,
/// failed or not.
#[derive(Debug, Clone)]
pub struct FaultyProvider<P> {
    inner: P,
    rules: Arc<Mutex<Vec<Rule>>>,
    calls: Arc<[AtomicU32; 4]>,
}

impl<P: CloudProvider> FaultyProvider<P> {
    /// Wraps a provider with no faults.
    pub fn new(inner: P) -> Self {
        Self {
            inner,
            rules: Arc::new(Mutex::new(Vec::new())),
            calls: Arc::new(Default::default()),
        }
    }

    /// A provider whose patch uploads always lose the create race.
    pub fn always_conflicting(inner: P) -> Self {
        let provider = Self::new(inner);
        provider.fail_always(FaultPoint::UploadPatch, Fault::Conflict);
        provider
    }

    /// Fails the next `times` calls at `point`.
    pub fn fail(&self, point: FaultPoint, fault: Fault, times: u32) {
        self.rules.lock().push(Rule {
            point,
            fault,
            remaining: Some(times),
        });
    }

    /// Fails every call at `point`.
    pub fn fail_always(&self, point: FaultPoint, fault: Fault) {
        self.rules.lock().push(Rule {
            point,
            fault,
            remaining: None,
        });
    }

    /// Removes all faults.
    pub fn heal(&self) {
        self.rules.lock().clear();
    }

    /// Number of calls made at `point`.
    pub fn calls(&self, point: FaultPoint) -> u32 {
        self.calls[point.index()].load(Ordering::SeqCst)
    }

    /// The wrapped provider.
    pub fn inner(&self) -> &P {
        &self.inner
    }

    fn inject(&self, point: FaultPoint) -> ProviderResult<()> {
        self.calls[point.index()].fetch_add(1, Ordering::SeqCst);
        let mut rules = self.rules.lock();
        let Some(rule) = rules
            .iter_mut()
            .find(|r| r.point == point && r.remaining != Some(0))
        else {
            return Ok(());
        };
        if let Some(remaining) = rule.remaining.as_mut() {
            *remaining -= 1;
        }
        Err(rule.fault.to_error())
    }
}

#[async_trait]
impl<P: CloudProvider> CloudProvider for FaultyProvider<P> {
    fn provider_name(&self) -> &str {
        "faulty"
    }

    async fn download_init_file(&self, ct: &CancellationToken) -> ProviderResult<Option<Vec<u8>>> {
        self.inject(FaultPoint::DownloadInit)?;
        self.inner.download_init_file(ct).await
    }

    async fn upload_init_file(&self, bytes: Vec<u8>) -> ProviderResult<()> {
        self.inject(FaultPoint::UploadInit)?;
        self.inner.upload_init_file(bytes).await
    }

    async fn download_patch_file(
        &self,
        patch_id: &str,
        ct: &CancellationToken,
    ) -> ProviderResult<Option<Vec<u8>>> {
        self.inject(FaultPoint::DownloadPatch)?;
        self.inner.download_patch_file(patch_id, ct).await
    }

    async fn upload_patch_file(&self, patch_id: &str, bytes: Vec<u8>) -> ProviderResult<()> {
        self.inject(FaultPoint::UploadPatch)?;
        self.inner.upload_patch_file(patch_id, bytes).await
    }

    async fn generate_patch_id(&self, ct: &CancellationToken) -> ProviderResult<String> {
        self.inner.generate_patch_id(ct).await
    }
}

/// Holds the first init download until every party has made theirs.
///
/// Give each device its own `BarrierProvider` sharing one barrier: all of
/// them then see "no init descriptor" before any of them creates it, which
/// forces the bootstrap race.
#[derive(Debug)]
pub struct BarrierProvider<P> {
    inner: P,
    barrier: Arc<Barrier>,
    armed: AtomicBool,
}

impl<P: CloudProvider> BarrierProvider<P> {
    /// Wraps `inner`; the first init download waits on `barrier`.
    pub fn new(inner: P, barrier: Arc<Barrier>) -> Self {
        Self {
            inner,
            barrier,
            armed: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl<P: CloudProvider> CloudProvider for BarrierProvider<P> {
    fn provider_name(&self) -> &str {
        self.inner.provider_name()
    }

    async fn download_init_file(&self, ct: &CancellationToken) -> ProviderResult<Option<Vec<u8>>> {
        let bytes = self.inner.download_init_file(ct).await?;
        if self.armed.swap(false, Ordering::SeqCst) {
            self.barrier.wait().await;
        }
        Ok(bytes)
    }

    async fn upload_init_file(&self, bytes: Vec<u8>) -> ProviderResult<()> {
        self.inner.upload_init_file(bytes).await
    }

    async fn download_patch_file(
        &self,
        patch_id: &str,
        ct: &CancellationToken,
    ) -> ProviderResult<Option<Vec<u8>>> {
        self.inner.download_patch_file(patch_id, ct).await
    }

    async fn upload_patch_file(&self, patch_id: &str, bytes: Vec<u8>) -> ProviderResult<()> {
        self.inner.upload_patch_file(patch_id, bytes).await
    }

    async fn generate_patch_id(&self, ct: &CancellationToken) -> ProviderResult<String> {
        self.inner.generate_patch_id(ct).await
    }
}
