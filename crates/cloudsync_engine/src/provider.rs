//! Remote storage abstraction.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Errors reported by a cloud provider.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// A create-only upload found the target already present.
    #[error("target already exists")]
    AlreadyExists,

    /// The backend rejected our credentials.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// I/O error talking to the backend.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Any other backend failure.
    #[error("{0}")]
    Other(String),
}

impl ProviderError {
    /// Returns true for failures that may go away on their own.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Io(err) => matches!(
                err.kind(),
                io::ErrorKind::TimedOut
                    | io::ErrorKind::Interrupted
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }
}

/// Result type for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// A remote blob store shared by all devices.
///
/// Providers are **opaque byte stores** with two kinds of blobs: a single init
/// descriptor and named patch files. The sync engine owns every format
/// decision; providers never look inside the bytes.
///
/// # Invariants
///
/// - Downloads return `Ok(None)` for blobs that do not exist
/// - Uploads are create-only: if the blob already exists the upload fails
///   with [`ProviderError::AlreadyExists`] and leaves the blob untouched
/// - A blob is never observed partially written
///
/// # Implementors
///
/// - [`MemoryCloudProvider`] - For testing
/// - [`crate::FileShareProvider`] - A directory on a local or network share
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Short name used in diagnostics.
    fn provider_name(&self) -> &str;

    /// Reads the init descriptor.
    async fn download_init_file(&self, ct: &CancellationToken) -> ProviderResult<Option<Vec<u8>>>;

    /// Creates the init descriptor.
    async fn upload_init_file(&self, bytes: Vec<u8>) -> ProviderResult<()>;

    /// Reads a patch file.
    async fn download_patch_file(
        &self,
        patch_id: &str,
        ct: &CancellationToken,
    ) -> ProviderResult<Option<Vec<u8>>>;

    /// Creates a patch file.
    async fn upload_patch_file(&self, patch_id: &str, bytes: Vec<u8>) -> ProviderResult<()>;

    /// Returns a fresh, unique patch id.
    ///
    /// The default is a random UUID. Backends override this to impose their
    /// own naming scheme.
    async fn generate_patch_id(&self, _ct: &CancellationToken) -> ProviderResult<String> {
        Ok(Uuid::new_v4().simple().to_string())
    }
}

#[async_trait]
impl<P: CloudProvider + ?Sized> CloudProvider for Arc<P> {
    fn provider_name(&self) -> &str {
        (**self).provider_name()
    }

    async fn download_init_file(&self, ct: &CancellationToken) -> ProviderResult<Option<Vec<u8>>> {
        (**self).download_init_file(ct).await
    }

    async fn upload_init_file(&self, bytes: Vec<u8>) -> ProviderResult<()> {
        (**self).upload_init_file(bytes).await
    }

    async fn download_patch_file(
        &self,
        patch_id: &str,
        ct: &CancellationToken,
    ) -> ProviderResult<Option<Vec<u8>>> {
        (**self).download_patch_file(patch_id, ct).await
    }

    async fn upload_patch_file(&self, patch_id: &str, bytes: Vec<u8>) -> ProviderResult<()> {
        (**self).upload_patch_file(patch_id, bytes).await
    }

    async fn generate_patch_id(&self, ct: &CancellationToken) -> ProviderResult<String> {
        (**self).generate_patch_id(ct).await
    }
}

#[derive(Debug, Default)]
struct MemoryBlobs {
    init: Option<Vec<u8>>,
    patches: HashMap<String, Vec<u8>>,
}

/// An in-memory provider.
///
/// Clones share the same blobs, so several simulated devices can sync
/// through one `MemoryCloudProvider`.
#[derive(Debug, Clone, Default)]
pub struct MemoryCloudProvider {
    blobs: Arc<RwLock<MemoryBlobs>>,
    uploads: Arc<AtomicU64>,
    downloads: Arc<AtomicU64>,
}

impl MemoryCloudProvider {
    /// Creates an empty remote.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true once the init descriptor exists.
    pub fn has_init_file(&self) -> bool {
        self.blobs.read().init.is_some()
    }

    /// Raw bytes of the init descriptor.
    pub fn init_file(&self) -> Option<Vec<u8>> {
        self.blobs.read().init.clone()
    }

    /// Raw bytes of a patch file.
    pub fn patch_file(&self, patch_id: &str) -> Option<Vec<u8>> {
        self.blobs.read().patches.get(patch_id).cloned()
    }

    /// Number of patch files stored.
    pub fn patch_count(&self) -> usize {
        self.blobs.read().patches.len()
    }

    /// Number of successful uploads.
    pub fn upload_count(&self) -> u64 {
        self.uploads.load(Ordering::SeqCst)
    }

    /// Number of download calls, including misses.
    pub fn download_count(&self) -> u64 {
        self.downloads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CloudProvider for MemoryCloudProvider {
    fn provider_name(&self) -> &str {
        "memory"
    }

    async fn download_init_file(&self, _ct: &CancellationToken) -> ProviderResult<Option<Vec<u8>>> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        Ok(self.blobs.read().init.clone())
    }

    async fn upload_init_file(&self, bytes: Vec<u8>) -> ProviderResult<()> {
        let mut blobs = self.blobs.write();
        if blobs.init.is_some() {
            return Err(ProviderError::AlreadyExists);
        }
        blobs.init = Some(bytes);
        self.uploads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn download_patch_file(
        &self,
        patch_id: &str,
        _ct: &CancellationToken,
    ) -> ProviderResult<Option<Vec<u8>>> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        Ok(self.blobs.read().patches.get(patch_id).cloned())
    }

    async fn upload_patch_file(&self, patch_id: &str, bytes: Vec<u8>) -> ProviderResult<()> {
        let mut blobs = self.blobs.write();
        if blobs.patches.contains_key(patch_id) {
            return Err(ProviderError::AlreadyExists);
        }
        blobs.patches.insert(patch_id.to_string(), bytes);
        self.uploads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
