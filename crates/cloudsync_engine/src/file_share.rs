//! File-share provider.

use crate::config::FileShareConfig;
use crate::provider::{CloudProvider, ProviderError, ProviderResult};
use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

/// A provider backed by a directory that every device can reach, such as a
/// network share or a folder kept in sync by a desktop client.
///
/// # Layout
///
/// ```text
/// <root>/init.cbor
/// <root>/patches/<patch id>.patch
/// ```
///
/// # Durability
///
/// Uploads are written to a hidden temporary file, synced, and then
/// hard-linked to their final name. Linking fails if the name is taken, which
/// gives create-only semantics, and readers never see a half-written blob.
/// The share must support hard links.
#[derive(Debug, Clone)]
pub struct FileShareProvider {
    config: FileShareConfig,
}

impl FileShareProvider {
    /// Creates a provider with the default layout under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_config(FileShareConfig::new(root))
    }

    /// Creates a provider with a custom layout.
    pub fn with_config(config: FileShareConfig) -> Self {
        Self { config }
    }

    /// Returns the layout configuration.
    pub fn config(&self) -> &FileShareConfig {
        &self.config
    }

    async fn read_optional(path: &Path, ct: &CancellationToken) -> ProviderResult<Option<Vec<u8>>> {
        if ct.is_cancelled() {
            return Err(cancelled());
        }
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn create_only(target: &Path, bytes: &[u8]) -> ProviderResult<()> {
        let dir = target
            .parent()
            .ok_or_else(|| ProviderError::Other(format!("{} has no parent", target.display())))?;
        tokio::fs::create_dir_all(dir).await?;

        if tokio::fs::try_exists(target).await? {
            return Err(ProviderError::AlreadyExists);
        }

        let temp = dir.join(format!(".{}.tmp", Uuid::new_v4().simple()));
        let written = Self::write_synced(&temp, bytes).await;
        let linked = match written {
            Ok(()) => tokio::fs::hard_link(&temp, target).await,
            Err(err) => Err(err),
        };

        if let Err(err) = tokio::fs::remove_file(&temp).await {
            if err.kind() != io::ErrorKind::NotFound {
                warn!(path = %temp.display(), error = %err, "failed to remove temporary upload");
            }
        }

        match linked {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                Err(ProviderError::AlreadyExists)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await?;
        file.write_all(bytes).await?;
        file.sync_all().await
    }
}

fn cancelled() -> ProviderError {
    ProviderError::Io(io::Error::new(io::ErrorKind::Interrupted, "cancelled"))
}

#[async_trait]
impl CloudProvider for FileShareProvider {
    fn provider_name(&self) -> &str {
        "file-share"
    }

    async fn download_init_file(&self, ct: &CancellationToken) -> ProviderResult<Option<Vec<u8>>> {
        Self::read_optional(&self.config.init_path(), ct).await
    }

    async fn upload_init_file(&self, bytes: Vec<u8>) -> ProviderResult<()> {
        Self::create_only(&self.config.init_path(), &bytes).await
    }

    async fn download_patch_file(
        &self,
        patch_id: &str,
        ct: &CancellationToken,
    ) -> ProviderResult<Option<Vec<u8>>> {
        Self::read_optional(&self.config.patch_path(patch_id)?, ct).await
    }

    async fn upload_patch_file(&self, patch_id: &str, bytes: Vec<u8>) -> ProviderResult<()> {
        Self::create_only(&self.config.patch_path(patch_id)?, &bytes).await
    }
}
