//! Pull/push protocol over a cloud provider.

use crate::error::{CloudOperation, SyncError, SyncResult};
use crate::provider::{CloudProvider, ProviderError};
use cloudsync_protocol::{CloudState, InitFile, Patch, PatchFile, ProtocolError, PullResult};
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Drives the remote patch chain through a [`CloudProvider`].
///
/// # Remote layout
///
/// ```text
/// init descriptor -> CloudState { next_patch_id: A }
/// patch A         -> changes, next_patch_id: B
/// patch B         -> changes, next_patch_id: C
/// (patch C does not exist yet: C is the head slot)
/// ```
///
/// Pulling walks the chain from a known position until it reaches a slot
/// that does not exist. Pushing writes into that slot with a create-only
/// upload, so two devices pushing from the same position race on the same
/// name and exactly one wins.
///
/// The client keeps no state between calls.
pub struct CloudClient<P> {
    provider: Arc<P>,
}

impl<P> Clone for CloudClient<P> {
    fn clone(&self) -> Self {
        Self {
            provider: Arc::clone(&self.provider),
        }
    }
}

impl<P: CloudProvider> CloudClient<P> {
    /// Creates a client over a provider.
    pub fn new(provider: P) -> Self {
        Self::from_arc(Arc::new(provider))
    }

    /// Creates a client over a shared provider.
    pub fn from_arc(provider: Arc<P>) -> Self {
        Self { provider }
    }

    /// The underlying provider.
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Pulls every remote change after `local`.
    ///
    /// With no local state the device has never synced: the init descriptor is
    /// read, or created if this is the first device, and the whole chain is
    /// pulled from its start.
    pub async fn pull(
        &self,
        local: Option<&CloudState>,
        ct: &CancellationToken,
    ) -> SyncResult<PullResult> {
        check_cancelled(ct)?;

        let start = match local {
            Some(state) => state.clone(),
            None => match self.read_init(ct).await? {
                Some(state) => state,
                None => self.bootstrap(ct).await?,
            },
        };

        let mut state = start;
        let mut patches = Vec::new();
        let mut visited = HashSet::new();
        loop {
            check_cancelled(ct)?;
            if !visited.insert(state.next_patch_id.clone()) {
                return Err(ProtocolError::Decoding(format!(
                    "patch chain loops back to '{}'",
                    state.next_patch_id
                ))
                .into());
            }

            let bytes = self
                .provider
                .download_patch_file(&state.next_patch_id, ct)
                .await
                .map_err(|err| self.provider_error(CloudOperation::DownloadPatch, err, ct))?;
            let Some(bytes) = bytes else {
                break;
            };

            let file = PatchFile::decode(&bytes)?;
            debug!(
                patch_id = %state.next_patch_id,
                next_patch_id = %file.next_patch_id,
                changes = file.changes.len(),
                "downloaded patch"
            );
            state = CloudState::new(file.next_patch_id);
            patches.push(file.changes);
        }

        Ok(PullResult::new(Patch::combine(patches), state, local.cloned()))
    }

    /// Pushes `patch` into the slot after `state`.
    ///
    /// Returns the new head position. Fails with
    /// [`SyncError::ConflictOccurred`] if another device filled the slot first.
    pub async fn push(
        &self,
        state: &CloudState,
        patch: &Patch,
        ct: &CancellationToken,
    ) -> SyncResult<CloudState> {
        check_cancelled(ct)?;
        let next_patch_id = self.generate_patch_id(ct).await?;
        let bytes = PatchFile::new(patch.clone(), next_patch_id.clone()).encode()?;

        check_cancelled(ct)?;
        match self
            .provider
            .upload_patch_file(&state.next_patch_id, bytes)
            .await
        {
            Ok(()) => {
                debug!(
                    patch_id = %state.next_patch_id,
                    next_patch_id = %next_patch_id,
                    changes = patch.len(),
                    "uploaded patch"
                );
                Ok(CloudState::new(next_patch_id))
            }
            Err(ProviderError::AlreadyExists) => Err(SyncError::ConflictOccurred {
                target: state.next_patch_id.clone(),
            }),
            Err(err) => Err(self.provider_error(CloudOperation::UploadPatch, err, ct)),
        }
    }

    async fn read_init(&self, ct: &CancellationToken) -> SyncResult<Option<CloudState>> {
        check_cancelled(ct)?;
        let bytes = self
            .provider
            .download_init_file(ct)
            .await
            .map_err(|err| self.provider_error(CloudOperation::DownloadInit, err, ct))?;
        match bytes {
            Some(bytes) => Ok(Some(InitFile::decode(&bytes)?.cloud_state)),
            None => Ok(None),
        }
    }

    /// Creates the init descriptor, or adopts the one a faster device created.
    async fn bootstrap(&self, ct: &CancellationToken) -> SyncResult<CloudState> {
        let state = CloudState::new(self.generate_patch_id(ct).await?);
        let bytes = InitFile::new(state.clone()).encode()?;

        check_cancelled(ct)?;
        match self.provider.upload_init_file(bytes).await {
            Ok(()) => {
                info!(next_patch_id = %state.next_patch_id, "created remote init descriptor");
                Ok(state)
            }
            Err(ProviderError::AlreadyExists) => {
                let existing = self.read_init(ct).await?.ok_or_else(|| {
                    self.provider_error(
                        CloudOperation::DownloadInit,
                        ProviderError::Other("init descriptor vanished after create conflict".into()),
                        ct,
                    )
                })?;
                info!(
                    next_patch_id = %existing.next_patch_id,
                    "adopted remote init descriptor created concurrently"
                );
                Ok(existing)
            }
            Err(err) => Err(self.provider_error(CloudOperation::UploadInit, err, ct)),
        }
    }

    async fn generate_patch_id(&self, ct: &CancellationToken) -> SyncResult<String> {
        check_cancelled(ct)?;
        self.provider
            .generate_patch_id(ct)
            .await
            .map_err(|err| self.provider_error(CloudOperation::GeneratePatchId, err, ct))
    }

    fn provider_error(
        &self,
        operation: CloudOperation,
        err: ProviderError,
        ct: &CancellationToken,
    ) -> SyncError {
        if ct.is_cancelled() {
            return SyncError::Cancelled;
        }
        match err {
            ProviderError::Unauthorized(_) => SyncError::CloudAuthFailed {
                provider: self.provider.provider_name().to_string(),
                source: err,
            },
            other => SyncError::CloudOperationFailed {
                operation,
                source: other,
            },
        }
    }
}

fn check_cancelled(ct: &CancellationToken) -> SyncResult<()> {
    if ct.is_cancelled() {
        Err(SyncError::Cancelled)
    } else {
        Ok(())
    }
}
