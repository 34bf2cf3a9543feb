//! Error types for the sync engine.

use crate::provider::ProviderError;
use cloudsync_protocol::{EntityId, ProtocolError};
use std::fmt;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Remote operations, named in [`SyncError::CloudOperationFailed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloudOperation {
    /// Reading the init descriptor.
    DownloadInit,
    /// Creating the init descriptor.
    UploadInit,
    /// Reading a patch file.
    DownloadPatch,
    /// Creating a patch file.
    UploadPatch,
    /// Asking the provider for a fresh patch id.
    GeneratePatchId,
}

impl fmt::Display for CloudOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CloudOperation::DownloadInit => "download init file",
            CloudOperation::UploadInit => "upload init file",
            CloudOperation::DownloadPatch => "download patch file",
            CloudOperation::UploadPatch => "upload patch file",
            CloudOperation::GeneratePatchId => "generate patch id",
        })
    }
}

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// A create-only remote write lost the race against another device.
    #[error("remote write conflict: '{target}' already exists")]
    ConflictOccurred {
        /// Name of the blob that already existed.
        target: String,
    },

    /// Pushing kept losing races and the retry budget ran out.
    #[error("push conflict retry count exceeded after {attempts} attempts")]
    ConflictRetryCountExceeded {
        /// Total push attempts made.
        attempts: u32,
        /// The last conflict.
        #[source]
        source: Box<SyncError>,
    },

    /// The conflict resolver returned without choosing a resolution.
    #[error("conflict on {entity} was not resolved")]
    ConflictNotResolved {
        /// The conflicting entity.
        entity: EntityId,
    },

    /// A synced collection's entity type cannot be mapped to a document.
    #[error("invalid entity type {type_name}: {reason}")]
    InvalidEntity {
        /// Rust type name of the entity.
        type_name: &'static str,
        /// What is wrong with it.
        reason: String,
    },

    /// The cloud provider failed unexpectedly.
    #[error("cloud operation '{operation}' failed: {source}")]
    CloudOperationFailed {
        /// Operation that failed.
        operation: CloudOperation,
        /// Provider error.
        #[source]
        source: ProviderError,
    },

    /// The cloud provider rejected our credentials.
    #[error("authentication with cloud provider '{provider}' failed: {source}")]
    CloudAuthFailed {
        /// Provider name.
        provider: String,
        /// Provider error.
        #[source]
        source: ProviderError,
    },

    /// Patch, conflict or blob format error.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The local store failed.
    #[error("database error: {0}")]
    Database(String),

    /// Sync was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// The cycle's task panicked or was torn down before it finished.
    #[error("sync cycle aborted: {reason}")]
    Aborted {
        /// What stopped the task.
        reason: String,
    },
}

impl SyncError {
    /// Creates a database error.
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database(message.into())
    }

    /// Creates an invalid entity error for type `T`.
    pub fn invalid_entity<T: ?Sized>(reason: impl Into<String>) -> Self {
        Self::InvalidEntity {
            type_name: std::any::type_name::<T>(),
            reason: reason.into(),
        }
    }

    /// Returns true for a lost create-only race.
    pub fn is_conflict(&self) -> bool {
        matches!(self, SyncError::ConflictOccurred { .. })
    }

    /// Returns true if the whole cycle can be retried later as-is.
    ///
    /// Lost push races (including an exhausted retry budget) and transient
    /// remote I/O failures qualify. Unresolved conflicts would hit the same
    /// resolver again, and auth failures need new credentials.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::ConflictOccurred { .. } | SyncError::ConflictRetryCountExceeded { .. } => {
                true
            }
            SyncError::CloudOperationFailed { source, .. } => source.is_transient(),
            _ => false,
        }
    }
}
