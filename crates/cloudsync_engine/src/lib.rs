//! # CloudSync Engine
//!
//! Offline-first synchronization of a local document replica through a
//! shared blob store.
//!
//! This crate provides:
//! - The `CloudProvider` contract plus in-memory and file-share providers
//! - `CloudClient`, which pulls and pushes the remote patch chain
//! - The `SyncDatabase` contract and an in-memory replica
//! - Conflict resolution policies
//! - `Synchronizer`, which runs one pull-resolve-apply-push cycle
//! - `SyncController`, which runs one cycle at a time and reports events
//!
//! ## Architecture
//!
//! Every device keeps a full replica. The remote is a chain of immutable
//! patch files that only ever grows:
//! 1. Pull every patch after the device's checkpoint
//! 2. Resolve conflicts between remote and local changes
//! 3. Apply remote changes locally, inside a transaction
//! 4. Push local changes as the next patch with a create-only upload
//! 5. If another device won the race for that slot, pull again and retry
//!
//! ## Key Invariants
//!
//! - Pull always happens before push
//! - A push never overwrites a remote blob
//! - Push retries are bounded
//! - A failed cycle leaves the local replica untouched

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod client;
mod config;
mod controller;
mod database;
mod error;
mod file_share;
mod mapper;
mod memory_db;
mod provider;
mod resolver;
mod synchronizer;

pub use client::CloudClient;
pub use config::{FileShareConfig, RetryConfig, SyncConfig};
pub use controller::{SharedSyncResult, SyncController, SyncEvent, SyncStats};
pub use database::{SyncDatabase, SyncTransaction};
pub use error::{CloudOperation, SyncError, SyncResult};
pub use file_share::FileShareProvider;
pub use mapper::DocumentMapper;
pub use memory_db::{MemorySyncDatabase, MemoryTransaction};
pub use provider::{CloudProvider, MemoryCloudProvider, ProviderError, ProviderResult};
pub use resolver::{ConflictResolver, KeepLocalResolver, KeepRemoteResolver};
pub use synchronizer::{SyncPhase, SyncReport, Synchronizer};

pub use cloudsync_protocol as protocol;
