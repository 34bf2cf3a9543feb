//! Remote cursor and pull outcome.

use crate::patch::Patch;
use serde::{Deserialize, Serialize};

/// A device's position in the remote patch chain.
///
/// `next_patch_id` names the next patch file that has not been consumed yet.
/// The file may not exist: then this device is at the remote head, and the
/// name is the slot the next push will try to create.
///
/// "No remote history yet" is represented by the absence of a state
/// (`Option<CloudState>::None`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CloudState {
    /// Name of the next unconsumed patch file.
    pub next_patch_id: String,
}

impl CloudState {
    /// Creates a state pointing at the given patch id.
    pub fn new(next_patch_id: impl Into<String>) -> Self {
        Self {
            next_patch_id: next_patch_id.into(),
        }
    }
}

/// Outcome of pulling the remote patch chain.
#[derive(Debug, Clone, PartialEq)]
pub struct PullResult {
    /// Combined remote changes, in chain order.
    pub remote_patch: Patch,
    /// Position after the last consumed patch file.
    pub cloud_state: CloudState,
    previous: Option<CloudState>,
}

impl PullResult {
    /// Creates a pull result; `previous` is the state the pull started from.
    pub fn new(remote_patch: Patch, cloud_state: CloudState, previous: Option<CloudState>) -> Self {
        Self {
            remote_patch,
            cloud_state,
            previous,
        }
    }

    /// Returns true if the remote had changes this device has not seen.
    pub fn has_changes(&self) -> bool {
        self.remote_patch.has_changes()
    }

    /// Returns true if the position differs from the one the pull started at.
    pub fn cloud_state_changed(&self) -> bool {
        self.previous.as_ref() != Some(&self.cloud_state)
    }
}
