//! Configuration for the sync engine.

use crate::provider::{ProviderError, ProviderResult};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for sync cycles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Extra push attempts after the first one loses a race.
    ///
    /// A cycle makes at most `max_push_retry_count + 1` push attempts before
    /// failing with `ConflictRetryCountExceeded`.
    pub max_push_retry_count: u32,
    /// Pause between a lost push and the re-pull.
    pub retry: RetryConfig,
}

impl SyncConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self {
            max_push_retry_count: 3,
            retry: RetryConfig::default(),
        }
    }

    /// Sets the number of push retries.
    pub fn with_max_push_retry_count(mut self, count: u32) -> Self {
        self.max_push_retry_count = count;
        self
    }

    /// Sets the retry delay configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Total push attempts a cycle may make.
    pub fn max_push_attempts(&self) -> u32 {
        self.max_push_retry_count.saturating_add(1)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Delay between push retries.
///
/// The default is no delay: a lost push is re-pulled and retried at once.
/// Devices that keep colliding on a busy chain can spread out with
/// exponential backoff and jitter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any delay.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add up to 25% random jitter.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Retries immediately.
    pub fn immediate() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Exponential backoff starting at `initial_delay`.
    pub fn backoff(initial_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, add_jitter: bool) -> Self {
        self.add_jitter = add_jitter;
        self
    }

    /// Calculates the delay before retry number `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 || self.initial_delay.is_zero() {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let base_delay = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        // `min` drops a NaN in favour of the cap; `max` floors negative values.
        let delay_secs = base_delay.min(self.max_delay.as_secs_f64()).max(0.0);

        if self.add_jitter {
            let jitter = delay_secs * 0.25 * rand::thread_rng().gen::<f64>();
            Duration::from_secs_f64(delay_secs + jitter)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::immediate()
    }
}

/// Layout of a file-share remote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileShareConfig {
    /// Directory shared by all devices.
    pub root: PathBuf,
    /// File name of the init descriptor, relative to `root`.
    pub init_file_name: String,
    /// Directory holding patch files, relative to `root`.
    pub patch_dir: String,
    /// Extension of patch files.
    pub patch_extension: String,
}

impl FileShareConfig {
    /// Creates the default layout under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            init_file_name: "init.cbor".into(),
            patch_dir: "patches".into(),
            patch_extension: "patch".into(),
        }
    }

    /// Sets the init descriptor's file name.
    pub fn with_init_file_name(mut self, name: impl Into<String>) -> Self {
        self.init_file_name = name.into();
        self
    }

    /// Sets the patch directory.
    pub fn with_patch_dir(mut self, dir: impl Into<String>) -> Self {
        self.patch_dir = dir.into();
        self
    }

    /// Path of the init descriptor.
    pub fn init_path(&self) -> PathBuf {
        self.root.join(&self.init_file_name)
    }

    /// Path of the directory holding patch files.
    pub fn patch_dir_path(&self) -> PathBuf {
        self.root.join(&self.patch_dir)
    }

    /// Path of a patch file.
    ///
    /// Patch ids come from other devices, so only ASCII letters, digits, `-`
    /// and `_` are accepted; anything else could name a file outside the
    /// patch directory.
    pub fn patch_path(&self, patch_id: &str) -> ProviderResult<PathBuf> {
        if !is_safe_patch_id(patch_id) {
            return Err(ProviderError::Other(format!(
                "invalid patch id {patch_id:?}"
            )));
        }
        Ok(self
            .patch_dir_path()
            .join(format!("{patch_id}.{}", self.patch_extension)))
    }
}

const MAX_PATCH_ID_LEN: usize = 128;

fn is_safe_patch_id(patch_id: &str) -> bool {
    !patch_id.is_empty()
        && patch_id.len() <= MAX_PATCH_ID_LEN
        && patch_id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}
