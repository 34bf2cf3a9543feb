//! Multi-device workloads and convergence checks.
//!
//! These drive several [`TestDevice`]s through one remote and verify that
//! every replica ends up identical.

use crate::fixtures::{Note, TestDevice};
use crate::generators::DeviceOp;
use cloudsync_engine::{CloudProvider, ConflictResolver, MemoryCloudProvider, SyncConfig};
use futures::future::join_all;
use std::time::{Duration, Instant};

/// Result of a workload run.
#[derive(Debug, Clone, Default)]
pub struct StressResult {
    /// Sync cycles run.
    pub cycles: usize,
    /// Sync cycles that failed.
    pub failed_cycles: usize,
    /// Push attempts over all successful cycles.
    pub push_attempts: u64,
    /// Wall-clock duration.
    pub duration: Duration,
}

impl StressResult {
    /// Prints a summary of the run.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Cycles: {}", self.cycles);
        println!("Failed: {}", self.failed_cycles);
        println!("Push attempts: {}", self.push_attempts);
        println!("Duration: {:?}", self.duration);
    }
}

/// Configuration for concurrent stress runs.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of devices.
    pub devices: usize,
    /// Notes written by each device per round.
    pub writes_per_round: usize,
    /// Number of write-then-sync rounds.
    pub rounds: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            devices: 4,
            writes_per_round: 5,
            rounds: 3,
        }
    }
}

/// Replays a workload against `devices`.
///
/// Failed cycles are counted, not fatal: a failed cycle must leave the
/// replica as it was, so a later cycle picks the changes up again.
pub async fn run_workload<P, R>(devices: &[TestDevice<P, R>], ops: &[DeviceOp]) -> StressResult
where
    P: CloudProvider + 'static,
    R: ConflictResolver + 'static,
{
    let start = Instant::now();
    let mut result = StressResult::default();

    for op in ops {
        match op {
            DeviceOp::Write { device, id, text } => devices[*device].write(*id, text).await,
            DeviceOp::Delete { device, id } => {
                devices[*device].remove(*id).await;
            }
            DeviceOp::Sync { device } => {
                result.cycles += 1;
                match devices[*device].try_sync().await {
                    Ok(report) => result.push_attempts += u64::from(report.push_attempts),
                    Err(_) => result.failed_cycles += 1,
                }
            }
        }
    }

    result.duration = start.elapsed();
    result
}

/// Syncs every device in turn until no device has pending changes, then
/// once more so everyone has pulled the last push.
pub async fn settle<P, R>(devices: &[TestDevice<P, R>])
where
    P: CloudProvider + 'static,
    R: ConflictResolver + 'static,
{
    for _ in 0..devices.len().max(1) * 2 {
        for device in devices {
            let _ = device.try_sync().await;
        }
        if devices.iter().all(|d| d.db.pending_change_count() == 0) {
            break;
        }
    }
    for device in devices {
        device.sync().await;
    }
}

/// Reads every device's notes and returns them if all replicas agree.
pub async fn converged_notes<P, R>(devices: &[TestDevice<P, R>]) -> Option<Vec<Note>>
where
    P: CloudProvider + 'static,
    R: ConflictResolver + 'static,
{
    let mut replicas = Vec::with_capacity(devices.len());
    for device in devices {
        replicas.push(device.notes().await);
    }
    let first = replicas.first().cloned().unwrap_or_default();
    replicas.iter().all(|r| *r == first).then_some(first)
}

/// Writes on every device and syncs them all concurrently, round after
/// round, then settles. Returns the devices for inspection.
pub async fn stress_concurrent_writers(
    config: &StressConfig,
) -> (StressResult, Vec<TestDevice<MemoryCloudProvider>>) {
    let remote = MemoryCloudProvider::new();
    let retries = u32::try_from(config.devices * 2).unwrap_or(u32::MAX);
    let devices: Vec<_> = (0..config.devices)
        .map(|_| {
            TestDevice::with_config(
                remote.clone(),
                cloudsync_engine::KeepLocalResolver,
                SyncConfig::new().with_max_push_retry_count(retries),
            )
        })
        .collect();

    let start = Instant::now();
    let mut result = StressResult::default();
    for round in 0..config.rounds {
        for (index, device) in devices.iter().enumerate() {
            for n in 0..config.writes_per_round {
                let id = i64::try_from(n).unwrap_or(i64::MAX);
                device.write(id, &format!("device {index} round {round}")).await;
            }
        }

        let outcomes = join_all(devices.iter().map(|d| d.try_sync())).await;
        for outcome in outcomes {
            result.cycles += 1;
            match outcome {
                Ok(report) => result.push_attempts += u64::from(report.push_attempts),
                Err(_) => result.failed_cycles += 1,
            }
        }
    }

    settle(&devices).await;
    result.duration = start.elapsed();
    (result, devices)
}
