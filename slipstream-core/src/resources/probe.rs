//! Container-aware detection of memory and CPU limits.
//!
//! Order of precedence: cgroup v2, cgroup v1, then OS totals. Any file that
//! cannot be read falls through to the next tier, and the watcher keeps
//! serving the last successful reading between probes.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Detected resource limits, in the units the tuner works with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct ResourceLimits {
    /// Memory available to this process, in megabytes
    pub memory_mb: u64,
    /// Logical CPUs available to this process
    pub cpu_count: usize,
}

/// Parses cgroup v2 `memory.max`: either `"max"` (unlimited) or bytes.
fn parse_memory_max(contents: &str) -> Option<u64> {
    let value = contents.trim();
    if value == "max" {
        return None;
    }
    value.parse::<u64>().ok().map(|bytes| bytes / (1024 * 1024))
}

/// Parses cgroup v2 `cpu.max`: `"quota period"` with quota possibly `"max"`.
fn parse_cpu_max(contents: &str) -> Option<usize> {
    let mut parts = contents.split_whitespace();
    let quota = parts.next()?;
    let period = parts.next()?;
    if quota == "max" {
        return None;
    }
    let quota: u64 = quota.parse().ok()?;
    let period: u64 = period.parse().ok()?;
    if period == 0 {
        return None;
    }
    Some(((quota / period) as usize).max(1))
}

/// Parses cgroup v1 quota/period file pair. A negative quota means unlimited.
fn parse_v1_cpu(quota: &str, period: &str) -> Option<usize> {
    let quota: i64 = quota.trim().parse().ok()?;
    let period: i64 = period.trim().parse().ok()?;
    if quota <= 0 || period <= 0 {
        return None;
    }
    Some(((quota / period) as usize).max(1))
}

/// cgroup v1 memory limit; kernels report a huge sentinel when unlimited.
fn parse_v1_memory(contents: &str) -> Option<u64> {
    const UNLIMITED_SENTINEL_MB: u64 = 8 * 1024 * 1024; // 8 TiB
    let bytes: u64 = contents.trim().parse().ok()?;
    let mb = bytes / (1024 * 1024);
    if mb >= UNLIMITED_SENTINEL_MB { None } else { Some(mb) }
}

fn read(path: &Path) -> Option<String> {
    std::fs::read_to_string(path).ok()
}

fn os_memory_mb() -> u64 {
    let mut sys = sysinfo::System::new();
    sys.refresh_memory();
    (sys.total_memory() / (1024 * 1024)).max(1)
}

/// Probes the filesystem once, preferring cgroup v2 over v1 over OS totals.
fn probe_limits(cgroup_root: &Path) -> ResourceLimits {
    let memory_mb = read(&cgroup_root.join("memory.max"))
        .and_then(|c| parse_memory_max(&c))
        .or_else(|| {
            read(&cgroup_root.join("memory/memory.limit_in_bytes"))
                .and_then(|c| parse_v1_memory(&c))
        })
        .unwrap_or_else(os_memory_mb);

    let cpu_count = read(&cgroup_root.join("cpu.max"))
        .and_then(|c| parse_cpu_max(&c))
        .or_else(|| {
            let quota = read(&cgroup_root.join("cpu/cpu.cfs_quota_us"))?;
            let period = read(&cgroup_root.join("cpu/cpu.cfs_period_us"))?;
            parse_v1_cpu(&quota, &period)
        })
        .unwrap_or_else(num_cpus::get);

    ResourceLimits {
        memory_mb,
        cpu_count,
    }
}

/// Caches the latest resource reading and refreshes it on a timer.
pub struct ResourceWatcher {
    cgroup_root: PathBuf,
    limits: RwLock<ResourceLimits>,
}

impl ResourceWatcher {
    /// Probes once and returns a watcher serving that reading.
    pub fn new() -> Arc<Self> {
        Self::with_cgroup_root(PathBuf::from("/sys/fs/cgroup"))
    }

    /// Watcher probing under an alternate cgroup root (used by tests).
    pub fn with_cgroup_root(cgroup_root: PathBuf) -> Arc<Self> {
        let limits = probe_limits(&cgroup_root);
        debug!(?limits, "initial resource probe");
        Arc::new(Self {
            cgroup_root,
            limits: RwLock::new(limits),
        })
    }

    /// Latest successful reading.
    pub async fn current(&self) -> ResourceLimits {
        *self.limits.read().await
    }

    /// Re-probes immediately and updates the cached reading.
    pub async fn refresh(&self) -> ResourceLimits {
        let fresh = probe_limits(&self.cgroup_root);
        let mut limits = self.limits.write().await;
        if *limits != fresh {
            warn!(old = ?*limits, new = ?fresh, "resource limits changed");
        }
        *limits = fresh;
        fresh
    }

    /// Spawns the periodic re-probe task.
    pub fn spawn_watch(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let watcher = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                watcher.refresh().await;
            }
        })
    }
}
