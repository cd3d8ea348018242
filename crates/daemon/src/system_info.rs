//! System info for the timelapse daemon
//!
//! Host facts (core count, memory, root filesystem usage) plus the most
//! recently submitted resource limits.

use crate::request::ResourceLimits;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Usage of one filesystem, in bytes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct DiskUsage {
    pub total: u64,
    pub used: u64,
    pub free: u64,
    pub percent: f64,
}

impl DiskUsage {
    /// Derive used space and percentage from total and available bytes
    pub fn from_space(total: u64, available: u64) -> Self {
        let free = available.min(total);
        let used = total - free;
        let percent = if total > 0 {
            (used as f64 / total as f64 * 1000.0).round() / 10.0
        } else {
            0.0
        };
        Self {
            total,
            used,
            free,
            percent,
        }
    }
}

/// Snapshot returned by the system info query
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SystemInfo {
    pub cpu_count: usize,
    pub memory_total_mb: f64,
    pub disk_usage: DiskUsage,
    pub current_resource_limits: ResourceLimits,
}

/// Last-submitted resource limits, last writer wins.
///
/// Informational only: running jobs use the copy taken at their submission.
pub type SharedLimits = Arc<RwLock<ResourceLimits>>;

/// Creates a new SharedLimits holding `initial`
pub fn new_shared_limits(initial: ResourceLimits) -> SharedLimits {
    Arc::new(RwLock::new(initial))
}

/// Pick the mount whose mount point is the longest prefix of `path`
fn mount_for_path<'a>(mounts: &'a [(PathBuf, u64, u64)], path: &Path) -> Option<&'a (PathBuf, u64, u64)> {
    mounts
        .iter()
        .filter(|(mount, _, _)| path.starts_with(mount))
        .max_by_key(|(mount, _, _)| mount.as_os_str().len())
}

/// Usage of the filesystem holding `path`, zeroed if none matches
pub fn collect_disk_usage(path: &Path) -> DiskUsage {
    use sysinfo::Disks;

    let disks = Disks::new_with_refreshed_list();
    let mounts: Vec<(PathBuf, u64, u64)> = disks
        .list()
        .iter()
        .map(|d| (d.mount_point().to_path_buf(), d.total_space(), d.available_space()))
        .collect();

    mount_for_path(&mounts, path)
        .map(|(_, total, available)| DiskUsage::from_space(*total, *available))
        .unwrap_or_default()
}

/// Collects the current system info using sysinfo and num_cpus
pub fn collect_system_info(limits: ResourceLimits) -> SystemInfo {
    use sysinfo::System;

    let mut sys = System::new();
    sys.refresh_memory();

    SystemInfo {
        cpu_count: num_cpus::get(),
        memory_total_mb: sys.total_memory() as f64 / 1024.0 / 1024.0,
        disk_usage: collect_disk_usage(Path::new("/")),
        current_resource_limits: limits,
    }
}
