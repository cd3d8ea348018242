//! Encoder process supervision
//!
//! Launches one encoder invocation, samples its resource usage on a fixed
//! interval, nudges its priority when it runs hot, reports estimated progress
//! and decides the terminal outcome once it exits.

use crate::encode::InvocationSpec;
use crate::request::ResourceLimits;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Bytes of encoder stderr kept for the failure message.
pub const STDERR_TAIL_BYTES: usize = 64 * 1024;

/// Ceiling on reported progress while the encoder is still running.
pub const RUNNING_PROGRESS_CAP: f32 = 95.0;

/// Reported when the expected duration cannot be computed.
pub const FALLBACK_PROGRESS: f32 = 50.0;

/// Niceness applied by the default throttle.
pub const THROTTLED_NICENESS: i32 = 10;

const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Error type for supervision
#[derive(Debug, Error)]
pub enum SuperviseError {
    #[error("Failed to start encoder {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to wait for encoder: {0}")]
    Wait(#[source] std::io::Error),
}

/// How one supervised run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum SuperviseOutcome {
    /// Exit code zero and the output file exists.
    Succeeded(PathBuf),
    /// Anything else, with a human-readable reason.
    Failed(String),
    /// The cancellation token fired; the encoder was killed.
    Cancelled,
}

/// One resource reading for a running process.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceSample {
    /// CPU usage in percent of one core (may exceed 100 on multi-core hosts).
    pub cpu_percent: f32,
    /// Resident memory in megabytes.
    pub memory_mb: f64,
}

/// Observes and nudges a running process.
///
/// Implementations decide how strict enforcement is; the supervisor only
/// asks for samples and requests a throttle when the CPU ceiling is crossed.
pub trait ResourceGovernor: Send + Sync {
    /// Current usage, or `None` once the process is gone.
    fn sample(&self, pid: u32) -> Option<ResourceSample>;

    /// Best-effort de-prioritisation of `pid`.
    fn throttle(&self, pid: u32) -> std::io::Result<()>;
}

/// Governor backed by sysinfo sampling and a scheduling-priority nudge.
///
/// CPU readings are deltas between refreshes, so the first sample of a
/// process reads as zero.
pub struct SysinfoGovernor {
    system: Mutex<System>,
}

impl SysinfoGovernor {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SysinfoGovernor {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceGovernor for SysinfoGovernor {
    fn sample(&self, pid: u32) -> Option<ResourceSample> {
        let mut sys = self.system.lock().unwrap_or_else(|e| e.into_inner());
        let pid = Pid::from_u32(pid);
        sys.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            ProcessRefreshKind::new().with_cpu().with_memory(),
        );
        sys.process(pid).map(|process| ResourceSample {
            cpu_percent: process.cpu_usage(),
            memory_mb: process.memory() as f64 / (1024.0 * 1024.0),
        })
    }

    #[cfg(unix)]
    fn throttle(&self, pid: u32) -> std::io::Result<()> {
        // SAFETY: setpriority takes plain integers and touches no memory of ours.
        let rc = unsafe {
            libc::setpriority(libc::PRIO_PROCESS, pid as libc::id_t, THROTTLED_NICENESS)
        };
        if rc == -1 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn throttle(&self, _pid: u32) -> std::io::Result<()> {
        Ok(())
    }
}

/// Maps elapsed run time to a progress percentage.
pub trait ProgressEstimator: Send + Sync {
    fn estimate(&self, elapsed: Duration) -> f32;
}

/// Time-based guess: the encode is assumed to take twice the output duration.
///
/// This is a heuristic, not a measurement. It never reports more than 95%.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeuristicEstimator {
    pub image_count: usize,
    pub fps: u32,
}

impl HeuristicEstimator {
    pub fn new(image_count: usize, fps: u32) -> Self {
        Self { image_count, fps }
    }

    /// Expected wall-clock seconds for the whole encode.
    pub fn estimated_total_secs(&self) -> f64 {
        if self.fps == 0 {
            return 0.0;
        }
        self.image_count as f64 / self.fps as f64 * 2.0
    }
}

impl ProgressEstimator for HeuristicEstimator {
    fn estimate(&self, elapsed: Duration) -> f32 {
        let total = self.estimated_total_secs();
        if total <= 0.0 || !total.is_finite() {
            return FALLBACK_PROGRESS;
        }
        let pct = elapsed.as_secs_f64() / total * 100.0;
        (pct.min(RUNNING_PROGRESS_CAP as f64)) as f32
    }
}

/// Runs encoder invocations under a governor.
pub struct Supervisor<'a> {
    governor: &'a dyn ResourceGovernor,
    poll_interval: Duration,
}

impl<'a> Supervisor<'a> {
    pub fn new(governor: &'a dyn ResourceGovernor, poll_interval: Duration) -> Self {
        Self {
            governor,
            poll_interval,
        }
    }

    /// Launch `spec` and supervise it to completion.
    ///
    /// `on_progress` is called once per poll with the estimate and a status
    /// message. The manifest is removed once the process has exited, whatever
    /// the outcome.
    pub async fn supervise<F>(
        &self,
        spec: &InvocationSpec,
        limits: ResourceLimits,
        estimator: &dyn ProgressEstimator,
        cancel: &CancellationToken,
        mut on_progress: F,
    ) -> Result<SuperviseOutcome, SuperviseError>
    where
        F: FnMut(f32, &str),
    {
        let mut cmd = spec.to_command();
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(source) => {
                remove_manifest(spec);
                return Err(SuperviseError::Spawn {
                    program: spec.program.clone(),
                    source,
                });
            }
        };

        let pid = child.id();
        tracing::info!(pid = ?pid, program = %spec.program.display(), "Encoder launched");

        let stderr_task = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(read_tail(stderr, STDERR_TAIL_BYTES)));

        let started = Instant::now();
        let mut ticker = tokio::time::interval_at(started + self.poll_interval, self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut polling = pid.is_some();
        let mut throttled = false;
        let mut memory_warned = false;

        let status = loop {
            tokio::select! {
                status = child.wait() => break status.map_err(SuperviseError::Wait),
                _ = cancel.cancelled() => {
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    if let Some(task) = stderr_task {
                        task.abort();
                    }
                    remove_manifest(spec);
                    return Ok(SuperviseOutcome::Cancelled);
                }
                _ = ticker.tick(), if polling => {
                    let Some(pid) = pid else {
                        polling = false;
                        continue;
                    };
                    let Some(sample) = self.governor.sample(pid) else {
                        // Exited between ticks; the wait branch will pick it up.
                        polling = false;
                        continue;
                    };

                    if !throttled && sample.cpu_percent > limits.cpu_percent as f32 {
                        throttled = true;
                        match self.governor.throttle(pid) {
                            Ok(()) => tracing::warn!(
                                pid,
                                cpu = sample.cpu_percent,
                                limit = limits.cpu_percent,
                                "CPU ceiling exceeded, lowered encoder priority"
                            ),
                            Err(e) => tracing::warn!(
                                pid,
                                error = %e,
                                "CPU ceiling exceeded, failed to lower encoder priority"
                            ),
                        }
                    }

                    if !memory_warned && sample.memory_mb > limits.memory_mb as f64 {
                        memory_warned = true;
                        tracing::warn!(
                            pid,
                            memory_mb = sample.memory_mb,
                            limit = limits.memory_mb,
                            "Memory ceiling exceeded, not enforced"
                        );
                    }

                    let progress = estimator.estimate(started.elapsed());
                    on_progress(progress, &format!("Processing... {:.1}%", progress));
                }
            }
        };

        remove_manifest(spec);
        let status = status?;

        let stderr = match stderr_task {
            Some(task) => match tokio::time::timeout(STDERR_DRAIN_TIMEOUT, task).await {
                Ok(Ok(tail)) => tail,
                _ => Vec::new(),
            },
            None => Vec::new(),
        };

        if status.success() && spec.output_path.exists() {
            return Ok(SuperviseOutcome::Succeeded(spec.output_path.clone()));
        }

        tracing::debug!(status = %status, "Encoder did not produce output");
        Ok(SuperviseOutcome::Failed(failure_message(&stderr)))
    }
}

/// Human-readable failure detail built from captured stderr.
pub fn failure_message(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    if text.is_empty() {
        "FFmpeg failed: Unknown error".to_string()
    } else {
        format!("FFmpeg failed: {}", text)
    }
}

/// Read `reader` to EOF, keeping only the last `cap` bytes.
async fn read_tail<R: AsyncRead + Unpin>(mut reader: R, cap: usize) -> Vec<u8> {
    let mut tail = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                tail.extend_from_slice(&buf[..n]);
                if tail.len() > cap {
                    let excess = tail.len() - cap;
                    tail.drain(..excess);
                }
            }
        }
    }
    tail
}

fn remove_manifest(spec: &InvocationSpec) {
    if let Err(e) = std::fs::remove_file(&spec.manifest_path) {
        tracing::debug!(
            path = %spec.manifest_path.display(),
            error = %e,
            "Could not remove manifest"
        );
    }
}
