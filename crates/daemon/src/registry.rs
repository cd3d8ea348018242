//! In-memory job registry.
//!
//! Single source of truth for job state. Every read and write goes through
//! one registry-wide lock, so a reader never observes a half-applied update.
//! Records are never evicted here.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Accepted, not yet started.
    Queued,
    /// Orchestrator is running.
    Processing,
    /// Output produced.
    Completed,
    /// Ended without output.
    Failed,
}

impl JobStatus {
    /// `completed` and `failed` never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Processing => write!(f, "processing"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Error type for registry operations.
#[derive(Debug, Error, PartialEq)]
pub enum RegistryError {
    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Job {id} is already {status}")]
    TerminalState { id: String, status: JobStatus },
}

/// Snapshot of one job.
///
/// `output_path` is set iff `status` is `completed`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobRecord {
    pub job_id: String,
    pub status: JobStatus,
    /// Percent complete, 0.0 to 100.0.
    pub progress: f32,
    pub message: String,
    #[serde(rename = "output_file")]
    pub output_path: Option<PathBuf>,
    /// Unix timestamp (milliseconds) when the job was created.
    pub created_at: i64,
    /// Unix timestamp (milliseconds) of the last change.
    pub updated_at: i64,
}

impl JobRecord {
    /// A freshly submitted job.
    pub fn queued(job_id: impl Into<String>, message: impl Into<String>) -> Self {
        let now = current_timestamp_ms();
        Self {
            job_id: job_id.into(),
            status: JobStatus::Queued,
            progress: 0.0,
            message: message.into(),
            output_path: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = current_timestamp_ms();
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Move from `queued` into `processing`.
    pub fn start(&mut self, message: &str) {
        self.status = JobStatus::Processing;
        self.message = message.to_string();
        self.touch();
    }

    pub fn set_message(&mut self, message: &str) {
        self.message = message.to_string();
        self.touch();
    }

    /// Record progress. Never moves backwards.
    pub fn set_progress(&mut self, progress: f32, message: &str) {
        if progress.is_finite() {
            self.progress = self.progress.max(progress.clamp(0.0, 100.0));
        }
        self.message = message.to_string();
        self.touch();
    }

    /// Terminal success: progress, output path and status change together.
    pub fn complete(&mut self, output_path: PathBuf, message: &str) {
        self.status = JobStatus::Completed;
        self.progress = 100.0;
        self.output_path = Some(output_path);
        self.message = message.to_string();
        self.touch();
    }

    /// Terminal failure.
    pub fn fail(&mut self, reason: &str) {
        self.status = JobStatus::Failed;
        self.output_path = None;
        self.message = reason.to_string();
        self.touch();
    }
}

/// Get current timestamp in milliseconds since Unix epoch.
fn current_timestamp_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Shared, cloneable handle to the job table.
#[derive(Debug, Clone, Default)]
pub struct JobRegistry {
    jobs: Arc<Mutex<HashMap<String, JobRecord>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // Poisoning is recovered; record mutations never panic midway.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, JobRecord>> {
        self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert a new record. Replaces nothing: ids are unique by construction.
    pub fn create(&self, record: JobRecord) {
        self.lock().entry(record.job_id.clone()).or_insert(record);
    }

    pub fn get(&self, id: &str) -> Result<JobRecord, RegistryError> {
        self.lock()
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    /// Snapshot of every record, in no particular order.
    pub fn list(&self) -> Vec<JobRecord> {
        self.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Apply `f` to a live record atomically.
    ///
    /// Terminal records are left untouched and reported as an error.
    pub fn update<F>(&self, id: &str, f: F) -> Result<JobRecord, RegistryError>
    where
        F: FnOnce(&mut JobRecord),
    {
        let mut jobs = self.lock();
        let record = jobs
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;

        if record.is_terminal() {
            return Err(RegistryError::TerminalState {
                id: id.to_string(),
                status: record.status,
            });
        }

        f(record);
        Ok(record.clone())
    }
}
