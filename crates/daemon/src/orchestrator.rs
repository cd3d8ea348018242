//! Job orchestrator for the timelapse daemon
//!
//! Accepts submissions, registers them as queued and drives each job through
//! resolve, build and supervise on its own task. Every fault past submission
//! ends up as a `failed` record; nothing escapes to the submitter.

use crate::config::EncoderConfig;
use crate::encode::{build_ffmpeg_command, BuildError};
use crate::images::{resolve_images, ResolveError};
use crate::registry::{JobRecord, JobRegistry};
use crate::request::{TimelapseRequest, TimelapseSettings};
use crate::supervise::{
    HeuristicEstimator, ResourceGovernor, SuperviseError, SuperviseOutcome, Supervisor,
    SysinfoGovernor,
};
use crate::system_info::SharedLimits;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Error returned synchronously from [`Orchestrator::submit`]
#[derive(Debug, Error)]
pub enum SubmitError {
    /// Request rejected; no job was created
    #[error("Validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),
}

/// Error type for one job run
#[derive(Debug, Error)]
pub enum JobError {
    /// Image resolution failed
    #[error("{0}")]
    Resolve(#[from] ResolveError),

    /// Filters left nothing to encode
    #[error("No image files found matching criteria")]
    NoImages,

    /// Failed to create the output directory
    #[error("Failed to create output directory {path}: {source}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Manifest could not be written
    #[error("{0}")]
    Build(#[from] BuildError),

    /// Encoder could not be launched or awaited
    #[error("{0}")]
    Supervise(#[from] SuperviseError),

    /// Encoder ran but produced no output
    #[error("{0}")]
    Encoder(String),

    /// Daemon shutdown stopped the job
    #[error("Job cancelled")]
    Cancelled,

    /// A task inside the job panicked
    #[error("Job task panicked: {0}")]
    Panicked(String),
}

impl JobError {
    /// Message stored on the failed record
    pub fn failure_message(&self) -> String {
        match self {
            JobError::NoImages | JobError::Cancelled | JobError::Encoder(_) => self.to_string(),
            other => format!("Error: {}", other),
        }
    }
}

/// Output file name for a job started at `now`
pub fn output_file_name(
    job_id: &str,
    now: chrono::DateTime<chrono::Local>,
    extension: &str,
) -> String {
    let short_id: String = job_id.chars().take(8).collect();
    format!(
        "timelapse_{}_{}.{}",
        now.format("%Y%m%d_%H%M%S"),
        short_id,
        extension
    )
}

/// Manifest location for a job
pub fn manifest_path(temp_dir: &Path, job_id: &str) -> PathBuf {
    temp_dir.join(format!("ffmpeg_list_{}.txt", job_id))
}

/// Drives submitted jobs to a terminal state
///
/// Cheap to clone; every clone shares the registry, the limits board and
/// the shutdown token.
#[derive(Clone)]
pub struct Orchestrator {
    registry: JobRegistry,
    limits: SharedLimits,
    governor: Arc<dyn ResourceGovernor>,
    encoder: EncoderConfig,
    shutdown: CancellationToken,
}

impl Orchestrator {
    /// Create an orchestrator using the sysinfo-backed governor
    pub fn new(
        encoder: EncoderConfig,
        registry: JobRegistry,
        limits: SharedLimits,
        shutdown: CancellationToken,
    ) -> Self {
        Self::with_governor(
            encoder,
            registry,
            limits,
            shutdown,
            Arc::new(SysinfoGovernor::new()),
        )
    }

    /// Create an orchestrator with a custom resource governor
    pub fn with_governor(
        encoder: EncoderConfig,
        registry: JobRegistry,
        limits: SharedLimits,
        shutdown: CancellationToken,
        governor: Arc<dyn ResourceGovernor>,
    ) -> Self {
        Self {
            registry,
            limits,
            governor,
            encoder,
            shutdown,
        }
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn limits(&self) -> &SharedLimits {
        &self.limits
    }

    /// Validate and enqueue a job
    ///
    /// On success the returned record is `queued` and the run has been
    /// spawned. On rejection no record exists.
    pub async fn submit(&self, request: &TimelapseRequest) -> Result<JobRecord, SubmitError> {
        let settings = TimelapseSettings::from_request(request).map_err(SubmitError::Validation)?;

        let job_id = uuid::Uuid::new_v4().to_string();
        let record = JobRecord::queued(job_id.clone(), "Job queued successfully");
        self.registry.create(record.clone());

        *self.limits.write().await = settings.limits;

        tracing::info!(
            job_id = %job_id,
            input = %settings.input_folder.display(),
            fps = settings.fps,
            format = %settings.output_format,
            "Job submitted"
        );

        let this = self.clone();
        let cancel = self.shutdown.child_token();
        tokio::spawn(async move { this.run(job_id, settings, cancel).await });

        Ok(record)
    }

    /// Run one job to a terminal state
    ///
    /// The body runs on its own task so a panic becomes a failed record.
    async fn run(self, job_id: String, settings: TimelapseSettings, cancel: CancellationToken) {
        let body = {
            let this = self.clone();
            let job_id = job_id.clone();
            tokio::spawn(async move { this.execute(&job_id, &settings, &cancel).await })
        };

        let result = match body.await {
            Ok(result) => result,
            Err(join_err) => Err(JobError::Panicked(join_err.to_string())),
        };

        let finished = match result {
            Ok(output_path) => {
                tracing::info!(job_id = %job_id, output = %output_path.display(), "Job completed");
                self.registry.update(&job_id, |r| {
                    r.complete(output_path, "Timelapse completed successfully!")
                })
            }
            Err(e) => {
                let message = e.failure_message();
                tracing::warn!(job_id = %job_id, error = %message, "Job failed");
                self.registry.update(&job_id, |r| r.fail(&message))
            }
        };

        if let Err(e) = finished {
            tracing::error!(job_id = %job_id, error = %e, "Could not record job outcome");
        }
    }

    /// Resolve, build and supervise; returns the output path on success
    async fn execute(
        &self,
        job_id: &str,
        settings: &TimelapseSettings,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, JobError> {
        self.note(job_id, |r| r.start("Starting timelapse generation..."));
        tracing::info!(job_id = %job_id, "Job started");

        self.note(job_id, |r| r.set_message("Scanning input folder..."));
        let images = {
            let dir = settings.input_folder.clone();
            let name_filter = settings.name_filter.clone();
            let (start, end) = (settings.time_start, settings.time_end);
            tokio::task::spawn_blocking(move || {
                resolve_images(&dir, name_filter.as_deref(), start, end)
            })
            .await
            .map_err(|e| JobError::Panicked(e.to_string()))??
        };

        if images.is_empty() {
            return Err(JobError::NoImages);
        }
        tracing::info!(job_id = %job_id, count = images.len(), "Images resolved");

        let found = format!("Found {} images, starting processing...", images.len());
        self.note(job_id, |r| r.set_message(&found));

        tokio::fs::create_dir_all(&settings.output_folder)
            .await
            .map_err(|source| JobError::OutputDir {
                path: settings.output_folder.clone(),
                source,
            })?;

        let output_path = settings.output_folder.join(output_file_name(
            job_id,
            chrono::Local::now(),
            settings.output_format.extension(),
        ));
        let manifest = manifest_path(&self.encoder.temp_dir, job_id);

        if cancel.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        let spec = build_ffmpeg_command(
            &self.encoder.ffmpeg_path,
            settings,
            &images,
            &manifest,
            &output_path,
        )?;

        self.note(job_id, |r| r.set_message("Running ffmpeg..."));

        let estimator = HeuristicEstimator::new(images.len(), settings.fps);
        let poll_interval = Duration::from_millis(self.encoder.poll_interval_ms.max(1));
        let supervisor = Supervisor::new(self.governor.as_ref(), poll_interval);
        let registry = &self.registry;

        let outcome = supervisor
            .supervise(&spec, settings.limits, &estimator, cancel, |progress, message| {
                let _ = registry.update(job_id, |r| r.set_progress(progress, message));
            })
            .await?;

        match outcome {
            SuperviseOutcome::Succeeded(path) => Ok(path),
            SuperviseOutcome::Failed(detail) => Err(JobError::Encoder(detail)),
            SuperviseOutcome::Cancelled => Err(JobError::Cancelled),
        }
    }

    fn note<F>(&self, job_id: &str, f: F)
    where
        F: FnOnce(&mut JobRecord),
    {
        if let Err(e) = self.registry.update(job_id, f) {
            tracing::debug!(job_id = %job_id, error = %e, "Skipped job update");
        }
    }
}
