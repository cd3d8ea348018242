//! Timelapse Daemon
//!
//! Background service that turns folders of still images into timelapse
//! videos by supervising an external FFmpeg process per job.

pub mod daemon;
pub mod encode;
pub mod images;
pub mod orchestrator;
pub mod registry;
pub mod request;
pub mod server;
pub mod startup;
pub mod supervise;
pub mod system_info;
pub mod validate;

pub use timelapse_config as config;
pub use timelapse_config::Config;
pub use daemon::{Daemon, DaemonError};
pub use encode::{build_ffmpeg_command, BuildError, InvocationSpec};
pub use images::{resolve_images, ResolveError};
pub use orchestrator::{JobError, Orchestrator, SubmitError};
pub use registry::{JobRecord, JobRegistry, JobStatus, RegistryError};
pub use request::{
    OutputFormat, Preset, Resolution, ResourceLimits, TimelapseRequest, TimelapseSettings,
};
pub use server::{create_router, run_server, ApiError, ServerError};
pub use startup::{check_ffmpeg_available, parse_ffmpeg_version, run_startup_checks, StartupError};
pub use supervise::{
    HeuristicEstimator, ProgressEstimator, ResourceGovernor, ResourceSample, SuperviseError,
    SuperviseOutcome, Supervisor, SysinfoGovernor,
};
pub use system_info::{collect_system_info, DiskUsage, SharedLimits, SystemInfo};
pub use validate::validate;
