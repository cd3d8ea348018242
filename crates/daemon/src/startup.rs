//! Startup checks module for the timelapse daemon
//!
//! Preflight checks run before the API starts:
//! - the configured encoder runs and reports a version
//! - the manifest directory exists or can be created

use crate::config::Config;
use std::path::Path;
use std::process::Command;
use thiserror::Error;

/// Error types for startup checks
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("FFmpeg not available: {0}")]
    FfmpegUnavailable(String),

    #[error("Temp directory {path} is not usable: {source}")]
    TempDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Parse FFmpeg version string and extract major version number
///
/// Handles various FFmpeg version formats:
/// - Standard: "ffmpeg version 6.1 ..."
/// - N-prefixed: "ffmpeg version n6.1-... ..."
pub fn parse_ffmpeg_version(version_output: &str) -> Option<u32> {
    let version_line = version_output
        .lines()
        .find(|line| line.to_lowercase().contains("ffmpeg version"))?;

    let version_part = version_line
        .to_lowercase()
        .split("ffmpeg version")
        .nth(1)?
        .trim()
        .split_whitespace()
        .next()?
        .to_string();

    let version_str = version_part.trim_start_matches('n');

    // Major version ends at the first '.' or '-'
    let major_str = version_str.split(|c| c == '.' || c == '-').next()?;

    major_str.parse().ok()
}

/// Check that `<ffmpeg_path> -version` runs, returning the major version if parsable
///
/// Builds with non-numeric version strings (e.g. git snapshots) are accepted.
pub fn check_ffmpeg_available(ffmpeg_path: &Path) -> Result<Option<u32>, StartupError> {
    let output = Command::new(ffmpeg_path)
        .arg("-version")
        .output()
        .map_err(|e| {
            StartupError::FfmpegUnavailable(format!(
                "{} -version failed; is FFmpeg installed and in PATH? Error: {}",
                ffmpeg_path.display(),
                e
            ))
        })?;

    if !output.status.success() {
        return Err(StartupError::FfmpegUnavailable(format!(
            "{} -version exited with {}",
            ffmpeg_path.display(),
            output.status
        )));
    }

    let version_output = String::from_utf8_lossy(&output.stdout);
    let major = parse_ffmpeg_version(&version_output);
    match major {
        Some(major) => tracing::info!(major, "FFmpeg found"),
        None => tracing::warn!(
            first_line = version_output.lines().next().unwrap_or("(empty)"),
            "FFmpeg found but version is unrecognised"
        ),
    }
    Ok(major)
}

/// Make sure the manifest directory exists
pub fn ensure_temp_dir(temp_dir: &Path) -> Result<(), StartupError> {
    std::fs::create_dir_all(temp_dir).map_err(|source| StartupError::TempDir {
        path: temp_dir.display().to_string(),
        source,
    })
}

/// Run all startup checks in order
///
/// 1. Temp directory
/// 2. FFmpeg availability
pub fn run_startup_checks(cfg: &Config) -> Result<(), StartupError> {
    ensure_temp_dir(&cfg.encoder.temp_dir)?;
    check_ffmpeg_available(&cfg.encoder.ffmpeg_path)?;
    Ok(())
}
