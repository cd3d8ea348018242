//! Settings validation
//!
//! Checks a [`TimelapseRequest`] before any work starts. Every check runs
//! independently so the caller sees all defects in one response.

use crate::request::{
    parse_time_bound, OutputFormat, Preset, Resolution, ResolutionError, TimelapseRequest,
};
use std::path::Path;

pub const FPS_RANGE: (i64, i64) = (1, 120);
pub const CPU_LIMIT_RANGE: (i64, i64) = (1, 100);
pub const MEMORY_LIMIT_RANGE: (i64, i64) = (64, 8192);

/// Validate a request, returning one message per defect.
///
/// An empty list means the request is accepted.
pub fn validate(request: &TimelapseRequest) -> Vec<String> {
    let mut errors = Vec::new();

    let input = &request.input_folder;
    if !input.exists() {
        errors.push(format!("Input folder does not exist: {}", input.display()));
    } else if !input.is_dir() {
        errors.push(format!("Input folder is not a directory: {}", input.display()));
    }

    if !output_parent(&request.output_folder).exists() {
        errors.push(format!(
            "Output folder parent does not exist: {}",
            request.output_folder.display()
        ));
    }

    if !in_range(request.fps, FPS_RANGE) {
        errors.push(format!(
            "FPS must be between {} and {}",
            FPS_RANGE.0, FPS_RANGE.1
        ));
    }

    match request.resolution.parse::<Resolution>() {
        Ok(_) => {}
        Err(ResolutionError::Malformed) => errors.push(
            "Resolution must be in format WIDTHxHEIGHT (e.g., 1920x1080)".to_string(),
        ),
        Err(ResolutionError::ZeroDimension) => errors.push(
            "Invalid resolution format: width and height must be at least 1".to_string(),
        ),
    }

    if request.output_format.parse::<OutputFormat>().is_err() {
        let names: Vec<&str> = OutputFormat::ALL.iter().map(|f| f.extension()).collect();
        errors.push(format!("Output format must be one of: {}", names.join(", ")));
    }

    if request.compression_quality.parse::<Preset>().is_err() {
        let names: Vec<&str> = Preset::ALL.iter().map(|p| p.as_str()).collect();
        errors.push(format!(
            "Compression quality must be one of: {}",
            names.join(", ")
        ));
    }

    if parse_time_bound(request.time_start()).is_err() {
        errors.push("Time range start must be in format YYYY-MM-DD HH:MM:SS".to_string());
    }
    if parse_time_bound(request.time_end()).is_err() {
        errors.push("Time range end must be in format YYYY-MM-DD HH:MM:SS".to_string());
    }

    if !in_range(request.cpu_limit, CPU_LIMIT_RANGE) {
        errors.push(format!(
            "CPU limit must be between {} and {} percent",
            CPU_LIMIT_RANGE.0, CPU_LIMIT_RANGE.1
        ));
    }

    if !in_range(request.memory_limit_mb, MEMORY_LIMIT_RANGE) {
        errors.push(format!(
            "Memory limit must be between {} and {} MB",
            MEMORY_LIMIT_RANGE.0, MEMORY_LIMIT_RANGE.1
        ));
    }

    errors
}

fn in_range(value: i64, (min, max): (i64, i64)) -> bool {
    (min..=max).contains(&value)
}

/// Directory that must already exist for `output` to be creatable.
///
/// A bare relative name resolves against the working directory, and the
/// filesystem root is its own parent.
fn output_parent(output: &Path) -> &Path {
    match output.parent() {
        Some(parent) if parent.as_os_str().is_empty() => Path::new("."),
        Some(parent) => parent,
        None => output,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;

    fn valid_request(dir: &TempDir) -> TimelapseRequest {
        TimelapseRequest::new(dir.path(), dir.path().join("out"))
    }

    fn has_error(errors: &[String], needle: &str) -> bool {
        errors.iter().any(|e| e.contains(needle))
    }

    #[test]
    fn test_valid_request_has_no_errors() {
        let dir = TempDir::new().unwrap();
        assert!(validate(&valid_request(&dir)).is_empty());
    }

    #[test]
    fn test_missing_input_folder() {
        let dir = TempDir::new().unwrap();
        let mut req = valid_request(&dir);
        req.input_folder = dir.path().join("missing");

        let errors = validate(&req);
        assert_eq!(errors.len(), 1);
        assert!(has_error(&errors, "Input folder does not exist"));
    }

    #[test]
    fn test_input_folder_is_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("frame.jpg");
        std::fs::write(&file, b"x").unwrap();
        let mut req = valid_request(&dir);
        req.input_folder = file;

        assert!(has_error(&validate(&req), "not a directory"));
    }

    #[test]
    fn test_output_parent_must_exist() {
        let dir = TempDir::new().unwrap();
        let mut req = valid_request(&dir);
        req.output_folder = dir.path().join("a/b/c");

        assert!(has_error(&validate(&req), "Output folder parent does not exist"));

        // The folder itself need not exist
        req.output_folder = dir.path().join("fresh");
        assert!(validate(&req).is_empty());
    }

    #[test]
    fn test_relative_output_name_checks_working_dir() {
        assert_eq!(output_parent(Path::new("videos")), Path::new("."));
        assert_eq!(output_parent(Path::new("/")), Path::new("/"));
        assert_eq!(output_parent(Path::new("/tmp/out")), Path::new("/tmp"));
    }

    #[test]
    fn test_malformed_resolution_is_single_error() {
        let dir = TempDir::new().unwrap();
        let mut req = valid_request(&dir);
        req.resolution = "abc".to_string();

        let errors = validate(&req);
        assert_eq!(errors.len(), 1);
        assert!(has_error(&errors, "Resolution must be in format"));

        req.resolution = "0x480".to_string();
        let errors = validate(&req);
        assert_eq!(errors.len(), 1);
        assert!(has_error(&errors, "Invalid resolution format"));
    }

    #[test]
    fn test_unknown_format_and_preset() {
        let dir = TempDir::new().unwrap();
        let mut req = valid_request(&dir);
        req.output_format = "mkv".to_string();
        req.compression_quality = "placebo".to_string();

        let errors = validate(&req);
        assert_eq!(errors.len(), 2);
        assert!(has_error(&errors, "Output format must be one of: mp4, webm, avi, mov"));
        assert!(has_error(&errors, "Compression quality must be one of: ultrafast"));
    }

    #[test]
    fn test_cpu_and_memory_errors_reported_together() {
        let dir = TempDir::new().unwrap();
        let mut req = valid_request(&dir);
        req.cpu_limit = 150;
        req.memory_limit_mb = 32;

        let errors = validate(&req);
        assert_eq!(errors.len(), 2);
        assert!(has_error(&errors, "CPU limit must be between 1 and 100"));
        assert!(has_error(&errors, "Memory limit must be between 64 and 8192"));
    }

    #[test]
    fn test_malformed_time_range() {
        let dir = TempDir::new().unwrap();
        let mut req = valid_request(&dir);
        req.time_range_start = Some("yesterday".to_string());
        req.time_range_end = Some("2024-01-01 11:00:00".to_string());

        let errors = validate(&req);
        assert_eq!(errors.len(), 1);
        assert!(has_error(&errors, "Time range start"));
    }

    #[test]
    fn test_all_defects_collected() {
        let mut req = TimelapseRequest::new("/nonexistent/in", "/nonexistent/a/out");
        req.fps = 0;
        req.resolution = "big".to_string();
        req.output_format = "gif".to_string();
        req.compression_quality = "best".to_string();
        req.cpu_limit = 0;
        req.memory_limit_mb = 10_000;

        assert_eq!(validate(&req).len(), 8);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_fps_range(fps in -1000i64..1000) {
            let dir = TempDir::new().unwrap();
            let mut req = valid_request(&dir);
            req.fps = fps;

            let errors = validate(&req);
            let in_range = (1..=120).contains(&fps);
            prop_assert_eq!(!has_error(&errors, "FPS must be between"), in_range);
            prop_assert_eq!(errors.is_empty(), in_range);
        }

        #[test]
        fn prop_resource_limit_ranges(cpu in -10i64..200, mem in 0i64..10_000) {
            let dir = TempDir::new().unwrap();
            let mut req = valid_request(&dir);
            req.cpu_limit = cpu;
            req.memory_limit_mb = mem;

            let errors = validate(&req);
            prop_assert_eq!(has_error(&errors, "CPU limit"), !(1..=100).contains(&cpu));
            prop_assert_eq!(has_error(&errors, "Memory limit"), !(64..=8192).contains(&mem));
        }

        #[test]
        fn prop_garbage_resolution_never_panics(res in "\\PC{0,16}") {
            let dir = TempDir::new().unwrap();
            let mut req = valid_request(&dir);
            req.resolution = res;

            let errors = validate(&req);
            prop_assert!(errors.len() <= 1);
        }
    }
}
