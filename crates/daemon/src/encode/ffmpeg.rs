//! FFmpeg command builder for the timelapse daemon
//!
//! Writes the concat-demuxer manifest and builds the encoder invocation
//! from validated settings. Nothing here launches a process.

use crate::request::TimelapseSettings;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Constant rate factor used for every encode
pub const CRF: u8 = 23;

/// Error type for command building
#[derive(Debug, Error)]
pub enum BuildError {
    /// Manifest could not be written
    #[error("Failed to write manifest {path}: {source}")]
    Manifest {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A fully specified encoder invocation
///
/// Program plus arguments, with the paths the supervisor needs after exit.
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationSpec {
    /// Encoder program
    pub program: PathBuf,
    /// Arguments, in order
    pub args: Vec<OsString>,
    /// File the encoder is expected to produce
    pub output_path: PathBuf,
    /// Temporary manifest to remove once the encoder exits
    pub manifest_path: PathBuf,
}

impl InvocationSpec {
    /// Convert into a tokio command ready to spawn
    pub fn to_command(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.args);
        cmd
    }
}

/// Render one manifest line for the concat demuxer
///
/// Paths are single-quoted; embedded quotes are closed, escaped and reopened.
pub fn manifest_line(image: &Path) -> String {
    let escaped = image.to_string_lossy().replace('\'', r"'\''");
    format!("file '{}'\n", escaped)
}

/// Render the manifest body for an ordered image list
pub fn render_manifest(images: &[PathBuf]) -> String {
    images.iter().map(|p| manifest_line(p)).collect()
}

/// Create `path` and fill it with `write`
///
/// A failed write removes the partial file best-effort.
fn write_or_discard<F>(path: &Path, write: F) -> io::Result<()>
where
    F: FnOnce(&mut File) -> io::Result<()>,
{
    let mut file = File::create(path)?;
    let result = write(&mut file).and_then(|()| file.flush());
    if result.is_err() {
        drop(file);
        if let Err(e) = fs::remove_file(path) {
            tracing::debug!(path = %path.display(), error = %e, "Failed to remove partial manifest");
        }
    }
    result
}

/// Build an FFmpeg command that encodes `images` into `output_path`
///
/// Writes the manifest to `manifest_path`, then assembles:
/// - concat demuxer input pointed at the manifest
/// - `fps=<fps>,scale=<w>x<h>` filter chain
/// - codec chosen by container, requested preset, CRF 23
/// - unconditional overwrite of the output
pub fn build_ffmpeg_command(
    program: &Path,
    settings: &TimelapseSettings,
    images: &[PathBuf],
    manifest_path: &Path,
    output_path: &Path,
) -> Result<InvocationSpec, BuildError> {
    let body = render_manifest(images);
    write_or_discard(manifest_path, |file| file.write_all(body.as_bytes())).map_err(
        |source| BuildError::Manifest {
            path: manifest_path.to_path_buf(),
            source,
        },
    )?;

    let filter = format!("fps={},scale={}", settings.fps, settings.resolution);

    let mut args: Vec<OsString> = Vec::new();

    // Concat demuxer; absolute paths in the manifest need -safe 0
    args.extend(["-f", "concat", "-safe", "0", "-i"].map(OsString::from));
    args.push(manifest_path.as_os_str().to_owned());

    args.push("-vf".into());
    args.push(filter.into());

    args.push("-c:v".into());
    args.push(settings.output_format.codec().into());

    args.push("-preset".into());
    args.push(settings.preset.as_str().into());

    args.push("-crf".into());
    args.push(CRF.to_string().into());

    args.push("-y".into());
    args.push(output_path.as_os_str().to_owned());

    Ok(InvocationSpec {
        program: program.to_path_buf(),
        args,
        output_path: output_path.to_path_buf(),
        manifest_path: manifest_path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{OutputFormat, Preset, Resolution, ResourceLimits};
    use proptest::prelude::*;
    use tempfile::TempDir;

    /// Helper to convert args to a Vec of strings for easier testing
    fn get_args(spec: &InvocationSpec) -> Vec<String> {
        spec.args
            .iter()
            .filter_map(|arg| arg.to_str().map(String::from))
            .collect()
    }

    /// Helper to check if args contain a flag with a specific value
    fn has_flag_with_value(args: &[String], flag: &str, value: &str) -> bool {
        args.windows(2).any(|pair| pair[0] == flag && pair[1] == value)
    }

    fn make_settings(format: OutputFormat, preset: Preset, fps: u32) -> TimelapseSettings {
        TimelapseSettings {
            input_folder: PathBuf::from("/frames"),
            output_folder: PathBuf::from("/videos"),
            fps,
            resolution: Resolution {
                width: 640,
                height: 480,
            },
            output_format: format,
            preset,
            name_filter: None,
            time_start: None,
            time_end: None,
            limits: ResourceLimits::default(),
        }
    }

    fn format_strategy() -> impl Strategy<Value = OutputFormat> {
        prop_oneof![
            Just(OutputFormat::Mp4),
            Just(OutputFormat::Webm),
            Just(OutputFormat::Avi),
            Just(OutputFormat::Mov),
        ]
    }

    fn preset_strategy() -> impl Strategy<Value = Preset> {
        (0usize..Preset::ALL.len()).prop_map(|i| Preset::ALL[i])
    }

    #[test]
    fn test_manifest_lines() {
        assert_eq!(
            manifest_line(Path::new("/frames/a.jpg")),
            "file '/frames/a.jpg'\n"
        );
        assert_eq!(
            manifest_line(Path::new("/frames/it's.jpg")),
            "file '/frames/it'\\''s.jpg'\n"
        );
    }

    #[test]
    fn test_manifest_written_in_order() {
        let dir = TempDir::new().unwrap();
        let manifest = dir.path().join("list.txt");
        let images = vec![PathBuf::from("/f/1.jpg"), PathBuf::from("/f/2.jpg")];
        let settings = make_settings(OutputFormat::Mp4, Preset::Medium, 30);

        build_ffmpeg_command(
            Path::new("ffmpeg"),
            &settings,
            &images,
            &manifest,
            Path::new("/videos/out.mp4"),
        )
        .unwrap();

        let body = std::fs::read_to_string(&manifest).unwrap();
        assert_eq!(body, "file '/f/1.jpg'\nfile '/f/2.jpg'\n");
    }

    #[test]
    fn test_unwritable_manifest_is_error() {
        let settings = make_settings(OutputFormat::Mp4, Preset::Medium, 30);
        let result = build_ffmpeg_command(
            Path::new("ffmpeg"),
            &settings,
            &[],
            Path::new("/nonexistent/dir/list.txt"),
            Path::new("/videos/out.mp4"),
        );
        assert!(matches!(result, Err(BuildError::Manifest { .. })));
    }

    #[test]
    fn test_failed_manifest_write_removes_partial_file() {
        let dir = TempDir::new().unwrap();
        let manifest = dir.path().join("ffmpeg_list.txt");

        let result = write_or_discard(&manifest, |file| {
            file.write_all(b"file '/f/1.jpg'\n")?;
            Err(io::Error::new(io::ErrorKind::Other, "disk full"))
        });

        assert!(result.is_err());
        assert!(!manifest.exists());
    }

    #[test]
    fn test_successful_manifest_write_is_kept() {
        let dir = TempDir::new().unwrap();
        let manifest = dir.path().join("ffmpeg_list.txt");

        write_or_discard(&manifest, |file| file.write_all(b"file '/f/1.jpg'\n")).unwrap();
        assert_eq!(
            std::fs::read_to_string(&manifest).unwrap(),
            "file '/f/1.jpg'\n"
        );
    }

    #[test]
    fn test_webm_uses_vp9() {
        let dir = TempDir::new().unwrap();
        let settings = make_settings(OutputFormat::Webm, Preset::Fast, 24);
        let spec = build_ffmpeg_command(
            Path::new("ffmpeg"),
            &settings,
            &[],
            &dir.path().join("list.txt"),
            Path::new("/videos/out.webm"),
        )
        .unwrap();

        let args = get_args(&spec);
        assert!(has_flag_with_value(&args, "-c:v", "libvpx-vp9"));
        assert!(has_flag_with_value(&args, "-vf", "fps=24,scale=640x480"));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        #[test]
        fn prop_ffmpeg_command_completeness(
            format in format_strategy(),
            preset in preset_strategy(),
            fps in 1u32..=120,
            count in 0usize..20,
        ) {
            let dir = TempDir::new().unwrap();
            let manifest = dir.path().join("ffmpeg_list.txt");
            let output = dir.path().join(format!("out.{}", format.extension()));
            let images: Vec<PathBuf> = (0..count)
                .map(|i| PathBuf::from(format!("/frames/{:04}.jpg", i)))
                .collect();
            let settings = make_settings(format, preset, fps);

            let spec = build_ffmpeg_command(
                Path::new("ffmpeg"), &settings, &images, &manifest, &output,
            ).unwrap();
            let again = build_ffmpeg_command(
                Path::new("ffmpeg"), &settings, &images, &manifest, &output,
            ).unwrap();
            let args = get_args(&spec);

            prop_assert_eq!(&spec, &again, "builder should be deterministic");
            prop_assert_eq!(spec.program.as_path(), Path::new("ffmpeg"));
            prop_assert!(has_flag_with_value(&args, "-f", "concat"));
            prop_assert!(has_flag_with_value(&args, "-safe", "0"));
            prop_assert!(has_flag_with_value(&args, "-i", manifest.to_str().unwrap()));
            let vf = format!("fps={},scale=640x480", fps);
            prop_assert!(has_flag_with_value(&args, "-vf", &vf));
            prop_assert!(has_flag_with_value(&args, "-c:v", format.codec()));
            prop_assert!(has_flag_with_value(&args, "-preset", preset.as_str()));
            prop_assert!(has_flag_with_value(&args, "-crf", "23"));
            prop_assert!(has_flag_with_value(&args, "-y", output.to_str().unwrap()));
            prop_assert_eq!(args.last().map(String::as_str), output.to_str());

            let body = std::fs::read_to_string(&manifest).unwrap();
            prop_assert_eq!(body.lines().count(), count);
        }
    }
}
