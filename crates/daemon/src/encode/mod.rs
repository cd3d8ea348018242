//! Encoding modules for the timelapse daemon

pub mod ffmpeg;

pub use ffmpeg::{build_ffmpeg_command, render_manifest, BuildError, InvocationSpec, CRF};
