//! Timelapse request types
//!
//! [`TimelapseRequest`] is the raw submission as received from a caller.
//! [`TimelapseSettings`] is the immutable, typed form produced once the
//! request passes validation.

use crate::validate::validate;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Format accepted for `time_range_start` / `time_range_end`.
pub const TIME_RANGE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Raw job submission.
///
/// Numeric fields are signed so out-of-range values reach the validator
/// instead of failing deserialization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimelapseRequest {
    pub input_folder: PathBuf,
    pub output_folder: PathBuf,
    #[serde(default = "default_fps")]
    pub fps: i64,
    #[serde(default = "default_resolution")]
    pub resolution: String,
    #[serde(default = "default_output_format")]
    pub output_format: String,
    #[serde(default = "default_compression_quality")]
    pub compression_quality: String,
    #[serde(default)]
    pub time_range_start: Option<String>,
    #[serde(default)]
    pub time_range_end: Option<String>,
    #[serde(default)]
    pub filename_pattern: Option<String>,
    #[serde(default = "default_cpu_limit")]
    pub cpu_limit: i64,
    #[serde(default = "default_memory_limit_mb")]
    pub memory_limit_mb: i64,
}

fn default_fps() -> i64 {
    30
}

fn default_resolution() -> String {
    "1920x1080".to_string()
}

fn default_output_format() -> String {
    "mp4".to_string()
}

fn default_compression_quality() -> String {
    "medium".to_string()
}

fn default_cpu_limit() -> i64 {
    100
}

fn default_memory_limit_mb() -> i64 {
    1024
}

impl TimelapseRequest {
    /// Create a request with default encoding settings.
    pub fn new(input_folder: impl Into<PathBuf>, output_folder: impl Into<PathBuf>) -> Self {
        Self {
            input_folder: input_folder.into(),
            output_folder: output_folder.into(),
            fps: default_fps(),
            resolution: default_resolution(),
            output_format: default_output_format(),
            compression_quality: default_compression_quality(),
            time_range_start: None,
            time_range_end: None,
            filename_pattern: None,
            cpu_limit: default_cpu_limit(),
            memory_limit_mb: default_memory_limit_mb(),
        }
    }

    /// Name filter, with blank strings treated as absent.
    pub fn name_filter(&self) -> Option<&str> {
        non_blank(&self.filename_pattern)
    }

    pub fn time_start(&self) -> Option<&str> {
        non_blank(&self.time_range_start)
    }

    pub fn time_end(&self) -> Option<&str> {
        non_blank(&self.time_range_end)
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.trim().is_empty())
}

/// Target frame size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

/// Why a resolution string was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionError {
    /// Not of the form `<int>x<int>`.
    Malformed,
    /// Well formed, but a dimension is zero.
    ZeroDimension,
}

impl FromStr for Resolution {
    type Err = ResolutionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s.split_once('x').ok_or(ResolutionError::Malformed)?;
        let width = parse_dimension(w)?;
        let height = parse_dimension(h)?;
        if width == 0 || height == 0 {
            return Err(ResolutionError::ZeroDimension);
        }
        Ok(Self { width, height })
    }
}

fn parse_dimension(s: &str) -> Result<u32, ResolutionError> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ResolutionError::Malformed);
    }
    s.parse().map_err(|_| ResolutionError::Malformed)
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Output container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Mp4,
    Webm,
    Avi,
    Mov,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 4] = [
        OutputFormat::Mp4,
        OutputFormat::Webm,
        OutputFormat::Avi,
        OutputFormat::Mov,
    ];

    /// File extension, also the wire name.
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Mp4 => "mp4",
            OutputFormat::Webm => "webm",
            OutputFormat::Avi => "avi",
            OutputFormat::Mov => "mov",
        }
    }

    /// Video codec used for this container family.
    pub fn codec(&self) -> &'static str {
        match self {
            OutputFormat::Mp4 | OutputFormat::Mov | OutputFormat::Avi => "libx264",
            OutputFormat::Webm => "libvpx-vp9",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            OutputFormat::Mp4 => "video/mp4",
            OutputFormat::Webm => "video/webm",
            OutputFormat::Avi => "video/x-msvideo",
            OutputFormat::Mov => "video/quicktime",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|f| f.extension() == s)
            .ok_or(())
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Encoder speed/quality preset, ordered fastest to slowest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    Ultrafast,
    Superfast,
    Veryfast,
    Faster,
    Fast,
    Medium,
    Slow,
    Slower,
    Veryslow,
}

impl Preset {
    pub const ALL: [Preset; 9] = [
        Preset::Ultrafast,
        Preset::Superfast,
        Preset::Veryfast,
        Preset::Faster,
        Preset::Fast,
        Preset::Medium,
        Preset::Slow,
        Preset::Slower,
        Preset::Veryslow,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Preset::Ultrafast => "ultrafast",
            Preset::Superfast => "superfast",
            Preset::Veryfast => "veryfast",
            Preset::Faster => "faster",
            Preset::Fast => "fast",
            Preset::Medium => "medium",
            Preset::Slow => "slow",
            Preset::Slower => "slower",
            Preset::Veryslow => "veryslow",
        }
    }
}

impl FromStr for Preset {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL.into_iter().find(|p| p.as_str() == s).ok_or(())
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// CPU and memory ceilings for one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    pub cpu_percent: u32,
    pub memory_mb: u32,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            cpu_percent: 100,
            memory_mb: 1024,
        }
    }
}

/// Validated, immutable job settings.
#[derive(Debug, Clone, PartialEq)]
pub struct TimelapseSettings {
    pub input_folder: PathBuf,
    pub output_folder: PathBuf,
    pub fps: u32,
    pub resolution: Resolution,
    pub output_format: OutputFormat,
    pub preset: Preset,
    pub name_filter: Option<String>,
    pub time_start: Option<NaiveDateTime>,
    pub time_end: Option<NaiveDateTime>,
    pub limits: ResourceLimits,
}

impl TimelapseSettings {
    /// Validate `request` and convert it into typed settings.
    ///
    /// Returns every validation error at once when the request is rejected.
    pub fn from_request(request: &TimelapseRequest) -> Result<Self, Vec<String>> {
        let errors = validate(request);
        if !errors.is_empty() {
            return Err(errors);
        }

        // validate() has vetted every field below; a failed conversion here
        // would mean the two disagree, so report it rather than panic.
        let invalid = |field: &str| vec![format!("Invalid {}", field)];

        Ok(Self {
            input_folder: request.input_folder.clone(),
            output_folder: request.output_folder.clone(),
            fps: u32::try_from(request.fps).map_err(|_| invalid("fps"))?,
            resolution: request
                .resolution
                .parse()
                .map_err(|_| invalid("resolution"))?,
            output_format: request
                .output_format
                .parse()
                .map_err(|_| invalid("output format"))?,
            preset: request
                .compression_quality
                .parse()
                .map_err(|_| invalid("compression quality"))?,
            name_filter: request.name_filter().map(str::to_string),
            time_start: parse_time_bound(request.time_start())
                .map_err(|_| invalid("time range start"))?,
            time_end: parse_time_bound(request.time_end())
                .map_err(|_| invalid("time range end"))?,
            limits: ResourceLimits {
                cpu_percent: u32::try_from(request.cpu_limit).map_err(|_| invalid("cpu limit"))?,
                memory_mb: u32::try_from(request.memory_limit_mb)
                    .map_err(|_| invalid("memory limit"))?,
            },
        })
    }
}

/// Parse an optional `YYYY-MM-DD HH:MM:SS` bound.
pub fn parse_time_bound(value: Option<&str>) -> Result<Option<NaiveDateTime>, chrono::ParseError> {
    value
        .map(|v| NaiveDateTime::parse_from_str(v.trim(), TIME_RANGE_FORMAT))
        .transpose()
}
