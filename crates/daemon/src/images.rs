//! Image set resolution.
//!
//! Scans a single directory (no recursion) for still images, applies the
//! optional name and time-range filters, and returns the surviving paths in
//! lexicographic order. That order is the frame order the encoder uses.

use chrono::NaiveDateTime;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

/// Image file extensions accepted by the resolver (case-insensitive matching).
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tiff", "tif"];

/// Timestamp layout expected at the start of a filename.
pub const FILENAME_TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

const FILENAME_TIMESTAMP_LEN: usize = 19;

/// Error type for image resolution.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The directory could not be read.
    #[error("Failed to read input folder {path}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Checks if a file has an image extension (case-insensitive).
pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Parse the capture time embedded at the start of a filename.
///
/// Looks at the part of the name before the first `.` and reads its leading
/// 19 characters as `YYYY-MM-DD_HH-MM-SS`. Returns `None` when the name does
/// not carry a timestamp.
pub fn filename_timestamp(file_name: &str) -> Option<NaiveDateTime> {
    let stem = file_name.split('.').next().unwrap_or(file_name);
    if stem.chars().count() < FILENAME_TIMESTAMP_LEN {
        return None;
    }
    let prefix: String = stem.chars().take(FILENAME_TIMESTAMP_LEN).collect();
    NaiveDateTime::parse_from_str(&prefix, FILENAME_TIMESTAMP_FORMAT).ok()
}

/// Decide whether a file passes the time window.
///
/// Files without a parsable timestamp always pass (fail-open). Bounds are inclusive.
pub fn within_time_range(
    file_name: &str,
    start: Option<NaiveDateTime>,
    end: Option<NaiveDateTime>,
) -> bool {
    if start.is_none() && end.is_none() {
        return true;
    }
    let Some(taken_at) = filename_timestamp(file_name) else {
        return true;
    };
    if start.is_some_and(|s| taken_at < s) {
        return false;
    }
    if end.is_some_and(|e| taken_at > e) {
        return false;
    }
    true
}

/// Resolve the ordered image sequence for one job.
///
/// The directory is canonicalised first so every returned path is absolute.
/// An empty result is not an error.
pub fn resolve_images(
    directory: &Path,
    name_filter: Option<&str>,
    time_start: Option<NaiveDateTime>,
    time_end: Option<NaiveDateTime>,
) -> Result<Vec<PathBuf>, ResolveError> {
    let read_err = |source: std::io::Error| ResolveError::ReadDir {
        path: directory.to_path_buf(),
        source,
    };

    let root = std::fs::canonicalize(directory).map_err(read_err)?;

    let walker = WalkDir::new(&root)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true);

    let mut images = Vec::new();

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => return Err(read_err(e.into())),
            Err(e) => {
                // Dangling links and unreadable entries are not regular files.
                tracing::debug!(error = %e, "Skipping unreadable directory entry");
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        if !is_image_file(path) {
            continue;
        }

        // Non-UTF-8 names are matched lossily and still kept.
        let file_name = entry.file_name().to_string_lossy();

        if let Some(pattern) = name_filter {
            if !file_name.contains(pattern) {
                continue;
            }
        }

        if !within_time_range(&file_name, time_start, time_end) {
            continue;
        }

        images.push(path.to_path_buf());
    }

    images.sort();
    Ok(images)
}
