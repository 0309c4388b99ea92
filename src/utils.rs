//! Utility functions for file operations and path manipulation

use crate::config::FileCollisionAction;
use crate::error::{Error, PipelineError, Result};
use std::path::{Path, PathBuf};

/// Maximum number of rename attempts when resolving file collisions
const MAX_RENAME_ATTEMPTS: u32 = 9999;

/// Get a unique path for a file, handling collisions according to the specified action
///
/// # Arguments
///
/// * `path` - The desired file path
/// * `action` - How to handle file collisions
///
/// # Returns
///
/// Returns the final path to use. For Rename action, this may have a suffix added.
/// For Skip action, returns an error if the file already exists.
/// For Overwrite action, returns the original path unchanged.
///
/// # Examples
///
/// ```
/// use mirror_dl::utils::get_unique_path;
/// use mirror_dl::config::FileCollisionAction;
/// use std::path::Path;
///
/// let path = Path::new("/tmp/movie.mkv");
/// let unique = get_unique_path(path, FileCollisionAction::Rename).unwrap();
/// // If /tmp/movie.mkv exists, returns /tmp/movie (1).mkv
/// // If that exists too, returns /tmp/movie (2).mkv, etc.
/// ```
pub fn get_unique_path(path: &Path, action: FileCollisionAction) -> Result<PathBuf> {
    match action {
        FileCollisionAction::Overwrite => {
            // Always use the original path, overwriting if it exists
            Ok(path.to_path_buf())
        }
        FileCollisionAction::Skip => {
            // Return error if file exists
            if path.exists() {
                return Err(Error::Pipeline(PipelineError::FileCollision {
                    path: path.to_path_buf(),
                    reason: "File already exists and collision action is Skip".to_string(),
                }));
            }
            Ok(path.to_path_buf())
        }
        FileCollisionAction::Rename => {
            // If file doesn't exist, use original path
            if !path.exists() {
                return Ok(path.to_path_buf());
            }

            // File exists, need to find a unique name
            let stem = path.file_stem().and_then(|s| s.to_str()).ok_or_else(|| {
                Error::Pipeline(PipelineError::InvalidPath {
                    path: path.to_path_buf(),
                    reason: "Cannot extract file stem".to_string(),
                })
            })?;

            let extension = path.extension().and_then(|e| e.to_str());

            let parent = path.parent().ok_or_else(|| {
                Error::Pipeline(PipelineError::InvalidPath {
                    path: path.to_path_buf(),
                    reason: "Cannot extract parent directory".to_string(),
                })
            })?;

            // Try adding (1), (2), (3), ... until we find a unique name
            for i in 1..=MAX_RENAME_ATTEMPTS {
                let new_name = match extension {
                    Some(ext) => format!("{} ({}).{}", stem, i, ext),
                    None => format!("{} ({})", stem, i),
                };
                let new_path = parent.join(new_name);
                if !new_path.exists() {
                    return Ok(new_path);
                }
            }

            // If we've tried MAX_RENAME_ATTEMPTS names and they all exist, give up
            Err(Error::Pipeline(PipelineError::FileCollision {
                path: path.to_path_buf(),
                reason: "Could not find unique filename after 9999 attempts".to_string(),
            }))
        }
    }
}

/// Check if a path appears to be a sample file or folder
///
/// Detects sample files/folders using common naming patterns:
/// - Folders named "sample", "samples", "subs", "proof"
/// - Files with "sample" in the name
/// - Common video sample patterns (e.g., "sample.mkv", "moviename-sample.avi")
///
/// # Arguments
///
/// * `path` - The path to check
///
/// # Returns
///
/// Returns `true` if the path appears to be a sample file or folder
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use mirror_dl::utils::is_sample;
///
/// assert!(is_sample(Path::new("/downloads/Movie/Sample")));
/// assert!(is_sample(Path::new("/downloads/Movie/movie-sample.mkv")));
/// assert!(!is_sample(Path::new("/downloads/Movie/movie.mkv")));
/// ```
#[must_use]
pub fn is_sample(path: &Path) -> bool {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("")
        .to_lowercase();

    // Common sample folder/file names
    const SAMPLE_PATTERNS: &[&str] = &[
        "sample", "samples", "subs", "proof", "proofs", "cover", "covers", "eac3to",
    ];

    // Check for exact matches (case-insensitive)
    if SAMPLE_PATTERNS.iter().any(|&pattern| name == pattern) {
        return true;
    }

    // Check for "sample" in the filename
    // e.g., "movie-sample.mkv", "sample.avi", "movie.sample.mp4"
    if name.contains("sample") {
        return true;
    }

    false
}

/// Extract filename from HTTP response
///
/// Tries to extract the filename from Content-Disposition header,
/// falls back to the URL path if not found.
///
/// # Arguments
///
/// * `response` - The reqwest Response object
/// * `url` - The original URL (used as fallback)
///
/// # Returns
///
/// Returns the extracted filename (without extension) or "download" as last resort
///
/// # Examples
///
/// ```ignore
/// let response = reqwest::get("https://example.com/file.nzb").await?;
/// let filename = extract_filename_from_response(&response, "https://example.com/file.nzb");
/// // Returns "file"
/// ```
pub fn extract_filename_from_response(response: &reqwest::Response, url: &str) -> String {
    // Try to extract from Content-Disposition header
    if let Some(content_disposition) = response.headers().get("content-disposition")
        && let Ok(value) = content_disposition.to_str()
    {
        // Parse filename from Content-Disposition header
        // Format: attachment; filename="file.nzb" or filename*=UTF-8''file.nzb
        for part in value.split(';') {
            let part = part.trim();
            if part.starts_with("filename=") {
                let filename = part
                    .trim_start_matches("filename=")
                    .trim_matches('"')
                    .to_string();
                // Remove extension
                if let Some(stem) = std::path::Path::new(&filename).file_stem()
                    && let Some(stem_str) = stem.to_str()
                {
                    return stem_str.to_string();
                }
                return filename;
            } else if part.starts_with("filename*=") {
                // Handle RFC 5987 encoded filename
                let filename = part.trim_start_matches("filename*=");
                // Format is: charset'lang'encoded-filename
                if let Some(idx) = filename.rfind('\'') {
                    let encoded = &filename[idx + 1..];
                    // URL decode the filename
                    if let Ok(decoded) = urlencoding::decode(encoded) {
                        if let Some(stem) = std::path::Path::new(decoded.as_ref()).file_stem()
                            && let Some(stem_str) = stem.to_str()
                        {
                            return stem_str.to_string();
                        }
                        return decoded.to_string();
                    }
                }
            }
        }
    }

    // Fall back to extracting from URL path
    if let Ok(parsed_url) = url::Url::parse(url)
        && let Some(mut segments) = parsed_url.path_segments()
        && let Some(last_segment) = segments.next_back()
        && !last_segment.is_empty()
    {
        // Remove extension
        if let Some(stem) = std::path::Path::new(last_segment).file_stem()
            && let Some(stem_str) = stem.to_str()
        {
            return stem_str.to_string();
        }
        return last_segment.to_string();
    }

    // Last resort fallback
    "download".to_string()
}
