//! Video metadata probing and the Transcoding Adapter

pub mod probe;
pub mod transcode;

pub use probe::{FfprobeProber, VideoProber};
pub use transcode::{FfmpegTranscoder, TranscodeState, Transcoder};

use anyhow::{anyhow, Result};

/// Reject executable paths that could smuggle shell syntax or traverse directories.
pub(crate) fn validate_executable_path(path: &str) -> Result<()> {
    let dangerous_chars = [';', '|', '&', '$', '`', '(', ')', '<', '>', '\n', '\r'];
    if path.chars().any(|c| dangerous_chars.contains(&c)) {
        return Err(anyhow!("Path contains dangerous characters: {}", path));
    }
    if path.contains("..") {
        return Err(anyhow!("Path contains directory traversal: {}", path));
    }
    if !path
        .chars()
        .all(|c| c.is_alphanumeric() || c == '/' || c == '-' || c == '_' || c == '.' || c == '\\')
    {
        return Err(anyhow!("Path contains unsafe characters: {}", path));
    }
    Ok(())
}
