use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

/// Reasons a probe produced no usable metadata.
///
/// These never leave the prober: every variant collapses to an absent value.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("ffprobe not found at '{}'", .0.display())]
    ToolMissing(PathBuf),

    #[error("failed to run ffprobe: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("ffprobe exited with {status}: {stderr}")]
    Failed { status: ExitStatus, stderr: String },

    #[error("unreadable ffprobe output: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Reasons an encode did not produce an output.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("ffmpeg not found at '{}'", .0.display())]
    ToolMissing(PathBuf),

    #[error("failed to run ffmpeg: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("ffmpeg exited with {status}: {stderr}")]
    Failed { status: ExitStatus, stderr: String },
}

/// Problems with the user-supplied configuration, reported before any work starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("directory '{}' does not exist", .0.display())]
    InputMissing(PathBuf),

    #[error("'{}' is not a directory", .0.display())]
    InputNotDirectory(PathBuf),

    #[error("output directory '{}' does not exist", .0.display())]
    OutputMissing(PathBuf),

    #[error("output path '{}' is not a directory", .0.display())]
    OutputNotDirectory(PathBuf),

    #[error("thread count must be at least 1")]
    InvalidThreads,

    #[error("{tool} is not installed (tried '{}')", .path.display())]
    ToolUnavailable { tool: &'static str, path: PathBuf },
}
