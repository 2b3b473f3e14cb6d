use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use clap::ValueEnum;

use crate::error::ConfigError;

pub const DEFAULT_FFMPEG: &str = "ffmpeg";
pub const DEFAULT_FFPROBE: &str = "ffprobe";

/// Order in which candidates are handed to the worker pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum SortOrder {
    /// Case-insensitive path order
    #[default]
    Name,
    /// File size in bytes
    Size,
}

/// Everything a batch run needs. Built once by the front end and passed down.
#[derive(Debug, Clone)]
pub struct Config {
    pub base_dir: PathBuf,
    /// Write outputs here instead of next to each input.
    pub output_dir: Option<PathBuf>,
    pub threads: usize,
    pub sort: SortOrder,
    pub reverse: bool,
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

impl Config {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Config {
            base_dir: base_dir.into(),
            output_dir: None,
            threads: num_cpus::get(),
            sort: SortOrder::default(),
            reverse: false,
            ffmpeg: PathBuf::from(DEFAULT_FFMPEG),
            ffprobe: PathBuf::from(DEFAULT_FFPROBE),
        }
    }

    /// Checks the directories and the thread count. The batch must not start on error.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.base_dir.exists() {
            return Err(ConfigError::InputMissing(self.base_dir.clone()));
        }
        if !self.base_dir.is_dir() {
            return Err(ConfigError::InputNotDirectory(self.base_dir.clone()));
        }
        if let Some(ref output_dir) = self.output_dir {
            if !output_dir.exists() {
                return Err(ConfigError::OutputMissing(output_dir.clone()));
            }
            if !output_dir.is_dir() {
                return Err(ConfigError::OutputNotDirectory(output_dir.clone()));
            }
        }
        if self.threads < 1 {
            return Err(ConfigError::InvalidThreads);
        }
        Ok(())
    }

    /// Makes sure both external tools can be started.
    pub fn check_tools(&self) -> Result<(), ConfigError> {
        if !is_tool_installed(&self.ffmpeg) {
            return Err(ConfigError::ToolUnavailable {
                tool: "ffmpeg",
                path: self.ffmpeg.clone(),
            });
        }
        if !is_tool_installed(&self.ffprobe) {
            return Err(ConfigError::ToolUnavailable {
                tool: "ffprobe",
                path: self.ffprobe.clone(),
            });
        }
        Ok(())
    }
}

pub fn is_tool_installed(program: &Path) -> bool {
    Command::new(program)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}
