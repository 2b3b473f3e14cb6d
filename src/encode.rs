use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::{debug, warn};

use crate::error::EncodeError;

/// Transcodes one file to opus at a given bitrate.
pub trait Encoder: Send + Sync {
    fn run(&self, input: &Path, output: &Path, target_bitrate: u64) -> Result<(), EncodeError>;

    /// Like [`Encoder::run`], but reports failure as `false` so a batch can go on.
    fn encode(&self, input: &Path, output: &Path, target_bitrate: u64) -> bool {
        match self.run(input, output, target_bitrate) {
            Ok(()) => true,
            Err(e) => {
                warn!(input = %input.display(), error = %e, "encode failed");
                false
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Ffmpeg {
    program: PathBuf,
}

impl Ffmpeg {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Ffmpeg {
            program: program.into(),
        }
    }

    /// First audio stream only (the one the probe reads), VBR libopus at `target_bitrate` bits/s, maximum compression effort.
    pub fn command(&self, input: &Path, output: &Path, target_bitrate: u64) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-nostdin")
            .arg("-v")
            .arg("error")
            .arg("-i")
            .arg(input)
            .arg("-map")
            .arg("0:a:0")
            .arg("-vn")
            .arg("-vbr")
            .arg("on")
            .arg("-b:a")
            .arg(target_bitrate.to_string())
            .arg("-compression_level")
            .arg("10")
            .arg("-acodec")
            .arg("libopus")
            .arg("-y")
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        cmd
    }
}

impl Encoder for Ffmpeg {
    fn run(&self, input: &Path, output: &Path, target_bitrate: u64) -> Result<(), EncodeError> {
        let mut cmd = self.command(input, output, target_bitrate);
        debug!(ffmpeg_cmd = ?cmd);

        let result = cmd.output().map_err(|e| match e.kind() {
            ErrorKind::NotFound => EncodeError::ToolMissing(self.program.clone()),
            _ => EncodeError::Spawn(e),
        })?;

        if !result.status.success() {
            return Err(EncodeError::Failed {
                status: result.status,
                stderr: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}
