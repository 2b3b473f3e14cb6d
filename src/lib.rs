//! Batch conversion of audio and video files to Opus audio.
//!
//! A directory tree is scanned for media files, each file is probed with
//! ffprobe, and files whose audio can be shrunk are re-encoded with ffmpeg.
//! An output is kept only when its duration matches the original, in which
//! case the original is deleted.

pub mod collect;
pub mod config;
pub mod encode;
pub mod error;
pub mod naming;
pub mod pipeline;
pub mod policy;
pub mod probe;

pub use config::{Config, SortOrder};
pub use encode::{Encoder, Ffmpeg};
pub use error::{ConfigError, EncodeError, ProbeError};
pub use pipeline::{Candidate, FailReason, Outcome, Pipeline, Report};
pub use policy::{choose_target_bitrate, Decision, SkipReason};
pub use probe::{Ffprobe, MediaProbe, ProbeResult, Prober};
