//! Per-file conversion: probe, decide, encode, verify, then keep exactly one of
//! original or output. Files are processed concurrently on a bounded rayon pool.

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crossbeam_channel::{unbounded, Sender};
use rayon::prelude::*;
use rayon::{ThreadPoolBuildError, ThreadPoolBuilder};
use tracing::{debug, error, info, warn, Span};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::config::Config;
use crate::encode::{Encoder, Ffmpeg};
use crate::naming;
use crate::policy::{self, Decision, SkipReason};
use crate::probe::{Ffprobe, MediaProbe, Prober};

/// Largest accepted difference between original and output duration, in seconds.
pub const DURATION_TOLERANCE_SECS: f64 = 0.1;

/// A file selected for possible conversion.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    /// Set once the encoder ran and reported success.
    pub converted: bool,
}

impl Candidate {
    pub fn new(input_path: PathBuf, output_dir: Option<&Path>) -> Self {
        let output_path = naming::rename(&input_path, output_dir);
        Candidate {
            input_path,
            output_path,
            converted: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FailReason {
    /// The encoder failed or could not be started
    Encode,
    DurationMismatch { original: f64, output: f64 },
    /// A duration could not be read, so the output cannot be trusted
    Unverifiable,
}

impl fmt::Display for FailReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Encode => write!(f, "encoder failed"),
            Self::DurationMismatch { original, output } => {
                write!(f, "duration mismatch: original {original:.2}s, output {output:.2}s")
            }
            Self::Unverifiable => write!(f, "duration could not be verified"),
        }
    }
}

/// Terminal state of a candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Nothing was touched
    Skipped(SkipReason),
    /// Encoded and verified; the original was deleted
    Converted { target_bitrate: u64 },
    /// A verified output from an earlier, interrupted run was found; the original was deleted
    Recovered,
    /// The original is intact and no output is left behind
    Failed(FailReason),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Converted { .. } | Self::Recovered)
    }
}

#[derive(Debug, Clone)]
pub struct Report {
    pub candidate: Candidate,
    pub outcome: Outcome,
}

pub struct Pipeline<P, E> {
    prober: Prober<P>,
    encoder: E,
    threads: usize,
    progress: Span,
}

impl Pipeline<Ffprobe, Ffmpeg> {
    /// A pipeline driving the ffprobe and ffmpeg binaries named in `config`.
    pub fn from_config(config: &Config) -> Self {
        Pipeline::new(
            config,
            Ffprobe::new(&config.ffprobe),
            Ffmpeg::new(&config.ffmpeg),
        )
    }
}

impl<P: MediaProbe, E: Encoder> Pipeline<P, E> {
    pub fn new(config: &Config, probe: P, encoder: E) -> Self {
        Pipeline {
            prober: Prober::new(probe),
            encoder,
            threads: config.threads.max(1),
            progress: Span::none(),
        }
    }

    /// Runs every candidate inside `progress` and ticks its progress bar once
    /// per finished candidate.
    pub fn with_progress(mut self, progress: Span) -> Self {
        self.progress = progress;
        self
    }

    pub fn prober(&self) -> &Prober<P> {
        &self.prober
    }

    pub fn encoder(&self) -> &E {
        &self.encoder
    }

    /// Processes every candidate and sends one report per candidate to `tx` as
    /// soon as it is reconciled. Completion order is unspecified.
    ///
    /// Candidates whose output is already claimed by another candidate are
    /// skipped before any work starts, see [`split_collisions`].
    pub fn run(&self, candidates: Vec<Candidate>, tx: &Sender<Report>) -> Result<(), ThreadPoolBuildError> {
        let pool = ThreadPoolBuilder::new().num_threads(self.threads).build()?;
        self.progress.pb_set_length(candidates.len() as u64);

        let (candidates, collisions) = split_collisions(candidates);
        for candidate in collisions {
            warn!(
                path = %candidate.input_path.display(),
                output = %candidate.output_path.display(),
                "output is claimed by another file, skipping"
            );
            let output = candidate.output_path.clone();
            self.send(tx, Report {
                candidate,
                outcome: Outcome::Skipped(SkipReason::OutputCollision { output }),
            });
        }

        pool.install(|| {
            candidates
                .into_par_iter()
                .for_each_with(tx.clone(), |tx, candidate| {
                    let report = self.progress.in_scope(|| self.process(candidate));
                    self.send(tx, report);
                });
        });

        Ok(())
    }

    fn send(&self, tx: &Sender<Report>, report: Report) {
        self.progress.pb_inc(1);
        if tx.send(report).is_err() {
            debug!("report receiver closed");
        }
    }

    pub fn run_collect(&self, candidates: Vec<Candidate>) -> Result<Vec<Report>, ThreadPoolBuildError> {
        let (tx, rx) = unbounded();
        self.run(candidates, &tx)?;
        drop(tx);
        Ok(rx.into_iter().collect())
    }

    #[tracing::instrument(skip_all, fields(path = %candidate.input_path.display()))]
    pub fn process(&self, mut candidate: Candidate) -> Report {
        let input = candidate.input_path.clone();
        let output = candidate.output_path.clone();

        let probe = self.prober.probe(&input);
        let target_bitrate = match policy::decide(&probe) {
            Decision::Convert { target_bitrate } => target_bitrate,
            Decision::Skip(reason) => {
                info!(%reason, "skipping");
                return Report {
                    candidate,
                    outcome: Outcome::Skipped(reason),
                };
            }
        };

        if output.exists() {
            match self.verify(&input, &output) {
                Ok(()) => {
                    info!(output = %output.display(), "found verified output of an earlier run");
                    remove(&input);
                    return Report {
                        candidate,
                        outcome: Outcome::Recovered,
                    };
                }
                Err(reason) => {
                    warn!(output = %output.display(), %reason, "existing output will be overwritten");
                }
            }
        }

        info!(
            codec = probe.codec.as_deref().unwrap_or_default(),
            bit_rate = probe.bit_rate,
            target_bitrate,
            "encoding"
        );
        if !self.encoder.encode(&input, &output, target_bitrate) {
            remove(&output);
            return Report {
                candidate,
                outcome: Outcome::Failed(FailReason::Encode),
            };
        }
        candidate.converted = true;

        let outcome = match self.verify(&input, &output) {
            Ok(()) => {
                remove(&input);
                Outcome::Converted { target_bitrate }
            }
            Err(reason) => {
                warn!(%reason, "discarding output");
                remove(&output);
                Outcome::Failed(reason)
            }
        };
        Report { candidate, outcome }
    }

    /// Compares the durations of `original` and a freshly probed `output`.
    fn verify(&self, original: &Path, output: &Path) -> Result<(), FailReason> {
        self.prober.forget(output);
        let original_duration = self.prober.probe_duration(original);
        let output_duration = self.prober.probe_duration(output);

        match (original_duration, output_duration) {
            (Some(original), Some(output)) => {
                if (original - output).abs() <= DURATION_TOLERANCE_SECS {
                    debug!(original, output, "durations match");
                    Ok(())
                } else {
                    Err(FailReason::DurationMismatch { original, output })
                }
            }
            _ => Err(FailReason::Unverifiable),
        }
    }
}

/// Indices of candidates that must not be processed because their output path
/// is another candidate's input, or was already claimed by an earlier candidate.
/// The first claimant in list order keeps the output.
pub fn colliding_indices(candidates: &[Candidate]) -> HashSet<usize> {
    let inputs: HashSet<&Path> = candidates.iter().map(|c| c.input_path.as_path()).collect();
    let mut claimed: HashSet<&Path> = HashSet::new();
    let mut colliding = HashSet::new();

    for (index, candidate) in candidates.iter().enumerate() {
        let output = candidate.output_path.as_path();
        if inputs.contains(output) || !claimed.insert(output) {
            colliding.insert(index);
        }
    }
    colliding
}

/// `(to process, colliding)`, both in their original order.
pub fn split_collisions(candidates: Vec<Candidate>) -> (Vec<Candidate>, Vec<Candidate>) {
    let colliding = colliding_indices(&candidates);
    let (collisions, clear): (Vec<_>, Vec<_>) = candidates
        .into_iter()
        .enumerate()
        .partition(|(index, _)| colliding.contains(index));

    (
        clear.into_iter().map(|(_, c)| c).collect(),
        collisions.into_iter().map(|(_, c)| c).collect(),
    )
}

fn remove(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "removed"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => error!(path = %path.display(), error = %e, "failed to remove file"),
    }
}
