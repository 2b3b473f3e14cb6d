//! Bitrate policy: how far a file's audio bitrate is lowered when it is re-encoded.

use std::fmt;
use std::path::PathBuf;

use crate::probe::ProbeResult;

/// Codec every output is encoded with.
pub const TARGET_CODEC: &str = "opus";

/// Codecs whose compression is already close to opus. They get a gentler reduction.
pub const HIGH_EFFICIENCY_CODECS: [&str; 3] = ["vorbis", "aac", "opus"];

/// `(lowest input bitrate of the band, target bitrate)`, ascending.
/// Inputs below the first band keep their own bitrate.
const HIGH_EFFICIENCY_BANDS: &[(u64, u64)] = &[(54_000, 54_000), (64_000, 64_000)];
const DEFAULT_BANDS: &[(u64, u64)] = &[(16_000, 16_000), (32_000, 32_000), (48_000, 64_000)];

pub fn is_high_efficiency(codec: &str) -> bool {
    HIGH_EFFICIENCY_CODECS.contains(&codec)
}

/// Target bitrate in bits/s for an input encoded with `codec` at `input_bitrate`.
///
/// The result never exceeds `input_bitrate`.
pub fn choose_target_bitrate(codec: &str, input_bitrate: u64) -> u64 {
    let bands = if is_high_efficiency(codec) {
        HIGH_EFFICIENCY_BANDS
    } else {
        DEFAULT_BANDS
    };

    let target = bands
        .iter()
        .rev()
        .find(|(lowest, _)| input_bitrate >= *lowest)
        .map_or(input_bitrate, |(_, target)| *target);

    target.min(input_bitrate)
}

/// Why a candidate is left untouched.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// No audio codec could be read
    UnknownCodec,
    /// No audio bitrate could be read
    UnknownBitrate,
    /// Audio is already opus and there is no video stream to drop
    AlreadyOpus,
    /// The policy would not lower the bitrate
    NoReduction { bit_rate: u64 },
    /// Another file in the batch already maps to the same output, or is that output
    OutputCollision { output: PathBuf },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownCodec => write!(f, "audio codec unknown"),
            Self::UnknownBitrate => write!(f, "audio bitrate unknown"),
            Self::AlreadyOpus => write!(f, "already opus"),
            Self::NoReduction { bit_rate } => {
                write!(f, "bitrate {} kbps cannot be reduced", bit_rate / 1000)
            }
            Self::OutputCollision { output } => {
                write!(f, "output '{}' is claimed by another file", output.display())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Convert { target_bitrate: u64 },
    Skip(SkipReason),
}

/// Skip-or-convert for a probed file. Every absent field leads to a skip.
pub fn decide(probe: &ProbeResult) -> Decision {
    let Some(codec) = probe.codec.as_deref() else {
        return Decision::Skip(SkipReason::UnknownCodec);
    };
    if codec == TARGET_CODEC && !probe.has_video {
        return Decision::Skip(SkipReason::AlreadyOpus);
    }
    let Some(bit_rate) = probe.bit_rate else {
        return Decision::Skip(SkipReason::UnknownBitrate);
    };

    let target_bitrate = choose_target_bitrate(codec, bit_rate);
    if bit_rate <= target_bitrate {
        return Decision::Skip(SkipReason::NoReduction { bit_rate });
    }
    Decision::Convert { target_bitrate }
}
