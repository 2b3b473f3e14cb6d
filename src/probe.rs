//! Media probing through ffprobe, memoized per path for the lifetime of a run.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::str::FromStr;
use std::sync::{Arc, Mutex, OnceLock};

use serde_json::Value;
use tracing::debug;

use crate::error::ProbeError;

/// Codec and bitrate of the first audio stream, duration of the container.
/// Absent fields mean the value could not be read, which is not the same as zero.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProbeResult {
    pub codec: Option<String>,
    /// Bits per second
    pub bit_rate: Option<u64>,
    /// Seconds
    pub duration: Option<f64>,
    /// A real video stream is present (cover art does not count)
    pub has_video: bool,
}

/// Reads metadata from a media file without decoding it.
pub trait MediaProbe: Send + Sync {
    fn probe(&self, path: &Path) -> Result<ProbeResult, ProbeError>;
}

const SHOW_ENTRIES: &str =
    "stream=codec_type,codec_name,bit_rate:stream_disposition=attached_pic:format=duration,bit_rate";

/// Runs `ffprobe` once per file and reads every field from its JSON output.
#[derive(Debug, Clone)]
pub struct Ffprobe {
    program: PathBuf,
}

impl Ffprobe {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Ffprobe {
            program: program.into(),
        }
    }
}

impl MediaProbe for Ffprobe {
    fn probe(&self, path: &Path) -> Result<ProbeResult, ProbeError> {
        let output = Command::new(&self.program)
            .arg("-v")
            .arg("error")
            .arg("-show_entries")
            .arg(SHOW_ENTRIES)
            .arg("-of")
            .arg("json")
            .arg(path)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => ProbeError::ToolMissing(self.program.clone()),
                _ => ProbeError::Spawn(e),
            })?;

        if !output.status.success() {
            return Err(ProbeError::Failed {
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        parse_probe_output(&output.stdout)
    }
}

/// Parses `ffprobe -of json` output produced with [`SHOW_ENTRIES`].
pub fn parse_probe_output(stdout: &[u8]) -> Result<ProbeResult, ProbeError> {
    let json: Value = serde_json::from_slice(stdout)?;

    let streams = json
        .get("streams")
        .and_then(|s| s.as_array())
        .map(Vec::as_slice)
        .unwrap_or_default();

    let has_video = streams
        .iter()
        .any(|stream| codec_type(stream) == Some("video") && !is_attached_pic(stream));

    let audio = streams
        .iter()
        .find(|stream| codec_type(stream) == Some("audio"));

    let codec = audio
        .and_then(|a| a.get("codec_name"))
        .and_then(|c| c.as_str())
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_lowercase);

    let format = json.get("format");

    // The container rate also counts video, so it only stands in for audio-only files.
    let bit_rate = audio
        .and_then(|a| a.get("bit_rate"))
        .and_then(scalar::<u64>)
        .or_else(|| {
            if has_video {
                return None;
            }
            audio?;
            format.and_then(|f| f.get("bit_rate")).and_then(scalar::<u64>)
        });

    let duration = format
        .and_then(|f| f.get("duration"))
        .and_then(scalar::<f64>)
        .filter(|d| d.is_finite() && *d >= 0.0);

    Ok(ProbeResult {
        codec,
        bit_rate,
        duration,
        has_video,
    })
}

fn codec_type(stream: &Value) -> Option<&str> {
    stream.get("codec_type").and_then(|t| t.as_str())
}

fn is_attached_pic(stream: &Value) -> bool {
    stream
        .get("disposition")
        .and_then(|d| d.get("attached_pic"))
        .and_then(|p| p.as_u64())
        == Some(1)
}

// ffprobe prints numbers as strings ("128000", "10.031000") and "N/A" when unknown.
fn scalar<T: FromStr>(value: &Value) -> Option<T> {
    match value {
        Value::String(s) => s.trim().parse().ok(),
        Value::Number(n) => n.to_string().parse().ok(),
        _ => None,
    }
}

/// Memoizing front of a [`MediaProbe`].
///
/// Each path is probed at most once per entry; concurrent first lookups of the
/// same path wait for the one probe in flight. Lookups of different paths only
/// share the map lock, never a probe.
pub struct Prober<P> {
    backend: P,
    cache: Mutex<HashMap<PathBuf, Arc<OnceLock<ProbeResult>>>>,
}

impl<P: MediaProbe> Prober<P> {
    pub fn new(backend: P) -> Self {
        Prober {
            backend,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn backend(&self) -> &P {
        &self.backend
    }

    /// Full probe result, fetched once and served from the cache afterwards.
    /// Probe failures are cached too, as a result with every field absent.
    pub fn probe(&self, path: &Path) -> ProbeResult {
        let slot = {
            let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(cache.entry(path.to_path_buf()).or_default())
        };

        slot.get_or_init(|| match self.backend.probe(path) {
            Ok(result) => {
                debug!(path = %path.display(), ?result, "probed");
                result
            }
            Err(e) => {
                debug!(path = %path.display(), error = %e, "probe failed");
                ProbeResult::default()
            }
        })
        .clone()
    }

    pub fn probe_codec(&self, path: &Path) -> Option<String> {
        self.probe(path).codec
    }

    pub fn probe_bit_rate(&self, path: &Path) -> Option<u64> {
        self.probe(path).bit_rate
    }

    pub fn probe_duration(&self, path: &Path) -> Option<f64> {
        self.probe(path).duration
    }

    pub fn probe_has_video(&self, path: &Path) -> bool {
        self.probe(path).has_video
    }

    /// Drops the cached entry for `path`, e.g. after the file was rewritten.
    pub fn forget(&self, path: &Path) {
        self.cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    struct CountingProbe {
        calls: AtomicUsize,
        delay: Duration,
    }

    impl CountingProbe {
        fn new(delay: Duration) -> Self {
            CountingProbe {
                calls: AtomicUsize::new(0),
                delay,
            }
        }
    }

    impl MediaProbe for CountingProbe {
        fn probe(&self, path: &Path) -> Result<ProbeResult, ProbeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            thread::sleep(self.delay);
            Ok(ProbeResult {
                codec: Some(path.extension().unwrap().to_string_lossy().into_owned()),
                bit_rate: Some(128_000),
                duration: Some(10.0),
                has_video: false,
            })
        }
    }

    #[test]
    fn parses_mp3_with_cover_art() {
        let json = br#"{
            "programs": [],
            "streams": [
                {"codec_name": "mp3", "codec_type": "audio", "bit_rate": "128000", "disposition": {"attached_pic": 0}},
                {"codec_name": "mjpeg", "codec_type": "video", "bit_rate": "N/A", "disposition": {"attached_pic": 1}}
            ],
            "format": {"duration": "10.031000", "bit_rate": "131000"}
        }"#;
        let result = parse_probe_output(json).unwrap();
        assert_eq!(result.codec.as_deref(), Some("mp3"));
        assert_eq!(result.bit_rate, Some(128_000));
        assert_eq!(result.duration, Some(10.031));
        assert!(!result.has_video);
    }

    #[test]
    fn parses_video_with_audio() {
        let json = br#"{
            "streams": [
                {"codec_name": "vp9", "codec_type": "video", "disposition": {"attached_pic": 0}},
                {"codec_name": "opus", "codec_type": "audio", "disposition": {"attached_pic": 0}}
            ],
            "format": {"duration": "63.500000", "bit_rate": "2400000"}
        }"#;
        let result = parse_probe_output(json).unwrap();
        assert_eq!(result.codec.as_deref(), Some("opus"));
        assert!(result.has_video);
        // container rate includes the video stream
        assert_eq!(result.bit_rate, None);
        assert_eq!(result.duration, Some(63.5));
    }

    #[test]
    fn audio_only_falls_back_to_container_bitrate() {
        let json = br#"{
            "streams": [{"codec_name": "vorbis", "codec_type": "audio"}],
            "format": {"duration": "5.0", "bit_rate": "96000"}
        }"#;
        let result = parse_probe_output(json).unwrap();
        assert_eq!(result.bit_rate, Some(96_000));
    }

    #[test]
    fn unknown_values_are_absent() {
        let json = br#"{
            "streams": [{"codec_name": "aac", "codec_type": "audio", "bit_rate": "N/A"}],
            "format": {"duration": "N/A"}
        }"#;
        let result = parse_probe_output(json).unwrap();
        assert_eq!(result.codec.as_deref(), Some("aac"));
        assert_eq!(result.bit_rate, None);
        assert_eq!(result.duration, None);
    }

    #[test]
    fn no_audio_stream() {
        let json = br#"{"streams": [{"codec_name": "h264", "codec_type": "video"}], "format": {"duration": "1.0", "bit_rate": "500"}}"#;
        let result = parse_probe_output(json).unwrap();
        assert_eq!(result.codec, None);
        assert_eq!(result.bit_rate, None);
    }

    #[test]
    fn empty_output_is_an_error() {
        assert!(matches!(parse_probe_output(b""), Err(ProbeError::Parse(_))));
    }

    #[test]
    fn missing_ffprobe_is_reported() {
        let probe = Ffprobe::new("/nonexistent/bin/ffprobe-opus-enc-test");
        let err = probe.probe(Path::new("song.mp3")).unwrap_err();
        assert!(matches!(err, ProbeError::ToolMissing(_)));
    }

    #[test]
    fn missing_ffprobe_yields_absent_values() {
        let prober = Prober::new(Ffprobe::new("/nonexistent/bin/ffprobe-opus-enc-test"));
        let path = Path::new("song.mp3");
        assert_eq!(prober.probe_codec(path), None);
        assert_eq!(prober.probe_bit_rate(path), None);
        assert_eq!(prober.probe_duration(path), None);
    }

    #[test]
    fn results_are_memoized_per_path() {
        let prober = Prober::new(CountingProbe::new(Duration::ZERO));
        let path = Path::new("/m/a.mp3");
        assert_eq!(prober.probe_codec(path).as_deref(), Some("mp3"));
        assert_eq!(prober.probe_bit_rate(path), Some(128_000));
        assert_eq!(prober.probe_duration(path), Some(10.0));
        assert_eq!(prober.backend().calls.load(Ordering::SeqCst), 1);

        prober.probe(Path::new("/m/b.ogg"));
        assert_eq!(prober.backend().calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn forget_forces_a_new_probe() {
        let prober = Prober::new(CountingProbe::new(Duration::ZERO));
        let path = Path::new("/m/a.opus");
        prober.probe(path);
        prober.forget(path);
        prober.probe(path);
        assert_eq!(prober.backend().calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn concurrent_first_access_probes_once() {
        let prober = Prober::new(CountingProbe::new(Duration::from_millis(20)));
        let path = Path::new("/m/shared.m4a");
        thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    assert_eq!(prober.probe_codec(path).as_deref(), Some("m4a"));
                });
            }
        });
        assert_eq!(prober.backend().calls.load(Ordering::SeqCst), 1);
    }
}
