//! Recursive discovery of media files under a root directory.

use std::fs;
use std::path::Path;

use tracing::warn;
use walkdir::WalkDir;

use crate::config::{Config, SortOrder};
use crate::pipeline::Candidate;

pub const VIDEO_EXTENSIONS: &[&str] = &["avi", "mp4", "webm"];
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "aac", "ogg", "m4a", "opus"];

pub fn is_media_file(path: &Path) -> bool {
    let Some(ext) = path.extension() else {
        return false;
    };
    let ext = ext.to_string_lossy().to_lowercase();
    VIDEO_EXTENSIONS.contains(&ext.as_str()) || AUDIO_EXTENSIONS.contains(&ext.as_str())
}

/// Every media file below `root`, paired with its output path and sorted.
pub fn collect_candidates(
    root: &Path,
    output_dir: Option<&Path>,
    sort: SortOrder,
    reverse: bool,
) -> Vec<Candidate> {
    let mut candidates: Vec<Candidate> = WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(error = %e, "skipping unreadable entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file() && is_media_file(entry.path()))
        .map(|entry| Candidate::new(entry.into_path(), output_dir))
        .collect();

    match sort {
        SortOrder::Name => candidates
            .sort_by_cached_key(|c| c.input_path.to_string_lossy().to_lowercase()),
        SortOrder::Size => candidates.sort_by_cached_key(|c| {
            fs::metadata(&c.input_path).map(|m| m.len()).unwrap_or(0)
        }),
    }
    if reverse {
        candidates.reverse();
    }

    candidates
}

pub fn collect_from_config(config: &Config) -> Vec<Candidate> {
    collect_candidates(
        &config.base_dir,
        config.output_dir.as_deref(),
        config.sort,
        config.reverse,
    )
}
