use std::path::{Path, PathBuf};

pub const OUTPUT_EXTENSION: &str = "opus";
/// Used when the `.opus` name would be the input itself.
pub const FALLBACK_EXTENSION: &str = "ogg";

/// Output path for `path`: same stem with the opus extension, either in place
/// or inside `output_dir`.
///
/// The result never equals `path`. Two inputs that differ only by extension
/// still map to the same output.
pub fn rename(path: &Path, output_dir: Option<&Path>) -> PathBuf {
    let renamed = with_extension_in(path, output_dir, OUTPUT_EXTENSION);
    if renamed == path {
        return with_extension_in(path, output_dir, FALLBACK_EXTENSION);
    }
    renamed
}

fn with_extension_in(path: &Path, output_dir: Option<&Path>, extension: &str) -> PathBuf {
    let placed = match (output_dir, path.file_name()) {
        (Some(dir), Some(name)) => dir.join(name),
        _ => path.to_path_buf(),
    };
    placed.with_extension(extension)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_extension_in_place() {
        let out = rename(Path::new("/music/a/b/track 01.mp3"), None);
        assert_eq!(out, PathBuf::from("/music/a/b/track 01.opus"));
    }

    #[test]
    fn keeps_directory_and_stem() {
        for input in ["/x/song.m4a", "rel/dir/clip.webm", "v1.2.final.ogg", "noext"] {
            let input = Path::new(input);
            let out = rename(input, None);
            assert_eq!(out.parent(), input.parent());
            assert_eq!(out.file_stem(), input.file_stem());
            assert_eq!(out.extension().unwrap(), "opus");
        }
    }

    #[test]
    fn moves_into_output_dir() {
        let out = rename(Path::new("/music/a/b/song.aac"), Some(Path::new("/converted")));
        assert_eq!(out, PathBuf::from("/converted/song.opus"));
    }

    #[test]
    fn opus_named_input_falls_back_to_ogg() {
        let input = Path::new("/music/odd.opus");
        assert_eq!(rename(input, None), PathBuf::from("/music/odd.ogg"));
        assert_eq!(rename(input, Some(Path::new("/music"))), PathBuf::from("/music/odd.ogg"));
        assert_eq!(rename(input, Some(Path::new("/out"))), PathBuf::from("/out/odd.opus"));
    }

    #[test]
    fn same_stem_inputs_collide() {
        let a = rename(Path::new("/m/a.mp3"), None);
        let b = rename(Path::new("/m/a.ogg"), None);
        assert_eq!(a, b);
    }
}
