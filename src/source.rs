use std::collections::HashSet;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageReader, ImageResult};
use tracing::warn;

pub const SUPPORTED_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "tiff", "tif"];

pub fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| SUPPORTED_EXTENSIONS.iter().any(|s| s.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}

/// Expands directories to the supported images directly inside them (sorted
/// by name) and drops repeated paths, keeping first-seen order.
pub fn collect_sources<P: AsRef<Path>>(inputs: &[P]) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for input in inputs {
        let input = input.as_ref();
        if input.is_dir() {
            let mut found: Vec<PathBuf> = match fs::read_dir(input) {
                Ok(entries) => entries
                    .filter_map(|e| e.ok().map(|e| e.path()))
                    .filter(|p| p.is_file() && is_supported(p))
                    .collect(),
                Err(err) => {
                    warn!(dir = %input.display(), %err, "cannot list directory");
                    continue;
                }
            };
            found.sort();
            for path in found {
                if seen.insert(path.clone()) {
                    out.push(path);
                }
            }
        } else if seen.insert(input.to_path_buf()) {
            out.push(input.to_path_buf());
        }
    }
    out
}

/// Decodes by content rather than trusting the extension.
pub fn open(path: &Path) -> ImageResult<DynamicImage> {
    ImageReader::open(path)?.with_guessed_format()?.decode()
}

pub fn open_bytes(data: &[u8]) -> ImageResult<DynamicImage> {
    ImageReader::new(Cursor::new(data))
        .with_guessed_format()?
        .decode()
}
