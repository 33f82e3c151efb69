use std::io::{self, Cursor, Write};
use std::path::Path;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{DynamicImage, ImageResult, Rgb, RgbImage};

use crate::options::ExportFormat;

/// Encodes into memory. PNG keeps alpha and ignores `quality`; JPEG is
/// flattened onto white first.
pub fn encode(img: &DynamicImage, format: ExportFormat, quality: u8) -> ImageResult<Vec<u8>> {
    let mut buf: Vec<u8> = Vec::new();
    match format {
        ExportFormat::Png => {
            let encoder = PngEncoder::new(Cursor::new(&mut buf));
            img.write_with_encoder(encoder)?;
        }
        ExportFormat::Jpeg => {
            let rgb = flatten_on_white(img);
            // The encoder's lowest setting is 1.
            let encoder = JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100));
            DynamicImage::ImageRgb8(rgb).write_with_encoder(encoder)?;
        }
    }
    Ok(buf)
}

/// Composites any alpha over an opaque white background.
pub fn flatten_on_white(img: &DynamicImage) -> RgbImage {
    if !img.color().has_alpha() {
        return img.to_rgb8();
    }
    let rgba = img.to_rgba8();
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let p = rgba.get_pixel(x, y);
        let a = p[3] as f32 / 255.0;
        let over = |c: u8| (c as f32 * a + 255.0 * (1.0 - a)).round() as u8;
        Rgb([over(p[0]), over(p[1]), over(p[2])])
    })
}

/// Writes `bytes` to a uniquely named hidden sibling and renames it over
/// `path`, so an interrupted export never leaves a truncated file under the
/// final name. Concurrent writers never share a temp file.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if path.file_name().is_none() {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"));
    }
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };

    // Dropped (and removed) on any error before `persist`.
    let mut partial = tempfile::Builder::new()
        .prefix(".")
        .suffix(".partial")
        .tempfile_in(dir)?;
    partial.write_all(bytes)?;
    partial.as_file().sync_all()?;
    partial.persist(path).map_err(|err| err.error)?;
    Ok(())
}
