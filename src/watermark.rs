use std::path::Path;

use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgba, RgbaImage};
use tracing::debug;

use crate::error::LoadError;
use crate::position;

/// Scaling, fading and placement settings for one image watermark.
#[derive(Debug, Clone, Copy)]
pub struct MarkStyle {
    pub size: u8,
    pub opacity: u8,
    pub rotation: u16,
    pub position: (f64, f64),
}

pub fn load(path: &Path) -> Result<DynamicImage, LoadError> {
    crate::source::open(path).map_err(|source| LoadError::Open {
        path: path.to_path_buf(),
        source,
    })
}

pub fn load_from_bytes(data: &[u8]) -> Result<DynamicImage, LoadError> {
    crate::source::open_bytes(data).map_err(|source| LoadError::Decode { source })
}

/// Scaled, faded and rotated watermark, not yet positioned.
pub fn prepare(mark: &DynamicImage, style: MarkStyle, canvas: (u32, u32)) -> RgbaImage {
    let mark = mark.to_rgba8();
    let (new_w, new_h) = calc_size(mark.dimensions(), canvas, style.size);

    let mut result = if (new_w, new_h) == mark.dimensions() {
        mark
    } else {
        imageops::resize(&mark, new_w, new_h, FilterType::Lanczos3)
    };

    if style.opacity < 100 {
        fade(&mut result, style.opacity);
    }

    if style.rotation % 360 != 0 {
        result = rotate_expand(&result, style.rotation);
    }
    result
}

/// Canvas-sized transparent layer holding the prepared watermark at its
/// mapped position.
pub fn render(mark: &DynamicImage, style: MarkStyle, canvas: (u32, u32)) -> RgbaImage {
    let prepared = prepare(mark, style, canvas);
    let (w, h) = prepared.dimensions();
    let (x, y) = position::place(style.position, (w as f64, h as f64), canvas);
    debug!(w, h, x, y, "image watermark placed");

    let mut layer = RgbaImage::new(canvas.0, canvas.1);
    imageops::replace(&mut layer, &prepared, x as i64, y as i64);
    layer
}

/// Uniform scale so the longer side of the mark equals `size` percent of
/// the canvas's shorter side.
fn calc_size(mark: (u32, u32), canvas: (u32, u32), size: u8) -> (u32, u32) {
    let (orig_w, orig_h) = mark;
    let longest = orig_w.max(orig_h).max(1) as f64;
    let target = canvas.0.min(canvas.1) as f64 * size as f64 / 100.0;
    let factor = target / longest;

    let new_w = (orig_w as f64 * factor).round().max(1.0) as u32;
    let new_h = (orig_h as f64 * factor).round().max(1.0) as u32;
    (new_w, new_h)
}

fn fade(img: &mut RgbaImage, opacity: u8) {
    let factor = opacity as f32 / 100.0;
    for pixel in img.pixels_mut() {
        pixel[3] = (pixel[3] as f32 * factor).round() as u8;
    }
}

/// Rotates counter-clockwise by `degrees` about the center, growing the
/// buffer to the rotated bounding box. Uncovered pixels are transparent.
pub fn rotate_expand(img: &RgbaImage, degrees: u16) -> RgbaImage {
    match degrees % 360 {
        0 => return img.clone(),
        90 => return imageops::rotate270(img),
        180 => return imageops::rotate180(img),
        270 => return imageops::rotate90(img),
        _ => {}
    }

    let theta = (degrees as f64).to_radians();
    let (sin, cos) = theta.sin_cos();
    let (w, h) = (img.width() as f64, img.height() as f64);
    let new_w = (w * cos.abs() + h * sin.abs()).ceil().max(1.0) as u32;
    let new_h = (w * sin.abs() + h * cos.abs()).ceil().max(1.0) as u32;

    let (cx, cy) = (w / 2.0, h / 2.0);
    let (ncx, ncy) = (new_w as f64 / 2.0, new_h as f64 / 2.0);

    RgbaImage::from_fn(new_w, new_h, |x, y| {
        let dx = x as f64 + 0.5 - ncx;
        let dy = y as f64 + 0.5 - ncy;
        // Inverse of the counter-clockwise map in y-down coordinates.
        let sx = dx * cos - dy * sin + cx - 0.5;
        let sy = dx * sin + dy * cos + cy - 0.5;
        sample_bilinear(img, sx, sy)
    })
}

/// Premultiplied bilinear sample; outside the image counts as transparent.
fn sample_bilinear(img: &RgbaImage, x: f64, y: f64) -> Rgba<u8> {
    let (w, h) = (img.width() as i64, img.height() as i64);
    let (x0, y0) = (x.floor(), y.floor());
    let (fx, fy) = (x - x0, y - y0);
    let (x0, y0) = (x0 as i64, y0 as i64);

    let mut acc = [0.0f64; 4];
    for (ox, oy, weight) in [
        (0, 0, (1.0 - fx) * (1.0 - fy)),
        (1, 0, fx * (1.0 - fy)),
        (0, 1, (1.0 - fx) * fy),
        (1, 1, fx * fy),
    ] {
        let (px, py) = (x0 + ox, y0 + oy);
        if weight == 0.0 || px < 0 || py < 0 || px >= w || py >= h {
            continue;
        }
        let p = img.get_pixel(px as u32, py as u32);
        let a = p[3] as f64 * weight;
        acc[0] += p[0] as f64 * a;
        acc[1] += p[1] as f64 * a;
        acc[2] += p[2] as f64 * a;
        acc[3] += a;
    }

    if acc[3] <= 0.0 {
        return Rgba([0, 0, 0, 0]);
    }
    let channel = |v: f64| (v / acc[3]).round().clamp(0.0, 255.0) as u8;
    Rgba([
        channel(acc[0]),
        channel(acc[1]),
        channel(acc[2]),
        acc[3].round().clamp(0.0, 255.0) as u8,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};

    fn style() -> MarkStyle {
        MarkStyle {
            size: 100,
            opacity: 100,
            rotation: 0,
            position: (0.5, 0.5),
        }
    }

    fn solid(w: u32, h: u32, color: [u8; 4]) -> RgbaImage {
        ImageBuffer::from_pixel(w, h, Rgba(color))
    }

    #[test]
    fn scale_targets_shorter_canvas_side() {
        assert_eq!(calc_size((200, 100), (400, 300), 100), (300, 150));
        assert_eq!(calc_size((50, 100), (400, 300), 50), (75, 150));
        assert_eq!(calc_size((1000, 1), (100, 100), 10), (10, 1));
    }

    #[test]
    fn rgb_marks_get_opaque_alpha() {
        let mark = DynamicImage::ImageRgb8(ImageBuffer::from_pixel(10, 10, Rgb([1, 2, 3])));
        let out = prepare(&mark, style(), (10, 10));
        assert!(out.pixels().all(|p| *p == Rgba([1, 2, 3, 255])));
    }

    #[test]
    fn opacity_multiplies_alpha_with_rounding() {
        let mark = DynamicImage::ImageRgba8(solid(4, 4, [9, 9, 9, 255]));
        let out = prepare(&mark, MarkStyle { opacity: 33, ..style() }, (4, 4));
        assert!(out.pixels().all(|p| p[3] == 84));

        let mark = DynamicImage::ImageRgba8(solid(4, 4, [9, 9, 9, 101]));
        let out = prepare(&mark, MarkStyle { opacity: 50, ..style() }, (4, 4));
        assert!(out.pixels().all(|p| p[3] == 51));
    }

    #[test]
    fn right_angle_rotation_is_counter_clockwise() {
        // Red marks the right edge; after 90 degrees it should be on top.
        let mut img = solid(4, 2, [0, 0, 255, 255]);
        img.put_pixel(3, 0, Rgba([255, 0, 0, 255]));
        img.put_pixel(3, 1, Rgba([255, 0, 0, 255]));

        let rotated = rotate_expand(&img, 90);
        assert_eq!(rotated.dimensions(), (2, 4));
        assert_eq!(rotated.get_pixel(0, 0)[0], 255);
        assert_eq!(rotated.get_pixel(1, 0)[0], 255);
        assert_eq!(rotated.get_pixel(0, 3)[0], 0);
    }

    #[test]
    fn arbitrary_rotation_expands_with_transparent_corners() {
        let img = solid(20, 20, [10, 200, 10, 255]);
        let rotated = rotate_expand(&img, 45);

        // 20 * sqrt(2) rounded up.
        assert_eq!(rotated.dimensions(), (29, 29));
        assert_eq!(rotated.get_pixel(0, 0)[3], 0);
        assert_eq!(rotated.get_pixel(28, 28)[3], 0);
        assert_eq!(*rotated.get_pixel(14, 14), Rgba([10, 200, 10, 255]));
    }

    #[test]
    fn render_places_mark_with_mapper() {
        let mark = DynamicImage::ImageRgba8(solid(10, 10, [255, 255, 255, 255]));
        let layer = render(
            &mark,
            MarkStyle {
                size: 50,
                position: (1.0, 0.0),
                ..style()
            },
            (40, 20),
        );
        // 50% of 20 = 10px square, pinned to the top-right corner.
        assert_eq!(layer.dimensions(), (40, 20));
        assert_eq!(layer.get_pixel(30, 0)[3], 255);
        assert_eq!(layer.get_pixel(39, 9)[3], 255);
        assert_eq!(layer.get_pixel(29, 0)[3], 0);
        assert_eq!(layer.get_pixel(30, 10)[3], 0);
    }

    #[test]
    fn undecodable_bytes_are_a_load_error() {
        let err = load_from_bytes(b"not an image").unwrap_err();
        assert!(matches!(err, LoadError::Decode { .. }));

        let err = load(Path::new("/nonexistent/mark.png")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/mark.png"));
    }
}
