use image::{Rgba, RgbaImage};
use tracing::{debug, warn};

use crate::font::{self, FontResolver};
use crate::position;
use crate::spec::{Color, FontDescriptor};

const MIN_FONT_PX: u32 = 8;
const MAX_FONT_PX: u32 = 120;
const SIZE_DIVISOR: f64 = 5.0;

/// Everything the renderer needs from a spec, borrowed for one call.
#[derive(Debug, Clone, Copy)]
pub struct TextStyle<'a> {
    pub font: &'a FontDescriptor,
    pub color: Color,
    pub opacity: u8,
    pub size: u8,
    pub position: (f64, f64),
}

/// Pixel size for a text watermark on a `w`x`h` canvas at `size` percent.
pub fn font_pixel_size(canvas: (u32, u32), size: u8) -> u32 {
    let base = canvas.0.min(canvas.1) as f64 * size as f64 / 100.0;
    ((base / SIZE_DIVISOR).floor() as u32).clamp(MIN_FONT_PX, MAX_FONT_PX)
}

/// Estimated extent when a font reports no metrics.
pub fn estimate_extent(font_px: u32, char_count: usize) -> (f32, f32) {
    let px = font_px as f64;
    ((px * char_count as f64 * 0.7) as f32, (px * 1.2) as f32)
}

pub fn effective_alpha(base_alpha: u8, opacity: u8) -> u8 {
    (base_alpha as f32 * opacity as f32 / 100.0).round().clamp(0.0, 255.0) as u8
}

/// Renders `text` into a transparent layer the size of the canvas. Never
/// fails: missing fonts, metrics or draw errors degrade to a best-effort
/// (possibly empty) layer.
pub fn render(
    text: &str,
    style: TextStyle<'_>,
    canvas: (u32, u32),
    fonts: &dyn FontResolver,
) -> RgbaImage {
    let mut layer = RgbaImage::new(canvas.0, canvas.1);
    if text.trim().is_empty() {
        return layer;
    }

    let px = font_pixel_size(canvas, style.size);
    let alpha = effective_alpha(style.color.a, style.opacity);

    let Some(face) = font::resolve_chain(fonts, style.font, px as f32) else {
        warn!("no usable font, text watermark skipped");
        return layer;
    };

    let (w, h) = face
        .measure(text)
        .unwrap_or_else(|| estimate_extent(px, text.chars().count()));
    let (ox, oy) = position::place(style.position, (w as f64, h as f64), canvas);
    debug!(font = face.name(), px, w, h, ox, oy, "text watermark placed");

    let (cw, ch) = (canvas.0 as i64, canvas.1 as i64);
    let Color { r, g, b, .. } = style.color;
    let drawn = face.draw(text, &mut |x, y, coverage| {
        let (x, y) = (ox as i64 + x, oy as i64 + y);
        if x < 0 || y < 0 || x >= cw || y >= ch {
            return;
        }
        let a = (alpha as f32 * coverage.clamp(0.0, 1.0)).round() as u8;
        let dst = layer.get_pixel_mut(x as u32, y as u32);
        if a > dst[3] {
            *dst = Rgba([r, g, b, a]);
        }
    });

    if let Err(err) = drawn {
        warn!(%err, font = face.name(), "text draw failed, watermark skipped");
        return RgbaImage::new(canvas.0, canvas.1);
    }
    layer
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::error::FontError;
    use crate::font::{BuiltinFonts, FontFiles, RenderableFont};

    /// A font with no metrics that paints one pixel per char.
    struct Blind;

    impl RenderableFont for Blind {
        fn name(&self) -> &str {
            "blind"
        }

        fn measure(&self, _: &str) -> Option<(f32, f32)> {
            None
        }

        fn draw(&self, text: &str, plot: &mut dyn FnMut(i64, i64, f32)) -> Result<(), FontError> {
            for i in 0..text.chars().count() {
                plot(i as i64, 0, 1.0);
            }
            Ok(())
        }
    }

    struct Broken;

    impl RenderableFont for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn measure(&self, _: &str) -> Option<(f32, f32)> {
            Some((10.0, 10.0))
        }

        fn draw(&self, _: &str, plot: &mut dyn FnMut(i64, i64, f32)) -> Result<(), FontError> {
            plot(0, 0, 1.0);
            Err(FontError::Render("glyph cache exhausted".into()))
        }
    }

    struct Fixed(Arc<dyn RenderableFont>);

    impl FontResolver for Fixed {
        fn resolve(
            &self,
            _: &str,
            _: f32,
            _: bool,
            _: bool,
        ) -> Result<Arc<dyn RenderableFont>, FontError> {
            Ok(self.0.clone())
        }
    }

    struct Nothing;

    impl FontResolver for Nothing {
        fn resolve(
            &self,
            family: &str,
            _: f32,
            _: bool,
            _: bool,
        ) -> Result<Arc<dyn RenderableFont>, FontError> {
            Err(FontError::NotFound {
                family: family.into(),
            })
        }

        fn default_font(&self, _: f32, _: bool, _: bool) -> Option<Arc<dyn RenderableFont>> {
            None
        }
    }

    fn style(font: &FontDescriptor) -> TextStyle<'_> {
        TextStyle {
            font,
            color: Color::rgba(200, 10, 10, 255),
            opacity: 100,
            size: 100,
            position: (0.0, 0.0),
        }
    }

    fn is_blank(layer: &RgbaImage) -> bool {
        layer.pixels().all(|p| p[3] == 0)
    }

    #[test]
    fn pixel_size_follows_canvas_and_clamps() {
        assert_eq!(font_pixel_size((400, 300), 100), 60);
        assert_eq!(font_pixel_size((400, 300), 10), 8);
        assert_eq!(font_pixel_size((4000, 3000), 100), 120);
        assert_eq!(font_pixel_size((1, 1), 50), 8);
    }

    #[test]
    fn extent_estimate_uses_fixed_ratios() {
        assert_eq!(estimate_extent(10, 4), (28.0, 12.0));
        assert_eq!(estimate_extent(20, 0), (0.0, 24.0));
    }

    #[test]
    fn alpha_scales_with_opacity() {
        assert_eq!(effective_alpha(128, 50), 64);
        assert_eq!(effective_alpha(255, 33), 84);
        assert_eq!(effective_alpha(255, 0), 0);
        assert_eq!(effective_alpha(200, 100), 200);
    }

    #[test]
    fn blank_text_yields_transparent_layer() {
        let font = FontDescriptor::default();
        for text in ["", "   ", "\t\n"] {
            let layer = render(text, style(&font), (64, 32), &BuiltinFonts);
            assert_eq!(layer.dimensions(), (64, 32));
            assert!(is_blank(&layer));
        }
    }

    #[test]
    fn builtin_text_lands_inside_measured_box() {
        let font = FontDescriptor::default();
        let mut s = style(&font);
        s.position = (0.5, 0.5);
        let layer = render("AB", s, (100, 100), &BuiltinFonts);

        // 20px cells, two chars: a 40x20 box with its origin at (30, 40).
        for (x, y, p) in layer.enumerate_pixels() {
            if p[3] > 0 {
                assert!((30..70).contains(&x) && (40..60).contains(&y), "({x},{y})");
                assert_eq!((p[0], p[1], p[2], p[3]), (200, 10, 10, 255));
            }
        }
        assert!(!is_blank(&layer));
    }

    #[test]
    fn missing_metrics_use_estimate_for_placement() {
        let font = FontDescriptor::default();
        let mut s = style(&font);
        s.position = (1.0, 1.0);
        let resolver = Fixed(Arc::new(Blind));
        // 100x100 canvas, 20px font, 3 chars: estimate 42x24, origin (58, 76).
        let layer = render("abc", s, (100, 100), &resolver);
        assert_eq!(layer.get_pixel(58, 76)[3], 255);
        assert_eq!(layer.get_pixel(60, 76)[3], 255);
        assert_eq!(layer.pixels().filter(|p| p[3] > 0).count(), 3);
    }

    #[test]
    fn draw_failure_discards_partial_output() {
        let font = FontDescriptor::default();
        let layer = render("x", style(&font), (32, 32), &Fixed(Arc::new(Broken)));
        assert!(is_blank(&layer));
    }

    #[test]
    fn no_font_at_all_still_returns_a_layer() {
        let font = FontDescriptor::default();
        let layer = render("hello", style(&font), (50, 40), &Nothing);
        assert_eq!(layer.dimensions(), (50, 40));
        assert!(is_blank(&layer));
    }

    #[test]
    fn requested_family_from_font_files_is_used() {
        let path = std::path::Path::new("/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf");
        if !path.is_file() {
            return;
        }
        let mut fonts = FontFiles::new();
        fonts.add_file("DejaVu Sans", path);
        let font = FontDescriptor {
            family: "DejaVu Sans".into(),
            ..FontDescriptor::default()
        };
        let mut s = style(&font);
        s.position = (0.5, 0.5);

        let layer = render("Ag", s, (200, 100), &fonts);
        let alphas: Vec<u8> = layer.pixels().map(|p| p[3]).filter(|a| *a > 0).collect();
        assert!(!alphas.is_empty());
        // Anti-aliased edges; the bitmap fallback only paints full coverage.
        assert!(alphas.iter().any(|a| *a < 255));
    }

    #[test]
    fn zero_opacity_draws_nothing_visible() {
        let font = FontDescriptor::default();
        let mut s = style(&font);
        s.opacity = 0;
        let layer = render("visible?", s, (80, 80), &BuiltinFonts);
        assert!(is_blank(&layer));
    }
}
