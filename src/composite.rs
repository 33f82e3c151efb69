use std::sync::Arc;

use image::{DynamicImage, GenericImageView, RgbaImage};
use tracing::warn;

use crate::error::LoadError;
use crate::font::{BuiltinFonts, FontResolver};
use crate::spec::WatermarkSpec;
use crate::text::{self, TextStyle};
use crate::watermark::{self, MarkStyle};

#[derive(Clone)]
pub struct Compositor {
    fonts: Arc<dyn FontResolver>,
}

impl Default for Compositor {
    fn default() -> Self {
        Self::new(Arc::new(BuiltinFonts))
    }
}

impl std::fmt::Debug for Compositor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compositor").finish_non_exhaustive()
    }
}

impl Compositor {
    pub fn new(fonts: Arc<dyn FontResolver>) -> Self {
        Self { fonts }
    }

    /// Watermarks a copy of `canvas`, loading the watermark raster from the
    /// spec's image path when the image variant is active.
    pub fn apply(
        &self,
        canvas: &DynamicImage,
        spec: &WatermarkSpec,
    ) -> Result<DynamicImage, LoadError> {
        let mark = match spec.image_path() {
            Some(path) if spec.uses_image() => Some(watermark::load(path)?),
            _ => None,
        };
        Ok(self.apply_with_mark(canvas, spec, mark.as_ref()))
    }

    /// Like [`apply`](Self::apply), but a watermark raster that fails to
    /// load leaves the source unmodified.
    pub fn preview(&self, canvas: &DynamicImage, spec: &WatermarkSpec) -> DynamicImage {
        self.apply(canvas, spec).unwrap_or_else(|err| {
            warn!(%err, "preview shown without watermark");
            canvas.clone()
        })
    }

    /// Composites with an already decoded watermark raster. `mark` is only
    /// used for the image variant; `None` there falls back to text.
    ///
    /// Blending happens in 8-bit RGBA, so 16-bit and float sources come
    /// back as 8 bits per channel (RGB8 or RGBA8, by source alpha).
    pub fn apply_with_mark(
        &self,
        canvas: &DynamicImage,
        spec: &WatermarkSpec,
        mark: Option<&DynamicImage>,
    ) -> DynamicImage {
        let dims = canvas.dimensions();
        let layer = match mark {
            Some(mark) if spec.uses_image() => watermark::render(
                mark,
                MarkStyle {
                    size: spec.size(),
                    opacity: spec.opacity(),
                    rotation: spec.rotation(),
                    position: spec.position(),
                },
                dims,
            ),
            _ => text::render(
                spec.text_content(),
                TextStyle {
                    font: spec.font(),
                    color: spec.color(),
                    opacity: spec.opacity(),
                    size: spec.size(),
                    position: spec.position(),
                },
                dims,
                self.fonts.as_ref(),
            ),
        };

        let mut out = canvas.to_rgba8();
        blend_over(&mut out, &layer);

        if canvas.color().has_alpha() {
            DynamicImage::ImageRgba8(out)
        } else {
            DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(out).to_rgb8())
        }
    }
}

/// "Over" compositing: `out = src * (1 - a) + layer * a` for every channel,
/// alpha included, with `a` the layer's normalized alpha. A translucent mark
/// therefore lowers the alpha of an opaque source, the way a masked paste
/// does. Both buffers must have the same dimensions.
pub fn blend_over(dst: &mut RgbaImage, layer: &RgbaImage) {
    debug_assert_eq!(dst.dimensions(), layer.dimensions());

    for (d, l) in dst.pixels_mut().zip(layer.pixels()) {
        let la = l[3];
        if la == 0 {
            continue;
        }
        if la == 255 {
            *d = *l;
            continue;
        }
        let a = la as f32 / 255.0;
        for c in 0..4 {
            d[c] = (d[c] as f32 * (1.0 - a) + l[c] as f32 * a).round() as u8;
        }
    }
}
