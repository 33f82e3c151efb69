pub mod composite;
pub mod encode;
pub mod error;
pub mod export;
pub mod font;
pub mod options;
pub mod position;
pub mod source;
pub mod spec;
pub mod template;
pub mod text;
pub mod watermark;

pub use composite::Compositor;
pub use error::{FontError, ItemError, LoadError, PipelineError, TemplateError};
pub use export::{ExportPipeline, ExportReport, ItemOutcome};
pub use font::{FontFiles, FontResolver};
pub use options::{ExportFormat, ExportOptions, NamingRule, ResizeTarget};
pub use spec::{Color, FontDescriptor, WatermarkKind, WatermarkSpec};
pub use template::{JsonTemplateStore, MemoryTemplateStore, TemplateFields, TemplateStore};

use wasm_bindgen::prelude::*;

/// In-memory variant of the export pipeline for a single image.
///
/// `template_json` holds `TemplateFields`; an empty `watermark_bytes` means
/// text-only. Returns the encoded image.
#[wasm_bindgen]
pub fn process_image(
    image_bytes: &[u8],
    watermark_bytes: &[u8],
    template_json: &str,
    format: &str,
    quality: u8,
) -> Result<Vec<u8>, JsValue> {
    let format = ExportFormat::parse(format)
        .ok_or_else(|| JsValue::from_str(&format!("unsupported output format: {format}")))?;

    let fields: TemplateFields = if template_json.trim().is_empty() {
        TemplateFields::default()
    } else {
        serde_json::from_str(template_json)
            .map_err(|e| JsValue::from_str(&format!("invalid template: {e}")))?
    };
    let mut spec = fields.to_spec();

    let canvas = source::open_bytes(image_bytes)
        .map_err(|e| JsValue::from_str(&format!("cannot decode image: {e}")))?;

    let mark = if watermark_bytes.is_empty() {
        None
    } else {
        let mark = watermark::load_from_bytes(watermark_bytes)
            .map_err(|e| JsValue::from_str(&e.to_string()))?;
        // The raster arrives as bytes, so the stored path only has to mark
        // the image variant as configured.
        if spec.image_path().is_none() {
            spec = spec.with_image_path(Some("<memory>".into()));
        }
        Some(mark)
    };

    let out = Compositor::default().apply_with_mark(&canvas, &spec, mark.as_ref());
    let quality = ExportOptions::new(format).with_quality(quality as i64).quality();
    encode::encode(&out, format, quality)
        .map_err(|e| JsValue::from_str(&format!("cannot encode image: {e}")))
}
