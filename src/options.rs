use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    #[default]
    Png,
    Jpeg,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "png" => Some(Self::Png),
            "jpg" | "jpeg" => Some(Self::Jpeg),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum NamingRule {
    #[default]
    Original,
    Prefix(String),
    Suffix(String),
}

impl NamingRule {
    /// Destination file name for `source`, always carrying the extension of
    /// `format` whatever the source extension was.
    pub fn file_name(&self, source: &Path, format: ExportFormat) -> String {
        let base = source
            .file_stem()
            .map(|s| s.to_string_lossy())
            .unwrap_or_default();
        let ext = format.extension();
        match self {
            Self::Original => format!("{base}.{ext}"),
            Self::Prefix(p) => format!("{p}{base}.{ext}"),
            Self::Suffix(s) => format!("{base}{s}.{ext}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeTarget {
    ByWidth(u32),
    ByHeight(u32),
    ByPercent(u32),
}

impl ResizeTarget {
    /// Output dimensions for an `orig_w`x`orig_h` image, aspect preserved.
    /// Never returns a zero side.
    pub fn dimensions(self, orig_w: u32, orig_h: u32) -> (u32, u32) {
        let (w, h) = (orig_w.max(1) as f64, orig_h.max(1) as f64);
        let (nw, nh) = match self {
            Self::ByWidth(tw) => (tw as f64, (h * tw as f64 / w).round()),
            Self::ByHeight(th) => ((w * th as f64 / h).round(), th as f64),
            Self::ByPercent(p) => (
                (w * p as f64 / 100.0).round(),
                (h * p as f64 / 100.0).round(),
            ),
        };
        (nw.max(1.0) as u32, nh.max(1.0) as u32)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportOptions {
    format: ExportFormat,
    naming: NamingRule,
    quality: u8,
    resize: Option<ResizeTarget>,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            format: ExportFormat::Png,
            naming: NamingRule::Original,
            quality: 90,
            resize: None,
        }
    }
}

impl ExportOptions {
    pub fn new(format: ExportFormat) -> Self {
        Self {
            format,
            ..Self::default()
        }
    }

    pub fn with_naming(mut self, naming: NamingRule) -> Self {
        self.naming = naming;
        self
    }

    /// JPEG quality, clamped to `0..=100`. Ignored for PNG.
    pub fn with_quality(mut self, quality: i64) -> Self {
        self.quality = quality.clamp(0, 100) as u8;
        self
    }

    pub fn with_resize(mut self, resize: Option<ResizeTarget>) -> Self {
        self.resize = resize.map(|r| match r {
            ResizeTarget::ByWidth(w) => ResizeTarget::ByWidth(w.max(1)),
            ResizeTarget::ByHeight(h) => ResizeTarget::ByHeight(h.max(1)),
            ResizeTarget::ByPercent(p) => ResizeTarget::ByPercent(p.max(1)),
        });
        self
    }

    pub fn format(&self) -> ExportFormat {
        self.format
    }

    pub fn naming(&self) -> &NamingRule {
        &self.naming
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    pub fn resize(&self) -> Option<ResizeTarget> {
        self.resize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn naming_rules_swap_extension_for_target_format() {
        let prefix = NamingRule::Prefix("wm_".into());
        assert_eq!(prefix.file_name(Path::new("/in/a.png"), ExportFormat::Png), "wm_a.png");

        let suffix = NamingRule::Suffix("_x".into());
        assert_eq!(suffix.file_name(Path::new("b.jpg"), ExportFormat::Jpeg), "b_x.jpg");

        assert_eq!(
            NamingRule::Original.file_name(Path::new("photo.final.TIFF"), ExportFormat::Png),
            "photo.final.png"
        );
    }

    #[test]
    fn resize_preserves_aspect() {
        assert_eq!(ResizeTarget::ByPercent(50).dimensions(200, 100), (100, 50));
        assert_eq!(ResizeTarget::ByWidth(100).dimensions(200, 100), (100, 50));
        assert_eq!(ResizeTarget::ByHeight(25).dimensions(200, 100), (50, 25));
        assert_eq!(ResizeTarget::ByWidth(100).dimensions(300, 200), (100, 67));
        assert_eq!(ResizeTarget::ByPercent(1).dimensions(10, 10), (1, 1));
    }

    #[test]
    fn option_values_are_clamped() {
        let opts = ExportOptions::new(ExportFormat::Jpeg)
            .with_quality(300)
            .with_resize(Some(ResizeTarget::ByPercent(0)));
        assert_eq!(opts.quality(), 100);
        assert_eq!(opts.resize(), Some(ResizeTarget::ByPercent(1)));
        assert_eq!(ExportOptions::default().with_quality(-5).quality(), 0);
    }

    #[test]
    fn format_parsing_accepts_both_jpeg_spellings() {
        assert_eq!(ExportFormat::parse("JPG"), Some(ExportFormat::Jpeg));
        assert_eq!(ExportFormat::parse("jpeg"), Some(ExportFormat::Jpeg));
        assert_eq!(ExportFormat::parse(" png "), Some(ExportFormat::Png));
        assert_eq!(ExportFormat::parse("webp"), None);
    }
}
