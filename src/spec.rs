use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const OPACITY_RANGE: (u8, u8) = (0, 100);
pub const SIZE_RANGE: (u8, u8) = (10, 100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WatermarkKind {
    #[default]
    Text,
    Image,
}

impl WatermarkKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
        }
    }

    /// Unknown names fall back to text, matching how stored settings are read.
    pub fn parse_lossy(s: &str) -> Self {
        if s.trim().eq_ignore_ascii_case("image") {
            Self::Image
        } else {
            Self::Text
        }
    }
}

/// RGB color plus the base alpha the opacity percentage is applied to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const WHITE: Color = Color::rgba(255, 255, 255, 255);

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self::rgba(r, g, b, 255)
    }

    /// `#RRGGBB` when opaque, `#AARRGGBB` otherwise.
    pub fn to_hex(self) -> String {
        if self.a == 255 {
            format!("#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
        } else {
            format!("#{:02X}{:02X}{:02X}{:02X}", self.a, self.r, self.g, self.b)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid color {0:?}: expected #RRGGBB or #AARRGGBB")]
pub struct ParseColorError(pub String);

impl FromStr for Color {
    type Err = ParseColorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseColorError(s.to_string());
        let hex = s.trim().strip_prefix('#').ok_or_else(err)?;
        if !hex.is_ascii() {
            return Err(err());
        }
        let byte = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| err());
        match hex.len() {
            6 => Ok(Color::rgb(byte(0)?, byte(2)?, byte(4)?)),
            8 => Ok(Color::rgba(byte(2)?, byte(4)?, byte(6)?, byte(0)?)),
            _ => Err(err()),
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FontDescriptor {
    pub family: String,
    /// Point size as chosen by the user. Persisted, but the rendered pixel
    /// size is derived from the canvas (see `text::font_pixel_size`).
    pub size: u32,
    pub bold: bool,
    pub italic: bool,
}

impl Default for FontDescriptor {
    fn default() -> Self {
        Self {
            family: "SimHei".to_string(),
            size: 36,
            bold: false,
            italic: false,
        }
    }
}

/// A snapshot of watermark settings. Every setter clamps its input, so
/// values inside the engine are always in range.
#[derive(Debug, Clone, PartialEq)]
pub struct WatermarkSpec {
    kind: WatermarkKind,
    text: String,
    image_path: Option<PathBuf>,
    font: FontDescriptor,
    color: Color,
    opacity: u8,
    size: u8,
    rotation: u16,
    position: (f64, f64),
}

impl Default for WatermarkSpec {
    fn default() -> Self {
        Self {
            kind: WatermarkKind::Text,
            text: "Watermark".to_string(),
            image_path: None,
            font: FontDescriptor::default(),
            color: Color::rgba(0, 0, 0, 128),
            opacity: 50,
            size: 100,
            rotation: 0,
            position: (0.5, 0.5),
        }
    }
}

impl WatermarkSpec {
    pub fn text(text: impl Into<String>) -> Self {
        Self::default().with_text(text)
    }

    pub fn image(path: impl Into<PathBuf>) -> Self {
        Self::default()
            .with_kind(WatermarkKind::Image)
            .with_image_path(Some(path.into()))
    }

    pub fn with_kind(mut self, kind: WatermarkKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    /// Empty paths count as "no watermark image".
    pub fn with_image_path(mut self, path: Option<PathBuf>) -> Self {
        self.image_path = path.filter(|p| !p.as_os_str().is_empty());
        self
    }

    pub fn with_font(mut self, font: FontDescriptor) -> Self {
        self.font = font;
        self
    }

    pub fn with_color(mut self, color: Color) -> Self {
        self.color = color;
        self
    }

    pub fn with_opacity(mut self, percent: i64) -> Self {
        self.opacity = percent.clamp(OPACITY_RANGE.0 as i64, OPACITY_RANGE.1 as i64) as u8;
        self
    }

    pub fn with_size(mut self, percent: i64) -> Self {
        self.size = percent.clamp(SIZE_RANGE.0 as i64, SIZE_RANGE.1 as i64) as u8;
        self
    }

    /// Degrees, wrapped into `0..360`.
    pub fn with_rotation(mut self, degrees: i64) -> Self {
        self.rotation = degrees.rem_euclid(360) as u16;
        self
    }

    /// Normalized anchor; each axis is clamped to `[0, 1]` and NaN becomes
    /// the center.
    pub fn with_position(mut self, x: f64, y: f64) -> Self {
        let norm = |v: f64| if v.is_nan() { 0.5 } else { v.clamp(0.0, 1.0) };
        self.position = (norm(x), norm(y));
        self
    }

    pub fn kind(&self) -> WatermarkKind {
        self.kind
    }

    pub fn text_content(&self) -> &str {
        &self.text
    }

    pub fn image_path(&self) -> Option<&Path> {
        self.image_path.as_deref()
    }

    pub fn font(&self) -> &FontDescriptor {
        &self.font
    }

    pub fn color(&self) -> Color {
        self.color
    }

    pub fn opacity(&self) -> u8 {
        self.opacity
    }

    pub fn size(&self) -> u8 {
        self.size
    }

    pub fn rotation(&self) -> u16 {
        self.rotation
    }

    pub fn position(&self) -> (f64, f64) {
        self.position
    }

    /// The image variant only takes effect when a raster path is configured.
    pub fn uses_image(&self) -> bool {
        self.kind == WatermarkKind::Image && self.image_path.is_some()
    }
}
