use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::encode::write_atomic;
use crate::error::TemplateError;
use crate::spec::{Color, FontDescriptor, WatermarkKind, WatermarkSpec};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateFields {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
    pub image_path: String,
    pub opacity: i64,
    pub position_x: f64,
    pub position_y: f64,
    pub size: i64,
    pub rotation: i64,
    pub color: String,
    pub font_family: String,
    pub font_size: i64,
    pub font_bold: bool,
    pub font_italic: bool,
}

impl Default for TemplateFields {
    fn default() -> Self {
        Self {
            kind: "text".to_string(),
            text: "Watermark".to_string(),
            image_path: String::new(),
            opacity: 50,
            position_x: 0.5,
            position_y: 0.5,
            size: 100,
            rotation: 0,
            color: "#FFFFFF".to_string(),
            font_family: "SimHei".to_string(),
            font_size: 36,
            font_bold: false,
            font_italic: false,
        }
    }
}

impl TemplateFields {
    pub fn from_spec(spec: &WatermarkSpec) -> Self {
        let (x, y) = spec.position();
        let font = spec.font();
        Self {
            kind: spec.kind().as_str().to_string(),
            text: spec.text_content().to_string(),
            image_path: spec
                .image_path()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default(),
            opacity: spec.opacity() as i64,
            position_x: x,
            position_y: y,
            size: spec.size() as i64,
            rotation: spec.rotation() as i64,
            color: spec.color().to_hex(),
            font_family: font.family.clone(),
            font_size: font.size as i64,
            font_bold: font.bold,
            font_italic: font.italic,
        }
    }

    /// Out-of-range numbers are clamped; an unparsable color falls back to
    /// white.
    pub fn to_spec(&self) -> WatermarkSpec {
        let color = self.color.parse::<Color>().unwrap_or_else(|err| {
            warn!(%err, "template color ignored");
            Color::WHITE
        });
        let image_path = Some(PathBuf::from(&self.image_path));

        WatermarkSpec::default()
            .with_kind(WatermarkKind::parse_lossy(&self.kind))
            .with_text(self.text.clone())
            .with_image_path(image_path)
            .with_opacity(self.opacity)
            .with_position(self.position_x, self.position_y)
            .with_size(self.size)
            .with_rotation(self.rotation)
            .with_color(color)
            .with_font(FontDescriptor {
                family: self.font_family.clone(),
                size: self.font_size.clamp(1, 1000) as u32,
                bold: self.font_bold,
                italic: self.font_italic,
            })
    }
}

/// Key-value persistence for templates.
pub trait TemplateStore {
    fn load(&self, name: &str) -> Result<Option<TemplateFields>, TemplateError>;
    fn save(&self, name: &str, fields: &TemplateFields) -> Result<(), TemplateError>;
    /// Names in sorted order.
    fn list(&self) -> Result<Vec<String>, TemplateError>;
    /// Returns whether a template was removed.
    fn delete(&self, name: &str) -> Result<bool, TemplateError>;
}

#[derive(Debug, Default)]
pub struct MemoryTemplateStore {
    templates: Mutex<BTreeMap<String, TemplateFields>>,
}

impl MemoryTemplateStore {
    fn map(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, TemplateFields>> {
        self.templates.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl TemplateStore for MemoryTemplateStore {
    fn load(&self, name: &str) -> Result<Option<TemplateFields>, TemplateError> {
        Ok(self.map().get(name).cloned())
    }

    fn save(&self, name: &str, fields: &TemplateFields) -> Result<(), TemplateError> {
        self.map().insert(name.to_string(), fields.clone());
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>, TemplateError> {
        Ok(self.map().keys().cloned().collect())
    }

    fn delete(&self, name: &str) -> Result<bool, TemplateError> {
        Ok(self.map().remove(name).is_some())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct SettingsDocument {
    last_settings: Option<TemplateFields>,
    templates: BTreeMap<String, TemplateFields>,
}

/// All templates plus the last-used settings in one JSON file. Every
/// mutation rewrites the whole file.
#[derive(Debug, Clone)]
pub struct JsonTemplateStore {
    path: PathBuf,
}

impl JsonTemplateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn last_settings(&self) -> Result<Option<TemplateFields>, TemplateError> {
        Ok(self.read()?.last_settings)
    }

    pub fn save_last_settings(&self, fields: &TemplateFields) -> Result<(), TemplateError> {
        let mut doc = self.read()?;
        doc.last_settings = Some(fields.clone());
        self.write(&doc)
    }

    fn read(&self) -> Result<SettingsDocument, TemplateError> {
        match fs::read(&self.path) {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(SettingsDocument::default()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no settings file yet");
                Ok(SettingsDocument::default())
            }
            Err(err) => Err(err.into()),
        }
    }

    fn write(&self, doc: &SettingsDocument) -> Result<(), TemplateError> {
        let bytes = serde_json::to_vec_pretty(doc)?;
        write_atomic(&self.path, &bytes)?;
        Ok(())
    }
}

impl TemplateStore for JsonTemplateStore {
    fn load(&self, name: &str) -> Result<Option<TemplateFields>, TemplateError> {
        Ok(self.read()?.templates.remove(name))
    }

    fn save(&self, name: &str, fields: &TemplateFields) -> Result<(), TemplateError> {
        let mut doc = self.read()?;
        doc.templates.insert(name.to_string(), fields.clone());
        self.write(&doc)
    }

    fn list(&self) -> Result<Vec<String>, TemplateError> {
        Ok(self.read()?.templates.into_keys().collect())
    }

    fn delete(&self, name: &str) -> Result<bool, TemplateError> {
        let mut doc = self.read()?;
        let removed = doc.templates.remove(name).is_some();
        if removed {
            self.write(&doc)?;
        }
        Ok(removed)
    }
}
