//! Font resolution for text watermarks. The compositor only sees a
//! [`FontResolver`]; [`FontFiles`] backs it with font files on disk and
//! anything unresolved falls through to the built-in 8x8 bitmap font.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use ab_glyph::{Font, FontArc, GlyphId, PxScale, ScaleFont};
use font8x8::{UnicodeFonts, BASIC_FONTS, LATIN_FONTS};
use tracing::{debug, trace, warn};

use crate::error::FontError;
use crate::spec::FontDescriptor;

/// Families tried after the requested one, in order.
pub const FALLBACK_FAMILIES: &[&str] = &["SimHei", "SimSun", "Microsoft YaHei", "KaiTi"];

/// Display families whose files are not named after them.
pub const WELL_KNOWN_FILES: &[(&str, &[&str])] = &[
    ("SimSun", &["simsun"]),
    ("SimHei", &["simhei"]),
    ("Microsoft YaHei", &["msyh"]),
    ("KaiTi", &["simkai"]),
];

pub const SYSTEM_FONT_DIRS: &[&str] = &[
    "C:\\Windows\\Fonts",
    "/usr/share/fonts",
    "/usr/local/share/fonts",
    "/System/Library/Fonts",
    "/Library/Fonts",
];

const FONT_EXTENSIONS: &[&str] = &["ttf", "otf", "ttc"];
const MAX_SCAN_DEPTH: usize = 4;

/// A font already bound to a pixel size and style.
pub trait RenderableFont: Send + Sync {
    fn name(&self) -> &str;

    /// Pixel extent `(width, height)` of `text`, or `None` when the font
    /// cannot report metrics for it.
    fn measure(&self, text: &str) -> Option<(f32, f32)>;

    /// Rasterize `text` with its top-left corner at the origin. `plot` is
    /// called with run-local pixel coordinates and a coverage in `[0, 1]`.
    fn draw(&self, text: &str, plot: &mut dyn FnMut(i64, i64, f32)) -> Result<(), FontError>;
}

pub trait FontResolver: Send + Sync {
    fn resolve(
        &self,
        family: &str,
        px: f32,
        bold: bool,
        italic: bool,
    ) -> Result<Arc<dyn RenderableFont>, FontError>;

    /// Used once every candidate family has failed.
    fn default_font(&self, px: f32, bold: bool, italic: bool) -> Option<Arc<dyn RenderableFont>> {
        Some(Arc::new(BitmapFont::new(px, bold, italic)))
    }
}

/// Resolves no family, so every lookup lands on the bitmap default.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinFonts;

impl FontResolver for BuiltinFonts {
    fn resolve(
        &self,
        family: &str,
        _px: f32,
        _bold: bool,
        _italic: bool,
    ) -> Result<Arc<dyn RenderableFont>, FontError> {
        Err(FontError::NotFound {
            family: family.to_string(),
        })
    }
}

/// Lowercase with spaces, dashes and underscores removed, so
/// `"Microsoft YaHei"`, `"microsoft-yahei"` and a `MicrosoftYaHei.ttf` stem
/// all meet.
fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_whitespace() && *c != '-' && *c != '_')
        .flat_map(char::to_lowercase)
        .collect()
}

fn is_font_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| FONT_EXTENSIONS.iter().any(|x| e.eq_ignore_ascii_case(x)))
}

/// Style suffixes of font files for a family, most specific first.
fn style_suffixes(bold: bool, italic: bool) -> &'static [&'static str] {
    match (bold, italic) {
        (true, true) => &["bolditalic", "boldoblique", "bi"],
        (true, false) => &["bold", "bd"],
        (false, true) => &["italic", "oblique", "i"],
        (false, false) => &["regular", ""],
    }
}

/// Resolves families to TrueType/OpenType files registered by name or
/// found by scanning font directories. Files are parsed on first use and
/// cached for the life of the resolver.
#[derive(Default)]
pub struct FontFiles {
    files: HashMap<String, PathBuf>,
    loaded: Mutex<HashMap<PathBuf, FontArc>>,
}

impl std::fmt::Debug for FontFiles {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FontFiles")
            .field("files", &self.files.len())
            .finish_non_exhaustive()
    }
}

impl FontFiles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every [`SYSTEM_FONT_DIRS`] entry that exists on this machine.
    pub fn system() -> Self {
        let mut fonts = Self::new();
        for dir in SYSTEM_FONT_DIRS.iter().map(Path::new).filter(|d| d.is_dir()) {
            fonts.add_dir(dir);
        }
        debug!(files = fonts.len(), "system fonts scanned");
        fonts
    }

    /// Registers `path` under `name`, replacing any earlier file.
    pub fn add_file(&mut self, name: &str, path: impl Into<PathBuf>) -> &mut Self {
        self.files.insert(normalize(name), path.into());
        self
    }

    /// Registers every font file under `dir` by its file stem. The first
    /// file seen for a stem wins. Returns how many files were added.
    pub fn add_dir(&mut self, dir: &Path) -> usize {
        let before = self.files.len();
        self.scan(dir, 0);
        self.files.len() - before
    }

    fn scan(&mut self, dir: &Path, depth: usize) {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(dir = %dir.display(), %err, "font directory unreadable");
                return;
            }
        };
        let mut paths: Vec<PathBuf> = entries.filter_map(|e| e.ok().map(|e| e.path())).collect();
        paths.sort();

        for path in paths {
            if path.is_dir() {
                if depth < MAX_SCAN_DEPTH {
                    self.scan(&path, depth + 1);
                }
            } else if is_font_file(&path) {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    self.files.entry(normalize(stem)).or_insert(path);
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// File for `family`, preferring a dedicated style variant. The flag
    /// says whether the file already carries the requested style.
    fn lookup(&self, family: &str, bold: bool, italic: bool) -> Option<(&Path, bool)> {
        let key = normalize(family);
        let mut stems = vec![key.clone()];
        if let Some((_, files)) = WELL_KNOWN_FILES.iter().find(|(name, _)| normalize(name) == key) {
            stems.extend(files.iter().map(|f| normalize(f)));
        }

        if bold || italic {
            for stem in &stems {
                for suffix in style_suffixes(bold, italic) {
                    if let Some(path) = self.files.get(&format!("{stem}{suffix}")) {
                        return Some((path.as_path(), true));
                    }
                }
            }
        }
        for stem in &stems {
            for suffix in style_suffixes(false, false) {
                if let Some(path) = self.files.get(&format!("{stem}{suffix}")) {
                    return Some((path.as_path(), !bold && !italic));
                }
            }
        }
        None
    }

    fn load(&self, path: &Path) -> Result<FontArc, FontError> {
        let mut loaded = self.loaded.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(font) = loaded.get(path) {
            return Ok(font.clone());
        }
        let load_err = |reason: String| FontError::Load {
            path: path.to_path_buf(),
            reason,
        };
        let bytes = fs::read(path).map_err(|e| load_err(e.to_string()))?;
        let font = FontArc::try_from_vec(bytes).map_err(|e| load_err(e.to_string()))?;
        trace!(path = %path.display(), "font loaded");
        loaded.insert(path.to_path_buf(), font.clone());
        Ok(font)
    }
}

impl FontResolver for FontFiles {
    fn resolve(
        &self,
        family: &str,
        px: f32,
        bold: bool,
        italic: bool,
    ) -> Result<Arc<dyn RenderableFont>, FontError> {
        let Some((path, styled)) = self.lookup(family, bold, italic) else {
            return Err(FontError::NotFound {
                family: family.to_string(),
            });
        };
        let font = self.load(path)?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| family.to_string());
        // A dedicated bold/italic file needs no synthesized styling.
        let (bold, italic) = if styled { (false, false) } else { (bold, italic) };
        Ok(Arc::new(OutlineFont::new(name, font, px, bold, italic)))
    }
}

/// A parsed TrueType/OpenType face bound to a pixel size. Bold and italic
/// are synthesized by smearing and shearing the coverage.
#[derive(Clone)]
pub struct OutlineFont {
    name: String,
    font: FontArc,
    scale: PxScale,
    bold: bool,
    italic: bool,
}

impl OutlineFont {
    pub fn new(name: impl Into<String>, font: FontArc, px: f32, bold: bool, italic: bool) -> Self {
        Self {
            name: name.into(),
            font,
            scale: PxScale::from(px.max(1.0)),
            bold,
            italic,
        }
    }

    fn embolden(&self) -> i64 {
        if self.bold {
            (self.scale.y / 24.0).ceil().max(1.0) as i64
        } else {
            0
        }
    }

    fn line_height(&self) -> f32 {
        self.font.as_scaled(self.scale).height()
    }

    fn slant(&self) -> f32 {
        if self.italic {
            (self.line_height() * 0.2).ceil()
        } else {
            0.0
        }
    }

    /// Pen positions of every glyph on one line, kerning applied.
    fn layout(&self, text: &str) -> (Vec<(GlyphId, f32)>, f32) {
        let scaled = self.font.as_scaled(self.scale);
        let mut glyphs = Vec::with_capacity(text.len());
        let mut cursor = 0.0f32;
        let mut prev: Option<GlyphId> = None;
        for c in text.chars() {
            let id = scaled.glyph_id(c);
            if let Some(prev) = prev {
                cursor += scaled.kern(prev, id);
            }
            glyphs.push((id, cursor));
            cursor += scaled.h_advance(id);
            prev = Some(id);
        }
        (glyphs, cursor)
    }
}

impl RenderableFont for OutlineFont {
    fn name(&self) -> &str {
        &self.name
    }

    fn measure(&self, text: &str) -> Option<(f32, f32)> {
        let (_, advance) = self.layout(text);
        let height = self.line_height();
        if !advance.is_finite() || !height.is_finite() || height <= 0.0 {
            return None;
        }
        let width = advance + self.slant() + self.embolden() as f32;
        Some((width.ceil(), height.ceil()))
    }

    fn draw(&self, text: &str, plot: &mut dyn FnMut(i64, i64, f32)) -> Result<(), FontError> {
        let baseline = self.font.as_scaled(self.scale).ascent();
        let height = self.line_height().max(1.0);
        let slant = self.slant();
        let embolden = self.embolden();

        let (glyphs, _) = self.layout(text);
        for (id, x) in glyphs {
            let glyph = id.with_scale_and_position(self.scale, ab_glyph::point(x, baseline));
            let Some(outlined) = self.font.outline_glyph(glyph) else {
                continue;
            };
            let bounds = outlined.px_bounds();
            outlined.draw(|px, py, coverage| {
                if coverage <= 0.0 {
                    return;
                }
                let y = bounds.min.y as i64 + py as i64;
                // Top of the line leans right by `slant`.
                let shear = (slant * (1.0 - y as f32 / height)).round() as i64;
                let x = bounds.min.x as i64 + px as i64 + shear;
                for dx in 0..=embolden {
                    plot(x + dx, y, coverage);
                }
            });
        }
        Ok(())
    }
}

/// Requested family first, then [`FALLBACK_FAMILIES`], without repeats.
pub fn candidates(font: &FontDescriptor) -> Vec<&str> {
    let mut out: Vec<&str> = Vec::with_capacity(FALLBACK_FAMILIES.len() + 1);
    let requested = font.family.trim();
    if !requested.is_empty() {
        out.push(requested);
    }
    for family in FALLBACK_FAMILIES {
        if !out.iter().any(|f| f.eq_ignore_ascii_case(family)) {
            out.push(family);
        }
    }
    out
}

/// Walks the candidate list, then the resolver's default font.
pub fn resolve_chain(
    resolver: &dyn FontResolver,
    font: &FontDescriptor,
    px: f32,
) -> Option<Arc<dyn RenderableFont>> {
    for family in candidates(font) {
        match resolver.resolve(family, px, font.bold, font.italic) {
            Ok(found) => return Some(found),
            Err(err) => trace!(%err, "font candidate rejected"),
        }
    }
    debug!(family = %font.family, "no candidate font resolved, using default font");
    resolver.default_font(px, font.bold, font.italic)
}

/// The `font8x8` glyph set scaled to a pixel size.
#[derive(Debug, Clone)]
pub struct BitmapFont {
    cell: u32,
    bold: bool,
    italic: bool,
}

impl BitmapFont {
    pub fn new(px: f32, bold: bool, italic: bool) -> Self {
        Self {
            cell: (px.round() as u32).max(8),
            bold,
            italic,
        }
    }

    fn glyph(ch: char) -> [u8; 8] {
        BASIC_FONTS
            .get(ch)
            .or_else(|| LATIN_FONTS.get(ch))
            .or_else(|| BASIC_FONTS.get('?'))
            .unwrap_or([0; 8])
    }

    fn slant(&self) -> u32 {
        if self.italic {
            self.cell / 4
        } else {
            0
        }
    }
}

impl RenderableFont for BitmapFont {
    fn name(&self) -> &str {
        "builtin-8x8"
    }

    fn measure(&self, text: &str) -> Option<(f32, f32)> {
        let n = text.chars().count() as u32;
        Some(((n * self.cell + self.slant()) as f32, self.cell as f32))
    }

    fn draw(&self, text: &str, plot: &mut dyn FnMut(i64, i64, f32)) -> Result<(), FontError> {
        let cell = self.cell as i64;
        let slant = self.slant() as i64;

        for (i, ch) in text.chars().enumerate() {
            let rows = Self::glyph(ch);
            let x0 = i as i64 * cell;
            for y in 0..cell {
                let row = rows[(y * 8 / cell) as usize];
                // Top rows lean right by up to `slant` pixels.
                let shear = slant * (cell - 1 - y) / cell.max(1);
                for x in 0..cell {
                    let col = x * 8 / cell;
                    let mut on = (row >> col) & 1 == 1;
                    if self.bold && col > 0 {
                        on |= (row >> (col - 1)) & 1 == 1;
                    }
                    if on {
                        plot(x0 + x + shear, y, 1.0);
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct OnlyArial;

    impl FontResolver for OnlyArial {
        fn resolve(
            &self,
            family: &str,
            px: f32,
            bold: bool,
            italic: bool,
        ) -> Result<Arc<dyn RenderableFont>, FontError> {
            if family == "Arial" {
                Ok(Arc::new(BitmapFont::new(px, bold, italic)))
            } else {
                Err(FontError::NotFound {
                    family: family.to_string(),
                })
            }
        }

        fn default_font(&self, _: f32, _: bool, _: bool) -> Option<Arc<dyn RenderableFont>> {
            None
        }
    }

    #[test]
    fn candidates_put_requested_family_first_without_duplicates() {
        let font = FontDescriptor {
            family: "simsun".into(),
            ..FontDescriptor::default()
        };
        assert_eq!(
            candidates(&font),
            vec!["simsun", "SimHei", "Microsoft YaHei", "KaiTi"]
        );
    }

    #[test]
    fn chain_falls_back_to_default_font() {
        let font = FontDescriptor::default();
        let resolved = resolve_chain(&BuiltinFonts, &font, 16.0);
        assert_eq!(resolved.map(|f| f.name().to_string()).as_deref(), Some("builtin-8x8"));

        // A resolver without a default yields nothing.
        assert!(resolve_chain(&OnlyArial, &font, 16.0).is_none());

        let arial = FontDescriptor {
            family: "Arial".into(),
            ..FontDescriptor::default()
        };
        assert!(resolve_chain(&OnlyArial, &arial, 16.0).is_some());
    }

    #[test]
    fn bitmap_font_measures_one_cell_per_char() {
        let font = BitmapFont::new(16.0, false, false);
        assert_eq!(font.measure("abc"), Some((48.0, 16.0)));

        let italic = BitmapFont::new(16.0, false, true);
        assert_eq!(italic.measure("abc"), Some((52.0, 16.0)));
    }

    #[test]
    fn bitmap_font_draws_inside_its_measured_box() {
        let font = BitmapFont::new(24.0, true, true);
        let (w, h) = font.measure("Wm?").unwrap();
        let mut plotted = 0;
        font.draw("Wm?", &mut |x, y, cov| {
            assert!(x >= 0 && (x as f32) < w, "x={x}");
            assert!(y >= 0 && (y as f32) < h, "y={y}");
            assert_eq!(cov, 1.0);
            plotted += 1;
        })
        .unwrap();
        assert!(plotted > 0);
    }

    const SYSTEM_SANS: &str = "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf";

    fn system_sans() -> Option<FontFiles> {
        let path = Path::new(SYSTEM_SANS);
        if !path.is_file() {
            return None;
        }
        let mut fonts = FontFiles::new();
        fonts.add_file("DejaVu Sans", path);
        Some(fonts)
    }

    #[test]
    fn names_normalize_across_spellings() {
        assert_eq!(normalize("Microsoft YaHei"), "microsoftyahei");
        assert_eq!(normalize("DejaVu_Sans-Bold"), "dejavusansbold");
    }

    #[test]
    fn unregistered_family_is_not_found() {
        let fonts = FontFiles::new();
        assert!(fonts.is_empty());
        assert!(matches!(
            fonts.resolve("Arial", 16.0, false, false),
            Err(FontError::NotFound { .. })
        ));
    }

    #[test]
    fn directory_scan_registers_stems_and_aliases() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("cjk");
        fs::create_dir(&nested).unwrap();
        fs::write(nested.join("simhei.ttf"), b"x").unwrap();
        fs::write(dir.path().join("Arial-Bold.TTF"), b"x").unwrap();
        fs::write(dir.path().join("Arial.ttf"), b"x").unwrap();
        fs::write(dir.path().join("notes.txt"), b"x").unwrap();

        let mut fonts = FontFiles::new();
        assert_eq!(fonts.add_dir(dir.path()), 3);

        let (path, styled) = fonts.lookup("SimHei", false, false).unwrap();
        assert!(path.ends_with("cjk/simhei.ttf") && styled);
        let (path, styled) = fonts.lookup("arial", true, false).unwrap();
        assert!(path.ends_with("Arial-Bold.TTF") && styled);
        let (path, styled) = fonts.lookup("Arial", false, true).unwrap();
        assert!(path.ends_with("Arial.ttf") && !styled);
        assert!(fonts.lookup("KaiTi", false, false).is_none());
    }

    #[test]
    fn unparsable_font_file_falls_through_the_chain() {
        let dir = tempfile::tempdir().unwrap();
        let bogus = dir.path().join("simhei.ttf");
        fs::write(&bogus, b"definitely not a font").unwrap();

        let mut fonts = FontFiles::new();
        fonts.add_dir(dir.path());
        assert!(matches!(
            fonts.resolve("SimHei", 16.0, false, false),
            Err(FontError::Load { .. })
        ));

        let resolved = resolve_chain(&fonts, &FontDescriptor::default(), 16.0).unwrap();
        assert_eq!(resolved.name(), "builtin-8x8");
    }

    #[test]
    fn outline_font_measures_and_draws_with_coverage() {
        let Some(fonts) = system_sans() else {
            return;
        };
        let font = fonts.resolve("dejavu sans", 32.0, false, false).unwrap();
        assert_eq!(font.name(), "DejaVuSans");

        let (w, h) = font.measure("Hello").unwrap();
        assert!(w > 32.0 && w < 5.0 * 32.0, "w={w}");
        assert!(h >= 32.0 && h < 48.0, "h={h}");

        let mut partial = 0;
        let mut plotted = 0;
        font.draw("Hello", &mut |x, y, cov| {
            assert!(x >= -2 && (x as f32) < w + 2.0, "x={x}");
            assert!(y >= -2 && (y as f32) < h + 2.0, "y={y}");
            if cov < 1.0 {
                partial += 1;
            }
            plotted += 1;
        })
        .unwrap();
        assert!(plotted > 0);
        assert!(partial > 0, "outlines should be anti-aliased");
    }

    #[test]
    fn synthesized_styles_widen_the_box() {
        let Some(fonts) = system_sans() else {
            return;
        };
        let plain = fonts.resolve("DejaVu Sans", 24.0, false, false).unwrap();
        let styled = fonts.resolve("DejaVu Sans", 24.0, true, true).unwrap();
        let (pw, ph) = plain.measure("Wm").unwrap();
        let (sw, sh) = styled.measure("Wm").unwrap();
        assert!(sw > pw);
        assert_eq!(ph, sh);
    }

    #[test]
    fn unknown_glyphs_still_render() {
        let font = BitmapFont::new(8.0, false, false);
        let mut plotted = 0;
        font.draw("水", &mut |_, _, _| plotted += 1).unwrap();
        assert!(plotted > 0);
    }
}
