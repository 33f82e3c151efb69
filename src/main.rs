use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{ArgGroup, Parser, ValueEnum};
use tracing::{debug, info};

use batch_watermark::export::shares_source_directory;
use batch_watermark::source::collect_sources;
use batch_watermark::{
    Color, Compositor, ExportFormat, ExportOptions, ExportPipeline, FontDescriptor, FontFiles,
    JsonTemplateStore, NamingRule, ResizeTarget, TemplateFields, TemplateStore, WatermarkKind,
    WatermarkSpec,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Format {
    Png,
    Jpeg,
}

#[derive(Parser)]
#[command(name = "batch-watermark", about = "Apply a text or image watermark to a batch of images")]
#[command(group(ArgGroup::new("naming").args(["prefix", "suffix"])))]
#[command(group(ArgGroup::new("resize").args(["width", "height", "percent"])))]
struct Args {
    /// Image files or directories (png, jpg, jpeg, bmp, tiff)
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Destination directory
    #[arg(short, long)]
    output: PathBuf,

    /// Watermark text
    #[arg(long)]
    text: Option<String>,

    /// Watermark image (switches to an image watermark)
    #[arg(long)]
    mark: Option<PathBuf>,

    /// Opacity, 0-100
    #[arg(long)]
    opacity: Option<i64>,

    /// Size relative to the shorter image side, 10-100
    #[arg(long)]
    size: Option<i64>,

    /// Counter-clockwise rotation in degrees
    #[arg(long)]
    rotation: Option<i64>,

    /// Horizontal anchor, 0.0 (left) to 1.0 (right)
    #[arg(long)]
    x: Option<f64>,

    /// Vertical anchor, 0.0 (top) to 1.0 (bottom)
    #[arg(long)]
    y: Option<f64>,

    /// Text color, #RRGGBB or #AARRGGBB
    #[arg(long)]
    color: Option<Color>,

    #[arg(long)]
    font_family: Option<String>,

    #[arg(long)]
    font_size: Option<u32>,

    #[arg(long)]
    bold: bool,

    #[arg(long)]
    italic: bool,

    /// Directory to search for font files (repeatable; defaults to the
    /// system font directories)
    #[arg(long = "font-dir")]
    font_dirs: Vec<PathBuf>,

    /// Font file to use, registered under its file name (repeatable)
    #[arg(long = "font-file")]
    font_files: Vec<PathBuf>,

    #[arg(long, value_enum, default_value = "png")]
    format: Format,

    /// JPEG quality, 0-100
    #[arg(long, default_value_t = 90)]
    quality: i64,

    #[arg(long)]
    prefix: Option<String>,

    #[arg(long)]
    suffix: Option<String>,

    /// Resize to this width, keeping aspect ratio
    #[arg(long)]
    width: Option<u32>,

    /// Resize to this height, keeping aspect ratio
    #[arg(long)]
    height: Option<u32>,

    /// Resize by percentage
    #[arg(long)]
    percent: Option<u32>,

    /// Settings file holding templates and the last-used watermark
    #[arg(long, default_value = "watermark_settings.json")]
    settings: PathBuf,

    /// Start from a saved template instead of the last-used settings
    #[arg(long)]
    template: Option<String>,

    /// Save the resulting watermark settings under this template name
    #[arg(long)]
    save_template: Option<String>,

    /// Process images in parallel
    #[arg(long)]
    parallel: bool,

    /// Export into a source directory without asking
    #[arg(short, long)]
    yes: bool,

    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();
}

fn build_spec(args: &Args, base: WatermarkSpec) -> WatermarkSpec {
    let mut spec = base;
    if let Some(text) = &args.text {
        spec = spec.with_kind(WatermarkKind::Text).with_text(text.clone());
    }
    if let Some(mark) = &args.mark {
        spec = spec
            .with_kind(WatermarkKind::Image)
            .with_image_path(Some(mark.clone()));
    }
    if let Some(v) = args.opacity {
        spec = spec.with_opacity(v);
    }
    if let Some(v) = args.size {
        spec = spec.with_size(v);
    }
    if let Some(v) = args.rotation {
        spec = spec.with_rotation(v);
    }
    if args.x.is_some() || args.y.is_some() {
        let (x, y) = spec.position();
        spec = spec.with_position(args.x.unwrap_or(x), args.y.unwrap_or(y));
    }
    if let Some(color) = args.color {
        spec = spec.with_color(color);
    }
    let font = spec.font().clone();
    spec.with_font(FontDescriptor {
        family: args.font_family.clone().unwrap_or(font.family),
        size: args.font_size.unwrap_or(font.size),
        bold: font.bold || args.bold,
        italic: font.italic || args.italic,
    })
}

fn build_options(args: &Args) -> ExportOptions {
    let format = match args.format {
        Format::Png => ExportFormat::Png,
        Format::Jpeg => ExportFormat::Jpeg,
    };
    let naming = match (&args.prefix, &args.suffix) {
        (Some(p), _) => NamingRule::Prefix(p.clone()),
        (_, Some(s)) => NamingRule::Suffix(s.clone()),
        _ => NamingRule::Original,
    };
    let resize = args
        .width
        .map(ResizeTarget::ByWidth)
        .or(args.height.map(ResizeTarget::ByHeight))
        .or(args.percent.map(ResizeTarget::ByPercent));

    ExportOptions::new(format)
        .with_naming(naming)
        .with_quality(args.quality)
        .with_resize(resize)
}

fn build_fonts(args: &Args) -> FontFiles {
    let mut fonts = if args.font_dirs.is_empty() {
        FontFiles::system()
    } else {
        let mut fonts = FontFiles::new();
        for dir in &args.font_dirs {
            let added = fonts.add_dir(dir);
            debug!(dir = %dir.display(), added, "font directory scanned");
        }
        fonts
    };
    for file in &args.font_files {
        let name = file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        fonts.add_file(&name, file);
    }
    fonts
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{prompt} [y/N] ");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(matches!(line.trim(), "y" | "Y" | "yes"))
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let store = JsonTemplateStore::new(&args.settings);
    let base = match &args.template {
        Some(name) => store
            .load(name)
            .with_context(|| format!("cannot read {}", store.path().display()))?
            .with_context(|| format!("no template named {name:?}"))?
            .to_spec(),
        None => store
            .last_settings()
            .with_context(|| format!("cannot read {}", store.path().display()))?
            .map(|fields| fields.to_spec())
            .unwrap_or_default(),
    };
    let spec = build_spec(&args, base);
    let options = build_options(&args);

    let sources = collect_sources(&args.inputs);
    if sources.is_empty() {
        bail!("no supported images found in the given inputs");
    }

    if shares_source_directory(&sources, &args.output)
        && !args.yes
        && !confirm("The destination is a source directory; files may be overwritten. Continue?")?
    {
        info!("export aborted");
        return Ok(());
    }

    let fields = TemplateFields::from_spec(&spec);
    if let Some(name) = &args.save_template {
        store.save(name, &fields).context("cannot save template")?;
        info!(name, "template saved");
    }
    store
        .save_last_settings(&fields)
        .context("cannot save settings")?;

    let compositor = Compositor::new(Arc::new(build_fonts(&args)));
    let report = ExportPipeline::new(compositor)
        .parallel(args.parallel)
        .run(&sources, spec, &options, &args.output)
        .context("export could not start")?;

    for (_, out) in report.succeeded() {
        println!("  ok    {}", out.display());
    }
    for (index, src, err) in report.failures() {
        eprintln!("  fail  #{} {}: {err}", index + 1, src.display());
    }
    if !report.is_clean() {
        bail!("{} of {} images failed", report.failures().count(), report.items.len());
    }
    Ok(())
}
