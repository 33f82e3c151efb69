use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use image::imageops::FilterType;
use image::DynamicImage;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::composite::Compositor;
use crate::encode;
use crate::error::{ItemError, PipelineError};
use crate::options::ExportOptions;
use crate::source;
use crate::spec::WatermarkSpec;
use crate::watermark;

/// Outcome of one source, in input order.
#[derive(Debug)]
pub struct ItemOutcome {
    pub index: usize,
    pub source: PathBuf,
    pub result: Result<PathBuf, ItemError>,
}

#[derive(Debug, Default)]
pub struct ExportReport {
    pub items: Vec<ItemOutcome>,
}

impl ExportReport {
    pub fn succeeded(&self) -> impl Iterator<Item = (&Path, &Path)> {
        self.items.iter().filter_map(|item| match &item.result {
            Ok(out) => Some((item.source.as_path(), out.as_path())),
            Err(_) => None,
        })
    }

    pub fn failures(&self) -> impl Iterator<Item = (usize, &Path, &ItemError)> {
        self.items.iter().filter_map(|item| match &item.result {
            Ok(_) => None,
            Err(err) => Some((item.index, item.source.as_path(), err)),
        })
    }

    pub fn is_clean(&self) -> bool {
        self.items.iter().all(|item| item.result.is_ok())
    }
}

/// True when `dest` is the parent directory of any source. Callers should
/// get explicit confirmation before exporting in that case.
pub fn shares_source_directory<P: AsRef<Path>>(sources: &[P], dest: &Path) -> bool {
    let dest = fs::canonicalize(dest).unwrap_or_else(|_| dest.to_path_buf());
    sources.iter().any(|src| {
        let parent = src.as_ref().parent().unwrap_or_else(|| Path::new("."));
        let parent = if parent.as_os_str().is_empty() {
            Path::new(".")
        } else {
            parent
        };
        fs::canonicalize(parent).unwrap_or_else(|_| parent.to_path_buf()) == dest
    })
}

pub fn validate_destination(dest: &Path) -> Result<(), PipelineError> {
    let meta = match fs::metadata(dest) {
        Ok(meta) => meta,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(PipelineError::MissingDestination {
                path: dest.to_path_buf(),
            })
        }
        Err(err) => return Err(err.into()),
    };
    if !meta.is_dir() {
        return Err(PipelineError::NotADirectory {
            path: dest.to_path_buf(),
        });
    }
    if meta.permissions().readonly() {
        return Err(PipelineError::ReadOnlyDestination {
            path: dest.to_path_buf(),
        });
    }
    Ok(())
}

pub struct ExportPipeline {
    compositor: Compositor,
    parallel: bool,
    cancel: Option<Arc<AtomicBool>>,
}

impl ExportPipeline {
    pub fn new(compositor: Compositor) -> Self {
        Self {
            compositor,
            parallel: false,
            cancel: None,
        }
    }

    /// Process items on the rayon pool. The report stays in input order.
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Checked before each item; once set, remaining items are reported as
    /// cancelled and nothing more is written.
    pub fn cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Exports every source into `dest`. `spec` is taken by value so the
    /// batch works on a snapshot nobody else can change.
    pub fn run<P: AsRef<Path> + Sync>(
        &self,
        sources: &[P],
        spec: WatermarkSpec,
        options: &ExportOptions,
        dest: &Path,
    ) -> Result<ExportReport, PipelineError> {
        validate_destination(dest)?;
        info!(
            count = sources.len(),
            dest = %dest.display(),
            format = options.format().extension(),
            "export started"
        );

        // Decoded once for the whole batch.
        let mark = match spec.image_path() {
            Some(path) if spec.uses_image() => match watermark::load(path) {
                Ok(mark) => Ok(Some(mark)),
                Err(err) => {
                    warn!(%err, "watermark image unavailable, every item will fail");
                    Err(err.to_string())
                }
            },
            _ => Ok(None),
        };

        let targets: Vec<PathBuf> = sources
            .iter()
            .map(|src| dest.join(options.naming().file_name(src.as_ref(), options.format())))
            .collect();
        let owners = first_owners(&targets);

        let job = |(index, src): (usize, &P)| {
            let src = src.as_ref();
            let out = &targets[index];
            let result = if self.is_cancelled() {
                Err(ItemError::Cancelled)
            } else if owners[index] != index {
                Err(ItemError::OutputCollision {
                    path: out.clone(),
                    first: owners[index],
                })
            } else {
                match &mark {
                    Ok(mark) => self.export_one(src, out, &spec, mark.as_ref(), options),
                    Err(reason) => Err(ItemError::Watermark {
                        reason: reason.clone(),
                    }),
                }
            };
            match &result {
                Ok(out) => debug!(index, src = %src.display(), out = %out.display(), "exported"),
                Err(err) => warn!(index, src = %src.display(), %err, "export failed"),
            }
            ItemOutcome {
                index,
                source: src.to_path_buf(),
                result,
            }
        };

        let items: Vec<ItemOutcome> = if self.parallel {
            sources.par_iter().enumerate().map(job).collect()
        } else {
            sources.iter().enumerate().map(job).collect()
        };

        let report = ExportReport { items };
        info!(
            exported = report.succeeded().count(),
            failed = report.failures().count(),
            "export finished"
        );
        Ok(report)
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    fn export_one(
        &self,
        src: &Path,
        out: &Path,
        spec: &WatermarkSpec,
        mark: Option<&DynamicImage>,
        options: &ExportOptions,
    ) -> Result<PathBuf, ItemError> {
        let canvas = source::open(src).map_err(|e| ItemError::decode(src, e))?;
        let marked = self.compositor.apply_with_mark(&canvas, spec, mark);
        let resized = resize(marked, options);

        let bytes = encode::encode(&resized, options.format(), options.quality())
            .map_err(|e| ItemError::encode(out, e))?;
        encode::write_atomic(out, &bytes).map_err(|source| ItemError::Write {
            path: out.to_path_buf(),
            source,
        })?;
        Ok(out.to_path_buf())
    }
}

/// For each target, the index of the first item that maps to the same
/// output path. Only that item gets to write it.
fn first_owners(targets: &[PathBuf]) -> Vec<usize> {
    let mut seen: HashMap<&Path, usize> = HashMap::with_capacity(targets.len());
    targets
        .iter()
        .enumerate()
        .map(|(index, target)| *seen.entry(target.as_path()).or_insert(index))
        .collect()
}

fn resize(img: DynamicImage, options: &ExportOptions) -> DynamicImage {
    let Some(target) = options.resize() else {
        return img;
    };
    let (w, h) = target.dimensions(img.width(), img.height());
    if (w, h) == (img.width(), img.height()) {
        return img;
    }
    img.resize_exact(w, h, FilterType::Lanczos3)
}
