use std::path::PathBuf;

/// The watermark raster could not be opened or decoded.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("cannot open watermark image {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("cannot decode watermark image: {source}")]
    Decode {
        #[source]
        source: image::ImageError,
    },
}

/// Failure of a single item in an export batch. Never aborts the batch.
#[derive(Debug, thiserror::Error)]
pub enum ItemError {
    #[error("cannot decode {}: {reason}", path.display())]
    Decode { path: PathBuf, reason: String },

    #[error("watermark image unavailable: {reason}")]
    Watermark { reason: String },

    #[error("cannot encode {}: {reason}", path.display())]
    Encode { path: PathBuf, reason: String },

    #[error("cannot write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{} is already written by item #{}", path.display(), first + 1)]
    OutputCollision { path: PathBuf, first: usize },

    #[error("export cancelled before this item was processed")]
    Cancelled,
}

/// Caller-level precondition failures, checked before any item is touched.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("destination directory does not exist: {}", path.display())]
    MissingDestination { path: PathBuf },

    #[error("destination is not a directory: {}", path.display())]
    NotADirectory { path: PathBuf },

    #[error("destination directory is read-only: {}", path.display())]
    ReadOnlyDestination { path: PathBuf },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Font lookup and rasterization failures. Recovered inside the text
/// renderer; callers of the compositor never see these.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FontError {
    #[error("font not found: {family}")]
    NotFound { family: String },

    #[error("cannot load font {}: {reason}", path.display())]
    Load { path: PathBuf, reason: String },

    #[error("font render error: {0}")]
    Render(String),
}

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("template store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("template store is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl ItemError {
    pub fn decode(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Decode {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn encode(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Encode {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
