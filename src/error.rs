use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{message}: {}", .path.display())]
    NotFound { path: PathBuf, message: String },

    #[error("Output directory already exists: {}", .path.display())]
    OutputExists { path: PathBuf },

    #[error("Embedding dimension mismatch: record {index} has {found} values, expected {expected}")]
    DimensionMismatch {
        index: usize,
        expected: usize,
        found: usize,
    },

    #[error("Invalid {name}: {message}")]
    InvalidParameter {
        name: &'static str,
        message: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Manifest error: {0}")]
    Manifest(#[from] serde_json::Error),

    #[error("Thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("Directory walk error: {0}")]
    Walk(#[from] walkdir::Error),
}

impl PipelineError {
    pub(crate) fn not_found(path: impl Into<PathBuf>, message: &str) -> Self {
        Self::NotFound {
            path: path.into(),
            message: message.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
