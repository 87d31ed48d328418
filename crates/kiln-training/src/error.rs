use std::path::PathBuf;
use thiserror::Error;

pub type TrainingResult<T> = std::result::Result<T, TrainingError>;

/// Failures raised while fitting a model.
///
/// The first four variants mirror the fault classes a fit backend can report.
/// `Internal` covers anything the backend could not classify.
#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("training aborted: {0}")]
    Aborted(String),

    #[error("failed precondition: {0}")]
    FailedPrecondition(String),

    #[error("unknown error: {0}")]
    Unknown(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// A training configuration that cannot be used to build a model.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct InvalidConfig(pub String);

impl InvalidConfig {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("dataset source is missing `train_uri`")]
    MissingSource,

    #[error("`{kind}` datasets require a `validation_uri`")]
    MissingValidation { kind: String },

    #[error("unsupported dataset source: {0}")]
    UnsupportedSource(String),

    #[error("failed to download {uri}: {reason}")]
    Download { uri: String, reason: String },

    #[error("malformed dataset: {0}")]
    Malformed(String),

    #[error("dataset row {row} has {found} features, model expects {expected}")]
    ShapeMismatch { row: usize, expected: usize, found: usize },

    #[error("dataset is empty: {0}")]
    Empty(String),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),

    #[error(transparent)]
    Walk(#[from] walkdir::Error),

    #[error("path {0} escapes the archive root")]
    OutsideRoot(PathBuf),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Failures while downloading, unpacking, loading or saving a model bundle.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("model download failed: {0}")]
    Download(String),

    #[error("model unpack failed: {0}")]
    Unpack(#[from] ArchiveError),

    #[error("model bundle not found at {0}")]
    MissingBundle(PathBuf),

    #[error("unknown optimizer `{0}` (no registered constructor)")]
    UnknownOptimizer(String),

    #[error("invalid model bundle: {0}")]
    Invalid(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
