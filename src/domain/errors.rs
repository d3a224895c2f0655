use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the model lifecycle (windowing, training, prediction, persistence)
#[derive(Debug, Error)]
pub enum MlError {
    #[error("Input shape mismatch: {reason}")]
    ShapeMismatch { reason: String },

    #[error("Insufficient data: {rows} rows available, at least {required} required")]
    InsufficientData { rows: usize, required: usize },

    #[error("Invalid feature table: {reason}")]
    InvalidTable { reason: String },

    #[error("Model is not trained")]
    NotTrained,

    #[error("Model is already trained; construct a new instance to retrain")]
    AlreadyTrained,

    #[error("Model training is not supported for a loader-only model")]
    TrainingNotSupported,

    #[error("Scaler used before fit")]
    NotFitted,

    #[error("Classifier backend failed: {reason}")]
    Backend { reason: String },

    #[error("Invalid training configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("Model artifact not found: {path:?}")]
    FileNotFound { path: PathBuf },

    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt model artifact {path:?}: {reason}")]
    CorruptArtifact { path: PathBuf, reason: String },

    #[error("Unsupported artifact version {found} in {path:?} (supported up to {supported})")]
    UnsupportedArtifactVersion {
        path: PathBuf,
        found: u32,
        supported: u32,
    },
}

pub type MlResult<T> = Result<T, MlError>;

impl MlError {
    pub(crate) fn shape(reason: impl Into<String>) -> Self {
        MlError::ShapeMismatch {
            reason: reason.into(),
        }
    }

    pub(crate) fn backend(reason: impl std::fmt::Display) -> Self {
        MlError::Backend {
            reason: reason.to_string(),
        }
    }

    pub(crate) fn invalid_table(reason: impl Into<String>) -> Self {
        MlError::InvalidTable {
            reason: reason.into(),
        }
    }
}
