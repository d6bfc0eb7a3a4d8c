use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the training and inference core.
#[derive(Debug, Error)]
pub enum PredictError {
    /// Inference was requested before a bundle was trained or loaded.
    #[error("model is not trained; train or load a bundle first")]
    NotTrained,
    #[error("label {0:?} was not seen during training")]
    UnknownLabel(String),
    #[error("class code {0} is out of range for the target encoder")]
    UnknownClassCode(usize),
    #[error("feature vector has {found} values but the model expects {expected}")]
    FeatureCount { expected: usize, found: usize },
    #[error("feature {name} is not a finite number")]
    NonFiniteFeature { name: String },
    #[error("dataset contains no rows")]
    EmptyDataset,
    #[error("dataset is missing the {0} column")]
    MissingColumn(String),
    #[error("training failed: {0}")]
    Training(String),
    #[error("failed to read model artifact {path}: {source}")]
    ArtifactRead {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write model artifact {path}: {source}")]
    ArtifactWrite {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("model artifact is malformed: {0}")]
    ArtifactFormat(String),
    #[error("model artifact format version {found} is not supported (expected {expected})")]
    IncompatibleArtifact { found: u32, expected: u32 },
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PredictError>;
