use thiserror::Error;

use crate::features::FeaturePolicy;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("insufficient samples: need at least {needed}, got {got}")]
    InsufficientSamples { needed: usize, got: usize },
    #[error("insufficient beats: need at least {needed}, got {got}")]
    InsufficientBeats { needed: usize, got: usize },
    #[error("feature policy mismatch: enrolled {enrolled:?}, live {live:?}")]
    PolicyMismatch {
        enrolled: FeaturePolicy,
        live: FeaturePolicy,
    },
    #[error("feature dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("sample timestamps must be non-decreasing")]
    NonMonotonicWindow,
    #[error("capture already in progress; drain or cancel it first")]
    CaptureActive,
    #[error("no capture in progress")]
    CaptureIdle,
    #[error("cannot train a model from an empty feature set")]
    EmptyTrainingSet,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Persistence-boundary errors. A missing record is not an error; `load`
/// reports it as `Ok(None)`.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("stored model is corrupt: {0}")]
    Corrupt(String),
    #[error("storage I/O failure: {0}")]
    Io(#[from] std::io::Error),
}
