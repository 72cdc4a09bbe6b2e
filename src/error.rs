//! Error types for training, persistence and inference
//!
//! Training-time errors abort the whole run. Inference-time schema errors are
//! collected per batch by the engine instead of aborting the run.

use thiserror::Error;

/// Errors that can occur anywhere in the risk-scoring core
#[derive(Error, Debug)]
pub enum RiskError {
    #[error("Insufficient training data: {0}")]
    InsufficientData(String),

    #[error("Label imbalance: all {rows} training rows are labeled {label}")]
    LabelImbalance { rows: usize, label: &'static str },

    #[error("Schema mismatch for batch {batch_id}: {detail}")]
    SchemaMismatch { batch_id: String, detail: String },

    #[error("Model not fitted: {0} must be fitted before scoring")]
    ModelNotFitted(&'static str),

    #[error("Model version not found: {0}")]
    VersionNotFound(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Numerical failure: {0}")]
    NumericalFailure(String),

    #[error("Corrupt model artifact {key}: {reason}")]
    CorruptArtifact { key: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RiskError {
    /// True for errors that only invalidate a single inference batch
    pub fn is_per_batch(&self) -> bool {
        matches!(self, RiskError::SchemaMismatch { .. })
    }
}

pub type RiskResult<T> = Result<T, RiskError>;
