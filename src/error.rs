//! Error types for the pseudonymization pipeline

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RedactError>;

/// Run-level failures. Per-chunk detector problems never surface here;
/// they are recorded as failed chunks and the run continues.
#[derive(Error, Debug)]
pub enum RedactError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Cannot read input {path}: {message}")]
    Input { path: PathBuf, message: String },

    #[error("Failed to persist {path}: {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Checkpoint {path} is unreadable: {message}")]
    CorruptCheckpoint { path: PathBuf, message: String },

    #[error("Checkpoint does not match input: {0}")]
    CheckpointMismatch(String),

    #[error("Resume index {requested} is out of range (document has {chunks} chunks)")]
    ResumeOutOfRange { requested: usize, chunks: usize },

    #[error("Substitution invariant violated: span {start}..{end} overlaps an already replaced span")]
    SubstitutionInvariantViolation { start: usize, end: usize },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RedactError {
    pub(crate) fn persistence(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Persistence {
            path: path.into(),
            source,
        }
    }
}

/// Failure of a single detector call. Always recoverable at run level.
#[derive(Error, Debug, Clone)]
pub enum DetectorError {
    /// Transport failure or non-success status
    #[error("Detection failed: {0}")]
    Failure(String),

    /// Response arrived but could not be turned into detected terms
    #[error("Malformed detector response: {message}")]
    MalformedResponse { message: String, raw: String },

    #[error("Detector call timed out after {0}ms")]
    Timeout(u64),
}

impl DetectorError {
    /// Raw response text, when the detector produced one
    pub fn raw_response(&self) -> Option<&str> {
        match self {
            Self::MalformedResponse { raw, .. } => Some(raw),
            _ => None,
        }
    }

    /// Malformed output will not improve on retry; transport errors might
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::MalformedResponse { .. })
    }
}
