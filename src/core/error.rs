//! Pipeline loading errors

use std::path::PathBuf;
use thiserror::Error;

/// Error types for loading and validating pipelines
///
/// None of these are retried: a bad definition stays bad.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Failed to read pipeline file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse pipeline: {0}")]
    Parse(String),

    #[error("Invalid pipeline: {0}")]
    Validation(String),
}

impl PipelineError {
    /// Whether this error came from validation rather than syntax or I/O
    pub fn is_validation(&self) -> bool {
        matches!(self, PipelineError::Validation(_))
    }
}
