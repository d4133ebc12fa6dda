use thiserror::Error;

/// Failure classes for the load pipeline. Every variant is fatal to the
/// current run: callers propagate it, log it, and exit non-zero.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("acquisition error: {0}")]
    Acquisition(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("normalization error: {0}")]
    Normalization(String),

    #[error("sink error: {0}")]
    Sink(String),
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

impl From<duckdb::Error> for PipelineError {
    fn from(err: duckdb::Error) -> Self {
        PipelineError::Sink(err.to_string())
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(err: reqwest::Error) -> Self {
        PipelineError::Acquisition(err.to_string())
    }
}
