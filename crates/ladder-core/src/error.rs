//! Core error types.

use thiserror::Error;

pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("artifact name must not be empty")]
    EmptyArtifact,

    #[error("branch name must not be empty")]
    EmptyBranch,

    #[error("unknown metric: {0} (expected status_code, total_time or size_download)")]
    UnknownMetric(String),

    #[error("invalid duration for {field}: {value:?}")]
    InvalidDuration { field: &'static str, value: String },

    #[error("invalid config: {0}")]
    InvalidConfig(String),
}
