//! Lifecycle error types.

use thiserror::Error;

/// Result type alias for lifecycle operations.
pub type LifecycleResult<T> = Result<T, LifecycleError>;

/// Errors raised while provisioning or tearing down resources.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("failed to execute {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with status {code}: {stderr}")]
    CommandFailed {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("orchestration backend unreachable: {0}")]
    Unreachable(String),

    #[error("unexpected output from {program}: {reason}")]
    MalformedOutput { program: String, reason: String },
}
