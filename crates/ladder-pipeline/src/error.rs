//! Pipeline error types.

use thiserror::Error;

/// Result type alias for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Core(#[from] ladder_core::CoreError),

    #[error(transparent)]
    Lifecycle(#[from] ladder_lifecycle::LifecycleError),

    #[error(transparent)]
    Probe(#[from] ladder_probe::ProbeError),

    #[error(transparent)]
    Gate(#[from] ladder_gate::GateError),

    #[error("promotion rejected: {reason}")]
    Rejected { reason: String },

    #[error("verification failed: {}", failed.join(", "))]
    VerificationFailed { failed: Vec<String> },

    #[error("run cancelled")]
    Cancelled,
}

impl PipelineError {
    /// Cancellation and supersession end a run without being a defect.
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self,
            PipelineError::Cancelled
                | PipelineError::Gate(ladder_gate::GateError::Cancelled)
                | PipelineError::Gate(ladder_gate::GateError::Superseded { .. })
        )
    }
}
