//! Gate error types.

use thiserror::Error;

/// Result type alias for gate operations.
pub type GateResult<T> = Result<T, GateError>;

#[derive(Debug, Error)]
pub enum GateError {
    /// A newer run of the same pipeline got past a checkpoint first.
    #[error("run #{ordinal} superseded by run #{newer}")]
    Superseded { ordinal: u64, newer: u64 },

    #[error("run cancelled")]
    Cancelled,

    #[error("approval source closed before a decision was made")]
    ApproverGone,

    #[error("milestone ledger I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("milestone ledger is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}
