//! Prober error types.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for probe operations.
pub type ProbeResult<T> = Result<T, ProbeError>;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("no service for release {release} in namespace {namespace}")]
    ServiceNotFound { namespace: String, release: String },

    #[error("service {service} has no cluster address")]
    NoAddress { service: String },

    #[error("invalid probe url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("{url} did not respond after {attempts} attempts in {elapsed:?}: {last_error}")]
    Exhausted {
        url: String,
        attempts: u32,
        elapsed: Duration,
        last_error: String,
    },

    #[error(transparent)]
    Lifecycle(#[from] ladder_lifecycle::LifecycleError),

    #[error(transparent)]
    Config(#[from] ladder_core::CoreError),
}
