//! Per-run state handed to every stage.

use ladder_core::{ReleaseId, sanitize_branch};
use ladder_gate::CancelToken;
use serde::{Deserialize, Serialize};

use crate::error::PipelineResult;

/// What the caller asks a run to do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRequest {
    /// Source branch, unsanitized.
    pub branch: String,
    /// Skip the gate and promote to production unconditionally.
    #[serde(default)]
    pub deploy_to_prod: bool,
    /// Run ordinal to use instead of allocating one from the ledger,
    /// typically the CI build number.
    #[serde(default)]
    pub run_number: Option<u64>,
}

impl RunRequest {
    pub fn new(branch: impl Into<String>) -> Self {
        Self {
            branch: branch.into(),
            deploy_to_prod: false,
            run_number: None,
        }
    }

    pub fn deploy_to_prod(mut self, yes: bool) -> Self {
        self.deploy_to_prod = yes;
        self
    }

    pub fn run_number(mut self, n: u64) -> Self {
        self.run_number = Some(n);
        self
    }
}

/// State owned by the controller for exactly one run.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub release_id: ReleaseId,
    /// Branch as given, trimmed.
    pub source_branch: String,
    /// Sanitized branch.
    pub branch: String,
    pub deploy_to_prod_requested: bool,
    deploy_prod: bool,
    /// Namespace of the most recent deploy stage.
    pub current_namespace: Option<String>,
    /// Position of this run among runs of the same release; 0 until setup.
    pub ordinal: u64,
    /// Routable address of the local host, found during build-and-test.
    pub host_address: Option<String>,
    pub cancel: CancelToken,
}

impl RunContext {
    pub fn new(artifact: &str, request: &RunRequest, cancel: CancelToken) -> PipelineResult<Self> {
        let release_id = ReleaseId::derive(artifact, &request.branch)?;
        Ok(Self {
            release_id,
            source_branch: request.branch.trim().to_string(),
            branch: sanitize_branch(&request.branch),
            deploy_to_prod_requested: request.deploy_to_prod,
            deploy_prod: false,
            current_namespace: None,
            ordinal: request.run_number.unwrap_or(0),
            host_address: None,
            cancel,
        })
    }

    pub fn deploy_prod(&self) -> bool {
        self.deploy_prod
    }

    /// Exact, case-sensitive match against the configured release branch.
    /// `MASTER` or `master/` never count as `master`.
    pub fn on_release_branch(&self, release_branch: &str) -> bool {
        self.source_branch == release_branch.trim()
    }

    /// Latch production promotion. There is no way back.
    pub fn promote(&mut self) {
        self.deploy_prod = true;
    }
}
