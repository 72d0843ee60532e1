//! Approval gate — blocks a run on the operator while keeping runs ordered.
//!
//! ```text
//!   pass(Entry) ──► AwaitingApproval ──approve──► pass(Approved) ──► Approved
//!        │                 │
//!        │                 ├── newer run passes Entry ──► Superseded
//!        │                 └── token cancelled ─────────► Cancelled
//!        └── newer run already past Entry ──────────────► Superseded
//! ```
//!
//! A superseded run has its cancel token tripped so the controller stops
//! it at the next stage boundary without touching production.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::approval::{ApprovalRequest, ApprovalSource, Decision};
use crate::cancel::CancelToken;
use crate::error::{GateError, GateResult};
use crate::ledger::{Checkpoint, MilestoneLedger};

/// Where a run is inside the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GateState {
    AwaitingApproval,
    Approved,
}

/// The shared gate. One instance serves every run of every pipeline.
pub struct ApprovalGate {
    ledger: Arc<dyn MilestoneLedger>,
    approvals: Arc<dyn ApprovalSource>,
}

impl ApprovalGate {
    pub fn new(ledger: Arc<dyn MilestoneLedger>, approvals: Arc<dyn ApprovalSource>) -> Self {
        Self { ledger, approvals }
    }

    pub fn ledger(&self) -> &Arc<dyn MilestoneLedger> {
        &self.ledger
    }

    /// Take a run through the gate.
    ///
    /// Returns the operator's decision. Fails with
    /// [`GateError::Superseded`] if a newer run of the same pipeline passes
    /// the entry checkpoint first, and [`GateError::Cancelled`] if `cancel`
    /// trips while waiting. Both leave `cancel` tripped.
    pub async fn pass(&self, request: &ApprovalRequest, cancel: &CancelToken) -> GateResult<Decision> {
        let pipeline = request.pipeline.as_str();
        let ordinal = request.ordinal;

        let highest = self.ledger.pass(pipeline, Checkpoint::Entry, ordinal).await?;
        if highest > ordinal {
            return Err(self.supersede(pipeline, ordinal, highest, cancel));
        }
        info!(%pipeline, ordinal, state = ?GateState::AwaitingApproval, "waiting for operator");

        let decision = tokio::select! {
            decision = self.approvals.decide(request) => decision?,
            newer = self.ledger.superseded(pipeline, Checkpoint::Entry, ordinal) => {
                return Err(self.supersede(pipeline, ordinal, newer?, cancel));
            }
            _ = cancel.cancelled() => {
                warn!(%pipeline, ordinal, "cancelled while waiting for operator");
                return Err(GateError::Cancelled);
            }
        };

        let by = match &decision {
            Decision::Approved { by } => by.clone(),
            Decision::Rejected { reason } => {
                info!(%pipeline, ordinal, %reason, "promotion rejected");
                return Ok(decision);
            }
        };

        // The approval may have raced a newer run reaching the gate.
        let newer = self.ledger.highest(pipeline, Checkpoint::Entry).await?;
        if newer > ordinal {
            return Err(self.supersede(pipeline, ordinal, newer, cancel));
        }
        let highest = self.ledger.pass(pipeline, Checkpoint::Approved, ordinal).await?;
        if highest > ordinal {
            return Err(self.supersede(pipeline, ordinal, highest, cancel));
        }

        info!(%pipeline, ordinal, %by, state = ?GateState::Approved, "promotion approved");
        Ok(decision)
    }

    fn supersede(&self, pipeline: &str, ordinal: u64, newer: u64, cancel: &CancelToken) -> GateError {
        warn!(%pipeline, ordinal, newer, "run superseded by a newer run");
        cancel.cancel();
        GateError::Superseded { ordinal, newer }
    }
}
