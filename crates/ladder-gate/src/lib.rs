//! ladder-gate — the production approval gate.
//!
//! Runs of the same pipeline are ordered by ordinal. Before blocking on the
//! operator a run passes the [`Checkpoint::Entry`] milestone; once approved
//! it passes [`Checkpoint::Approved`]. Whenever a newer run passes a
//! checkpoint an older run is still waiting at, the older run is cancelled
//! so production never regresses to a stale build.
//!
//! The ledger is a trait so runs can coordinate within one process
//! ([`MemoryLedger`]) or across processes through a shared file
//! ([`FileLedger`]).

pub mod approval;
pub mod cancel;
pub mod error;
pub mod gate;
pub mod ledger;

pub use approval::{
    ApprovalRequest, ApprovalSource, Approver, AutoApprove, ChannelApproval, Decision,
    PendingApproval, TerminalApproval,
};
pub use cancel::CancelToken;
pub use error::{GateError, GateResult};
pub use gate::{ApprovalGate, GateState};
pub use ledger::{Checkpoint, FileLedger, MemoryLedger, MilestoneLedger};
