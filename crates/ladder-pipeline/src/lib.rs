//! ladder-pipeline — the deployment pipeline controller.
//!
//! A [`Pipeline`] promotes one artifact through development, staging and
//! production. Each run gets its own [`RunContext`]; the outcome and a
//! per-stage record come back as a [`RunReport`].

pub mod context;
pub mod controller;
pub mod error;
pub mod report;
pub mod stage;

pub use context::{RunContext, RunRequest};
pub use controller::Pipeline;
pub use error::{PipelineError, PipelineResult};
pub use report::{ProbeRecord, RunOutcome, RunReport, StageRecord};
pub use stage::{Stage, StageStatus};
