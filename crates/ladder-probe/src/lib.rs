//! ladder-probe — post-deploy verification for Ladder.
//!
//! Resolves the address of a release's service through the orchestrator
//! and measures one HTTP metric against it: status code, total time, or
//! downloaded size. Each probe carries its own retry budget.

pub mod address;
pub mod error;
pub mod prober;

pub use address::{probe_url, resolve_service_address};
pub use error::{ProbeError, ProbeResult};
pub use prober::{Measurement, ProbeSettings, Prober};
