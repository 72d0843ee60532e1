//! Run report — what happened, stage by stage.

use std::fmt::Write as _;
use std::time::Duration;

use ladder_core::Metric;
use ladder_probe::Measurement;
use serde::Serialize;

use crate::stage::{Stage, StageStatus};

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    Succeeded,
    Failed { stage: Stage, error: String },
    /// Superseded by a newer run or stopped from outside.
    Cancelled { stage: Stage, reason: String },
    /// The operator declined production promotion.
    Rejected { reason: String },
    TimedOut { stage: Option<Stage>, after_secs: u64 },
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Succeeded)
    }

    /// Process exit status for this outcome.
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Succeeded => 0,
            RunOutcome::Failed { .. } | RunOutcome::TimedOut { .. } => 1,
            RunOutcome::Rejected { .. } => 2,
            RunOutcome::Cancelled { .. } => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageRecord {
    pub stage: Stage,
    pub status: StageStatus,
    pub detail: String,
    pub elapsed_ms: u64,
}

/// One fan-out branch of production verification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeRecord {
    pub metric: Metric,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub measurement: Option<Measurement>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProbeRecord {
    pub fn measured(measurement: Measurement) -> Self {
        Self {
            metric: measurement.metric,
            passed: measurement.passed(),
            measurement: Some(measurement),
            error: None,
        }
    }

    pub fn errored(metric: Metric, error: String) -> Self {
        Self {
            metric,
            passed: false,
            measurement: None,
            error: Some(error),
        }
    }

    /// Observed value, or the error when nothing was observed.
    pub fn observed(&self) -> String {
        match (&self.measurement, &self.error) {
            (Some(m), _) => m.value(),
            (None, Some(e)) => e.clone(),
            (None, None) => "-".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub release_id: Option<String>,
    pub branch: String,
    pub ordinal: u64,
    pub deploy_prod: bool,
    pub stages: Vec<StageRecord>,
    pub probes: Vec<ProbeRecord>,
    pub outcome: RunOutcome,
    pub elapsed_ms: u64,
    #[serde(skip)]
    in_progress: Option<Stage>,
}

impl RunReport {
    pub(crate) fn new(branch: &str) -> Self {
        Self {
            release_id: None,
            branch: branch.to_string(),
            ordinal: 0,
            deploy_prod: false,
            stages: Vec::new(),
            probes: Vec::new(),
            outcome: RunOutcome::Succeeded,
            elapsed_ms: 0,
            in_progress: None,
        }
    }

    pub(crate) fn begin(&mut self, stage: Stage) {
        self.in_progress = Some(stage);
    }

    pub(crate) fn record(&mut self, stage: Stage, status: StageStatus, detail: impl Into<String>, elapsed: Duration) {
        self.in_progress = None;
        self.stages.push(StageRecord {
            stage,
            status,
            detail: detail.into(),
            elapsed_ms: elapsed.as_millis() as u64,
        });
    }

    /// The stage that had started but not finished.
    pub(crate) fn in_progress(&self) -> Option<Stage> {
        self.in_progress
    }

    pub fn stage(&self, stage: Stage) -> Option<&StageRecord> {
        self.stages.iter().find(|r| r.stage == stage)
    }

    pub fn status_of(&self, stage: Stage) -> Option<StageStatus> {
        self.stage(stage).map(|r| r.status)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Human-readable summary, one line per stage and probe.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let release = self.release_id.as_deref().unwrap_or("-");
        let _ = writeln!(out, "release {release} (branch {}, run #{})", self.branch, self.ordinal);
        for r in &self.stages {
            let _ = writeln!(
                out,
                "  {:>2}. {:<20} {:<9} {:>7}ms  {}",
                r.stage.number(),
                r.stage.as_str(),
                r.status.to_string(),
                r.elapsed_ms,
                r.detail
            );
        }
        if !self.probes.is_empty() {
            let _ = writeln!(out, "verification:");
            for p in &self.probes {
                let _ = writeln!(
                    out,
                    "      {:<14} {:<4} {}",
                    p.metric.as_str(),
                    if p.passed { "PASS" } else { "FAIL" },
                    p.observed()
                );
            }
        }
        let outcome = match &self.outcome {
            RunOutcome::Succeeded => "succeeded".to_string(),
            RunOutcome::Failed { stage, error } => format!("failed at {stage}: {error}"),
            RunOutcome::Cancelled { stage, reason } => format!("cancelled at {stage}: {reason}"),
            RunOutcome::Rejected { reason } => format!("rejected: {reason}"),
            RunOutcome::TimedOut { stage, after_secs } => match stage {
                Some(stage) => format!("timed out after {after_secs}s in {stage}"),
                None => format!("timed out after {after_secs}s"),
            },
        };
        let _ = writeln!(out, "outcome: {outcome} ({}ms)", self.elapsed_ms);
        out
    }
}
