//! The fixed stage sequence.

use std::fmt;

use ladder_core::Environment;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Setup,
    BuildAndTest,
    DeployDevelopment,
    CleanupDevelopment,
    DeployStaging,
    CleanupStaging,
    ProductionGate,
    DeployProduction,
    VerifyProduction,
}

impl Stage {
    /// Execution order.
    pub const ALL: [Stage; 9] = [
        Stage::Setup,
        Stage::BuildAndTest,
        Stage::DeployDevelopment,
        Stage::CleanupDevelopment,
        Stage::DeployStaging,
        Stage::CleanupStaging,
        Stage::ProductionGate,
        Stage::DeployProduction,
        Stage::VerifyProduction,
    ];

    /// 1-based position in the sequence.
    pub fn number(&self) -> usize {
        *self as usize + 1
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Setup => "setup",
            Stage::BuildAndTest => "build-and-test",
            Stage::DeployDevelopment => "deploy-development",
            Stage::CleanupDevelopment => "cleanup-development",
            Stage::DeployStaging => "deploy-staging",
            Stage::CleanupStaging => "cleanup-staging",
            Stage::ProductionGate => "production-gate",
            Stage::DeployProduction => "deploy-production",
            Stage::VerifyProduction => "verify-production",
        }
    }

    /// The environment a deploy or cleanup stage acts on.
    pub fn environment(&self) -> Option<Environment> {
        match self {
            Stage::DeployDevelopment | Stage::CleanupDevelopment => Some(Environment::Development),
            Stage::DeployStaging | Stage::CleanupStaging => Some(Environment::Staging),
            Stage::DeployProduction | Stage::VerifyProduction => Some(Environment::Production),
            Stage::Setup | Stage::BuildAndTest | Stage::ProductionGate => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Passed,
    Skipped,
    Failed,
    Cancelled,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StageStatus::Passed => "PASS",
            StageStatus::Skipped => "SKIP",
            StageStatus::Failed => "FAIL",
            StageStatus::Cancelled => "CANCELLED",
        })
    }
}
