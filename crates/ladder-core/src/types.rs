//! Shared types used across Ladder crates.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{CoreError, CoreResult};

/// Maximum release name length accepted by the package manager.
pub const MAX_RELEASE_ID_LEN: usize = 53;

/// Hex characters of the digest kept when a release id is shortened.
const DIGEST_SUFFIX_LEN: usize = 8;

/// A target environment. The set and its order are fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl Environment {
    /// Promotion order.
    pub const ALL: [Environment; 3] = [
        Environment::Development,
        Environment::Staging,
        Environment::Production,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }

    /// Scratch environments are torn down after every deploy and always
    /// get a delete before install.
    pub fn is_scratch(&self) -> bool {
        !matches!(self, Environment::Production)
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The value a verification probe extracts from one HTTP exchange.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    #[default]
    StatusCode,
    TotalTime,
    SizeDownload,
}

impl Metric {
    /// Every metric, in the order production verification reports them.
    pub const ALL: [Metric; 3] = [Metric::StatusCode, Metric::TotalTime, Metric::SizeDownload];

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::StatusCode => "status_code",
            Metric::TotalTime => "total_time",
            Metric::SizeDownload => "size_download",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" | "status_code" => Ok(Metric::StatusCode),
            "total_time" => Ok(Metric::TotalTime),
            "size_download" => Ok(Metric::SizeDownload),
            other => Err(CoreError::UnknownMetric(other.to_string())),
        }
    }
}

/// Replace every character that is not ASCII alphanumeric or `-` with `-`
/// and lowercase the rest.
///
/// `feature/login*v2` becomes `feature-login-v2`.
pub fn sanitize_branch(branch: &str) -> String {
    branch
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect()
}

/// Identity of a release in every environment it is promoted through.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReleaseId(String);

impl ReleaseId {
    /// Derive the release id for an artifact built from a branch.
    ///
    /// The result is `<artifact>-<sanitized branch>` with separators trimmed
    /// from both ends of each part, so it always starts and ends with an
    /// alphanumeric. Ids longer than [`MAX_RELEASE_ID_LEN`] keep a prefix and
    /// gain a short digest of the full id, so two long branches never
    /// collapse onto one release.
    pub fn derive(artifact: &str, branch: &str) -> CoreResult<Self> {
        let artifact = sanitize_branch(artifact);
        let artifact = artifact.trim_matches('-');
        if artifact.is_empty() {
            return Err(CoreError::EmptyArtifact);
        }
        let branch = sanitize_branch(branch);
        let branch = branch.trim_matches('-');
        if branch.is_empty() {
            return Err(CoreError::EmptyBranch);
        }

        let full = format!("{artifact}-{branch}");
        if full.len() <= MAX_RELEASE_ID_LEN {
            return Ok(Self(full));
        }

        let digest = hex::encode(Sha256::digest(full.as_bytes()));
        let keep = MAX_RELEASE_ID_LEN - DIGEST_SUFFIX_LEN - 1;
        let prefix = full[..keep].trim_end_matches('-');
        Ok(Self(format!("{prefix}-{}", &digest[..DIGEST_SUFFIX_LEN])))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReleaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ReleaseId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
