//! ladder.toml configuration parser.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::types::Environment;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LadderConfig {
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub environments: EnvironmentsConfig,
    #[serde(default)]
    pub chart: ChartConfig,
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub build: BuildConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Artifact (application) name; the release id prefix.
    pub artifact: String,
    /// Only this branch may reach the approval gate.
    #[serde(default = "default_release_branch")]
    pub release_branch: String,
    /// Wall-clock bound for a whole run.
    #[serde(default = "default_run_timeout")]
    pub run_timeout: String,
    /// Pause after an install before anything probes it.
    #[serde(default = "default_settle")]
    pub settle: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentsConfig {
    #[serde(default = "default_development")]
    pub development: String,
    #[serde(default = "default_staging")]
    pub staging: String,
    #[serde(default = "default_production")]
    pub production: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartConfig {
    #[serde(default = "default_repo_name")]
    pub repo_name: String,
    /// When set, the repository is added before the index refresh.
    pub repo_url: Option<String>,
    /// Chart reference; defaults to `<repo_name>/<artifact>`.
    pub reference: Option<String>,
    pub version: Option<String>,
    /// Value overrides. `{release}`, `{branch}` and `{namespace}` expand.
    #[serde(default)]
    pub set: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    #[serde(default = "default_probe_port")]
    pub port: u16,
    #[serde(default = "default_probe_path")]
    pub path: String,
    #[serde(default = "default_five_seconds")]
    pub connect_timeout: String,
    #[serde(default = "default_five_seconds")]
    pub max_time: String,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_five_seconds")]
    pub retry_delay: String,
    #[serde(default = "default_retry_max_time")]
    pub retry_max_time: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Label key stamped on local test containers; the value is the release id.
    #[serde(default = "default_container_label")]
    pub container_label: String,
    /// Test-support images pulled before the build-and-test stage.
    #[serde(default)]
    pub test_images: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_kubectl")]
    pub kubectl: String,
    #[serde(default = "default_helm")]
    pub helm: String,
    #[serde(default = "default_docker")]
    pub docker: String,
    #[serde(default = "default_ip")]
    pub ip: String,
    pub kube_context: Option<String>,
}

impl LadderConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::parse(&content)?;
        Ok(config)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: LadderConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Scaffold a ladder.toml for an artifact with every default spelled out.
    pub fn scaffold(artifact: &str) -> Self {
        LadderConfig {
            pipeline: PipelineConfig {
                artifact: artifact.to_string(),
                release_branch: default_release_branch(),
                run_timeout: default_run_timeout(),
                settle: default_settle(),
            },
            environments: EnvironmentsConfig::default(),
            chart: ChartConfig {
                set: BTreeMap::from([("image.tag".to_string(), "{branch}".to_string())]),
                ..Default::default()
            },
            probe: ProbeConfig::default(),
            build: BuildConfig::default(),
            tools: ToolsConfig::default(),
        }
    }

    /// Check the fields serde cannot: non-empty artifact and parseable durations.
    pub fn validate(&self) -> CoreResult<()> {
        if self.pipeline.artifact.trim().is_empty() {
            return Err(CoreError::EmptyArtifact);
        }
        if self.pipeline.run_timeout()?.is_zero() {
            return Err(CoreError::InvalidConfig("pipeline.run_timeout must be positive".into()));
        }
        self.pipeline.settle()?;
        self.probe.connect_timeout()?;
        self.probe.max_time()?;
        self.probe.retry_delay()?;
        self.probe.retry_max_time()?;
        for env in Environment::ALL {
            if self.environments.namespace(env).trim().is_empty() {
                return Err(CoreError::InvalidConfig(format!("environments.{env} must not be empty")));
            }
        }
        Ok(())
    }
}

impl PipelineConfig {
    pub fn run_timeout(&self) -> CoreResult<Duration> {
        duration_field("pipeline.run_timeout", &self.run_timeout)
    }

    pub fn settle(&self) -> CoreResult<Duration> {
        duration_field("pipeline.settle", &self.settle)
    }
}

impl EnvironmentsConfig {
    /// Namespace backing an environment.
    pub fn namespace(&self, env: Environment) -> &str {
        match env {
            Environment::Development => &self.development,
            Environment::Staging => &self.staging,
            Environment::Production => &self.production,
        }
    }
}

impl ChartConfig {
    pub fn chart_reference(&self, artifact: &str) -> String {
        self.reference
            .clone()
            .unwrap_or_else(|| format!("{}/{}", self.repo_name, artifact))
    }

    /// Value overrides with placeholders expanded, in key order.
    pub fn render_values(&self, release: &str, branch: &str, namespace: &str) -> Vec<(String, String)> {
        self.set
            .iter()
            .map(|(k, v)| {
                let v = v
                    .replace("{release}", release)
                    .replace("{branch}", branch)
                    .replace("{namespace}", namespace);
                (k.clone(), v)
            })
            .collect()
    }
}

impl ProbeConfig {
    pub fn connect_timeout(&self) -> CoreResult<Duration> {
        duration_field("probe.connect_timeout", &self.connect_timeout)
    }

    pub fn max_time(&self) -> CoreResult<Duration> {
        duration_field("probe.max_time", &self.max_time)
    }

    pub fn retry_delay(&self) -> CoreResult<Duration> {
        duration_field("probe.retry_delay", &self.retry_delay)
    }

    pub fn retry_max_time(&self) -> CoreResult<Duration> {
        duration_field("probe.retry_max_time", &self.retry_max_time)
    }
}

impl Default for EnvironmentsConfig {
    fn default() -> Self {
        Self {
            development: default_development(),
            staging: default_staging(),
            production: default_production(),
        }
    }
}

impl Default for ChartConfig {
    fn default() -> Self {
        Self {
            repo_name: default_repo_name(),
            repo_url: None,
            reference: None,
            version: None,
            set: BTreeMap::new(),
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            port: default_probe_port(),
            path: default_probe_path(),
            connect_timeout: default_five_seconds(),
            max_time: default_five_seconds(),
            retries: default_retries(),
            retry_delay: default_five_seconds(),
            retry_max_time: default_retry_max_time(),
        }
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            container_label: default_container_label(),
            test_images: Vec::new(),
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            kubectl: default_kubectl(),
            helm: default_helm(),
            docker: default_docker(),
            ip: default_ip(),
            kube_context: None,
        }
    }
}

fn duration_field(field: &'static str, value: &str) -> CoreResult<Duration> {
    parse_duration(value).ok_or_else(|| CoreError::InvalidDuration {
        field,
        value: value.to_string(),
    })
}

/// Parse a duration string like "5s", "500ms", "2m". A bare number is seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok()?.checked_mul(60).map(Duration::from_secs)
    } else if let Some(hours) = s.strip_suffix('h') {
        hours.parse::<u64>().ok()?.checked_mul(3600).map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

fn default_release_branch() -> String {
    "master".to_string()
}
fn default_run_timeout() -> String {
    "60m".to_string()
}
fn default_settle() -> String {
    "5s".to_string()
}
fn default_development() -> String {
    Environment::Development.as_str().to_string()
}
fn default_staging() -> String {
    Environment::Staging.as_str().to_string()
}
fn default_production() -> String {
    Environment::Production.as_str().to_string()
}
fn default_repo_name() -> String {
    "charts".to_string()
}
fn default_probe_port() -> u16 {
    80
}
fn default_probe_path() -> String {
    "/".to_string()
}
fn default_five_seconds() -> String {
    "5s".to_string()
}
fn default_retries() -> u32 {
    5
}
fn default_retry_max_time() -> String {
    "30s".to_string()
}
fn default_container_label() -> String {
    "ladder.release".to_string()
}
fn default_kubectl() -> String {
    "kubectl".to_string()
}
fn default_helm() -> String {
    "helm".to_string()
}
fn default_docker() -> String {
    "docker".to_string()
}
fn default_ip() -> String {
    "ip".to_string()
}
