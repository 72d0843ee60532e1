//! Backend seams: the orchestrator, the package manager, and the local host.

use std::collections::BTreeMap;

use async_trait::async_trait;
use ladder_core::config::ChartConfig;
use serde::{Deserialize, Serialize};

use crate::error::LifecycleResult;

/// A service as listed by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    /// Cluster-internal address; `None` for headless services.
    pub cluster_ip: Option<String>,
    pub ports: Vec<u16>,
}

impl Service {
    /// Whether this service fronts the given release.
    ///
    /// Charts label their services with the release name under either the
    /// legacy `release` key or `app.kubernetes.io/instance`. Unlabelled
    /// services match on a name prefix.
    pub fn belongs_to(&self, release: &str) -> bool {
        let labelled = ["release", "app.kubernetes.io/instance"]
            .iter()
            .any(|key| self.labels.get(*key).is_some_and(|v| v == release));
        labelled || self.name == release || self.name.starts_with(&format!("{release}-"))
    }
}

/// What to install for a release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartSpec {
    /// Chart reference, e.g. `charts/webapp`.
    pub reference: String,
    pub version: Option<String>,
    /// `--set` overrides, in application order.
    pub values: Vec<(String, String)>,
}

/// The chart repository refreshed before every install.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Repository {
    pub name: String,
    /// Added (or re-pointed) before the refresh when present.
    pub url: Option<String>,
}

impl Repository {
    pub fn from_config(chart: &ChartConfig) -> Self {
        Self {
            name: chart.repo_name.clone(),
            url: chart.repo_url.clone(),
        }
    }
}

/// Cluster orchestrator operations.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Fails with `Unreachable` when the backend cannot be contacted.
    async fn check_connectivity(&self) -> LifecycleResult<()>;
    async fn namespace_exists(&self, name: &str) -> LifecycleResult<bool>;
    async fn create_namespace(&self, name: &str) -> LifecycleResult<()>;
    async fn list_services(&self, namespace: &str) -> LifecycleResult<Vec<Service>>;
}

/// Package-lifecycle operations.
#[async_trait]
pub trait PackageManager: Send + Sync {
    /// Names of releases in `namespace` exactly matching `release`,
    /// including failed and pending ones.
    async fn list_releases(&self, namespace: &str, release: &str) -> LifecycleResult<Vec<String>>;
    /// Delete and purge a release.
    async fn delete_release(&self, namespace: &str, release: &str) -> LifecycleResult<()>;
    /// Add (when a URL is known) and refresh the repository index.
    async fn refresh_repository(&self, repo: &Repository) -> LifecycleResult<()>;
    async fn upgrade_install(&self, namespace: &str, release: &str, chart: &ChartSpec) -> LifecycleResult<()>;
}

/// The machine the pipeline runs on, used by the build-and-test stage.
#[async_trait]
pub trait LocalEnvironment: Send + Sync {
    /// Remove containers carrying `key=value`; returns how many were removed.
    async fn remove_containers(&self, label_key: &str, label_value: &str) -> LifecycleResult<usize>;
    async fn pull_image(&self, image: &str) -> LifecycleResult<()>;
    /// Address of the default route's gateway, reachable from test containers.
    async fn default_route_address(&self) -> LifecycleResult<String>;
}
