//! In-memory cluster: orchestrator, package manager and local host in one.
//!
//! Backs `ladder run --simulate` and every pipeline test. Each call is
//! recorded in order so callers can assert on sequencing, and individual
//! operations can be made to fail.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::backend::{ChartSpec, LocalEnvironment, Orchestrator, PackageManager, Repository, Service};
use crate::error::{LifecycleError, LifecycleResult};

/// Operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    Connectivity,
    CreateNamespace,
    DeleteRelease,
    RefreshRepository,
    Install,
    ListServices,
    PullImage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseStatus {
    Deployed,
    /// Last revision failed; a plain upgrade is refused until it is deleted.
    Failed,
}

#[derive(Debug, Clone)]
pub struct InstalledRelease {
    pub chart: ChartSpec,
    pub revision: u32,
    pub status: ReleaseStatus,
}

struct ClusterState {
    namespaces: BTreeSet<String>,
    releases: BTreeMap<(String, String), InstalledRelease>,
    services: BTreeMap<String, Vec<Service>>,
    containers: Vec<(String, String)>,
    pulled: Vec<String>,
    failures: HashSet<FailPoint>,
    calls: Vec<String>,
    service_address: Option<String>,
    service_port: u16,
    create_services: bool,
    route_address: String,
    next_ip: u8,
}

pub struct MemoryCluster {
    state: Mutex<ClusterState>,
}

impl Default for MemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ClusterState {
                namespaces: BTreeSet::from(["default".to_string()]),
                releases: BTreeMap::new(),
                services: BTreeMap::new(),
                containers: Vec::new(),
                pulled: Vec::new(),
                failures: HashSet::new(),
                calls: Vec::new(),
                service_address: None,
                service_port: 80,
                create_services: true,
                route_address: "172.17.0.1".to_string(),
                next_ip: 10,
            }),
        }
    }

    /// Services created by installs get this address and port instead of a
    /// synthetic cluster IP, so probes can reach a real listener.
    pub fn with_service_endpoint(mut self, address: impl Into<String>, port: u16) -> Self {
        let state = self.state.get_mut();
        state.service_address = Some(address.into());
        state.service_port = port;
        self
    }

    /// Installs succeed but never expose a service.
    pub fn without_services(mut self) -> Self {
        self.state.get_mut().create_services = false;
        self
    }

    pub fn with_namespace(mut self, name: &str) -> Self {
        self.state.get_mut().namespaces.insert(name.to_string());
        self
    }

    pub fn with_container(mut self, label_key: &str, label_value: &str) -> Self {
        self.state
            .get_mut()
            .containers
            .push((label_key.to_string(), label_value.to_string()));
        self
    }

    pub fn failing(mut self, point: FailPoint) -> Self {
        self.state.get_mut().failures.insert(point);
        self
    }

    pub async fn fail(&self, point: FailPoint) {
        self.state.lock().await.failures.insert(point);
    }

    /// Put an existing release into the failed state.
    pub async fn mark_failed(&self, namespace: &str, release: &str) {
        let mut state = self.state.lock().await;
        if let Some(r) = state.releases.get_mut(&(namespace.to_string(), release.to_string())) {
            r.status = ReleaseStatus::Failed;
        }
    }

    pub async fn has_namespace(&self, name: &str) -> bool {
        self.state.lock().await.namespaces.contains(name)
    }

    pub async fn release(&self, namespace: &str, release: &str) -> Option<InstalledRelease> {
        self.state
            .lock()
            .await
            .releases
            .get(&(namespace.to_string(), release.to_string()))
            .cloned()
    }

    pub async fn calls(&self) -> Vec<String> {
        self.state.lock().await.calls.clone()
    }

    pub async fn pulled_images(&self) -> Vec<String> {
        self.state.lock().await.pulled.clone()
    }

    pub async fn container_count(&self) -> usize {
        self.state.lock().await.containers.len()
    }
}

impl ClusterState {
    fn record(&mut self, call: String) {
        debug!(%call, "memory cluster");
        self.calls.push(call);
    }

    fn check(&self, point: FailPoint, command: &str) -> LifecycleResult<()> {
        if self.failures.contains(&point) {
            return Err(LifecycleError::CommandFailed {
                command: command.to_string(),
                code: 1,
                stderr: "injected failure".to_string(),
            });
        }
        Ok(())
    }

    fn allocate_ip(&mut self) -> String {
        if let Some(addr) = &self.service_address {
            return addr.clone();
        }
        let ip = format!("10.96.0.{}", self.next_ip);
        self.next_ip = self.next_ip.wrapping_add(1);
        ip
    }
}

#[async_trait]
impl Orchestrator for MemoryCluster {
    async fn check_connectivity(&self) -> LifecycleResult<()> {
        let mut state = self.state.lock().await;
        state.record("check_connectivity".to_string());
        if state.failures.contains(&FailPoint::Connectivity) {
            return Err(LifecycleError::Unreachable("injected failure".to_string()));
        }
        Ok(())
    }

    async fn namespace_exists(&self, name: &str) -> LifecycleResult<bool> {
        let mut state = self.state.lock().await;
        state.record(format!("namespace_exists {name}"));
        Ok(state.namespaces.contains(name))
    }

    async fn create_namespace(&self, name: &str) -> LifecycleResult<()> {
        let mut state = self.state.lock().await;
        let call = format!("create_namespace {name}");
        state.record(call.clone());
        state.check(FailPoint::CreateNamespace, &call)?;
        if !state.namespaces.insert(name.to_string()) {
            return Err(LifecycleError::CommandFailed {
                command: call,
                code: 1,
                stderr: format!("namespaces \"{name}\" already exists"),
            });
        }
        Ok(())
    }

    async fn list_services(&self, namespace: &str) -> LifecycleResult<Vec<Service>> {
        let mut state = self.state.lock().await;
        let call = format!("list_services {namespace}");
        state.record(call.clone());
        state.check(FailPoint::ListServices, &call)?;
        Ok(state.services.get(namespace).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl PackageManager for MemoryCluster {
    async fn list_releases(&self, namespace: &str, release: &str) -> LifecycleResult<Vec<String>> {
        let mut state = self.state.lock().await;
        state.record(format!("list_releases {namespace}/{release}"));
        let key = (namespace.to_string(), release.to_string());
        Ok(state.releases.contains_key(&key).then(|| release.to_string()).into_iter().collect())
    }

    async fn delete_release(&self, namespace: &str, release: &str) -> LifecycleResult<()> {
        let mut state = self.state.lock().await;
        let call = format!("delete_release {namespace}/{release}");
        state.record(call.clone());
        state.check(FailPoint::DeleteRelease, &call)?;
        if state
            .releases
            .remove(&(namespace.to_string(), release.to_string()))
            .is_none()
        {
            return Err(LifecycleError::CommandFailed {
                command: call,
                code: 1,
                stderr: format!("Error: uninstall: Release not loaded: {release}: release: not found"),
            });
        }
        if let Some(services) = state.services.get_mut(namespace) {
            services.retain(|s| !s.belongs_to(release));
        }
        Ok(())
    }

    async fn refresh_repository(&self, repo: &Repository) -> LifecycleResult<()> {
        let mut state = self.state.lock().await;
        let call = format!("refresh_repository {}", repo.name);
        state.record(call.clone());
        state.check(FailPoint::RefreshRepository, &call)
    }

    async fn upgrade_install(&self, namespace: &str, release: &str, chart: &ChartSpec) -> LifecycleResult<()> {
        let mut state = self.state.lock().await;
        let call = format!("upgrade_install {namespace}/{release}");
        state.record(call.clone());
        state.check(FailPoint::Install, &call)?;
        if !state.namespaces.contains(namespace) {
            return Err(LifecycleError::CommandFailed {
                command: call,
                code: 1,
                stderr: format!("namespaces \"{namespace}\" not found"),
            });
        }

        let key = (namespace.to_string(), release.to_string());
        let revision = match state.releases.get(&key) {
            Some(existing) if existing.status == ReleaseStatus::Failed => {
                return Err(LifecycleError::CommandFailed {
                    command: call,
                    code: 1,
                    stderr: format!("Error: UPGRADE FAILED: \"{release}\" has no deployed releases"),
                });
            }
            Some(existing) => existing.revision + 1,
            None => 1,
        };
        state.releases.insert(
            key,
            InstalledRelease {
                chart: chart.clone(),
                revision,
                status: ReleaseStatus::Deployed,
            },
        );

        let exists = state
            .services
            .get(namespace)
            .is_some_and(|services| services.iter().any(|s| s.belongs_to(release)));
        if state.create_services && !exists {
            let cluster_ip = state.allocate_ip();
            let port = state.service_port;
            state.services.entry(namespace.to_string()).or_default().push(Service {
                name: release.to_string(),
                labels: BTreeMap::from([("release".to_string(), release.to_string())]),
                cluster_ip: Some(cluster_ip),
                ports: vec![port],
            });
        }
        Ok(())
    }
}

#[async_trait]
impl LocalEnvironment for MemoryCluster {
    async fn remove_containers(&self, label_key: &str, label_value: &str) -> LifecycleResult<usize> {
        let mut state = self.state.lock().await;
        state.record(format!("remove_containers {label_key}={label_value}"));
        let before = state.containers.len();
        state
            .containers
            .retain(|(k, v)| !(k == label_key && v == label_value));
        Ok(before - state.containers.len())
    }

    async fn pull_image(&self, image: &str) -> LifecycleResult<()> {
        let mut state = self.state.lock().await;
        let call = format!("pull_image {image}");
        state.record(call.clone());
        state.check(FailPoint::PullImage, &call)?;
        state.pulled.push(image.to_string());
        Ok(())
    }

    async fn default_route_address(&self) -> LifecycleResult<String> {
        let mut state = self.state.lock().await;
        state.record("default_route_address".to_string());
        Ok(state.route_address.clone())
    }
}
