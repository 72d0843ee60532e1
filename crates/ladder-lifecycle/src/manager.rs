//! Lifecycle manager — idempotent namespace and release operations.
//!
//! Wraps an [`Orchestrator`] and a [`PackageManager`] with the rules the
//! pipeline depends on: namespaces are created only when absent, deleting
//! a release that was never installed is a no-op, and installs always
//! refresh the chart repository first.
//!
//! Mutating release operations are serialized per `(namespace, release)`
//! within the process, so two runs sharing a manager never race an install.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use crate::backend::{ChartSpec, Orchestrator, PackageManager, Repository};
use crate::error::LifecycleResult;

/// What `ensure_namespace` had to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamespaceAction {
    Existing,
    Created,
}

type ReleaseKey = (String, String);

pub struct LifecycleManager {
    orchestrator: Arc<dyn Orchestrator>,
    packages: Arc<dyn PackageManager>,
    repository: Repository,
    locks: Mutex<HashMap<ReleaseKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl LifecycleManager {
    pub fn new(
        orchestrator: Arc<dyn Orchestrator>,
        packages: Arc<dyn PackageManager>,
        repository: Repository,
    ) -> Self {
        Self {
            orchestrator,
            packages,
            repository,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn orchestrator(&self) -> &Arc<dyn Orchestrator> {
        &self.orchestrator
    }

    pub async fn check_connectivity(&self) -> LifecycleResult<()> {
        self.orchestrator.check_connectivity().await
    }

    /// Create `name` unless it already exists.
    pub async fn ensure_namespace(&self, name: &str) -> LifecycleResult<NamespaceAction> {
        if self.orchestrator.namespace_exists(name).await? {
            debug!(namespace = %name, "namespace already present");
            return Ok(NamespaceAction::Existing);
        }
        self.orchestrator.create_namespace(name).await?;
        info!(namespace = %name, "namespace created");
        Ok(NamespaceAction::Created)
    }

    /// Delete and purge `release` in `namespace` if it exists.
    ///
    /// Returns whether anything was deleted.
    pub async fn delete_release_if_present(&self, namespace: &str, release: &str) -> LifecycleResult<bool> {
        let lock = self.lock_for(namespace, release);
        let _guard = lock.lock().await;

        let found = self.packages.list_releases(namespace, release).await?;
        if !found.iter().any(|name| name == release) {
            debug!(%namespace, %release, "no release to delete");
            return Ok(false);
        }
        self.packages.delete_release(namespace, release).await?;
        info!(%namespace, %release, "release deleted");
        Ok(true)
    }

    /// Refresh the chart repository, then upgrade-or-install the release.
    ///
    /// The orchestrator applies asynchronously; callers wait out a settle
    /// interval before probing the result.
    pub async fn install_release(&self, namespace: &str, release: &str, chart: &ChartSpec) -> LifecycleResult<()> {
        let lock = self.lock_for(namespace, release);
        let _guard = lock.lock().await;

        self.packages.refresh_repository(&self.repository).await?;
        self.packages.upgrade_install(namespace, release, chart).await?;
        info!(%namespace, %release, chart = %chart.reference, "release installed");
        Ok(())
    }

    fn lock_for(&self, namespace: &str, release: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .entry((namespace.to_string(), release.to_string()))
            .or_default()
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{FailPoint, MemoryCluster};

    fn manager(cluster: Arc<MemoryCluster>) -> LifecycleManager {
        LifecycleManager::new(
            cluster.clone(),
            cluster,
            Repository {
                name: "charts".to_string(),
                url: None,
            },
        )
    }

    fn chart() -> ChartSpec {
        ChartSpec {
            reference: "charts/webapp".to_string(),
            version: None,
            values: Vec::new(),
        }
    }

    #[tokio::test]
    async fn ensure_namespace_is_idempotent() {
        let cluster = Arc::new(MemoryCluster::new());
        let mgr = manager(cluster.clone());

        assert_eq!(mgr.ensure_namespace("staging").await.unwrap(), NamespaceAction::Created);
        assert_eq!(mgr.ensure_namespace("staging").await.unwrap(), NamespaceAction::Existing);
        assert!(cluster.has_namespace("staging").await);
    }

    #[tokio::test]
    async fn ensure_namespace_creation_failure_is_fatal() {
        let cluster = Arc::new(MemoryCluster::new().failing(FailPoint::CreateNamespace));
        assert!(manager(cluster).ensure_namespace("staging").await.is_err());
    }

    #[tokio::test]
    async fn delete_absent_release_is_noop() {
        let cluster = Arc::new(MemoryCluster::new().with_namespace("development"));
        let mgr = manager(cluster.clone());

        assert!(!mgr.delete_release_if_present("development", "webapp-x").await.unwrap());
        assert!(
            !cluster
                .calls()
                .await
                .iter()
                .any(|c| c.starts_with("delete_release"))
        );
    }

    #[tokio::test]
    async fn delete_then_install_recovers_failed_release() {
        let cluster = Arc::new(MemoryCluster::new().with_namespace("staging"));
        let mgr = manager(cluster.clone());

        mgr.install_release("staging", "webapp-master", &chart()).await.unwrap();
        cluster.mark_failed("staging", "webapp-master").await;

        assert!(mgr.delete_release_if_present("staging", "webapp-master").await.unwrap());
        mgr.install_release("staging", "webapp-master", &chart()).await.unwrap();

        let release = cluster.release("staging", "webapp-master").await.unwrap();
        assert_eq!(release.revision, 1);
    }

    #[tokio::test]
    async fn install_refreshes_repository_first() {
        let cluster = Arc::new(MemoryCluster::new().with_namespace("production"));
        let mgr = manager(cluster.clone());

        mgr.install_release("production", "webapp-master", &chart()).await.unwrap();
        assert_eq!(
            cluster.calls().await,
            vec!["refresh_repository charts", "upgrade_install production/webapp-master"]
        );
    }

    #[tokio::test]
    async fn install_failure_is_fatal() {
        let cluster = Arc::new(
            MemoryCluster::new()
                .with_namespace("production")
                .failing(FailPoint::Install),
        );
        assert!(
            manager(cluster)
                .install_release("production", "webapp-master", &chart())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn concurrent_installs_of_one_release_serialize() {
        let cluster = Arc::new(MemoryCluster::new().with_namespace("staging"));
        let mgr = Arc::new(manager(cluster.clone()));

        let a = {
            let mgr = mgr.clone();
            tokio::spawn(async move { mgr.install_release("staging", "webapp-master", &chart()).await })
        };
        let b = {
            let mgr = mgr.clone();
            tokio::spawn(async move { mgr.install_release("staging", "webapp-master", &chart()).await })
        };
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        // Each refresh is immediately followed by its own install.
        let calls = cluster.calls().await;
        assert_eq!(calls.len(), 4);
        for pair in calls.chunks(2) {
            assert_eq!(pair[0], "refresh_repository charts");
            assert_eq!(pair[1], "upgrade_install staging/webapp-master");
        }
        assert_eq!(cluster.release("staging", "webapp-master").await.unwrap().revision, 2);
    }
}
