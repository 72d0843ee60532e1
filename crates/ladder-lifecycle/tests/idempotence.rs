//! Idempotence of the lifecycle operations the pipeline repeats every run.

use std::sync::Arc;

use ladder_lifecycle::*;

fn setup() -> (Arc<MemoryCluster>, LifecycleManager) {
    let cluster = Arc::new(MemoryCluster::new());
    let manager = LifecycleManager::new(
        cluster.clone(),
        cluster.clone(),
        Repository {
            name: "charts".to_string(),
            url: Some("https://charts.example.com".to_string()),
        },
    );
    (cluster, manager)
}

fn chart() -> ChartSpec {
    ChartSpec {
        reference: "charts/webapp".to_string(),
        version: Some("2.1.0".to_string()),
        values: vec![("image.tag".to_string(), "feature-x".to_string())],
    }
}

#[tokio::test]
async fn repeated_scratch_deploys_never_conflict() {
    let (cluster, manager) = setup();

    for _ in 0..3 {
        manager.ensure_namespace("development").await.unwrap();
        manager
            .delete_release_if_present("development", "webapp-feature-x")
            .await
            .unwrap();
        manager
            .install_release("development", "webapp-feature-x", &chart())
            .await
            .unwrap();
    }

    // Every install started from a clean slate.
    let release = cluster.release("development", "webapp-feature-x").await.unwrap();
    assert_eq!(release.revision, 1);
    assert_eq!(release.chart.version.as_deref(), Some("2.1.0"));

    let creates = cluster
        .calls()
        .await
        .iter()
        .filter(|c| c.starts_with("create_namespace"))
        .count();
    assert_eq!(creates, 1);
}

#[tokio::test]
async fn teardown_twice_is_harmless() {
    let (cluster, manager) = setup();
    manager.ensure_namespace("staging").await.unwrap();
    manager
        .install_release("staging", "webapp-master", &chart())
        .await
        .unwrap();

    assert!(manager.delete_release_if_present("staging", "webapp-master").await.unwrap());
    assert!(!manager.delete_release_if_present("staging", "webapp-master").await.unwrap());
    assert!(cluster.release("staging", "webapp-master").await.is_none());
}
