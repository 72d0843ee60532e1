//! End-to-end runs against the in-memory cluster and a local HTTP listener.

use std::sync::Arc;
use std::time::Duration;

use ladder_core::{LadderConfig, Metric};
use ladder_gate::{
    ApprovalGate, ApprovalSource, Approver, AutoApprove, CancelToken, ChannelApproval, MemoryLedger,
};
use ladder_lifecycle::{ChartSpec, FailPoint, LifecycleManager, MemoryCluster, PackageManager, Repository};
use ladder_pipeline::{Pipeline, RunOutcome, RunReport, RunRequest, Stage, StageStatus};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Answer every request with `status` and `body`.
async fn serve(status: u16, body: &'static str) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let reply = format!(
                    "HTTP/1.1 {status} X\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(reply.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    port
}

fn config(port: u16, run_timeout: &str) -> LadderConfig {
    LadderConfig::parse(&format!(
        r#"
[pipeline]
artifact = "webapp"
run_timeout = "{run_timeout}"
settle = "0s"

[chart]
set = {{ "image.tag" = "{{branch}}" }}

[probe]
port = {port}
path = "/healthz"
connect_timeout = "500ms"
max_time = "500ms"
retries = 2
retry_delay = "10ms"
retry_max_time = "2s"

[build]
test_images = ["postgres:16", "redis:7"]
"#
    ))
    .unwrap()
}

struct Harness {
    cluster: Arc<MemoryCluster>,
    pipeline: Arc<Pipeline>,
}

fn harness(cluster: MemoryCluster, config: LadderConfig, approvals: Arc<dyn ApprovalSource>) -> Harness {
    let cluster = Arc::new(cluster);
    let lifecycle = Arc::new(LifecycleManager::new(
        cluster.clone(),
        cluster.clone(),
        Repository {
            name: "charts".to_string(),
            url: None,
        },
    ));
    let gate = Arc::new(ApprovalGate::new(Arc::new(MemoryLedger::new()), approvals));
    let pipeline = Pipeline::new(config, lifecycle, cluster.clone(), gate).unwrap();
    Harness {
        cluster,
        pipeline: Arc::new(pipeline),
    }
}

async fn with_channel(status: u16) -> (Harness, Approver) {
    let port = serve(status, "hello").await;
    let (source, approver) = ChannelApproval::pair();
    let h = harness(
        MemoryCluster::new().with_service_endpoint("127.0.0.1", port),
        config(port, "60m"),
        Arc::new(source),
    );
    (h, approver)
}

fn spawn_run(h: &Harness, request: RunRequest, cancel: CancelToken) -> tokio::task::JoinHandle<RunReport> {
    let pipeline = h.pipeline.clone();
    tokio::spawn(async move { pipeline.run(request, cancel).await })
}

fn statuses(report: &RunReport) -> Vec<(Stage, StageStatus)> {
    report.stages.iter().map(|r| (r.stage, r.status)).collect()
}

#[tokio::test]
async fn master_run_blocks_at_gate_then_promotes() {
    let (h, mut approver) = with_channel(200).await;
    let run = spawn_run(&h, RunRequest::new("master"), CancelToken::new());

    let pending = approver.next().await.unwrap();
    assert_eq!(pending.request.pipeline, "webapp-master");
    assert_eq!(pending.request.ordinal, 1);
    // Scratch environments are done and production untouched while blocked.
    assert!(h.cluster.release("development", "webapp-master").await.is_none());
    assert!(h.cluster.release("staging", "webapp-master").await.is_none());
    assert!(h.cluster.release("production", "webapp-master").await.is_none());
    assert!(pending.approve("alice"));

    let report = run.await.unwrap();
    assert_eq!(report.outcome, RunOutcome::Succeeded);
    assert!(report.deploy_prod);
    assert!(
        statuses(&report)
            .iter()
            .all(|(_, status)| *status == StageStatus::Passed)
    );
    assert_eq!(report.stages.len(), 9);
    assert_eq!(report.probes.len(), 3);
    assert!(report.probes.iter().all(|p| p.passed));
    assert_eq!(report.probes[0].observed(), "200");
    assert_eq!(report.probes[2].observed(), "5");

    let prod = h.cluster.release("production", "webapp-master").await.unwrap();
    assert_eq!(prod.chart.reference, "charts/webapp");
    assert_eq!(prod.chart.values, vec![("image.tag".to_string(), "master".to_string())]);
}

#[tokio::test]
async fn scratch_environments_are_deployed_then_torn_down_in_order() {
    let port = serve(200, "ok").await;
    let h = harness(
        MemoryCluster::new().with_service_endpoint("127.0.0.1", port),
        config(port, "60m"),
        Arc::new(AutoApprove),
    );
    let report = h.pipeline.run(RunRequest::new("master"), CancelToken::new()).await;
    assert_eq!(report.outcome, RunOutcome::Succeeded);

    let calls = h.cluster.calls().await;
    let position = |call: &str| {
        calls
            .iter()
            .position(|c| c == call)
            .unwrap_or_else(|| panic!("missing call {call}: {calls:?}"))
    };
    assert!(position("create_namespace development") < position("upgrade_install development/webapp-master"));
    assert!(position("upgrade_install development/webapp-master") < position("delete_release development/webapp-master"));
    assert!(position("delete_release development/webapp-master") < position("create_namespace staging"));
    assert!(position("delete_release staging/webapp-master") < position("upgrade_install production/webapp-master"));
    // Production is upgraded in place, never deleted.
    assert!(!calls.iter().any(|c| c == "delete_release production/webapp-master"));
}

#[tokio::test]
async fn feature_branch_skips_gate_and_production() {
    let port = serve(200, "ok").await;
    let (source, approver) = ChannelApproval::pair();
    // Any approval request would now fail the run.
    drop(approver);
    let h = harness(
        MemoryCluster::new().with_service_endpoint("127.0.0.1", port),
        config(port, "60m"),
        Arc::new(source),
    );

    let report = h.pipeline.run(RunRequest::new("feature/x"), CancelToken::new()).await;
    assert_eq!(report.outcome, RunOutcome::Succeeded);
    assert_eq!(report.release_id.as_deref(), Some("webapp-feature-x"));
    assert!(!report.deploy_prod);
    assert_eq!(report.status_of(Stage::DeployStaging), Some(StageStatus::Passed));
    assert_eq!(report.status_of(Stage::ProductionGate), Some(StageStatus::Skipped));
    assert_eq!(report.status_of(Stage::DeployProduction), Some(StageStatus::Skipped));
    assert_eq!(report.status_of(Stage::VerifyProduction), Some(StageStatus::Skipped));
    assert!(report.probes.is_empty());
    assert!(!h.cluster.has_namespace("production").await);
}

#[tokio::test]
async fn release_branch_match_is_case_sensitive() {
    let port = serve(200, "ok").await;
    let (source, approver) = ChannelApproval::pair();
    drop(approver);
    let h = harness(
        MemoryCluster::new().with_service_endpoint("127.0.0.1", port),
        config(port, "60m"),
        Arc::new(source),
    );

    let report = h.pipeline.run(RunRequest::new("MASTER"), CancelToken::new()).await;
    assert_eq!(report.outcome, RunOutcome::Succeeded);
    assert_eq!(report.status_of(Stage::ProductionGate), Some(StageStatus::Skipped));
    assert_eq!(report.status_of(Stage::DeployProduction), Some(StageStatus::Skipped));
    assert!(!h.cluster.has_namespace("production").await);
}

#[tokio::test]
async fn auto_promotion_deploys_any_branch_without_gate() {
    let port = serve(200, "ok").await;
    let (source, approver) = ChannelApproval::pair();
    drop(approver);
    let h = harness(
        MemoryCluster::new().with_service_endpoint("127.0.0.1", port),
        config(port, "60m"),
        Arc::new(source),
    );

    for branch in ["master", "feature/x"] {
        let report = h
            .pipeline
            .run(RunRequest::new(branch).deploy_to_prod(true), CancelToken::new())
            .await;
        assert_eq!(report.outcome, RunOutcome::Succeeded, "{branch}");
        assert!(report.deploy_prod);
        assert_eq!(report.status_of(Stage::ProductionGate), Some(StageStatus::Skipped));
        assert_eq!(report.status_of(Stage::DeployProduction), Some(StageStatus::Passed));
        assert_eq!(report.probes.len(), 3);
    }
    assert!(h.cluster.release("production", "webapp-feature-x").await.is_some());
}

#[tokio::test]
async fn failing_probe_still_runs_the_others() {
    let port = serve(404, "gone").await;
    let h = harness(
        MemoryCluster::new().with_service_endpoint("127.0.0.1", port),
        config(port, "60m"),
        Arc::new(AutoApprove),
    );

    let report = h.pipeline.run(RunRequest::new("master"), CancelToken::new()).await;
    assert!(matches!(
        report.outcome,
        RunOutcome::Failed {
            stage: Stage::VerifyProduction,
            ..
        }
    ));
    assert_eq!(report.outcome.exit_code(), 1);
    assert_eq!(report.probes.len(), 3);
    let passed: Vec<bool> = report.probes.iter().map(|p| p.passed).collect();
    assert_eq!(passed, vec![false, true, true]);
}

#[tokio::test]
async fn unreachable_service_fails_every_probe() {
    let closed = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let h = harness(
        MemoryCluster::new().with_service_endpoint("127.0.0.1", closed),
        config(closed, "60m"),
        Arc::new(AutoApprove),
    );

    let report = h.pipeline.run(RunRequest::new("master"), CancelToken::new()).await;
    assert_eq!(report.status_of(Stage::VerifyProduction), Some(StageStatus::Failed));
    assert_eq!(report.probes.len(), 3);
    assert!(report.probes.iter().all(|p| !p.passed && p.error.is_some()));
}

#[tokio::test]
async fn missing_service_fails_verification() {
    let h = harness(
        MemoryCluster::new().without_services(),
        config(80, "60m"),
        Arc::new(AutoApprove),
    );
    let report = h.pipeline.run(RunRequest::new("master"), CancelToken::new()).await;
    match &report.outcome {
        RunOutcome::Failed { stage, error } => {
            assert_eq!(*stage, Stage::VerifyProduction);
            assert!(error.contains("no service"), "{error}");
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    let metrics: Vec<Metric> = report.probes.iter().map(|p| p.metric).collect();
    assert_eq!(metrics, Metric::ALL.to_vec());
    for probe in &report.probes {
        assert!(!probe.passed);
        assert!(probe.error.as_deref().is_some_and(|e| e.contains("no service")), "{probe:?}");
    }
}

#[tokio::test]
async fn newer_master_run_cancels_blocked_older_run() {
    let (h, mut approver) = with_channel(200).await;

    let a_cancel = CancelToken::new();
    let run_a = spawn_run(&h, RunRequest::new("master"), a_cancel.clone());
    let pending_a = approver.next().await.unwrap();

    let run_b = spawn_run(&h, RunRequest::new("master"), CancelToken::new());
    let pending_b = approver.next().await.unwrap();
    assert!(pending_b.request.ordinal > pending_a.request.ordinal);

    let report_a = tokio::time::timeout(Duration::from_secs(5), run_a)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(
        report_a.outcome,
        RunOutcome::Cancelled {
            stage: Stage::ProductionGate,
            ..
        }
    ));
    assert_eq!(report_a.outcome.exit_code(), 3);
    assert!(a_cancel.is_cancelled());
    assert!(!report_a.deploy_prod);
    assert!(report_a.stage(Stage::DeployProduction).is_none());
    assert!(h.cluster.release("production", "webapp-master").await.is_none());
    assert!(!pending_a.approve("alice"));

    assert!(pending_b.approve("alice"));
    let report_b = run_b.await.unwrap();
    assert_eq!(report_b.outcome, RunOutcome::Succeeded);
    assert_eq!(h.cluster.release("production", "webapp-master").await.unwrap().revision, 1);
}

#[tokio::test]
async fn rejection_ends_run_without_production() {
    let (h, mut approver) = with_channel(200).await;
    let run = spawn_run(&h, RunRequest::new("master"), CancelToken::new());
    assert!(approver.next().await.unwrap().reject("freeze"));

    let report = run.await.unwrap();
    assert_eq!(
        report.outcome,
        RunOutcome::Rejected {
            reason: "freeze".to_string()
        }
    );
    assert_ne!(report.outcome.exit_code(), 0);
    assert!(report.stage(Stage::DeployProduction).is_none());
    assert!(h.cluster.release("production", "webapp-master").await.is_none());
}

#[tokio::test]
async fn external_cancel_while_blocked_at_gate() {
    let (h, mut approver) = with_channel(200).await;
    let cancel = CancelToken::new();
    let run = spawn_run(&h, RunRequest::new("master"), cancel.clone());
    let _pending = approver.next().await.unwrap();

    cancel.cancel();
    let report = run.await.unwrap();
    assert!(matches!(report.outcome, RunOutcome::Cancelled { .. }));
    assert_eq!(report.status_of(Stage::ProductionGate), Some(StageStatus::Cancelled));
}

#[tokio::test]
async fn run_timeout_aborts_a_blocked_run() {
    let port = serve(200, "ok").await;
    let (source, mut approver) = ChannelApproval::pair();
    let h = harness(
        MemoryCluster::new().with_service_endpoint("127.0.0.1", port),
        config(port, "300ms"),
        Arc::new(source),
    );

    let run = spawn_run(&h, RunRequest::new("master"), CancelToken::new());
    let _pending = approver.next().await.unwrap();

    let report = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(
        report.outcome,
        RunOutcome::TimedOut {
            stage: Some(Stage::ProductionGate),
            ..
        }
    ));
    assert_eq!(report.status_of(Stage::ProductionGate), Some(StageStatus::Failed));
    assert!(h.cluster.release("production", "webapp-master").await.is_none());
}

#[tokio::test]
async fn unreachable_backend_fails_setup() {
    let h = harness(
        MemoryCluster::new().failing(FailPoint::Connectivity),
        config(80, "60m"),
        Arc::new(AutoApprove),
    );
    let report = h.pipeline.run(RunRequest::new("master"), CancelToken::new()).await;
    assert!(matches!(report.outcome, RunOutcome::Failed { stage: Stage::Setup, .. }));
    assert_eq!(report.stages.len(), 1);
    assert_eq!(h.cluster.calls().await, vec!["check_connectivity"]);
}

#[tokio::test]
async fn install_failure_stops_at_development() {
    let h = harness(
        MemoryCluster::new().failing(FailPoint::Install),
        config(80, "60m"),
        Arc::new(AutoApprove),
    );
    let report = h.pipeline.run(RunRequest::new("master"), CancelToken::new()).await;
    assert!(matches!(
        report.outcome,
        RunOutcome::Failed {
            stage: Stage::DeployDevelopment,
            ..
        }
    ));
    assert!(report.stage(Stage::DeployStaging).is_none());
}

#[tokio::test]
async fn failed_scratch_release_is_replaced() {
    let port = serve(200, "ok").await;
    let cluster = MemoryCluster::new()
        .with_service_endpoint("127.0.0.1", port)
        .with_namespace("development");
    let chart = ChartSpec {
        reference: "charts/webapp".to_string(),
        version: None,
        values: Vec::new(),
    };
    cluster.upgrade_install("development", "webapp-feature-x", &chart).await.unwrap();
    cluster.mark_failed("development", "webapp-feature-x").await;

    let h = harness(cluster, config(port, "60m"), Arc::new(AutoApprove));
    let report = h.pipeline.run(RunRequest::new("feature/x"), CancelToken::new()).await;
    assert_eq!(report.outcome, RunOutcome::Succeeded);
    let deploy = report.stage(Stage::DeployDevelopment).unwrap();
    assert!(deploy.detail.starts_with("reinstalled"), "{}", deploy.detail);
}

#[tokio::test]
async fn build_stage_clears_stale_containers_and_pulls_images() {
    let port = serve(200, "ok").await;
    let cluster = MemoryCluster::new()
        .with_service_endpoint("127.0.0.1", port)
        .with_container("ladder.release", "webapp-master")
        .with_container("ladder.release", "webapp-master")
        .with_container("ladder.release", "other-release");
    let h = harness(cluster, config(port, "60m"), Arc::new(AutoApprove));

    let report = h.pipeline.run(RunRequest::new("master").run_number(41), CancelToken::new()).await;
    assert_eq!(report.outcome, RunOutcome::Succeeded);
    assert_eq!(report.ordinal, 41);
    assert_eq!(h.cluster.container_count().await, 1);
    assert_eq!(h.cluster.pulled_images().await, vec!["postgres:16", "redis:7"]);
    let build = report.stage(Stage::BuildAndTest).unwrap();
    assert!(build.detail.contains("removed 2"), "{}", build.detail);
    assert!(build.detail.contains("172.17.0.1"), "{}", build.detail);
}
