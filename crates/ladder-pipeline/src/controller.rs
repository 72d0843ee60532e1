//! Pipeline controller — drives one run through the fixed stage sequence.
//!
//! ```text
//!  setup ─► build-and-test ─► deploy-dev ─► cleanup-dev ─► deploy-staging
//!    ─► cleanup-staging ─► [production-gate] ─► [deploy-prod] ─► [verify-prod]
//! ```
//!
//! Stages run strictly in order. Conditional stages re-evaluate their
//! condition on entry; the only state carried between them is the
//! `deploy_prod` latch in [`RunContext`]. The whole run is bounded by the
//! configured run timeout, and the cancel token is honoured at every stage
//! boundary and while a stage is in flight.

use std::sync::Arc;
use std::time::{Duration, Instant};

use ladder_core::{Environment, LadderConfig, Metric, sanitize_branch};
use ladder_gate::{ApprovalGate, ApprovalRequest, CancelToken, Decision, MilestoneLedger};
use ladder_lifecycle::{ChartSpec, LifecycleManager, LocalEnvironment};
use ladder_probe::{ProbeSettings, Prober, probe_url, resolve_service_address};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::context::{RunContext, RunRequest};
use crate::error::{PipelineError, PipelineResult};
use crate::report::{ProbeRecord, RunOutcome, RunReport};
use crate::stage::{Stage, StageStatus};

/// How a stage that did not fail ended.
enum Step {
    Passed(String),
    Skipped(String),
}

pub struct Pipeline {
    config: LadderConfig,
    lifecycle: Arc<LifecycleManager>,
    local: Arc<dyn LocalEnvironment>,
    gate: Arc<ApprovalGate>,
    prober: Prober,
    run_timeout: Duration,
    settle: Duration,
}

impl Pipeline {
    pub fn new(
        config: LadderConfig,
        lifecycle: Arc<LifecycleManager>,
        local: Arc<dyn LocalEnvironment>,
        gate: Arc<ApprovalGate>,
    ) -> PipelineResult<Self> {
        let prober = Prober::new(ProbeSettings::from_config(&config.probe)?);
        let run_timeout = config.pipeline.run_timeout()?;
        let settle = config.pipeline.settle()?;
        Ok(Self {
            config,
            lifecycle,
            local,
            gate,
            prober,
            run_timeout,
            settle,
        })
    }

    pub fn config(&self) -> &LadderConfig {
        &self.config
    }

    /// Execute one run to completion and report what happened.
    ///
    /// Never fails: every error ends up in [`RunReport::outcome`].
    pub async fn run(&self, request: RunRequest, cancel: CancelToken) -> RunReport {
        let started = Instant::now();
        let mut report = RunReport::new(&sanitize_branch(&request.branch));

        let mut ctx = match RunContext::new(&self.config.pipeline.artifact, &request, cancel) {
            Ok(ctx) => ctx,
            Err(e) => {
                error!(error = %e, "cannot derive release id");
                report.record(Stage::Setup, StageStatus::Failed, e.to_string(), started.elapsed());
                report.outcome = RunOutcome::Failed {
                    stage: Stage::Setup,
                    error: e.to_string(),
                };
                report.elapsed_ms = started.elapsed().as_millis() as u64;
                return report;
            }
        };
        report.release_id = Some(ctx.release_id.to_string());
        info!(release = %ctx.release_id, branch = %ctx.branch, auto = ctx.deploy_to_prod_requested, "run started");

        let outcome = match tokio::time::timeout(self.run_timeout, self.drive(&mut ctx, &mut report)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                ctx.cancel.cancel();
                let stage = report.in_progress();
                if let Some(stage) = stage {
                    report.record(stage, StageStatus::Failed, "run timed out", Duration::ZERO);
                }
                error!(release = %ctx.release_id, timeout = ?self.run_timeout, "run timed out");
                RunOutcome::TimedOut {
                    stage,
                    after_secs: self.run_timeout.as_secs(),
                }
            }
        };

        report.ordinal = ctx.ordinal;
        report.deploy_prod = ctx.deploy_prod();
        report.outcome = outcome;
        report.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(release = %ctx.release_id, outcome = ?report.outcome, "run finished");
        report
    }

    async fn drive(&self, ctx: &mut RunContext, report: &mut RunReport) -> RunOutcome {
        let cancel = ctx.cancel.clone();

        for stage in Stage::ALL {
            if cancel.is_cancelled() {
                report.record(stage, StageStatus::Cancelled, "run cancelled", Duration::ZERO);
                return RunOutcome::Cancelled {
                    stage,
                    reason: "run cancelled".to_string(),
                };
            }

            report.begin(stage);
            info!(stage = %stage, number = stage.number(), "stage started");
            let started = Instant::now();

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(PipelineError::Cancelled),
                result = self.execute(stage, ctx, report) => result,
            };

            match result {
                Ok(Step::Passed(detail)) => {
                    info!(stage = %stage, %detail, "PASS");
                    report.record(stage, StageStatus::Passed, detail, started.elapsed());
                }
                Ok(Step::Skipped(reason)) => {
                    info!(stage = %stage, %reason, "SKIP");
                    report.record(stage, StageStatus::Skipped, reason, started.elapsed());
                }
                Err(PipelineError::Rejected { reason }) => {
                    warn!(stage = %stage, %reason, "promotion rejected");
                    report.record(stage, StageStatus::Failed, format!("rejected: {reason}"), started.elapsed());
                    return RunOutcome::Rejected { reason };
                }
                Err(e) if e.is_cancellation() => {
                    warn!(stage = %stage, reason = %e, "run cancelled");
                    report.record(stage, StageStatus::Cancelled, e.to_string(), started.elapsed());
                    return RunOutcome::Cancelled {
                        stage,
                        reason: e.to_string(),
                    };
                }
                Err(e) => {
                    error!(stage = %stage, error = %e, "FAIL");
                    report.record(stage, StageStatus::Failed, e.to_string(), started.elapsed());
                    return RunOutcome::Failed {
                        stage,
                        error: e.to_string(),
                    };
                }
            }
        }

        RunOutcome::Succeeded
    }

    async fn execute(&self, stage: Stage, ctx: &mut RunContext, report: &mut RunReport) -> PipelineResult<Step> {
        match stage {
            Stage::Setup => self.setup(ctx).await,
            Stage::BuildAndTest => self.build_and_test(ctx).await,
            Stage::DeployDevelopment => self.deploy(ctx, Environment::Development).await,
            Stage::CleanupDevelopment => self.cleanup(ctx, Environment::Development).await,
            Stage::DeployStaging => self.deploy(ctx, Environment::Staging).await,
            Stage::CleanupStaging => self.cleanup(ctx, Environment::Staging).await,
            Stage::ProductionGate => self.production_gate(ctx).await,
            Stage::DeployProduction => self.deploy(ctx, Environment::Production).await,
            Stage::VerifyProduction => self.verify_production(ctx, report).await,
        }
    }

    async fn setup(&self, ctx: &mut RunContext) -> PipelineResult<Step> {
        self.lifecycle.check_connectivity().await?;
        if ctx.ordinal == 0 {
            ctx.ordinal = self.gate.ledger().next_ordinal(ctx.release_id.as_str()).await?;
        }
        Ok(Step::Passed(format!(
            "backend reachable, release {} run #{}",
            ctx.release_id, ctx.ordinal
        )))
    }

    async fn build_and_test(&self, ctx: &mut RunContext) -> PipelineResult<Step> {
        let build = &self.config.build;
        let removed = self
            .local
            .remove_containers(&build.container_label, ctx.release_id.as_str())
            .await?;
        for image in &build.test_images {
            self.local.pull_image(image).await?;
        }
        let address = self.local.default_route_address().await?;
        debug!(release = %ctx.release_id, removed, %address, "test host ready");
        let detail = format!(
            "removed {removed} stale container(s), pulled {} image(s), host address {address}",
            build.test_images.len()
        );
        ctx.host_address = Some(address);
        Ok(Step::Passed(detail))
    }

    async fn deploy(&self, ctx: &mut RunContext, env: Environment) -> PipelineResult<Step> {
        if env.is_scratch() {
            self.deploy_scratch(ctx, env).await
        } else {
            self.deploy_production(ctx).await
        }
    }

    /// Ensure the namespace, clear any previous release, install fresh.
    async fn deploy_scratch(&self, ctx: &mut RunContext, env: Environment) -> PipelineResult<Step> {
        let namespace = self.config.environments.namespace(env).to_string();
        ctx.current_namespace = Some(namespace.clone());
        let release = ctx.release_id.as_str();

        self.lifecycle.ensure_namespace(&namespace).await?;
        let replaced = self.lifecycle.delete_release_if_present(&namespace, release).await?;
        self.lifecycle
            .install_release(&namespace, release, &self.chart(ctx, &namespace))
            .await?;
        self.settle().await;

        Ok(Step::Passed(if replaced {
            format!("reinstalled {release} in {namespace}")
        } else {
            format!("installed {release} in {namespace}")
        }))
    }

    async fn cleanup(&self, ctx: &mut RunContext, env: Environment) -> PipelineResult<Step> {
        let namespace = self.config.environments.namespace(env);
        let release = ctx.release_id.as_str();
        if self.lifecycle.delete_release_if_present(namespace, release).await? {
            Ok(Step::Passed(format!("deleted {release} from {namespace}")))
        } else {
            Ok(Step::Passed(format!("nothing to delete in {namespace}")))
        }
    }

    async fn production_gate(&self, ctx: &mut RunContext) -> PipelineResult<Step> {
        if ctx.deploy_to_prod_requested {
            return Ok(Step::Skipped("automatic promotion requested".to_string()));
        }
        let release_branch = &self.config.pipeline.release_branch;
        if !ctx.on_release_branch(release_branch) {
            return Ok(Step::Skipped(format!(
                "branch {} is not the release branch {release_branch}",
                ctx.source_branch
            )));
        }

        let request = ApprovalRequest {
            pipeline: ctx.release_id.to_string(),
            ordinal: ctx.ordinal,
            branch: ctx.branch.clone(),
            message: format!(
                "{} passed development and staging; promote to {}?",
                ctx.release_id,
                self.config.environments.namespace(Environment::Production)
            ),
        };
        match self.gate.pass(&request, &ctx.cancel).await? {
            Decision::Approved { by } => {
                ctx.promote();
                Ok(Step::Passed(format!("approved by {by}")))
            }
            Decision::Rejected { reason } => Err(PipelineError::Rejected { reason }),
        }
    }

    /// Ensure the namespace and upgrade in place. Production is never
    /// deleted first.
    async fn deploy_production(&self, ctx: &mut RunContext) -> PipelineResult<Step> {
        if !(ctx.deploy_prod() || ctx.deploy_to_prod_requested) {
            return Ok(Step::Skipped("production promotion not approved".to_string()));
        }
        ctx.promote();

        let namespace = self.config.environments.namespace(Environment::Production).to_string();
        ctx.current_namespace = Some(namespace.clone());
        let release = ctx.release_id.as_str();

        self.lifecycle.ensure_namespace(&namespace).await?;
        self.lifecycle
            .install_release(&namespace, release, &self.chart(ctx, &namespace))
            .await?;
        self.settle().await;

        Ok(Step::Passed(format!("installed {release} in {namespace}")))
    }

    /// Fan out one probe per metric, wait for all of them, fail if any did.
    async fn verify_production(&self, ctx: &mut RunContext, report: &mut RunReport) -> PipelineResult<Step> {
        if !ctx.deploy_prod() {
            return Ok(Step::Skipped("production not deployed".to_string()));
        }
        let Some(namespace) = ctx.current_namespace.clone() else {
            return Ok(Step::Skipped("no namespace deployed".to_string()));
        };

        let port = self.config.probe.port;
        let path: Arc<str> = Arc::from(self.config.probe.path.as_str());
        let release: Arc<str> = Arc::from(ctx.release_id.as_str());
        let namespace: Arc<str> = Arc::from(namespace);

        // Each branch resolves the service on its own so a lookup failure
        // still yields one record per metric.
        let mut probes = JoinSet::new();
        for metric in Metric::ALL {
            let prober = self.prober;
            let orchestrator = self.lifecycle.orchestrator().clone();
            let (path, release, namespace) = (path.clone(), release.clone(), namespace.clone());
            probes.spawn(async move {
                let result = match resolve_service_address(orchestrator.as_ref(), &namespace, &release).await {
                    Ok(address) => {
                        let url = probe_url(&address, port, &path);
                        debug!(%metric, %url, "probing");
                        prober.probe(&url, metric).await
                    }
                    Err(e) => Err(e),
                };
                (metric, result)
            });
        }

        let mut records = Vec::with_capacity(Metric::ALL.len());
        while let Some(joined) = probes.join_next().await {
            let record = match joined {
                Ok((_, Ok(measurement))) => ProbeRecord::measured(measurement),
                Ok((metric, Err(e))) => ProbeRecord::errored(metric, e.to_string()),
                Err(e) => {
                    warn!(error = %e, "probe task did not complete");
                    continue;
                }
            };
            if record.passed {
                info!(metric = %record.metric, value = %record.observed(), "PASS");
            } else {
                warn!(metric = %record.metric, value = %record.observed(), "FAIL");
            }
            records.push(record);
        }
        records.sort_by_key(|r| Metric::ALL.iter().position(|m| *m == r.metric));

        let mut failed: Vec<String> = records
            .iter()
            .filter(|r| !r.passed)
            .map(|r| format!("{}={}", r.metric, r.observed()))
            .collect();
        for metric in Metric::ALL {
            if !records.iter().any(|r| r.metric == metric) {
                failed.push(format!("{metric}=no result"));
            }
        }
        report.probes = records;

        if !failed.is_empty() {
            return Err(PipelineError::VerificationFailed { failed });
        }
        Ok(Step::Passed(format!(
            "{release} in {namespace} passed all {} probes",
            Metric::ALL.len()
        )))
    }

    fn chart(&self, ctx: &RunContext, namespace: &str) -> ChartSpec {
        let chart = &self.config.chart;
        ChartSpec {
            reference: chart.chart_reference(&self.config.pipeline.artifact),
            version: chart.version.clone(),
            values: chart.render_values(ctx.release_id.as_str(), &ctx.branch, namespace),
        }
    }

    async fn settle(&self) {
        if !self.settle.is_zero() {
            debug!(settle = ?self.settle, "waiting for release to settle");
            tokio::time::sleep(self.settle).await;
        }
    }
}
