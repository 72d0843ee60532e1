use std::sync::Arc;

use anyhow::Context;
use ladder_core::LadderConfig;
use ladder_gate::{
    ApprovalGate, ApprovalSource, AutoApprove, CancelToken, FileLedger, MemoryLedger, MilestoneLedger,
    TerminalApproval,
};
use ladder_lifecycle::{
    CommandRunner, DockerHost, Helm, Kubectl, LifecycleManager, LocalEnvironment, MemoryCluster, Orchestrator,
    PackageManager, ProcessRunner, Repository,
};
use ladder_pipeline::{Pipeline, RunRequest};
use tracing::{info, warn};

use crate::commands::simulate;
use crate::{OutputFormat, RunArgs};

struct Backends {
    orchestrator: Arc<dyn Orchestrator>,
    packages: Arc<dyn PackageManager>,
    local: Arc<dyn LocalEnvironment>,
    ledger: Arc<dyn MilestoneLedger>,
}

impl Backends {
    /// kubectl, helm and docker on this host; milestones under the state dir.
    fn external(config: &LadderConfig, args: &RunArgs) -> Self {
        let runner: Arc<dyn CommandRunner> = Arc::new(ProcessRunner);
        Self {
            orchestrator: Arc::new(Kubectl::from_config(runner.clone(), &config.tools)),
            packages: Arc::new(Helm::from_config(runner.clone(), &config.tools)),
            local: Arc::new(DockerHost::from_config(runner, &config.tools)),
            ledger: Arc::new(FileLedger::new(args.state_dir.join("milestones.json"))),
        }
    }

    /// Everything in memory; services resolve to the local stand-in.
    fn simulated(port: u16) -> Self {
        let cluster = Arc::new(MemoryCluster::new().with_service_endpoint("127.0.0.1", port));
        Self {
            orchestrator: cluster.clone(),
            packages: cluster.clone(),
            local: cluster,
            ledger: Arc::new(MemoryLedger::new()),
        }
    }
}

/// Execute one pipeline run and print its report. Returns the exit status.
pub async fn run(args: RunArgs) -> anyhow::Result<i32> {
    let mut config = LadderConfig::from_file(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;

    let backends = if args.simulate {
        let port = simulate::serve_health().await?;
        config.probe.port = port;
        info!(port, "simulating cluster in memory");
        Backends::simulated(port)
    } else {
        Backends::external(&config, &args)
    };

    let approvals: Arc<dyn ApprovalSource> = if args.auto_approve {
        Arc::new(AutoApprove)
    } else {
        let operator = args.operator.clone().or_else(|| std::env::var("USER").ok());
        Arc::new(TerminalApproval::new(operator))
    };

    let lifecycle = Arc::new(LifecycleManager::new(
        backends.orchestrator,
        backends.packages,
        Repository::from_config(&config.chart),
    ));
    let gate = Arc::new(ApprovalGate::new(backends.ledger, approvals));
    let pipeline = Pipeline::new(config, lifecycle, backends.local, gate).context("invalid pipeline configuration")?;

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, cancelling run");
                cancel.cancel();
            }
        });
    }

    let mut request = RunRequest::new(args.branch.as_str()).deploy_to_prod(args.deploy_to_prod);
    if let Some(n) = args.run_number {
        request = request.run_number(n);
    }

    let report = pipeline.run(request, cancel).await;
    match args.format {
        OutputFormat::Json => println!("{}", report.to_json()?),
        OutputFormat::Text => print!("{}", report.render_text()),
    }
    Ok(report.outcome.exit_code())
}
