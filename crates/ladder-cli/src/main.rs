//! ladder — promote an artifact through development, staging and production.
//!
//! # Usage
//!
//! ```text
//! ladder init --artifact webapp
//! ladder run --branch master
//! ladder run --branch feature/login --deploy-to-prod
//! ladder release-id --branch feature/login
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

mod commands;

const DEFAULT_FILTER: &str = "info";
const VERBOSE_FILTER: &str =
    "info,ladder=debug,ladder_core=debug,ladder_lifecycle=debug,ladder_probe=debug,ladder_gate=debug,ladder_pipeline=debug";

#[derive(Parser)]
#[command(
    name = "ladder",
    about = "Ladder — multi-environment deployment pipeline",
    version,
    propagate_version = true
)]
struct Cli {
    /// Debug logging for ladder crates (RUST_LOG overrides).
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline for one branch build.
    Run(RunArgs),
    /// Write a ladder.toml scaffold.
    Init {
        /// Artifact (application) name.
        #[arg(short, long)]
        artifact: String,
        #[arg(short, long, default_value = "ladder.toml")]
        path: PathBuf,
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
    /// Print the release id a branch deploys as.
    ReleaseId {
        #[arg(short, long)]
        branch: String,
        /// Artifact name; read from the config file when omitted.
        #[arg(short, long)]
        artifact: Option<String>,
        #[arg(short, long, default_value = "ladder.toml")]
        config: PathBuf,
    },
}

#[derive(clap::Args, Debug, Clone)]
pub struct RunArgs {
    /// Source branch of the build being promoted.
    #[arg(short, long)]
    pub branch: String,
    /// Promote to production without the approval gate.
    #[arg(long)]
    pub deploy_to_prod: bool,
    #[arg(short, long, default_value = "ladder.toml")]
    pub config: PathBuf,
    /// Run ordinal, e.g. the CI build number. Allocated from the state
    /// directory when omitted.
    #[arg(long)]
    pub run_number: Option<u64>,
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    /// Approve the production gate without asking.
    #[arg(long)]
    pub auto_approve: bool,
    /// Name recorded as the approver for terminal approvals; defaults to $USER.
    #[arg(long)]
    pub operator: Option<String>,
    /// Run against an in-memory cluster instead of kubectl, helm and docker.
    #[arg(long)]
    pub simulate: bool,
    /// Where gate milestones are kept between runs.
    #[arg(long, default_value = ".ladder")]
    pub state_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.log_json);

    match cli.command {
        Commands::Run(args) => {
            let code = commands::run::run(args).await?;
            if code != 0 {
                std::process::exit(code);
            }
            Ok(())
        }
        Commands::Init { artifact, path, force } => commands::init::init(&artifact, &path, force),
        Commands::ReleaseId {
            branch,
            artifact,
            config,
        } => commands::release_id::release_id(&branch, artifact.as_deref(), &config),
    }
}

/// Logs go to stderr so stdout carries only the run report.
fn init_tracing(verbose: bool, json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(if verbose { VERBOSE_FILTER } else { DEFAULT_FILTER })
    });
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
