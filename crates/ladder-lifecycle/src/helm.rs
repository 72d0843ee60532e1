//! Package-manager backend driven through the `helm` CLI.

use std::sync::Arc;

use async_trait::async_trait;
use ladder_core::config::ToolsConfig;
use tracing::debug;

use crate::backend::{ChartSpec, PackageManager, Repository};
use crate::error::LifecycleResult;
use crate::runner::{CommandRunner, args};

pub struct Helm {
    runner: Arc<dyn CommandRunner>,
    binary: String,
    context: Option<String>,
}

impl Helm {
    pub fn new(runner: Arc<dyn CommandRunner>, binary: impl Into<String>, context: Option<String>) -> Self {
        Self {
            runner,
            binary: binary.into(),
            context,
        }
    }

    pub fn from_config(runner: Arc<dyn CommandRunner>, tools: &ToolsConfig) -> Self {
        Self::new(runner, tools.helm.clone(), tools.kube_context.clone())
    }

    async fn exec(&self, mut argv: Vec<String>) -> LifecycleResult<String> {
        if let Some(ctx) = &self.context {
            argv.push("--kube-context".to_string());
            argv.push(ctx.clone());
        }
        let out = self.runner.run(&self.binary, &argv).await?.check(&self.binary, &argv)?;
        Ok(out.stdout)
    }
}

#[async_trait]
impl PackageManager for Helm {
    async fn list_releases(&self, namespace: &str, release: &str) -> LifecycleResult<Vec<String>> {
        let filter = format!("^{release}$");
        let stdout = self
            .exec(args(["list", "--all", "--short", "--namespace", namespace, "--filter", filter.as_str()]))
            .await?;
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn delete_release(&self, namespace: &str, release: &str) -> LifecycleResult<()> {
        self.exec(args(["uninstall", release, "--namespace", namespace]))
            .await?;
        Ok(())
    }

    async fn refresh_repository(&self, repo: &Repository) -> LifecycleResult<()> {
        if let Some(url) = &repo.url {
            self.exec(args(["repo", "add", repo.name.as_str(), url.as_str(), "--force-update"]))
                .await?;
        }
        self.exec(args(["repo", "update"])).await?;
        debug!(repo = %repo.name, "chart repository refreshed");
        Ok(())
    }

    async fn upgrade_install(&self, namespace: &str, release: &str, chart: &ChartSpec) -> LifecycleResult<()> {
        self.exec(upgrade_args(namespace, release, chart)).await?;
        Ok(())
    }
}

fn upgrade_args(namespace: &str, release: &str, chart: &ChartSpec) -> Vec<String> {
    let mut argv = args(["upgrade", "--install", release, chart.reference.as_str(), "--namespace", namespace]);
    if let Some(version) = &chart.version {
        argv.push("--version".to_string());
        argv.push(version.clone());
    }
    for (key, value) in &chart.values {
        argv.push("--set".to_string());
        argv.push(format!("{key}={value}"));
    }
    argv
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LifecycleError;
    use crate::runner::CommandOutput;
    use crate::runner::scripted::ScriptedRunner;

    fn chart() -> ChartSpec {
        ChartSpec {
            reference: "charts/webapp".to_string(),
            version: Some("1.2.0".to_string()),
            values: vec![("image.tag".to_string(), "master".to_string())],
        }
    }

    #[test]
    fn upgrade_args_include_version_and_values() {
        let argv = upgrade_args("staging", "webapp-master", &chart());
        assert_eq!(
            argv.join(" "),
            "upgrade --install webapp-master charts/webapp --namespace staging --version 1.2.0 --set image.tag=master"
        );
    }

    #[tokio::test]
    async fn list_releases_filters_exact_name() {
        let runner = Arc::new(ScriptedRunner::new([CommandOutput::ok("webapp-master\n\n")]));
        let helm = Helm::new(runner.clone(), "helm", None);

        let found = helm.list_releases("development", "webapp-master").await.unwrap();
        assert_eq!(found, vec!["webapp-master".to_string()]);
        assert_eq!(
            runner.calls(),
            vec!["helm list --all --short --namespace development --filter ^webapp-master$"]
        );
    }

    #[tokio::test]
    async fn refresh_adds_repo_when_url_known() {
        let runner = Arc::new(ScriptedRunner::default());
        let helm = Helm::new(runner.clone(), "helm", Some("ci".to_string()));
        let repo = Repository {
            name: "charts".to_string(),
            url: Some("https://charts.example.com".to_string()),
        };

        helm.refresh_repository(&repo).await.unwrap();
        assert_eq!(
            runner.calls(),
            vec![
                "helm repo add charts https://charts.example.com --force-update --kube-context ci",
                "helm repo update --kube-context ci",
            ]
        );
    }

    #[tokio::test]
    async fn upgrade_failure_surfaces() {
        let runner = Arc::new(ScriptedRunner::new([CommandOutput::failed(
            1,
            "Error: UPGRADE FAILED: timed out waiting for the condition",
        )]));
        let helm = Helm::new(runner, "helm", None);

        let err = helm.upgrade_install("production", "webapp-master", &chart()).await.unwrap_err();
        assert!(matches!(err, LifecycleError::CommandFailed { code: 1, .. }));
    }
}
