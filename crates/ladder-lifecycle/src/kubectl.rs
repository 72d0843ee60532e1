//! Orchestrator backend driven through the `kubectl` CLI.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use ladder_core::config::ToolsConfig;
use serde::Deserialize;
use tracing::debug;

use crate::backend::{Orchestrator, Service};
use crate::error::{LifecycleError, LifecycleResult};
use crate::runner::{CommandRunner, args};

pub struct Kubectl {
    runner: Arc<dyn CommandRunner>,
    binary: String,
    context: Option<String>,
}

impl Kubectl {
    pub fn new(runner: Arc<dyn CommandRunner>, binary: impl Into<String>, context: Option<String>) -> Self {
        Self {
            runner,
            binary: binary.into(),
            context,
        }
    }

    pub fn from_config(runner: Arc<dyn CommandRunner>, tools: &ToolsConfig) -> Self {
        Self::new(runner, tools.kubectl.clone(), tools.kube_context.clone())
    }

    fn command(&self, rest: Vec<String>) -> Vec<String> {
        let mut full = Vec::with_capacity(rest.len() + 2);
        if let Some(ctx) = &self.context {
            full.push("--context".to_string());
            full.push(ctx.clone());
        }
        full.extend(rest);
        full
    }
}

#[async_trait]
impl Orchestrator for Kubectl {
    async fn check_connectivity(&self) -> LifecycleResult<()> {
        let argv = self.command(args(["cluster-info", "--request-timeout=10s"]));
        let out = self
            .runner
            .run(&self.binary, &argv)
            .await
            .map_err(|e| LifecycleError::Unreachable(e.to_string()))?;
        if !out.success() {
            return Err(LifecycleError::Unreachable(out.stderr.trim().to_string()));
        }
        Ok(())
    }

    async fn namespace_exists(&self, name: &str) -> LifecycleResult<bool> {
        let argv = self.command(args(["get", "namespace", name, "-o", "name"]));
        let out = self.runner.run(&self.binary, &argv).await?;
        if out.success() {
            return Ok(true);
        }
        if is_not_found(&out.stderr) {
            debug!(namespace = %name, "namespace not found");
            return Ok(false);
        }
        out.check(&self.binary, &argv).map(|_| false)
    }

    async fn create_namespace(&self, name: &str) -> LifecycleResult<()> {
        let argv = self.command(args(["create", "namespace", name]));
        self.runner.run(&self.binary, &argv).await?.check(&self.binary, &argv)?;
        Ok(())
    }

    async fn list_services(&self, namespace: &str) -> LifecycleResult<Vec<Service>> {
        let argv = self.command(args(["get", "services", "-n", namespace, "-o", "json"]));
        let out = self.runner.run(&self.binary, &argv).await?.check(&self.binary, &argv)?;
        parse_service_list(&out.stdout).map_err(|reason| LifecycleError::MalformedOutput {
            program: self.binary.clone(),
            reason,
        })
    }
}

fn is_not_found(stderr: &str) -> bool {
    stderr.contains("NotFound") || stderr.contains("not found")
}

#[derive(Deserialize)]
struct ServiceList {
    #[serde(default)]
    items: Vec<ServiceItem>,
}

#[derive(Deserialize)]
struct ServiceItem {
    metadata: ObjectMeta,
    #[serde(default)]
    spec: ServiceSpec,
}

#[derive(Deserialize)]
struct ObjectMeta {
    name: String,
    #[serde(default)]
    labels: BTreeMap<String, String>,
}

#[derive(Deserialize, Default)]
struct ServiceSpec {
    #[serde(rename = "clusterIP")]
    cluster_ip: Option<String>,
    #[serde(default)]
    ports: Vec<ServicePort>,
}

#[derive(Deserialize)]
struct ServicePort {
    port: u16,
}

fn parse_service_list(json: &str) -> Result<Vec<Service>, String> {
    let list: ServiceList = serde_json::from_str(json).map_err(|e| e.to_string())?;
    Ok(list
        .items
        .into_iter()
        .map(|item| Service {
            name: item.metadata.name,
            labels: item.metadata.labels,
            // Headless services report the literal "None".
            cluster_ip: item.spec.cluster_ip.filter(|ip| !ip.is_empty() && ip != "None"),
            ports: item.spec.ports.into_iter().map(|p| p.port).collect(),
        })
        .collect())
}
