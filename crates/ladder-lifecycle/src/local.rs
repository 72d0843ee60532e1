//! Local test host: stale container cleanup, image pulls, route lookup.

use std::sync::Arc;

use async_trait::async_trait;
use ladder_core::config::ToolsConfig;
use regex::Regex;
use tracing::{debug, info};

use crate::backend::LocalEnvironment;
use crate::error::{LifecycleError, LifecycleResult};
use crate::runner::{CommandRunner, args};

pub struct DockerHost {
    runner: Arc<dyn CommandRunner>,
    docker: String,
    ip: String,
}

impl DockerHost {
    pub fn new(runner: Arc<dyn CommandRunner>, docker: impl Into<String>, ip: impl Into<String>) -> Self {
        Self {
            runner,
            docker: docker.into(),
            ip: ip.into(),
        }
    }

    pub fn from_config(runner: Arc<dyn CommandRunner>, tools: &ToolsConfig) -> Self {
        Self::new(runner, tools.docker.clone(), tools.ip.clone())
    }
}

#[async_trait]
impl LocalEnvironment for DockerHost {
    async fn remove_containers(&self, label_key: &str, label_value: &str) -> LifecycleResult<usize> {
        let filter = format!("label={label_key}={label_value}");
        let argv = args(["ps", "--all", "--quiet", "--filter", filter.as_str()]);
        let out = self.runner.run(&self.docker, &argv).await?.check(&self.docker, &argv)?;

        let ids: Vec<String> = out
            .stdout
            .split_whitespace()
            .map(str::to_string)
            .collect();
        if ids.is_empty() {
            debug!(%filter, "no stale test containers");
            return Ok(0);
        }

        let mut rm = args(["rm", "--force"]);
        rm.extend(ids.iter().cloned());
        self.runner.run(&self.docker, &rm).await?.check(&self.docker, &rm)?;
        info!(%filter, removed = ids.len(), "removed stale test containers");
        Ok(ids.len())
    }

    async fn pull_image(&self, image: &str) -> LifecycleResult<()> {
        let argv = args(["pull", image]);
        self.runner.run(&self.docker, &argv).await?.check(&self.docker, &argv)?;
        Ok(())
    }

    async fn default_route_address(&self) -> LifecycleResult<String> {
        let argv = args(["route", "show", "default"]);
        let out = self.runner.run(&self.ip, &argv).await?.check(&self.ip, &argv)?;
        parse_default_route(&out.stdout).ok_or_else(|| LifecycleError::MalformedOutput {
            program: self.ip.clone(),
            reason: "no default route".to_string(),
        })
    }
}

fn parse_default_route(output: &str) -> Option<String> {
    let route_re = Regex::new(r"(?m)^default\s+via\s+(\S+)").ok()?;
    route_re
        .captures(output)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}
