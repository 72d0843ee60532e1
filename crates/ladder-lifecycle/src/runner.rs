//! External command execution.
//!
//! Every backend that shells out to a tool (kubectl, helm, docker, ip)
//! goes through a [`CommandRunner`], so the exit-status interpretation
//! lives in one place and tests can substitute a scripted runner.

use std::process::Stdio;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{LifecycleError, LifecycleResult};

/// Captured result of one external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, or `None` if the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Turn a non-zero exit into [`LifecycleError::CommandFailed`].
    pub fn check(self, program: &str, args: &[String]) -> LifecycleResult<Self> {
        if self.success() {
            return Ok(self);
        }
        Err(LifecycleError::CommandFailed {
            command: render_command(program, args),
            code: self.code.unwrap_or(-1),
            stderr: self.stderr.trim().to_string(),
        })
    }
}

/// Runs an external program to completion.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[String]) -> LifecycleResult<CommandOutput>;
}

/// Runs commands as child processes of this one.
///
/// Children are killed if the future is dropped, so a whole-run timeout
/// does not leave a helm upgrade running behind it.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, program: &str, args: &[String]) -> LifecycleResult<CommandOutput> {
        debug!(command = %render_command(program, args), "running");

        let output = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| LifecycleError::Spawn {
                program: program.to_string(),
                source,
            })?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

pub(crate) fn render_command(program: &str, args: &[String]) -> String {
    let mut rendered = program.to_string();
    for arg in args {
        rendered.push(' ');
        rendered.push_str(arg);
    }
    rendered
}

/// Build an owned argument list from string literals and values.
pub(crate) fn args<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items.into_iter().map(Into::into).collect()
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_passes_success_through() {
        let out = CommandOutput::ok("done").check("helm", &args(["version"])).unwrap();
        assert_eq!(out.stdout, "done");
    }

    #[test]
    fn check_reports_command_and_stderr() {
        let err = CommandOutput::failed(2, "boom\n")
            .check("kubectl", &args(["create", "namespace", "staging"]))
            .unwrap_err();
        match err {
            LifecycleError::CommandFailed { command, code, stderr } => {
                assert_eq!(command, "kubectl create namespace staging");
                assert_eq!(code, 2);
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn process_runner_reports_missing_binary() {
        let err = ProcessRunner
            .run("ladder-definitely-not-installed", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::Spawn { .. }));
    }
}
