//! Local shell executor

use crate::error::{EdaFlowError, Result};
use crate::executors::ExecutorTrait;
use crate::models::{ExecutionResult, ToolCommand};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, error, info};

/// Runs tool command lines with `bash -c` in the instance working directory
#[derive(Debug, Clone)]
pub struct ShellExecutor {
    shell: String,
}

impl ShellExecutor {
    pub fn new() -> Self {
        Self {
            shell: "/bin/bash".to_string(),
        }
    }

    /// Use a different shell binary
    pub fn with_shell(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }

    fn command(&self, tool: &ToolCommand) -> Command {
        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c").arg(&tool.script);
        cmd.current_dir(&tool.workdir);
        cmd.envs(&tool.env);
        // Tool output is redirected by the command line itself
        cmd.stdin(Stdio::null());
        cmd.kill_on_drop(true);
        cmd
    }

    async fn execute_shell(&self, tool: &ToolCommand) -> Result<ExecutionResult> {
        info!("Executing tool command: {}", tool.script);
        debug!(workdir = %tool.workdir.display(), "Command working directory");

        let start = std::time::Instant::now();
        let status = self.command(tool).status().await;
        let duration = start.elapsed();

        match status {
            Ok(status) => {
                info!(
                    "Command completed in {:.1}s (exit code: {:?})",
                    duration.as_secs_f64(),
                    status.code()
                );
                Ok(ExecutionResult {
                    exit_code: status.code(),
                    duration,
                })
            }
            Err(e) => {
                error!("Command execution failed: {}", e);
                Err(EdaFlowError::Io(e))
            }
        }
    }
}

#[async_trait]
impl ExecutorTrait for ShellExecutor {
    async fn execute(&self, command: &ToolCommand) -> anyhow::Result<ExecutionResult> {
        Ok(self.execute_shell(command).await?)
    }

    async fn locate(&self, exe: &str, command: &ToolCommand) -> anyhow::Result<bool> {
        let output = Command::new(&self.shell)
            .arg("-c")
            .arg("command -v \"$0\"")
            .arg(exe)
            .envs(&command.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output()
            .await?;
        debug!(exe, found = output.status.success(), "Resolved executable");
        Ok(output.status.success())
    }

    async fn health_check(&self) -> anyhow::Result<()> {
        let output = Command::new(&self.shell)
            .arg("-c")
            .arg("exit 0")
            .output()
            .await?;

        if output.status.success() {
            Ok(())
        } else {
            Err(anyhow::anyhow!("Shell executor health check failed"))
        }
    }
}

impl Default for ShellExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn tool_command(script: &str, workdir: &std::path::Path) -> ToolCommand {
        ToolCommand {
            script: script.to_string(),
            workdir: workdir.to_path_buf(),
            env: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_shell_executor_success() {
        let temp = TempDir::new().unwrap();
        let executor = ShellExecutor::new();
        let command = tool_command("echo hello > out.log", temp.path());

        let result = executor.execute(&command).await.unwrap();
        assert!(result.success());
        let log = std::fs::read_to_string(temp.path().join("out.log")).unwrap();
        assert!(log.contains("hello"));
    }

    #[tokio::test]
    async fn test_shell_executor_failure() {
        let temp = TempDir::new().unwrap();
        let executor = ShellExecutor::new();
        let command = tool_command("exit 3", temp.path());

        let result = executor.execute(&command).await.unwrap();
        assert!(!result.success());
        assert_eq!(result.exit_code, Some(3));
    }

    #[tokio::test]
    async fn test_pipestatus_preserves_tool_exit() {
        let temp = TempDir::new().unwrap();
        let executor = ShellExecutor::new();
        let command = tool_command(
            "sh -c 'echo out; exit 2' 2>&1 | tee tool.log ; (exit ${PIPESTATUS[0]} )",
            temp.path(),
        );

        let result = executor.execute(&command).await.unwrap();
        assert_eq!(result.exit_code, Some(2));
        assert!(temp.path().join("tool.log").exists());
    }

    #[tokio::test]
    async fn test_shell_executor_with_env() {
        let temp = TempDir::new().unwrap();
        let executor = ShellExecutor::new();
        let mut command = tool_command("echo $TEST_VAR > env.log", temp.path());
        command
            .env
            .insert("TEST_VAR".to_string(), "test_value".to_string());

        executor.execute(&command).await.unwrap();
        let log = std::fs::read_to_string(temp.path().join("env.log")).unwrap();
        assert!(log.contains("test_value"));
    }

    #[tokio::test]
    async fn test_locate() {
        let temp = TempDir::new().unwrap();
        let executor = ShellExecutor::new();
        let command = tool_command("true", temp.path());
        assert!(executor.locate("sh", &command).await.unwrap());
        assert!(!executor
            .locate("edaflow-no-such-tool", &command)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_missing_workdir_is_error() {
        let executor = ShellExecutor::new();
        let command = tool_command("true", std::path::Path::new("/nonexistent/workdir"));
        assert!(executor.execute(&command).await.is_err());
    }

    #[tokio::test]
    async fn test_shell_executor_health_check() {
        let executor = ShellExecutor::new();
        assert!(executor.health_check().await.is_ok());
    }
}
