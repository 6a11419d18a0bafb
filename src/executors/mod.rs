//! Tool executors

pub mod remote;
pub mod shell;

use crate::models::{ExecutionResult, ToolCommand};
use async_trait::async_trait;

/// Runs tool command lines for stage instances
#[async_trait]
pub trait ExecutorTrait: Send + Sync {
    /// Run a command to completion
    async fn execute(&self, command: &ToolCommand) -> anyhow::Result<ExecutionResult>;

    /// True when `exe` resolves on the executor's search path
    async fn locate(&self, exe: &str, command: &ToolCommand) -> anyhow::Result<bool>;

    /// Perform a health check
    async fn health_check(&self) -> anyhow::Result<()>;
}
