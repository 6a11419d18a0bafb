//! Runtime data models for stage instances

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Default interval between liveness polls
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;

/// Metric name to measured value for one stage instance
pub type MetricRecord = BTreeMap<String, f64>;

/// A (stage, replica index) pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceKey {
    pub stage: String,
    pub index: usize,
}

impl InstanceKey {
    pub fn new(stage: impl Into<String>, index: usize) -> Self {
        Self {
            stage: stage.into(),
            index,
        }
    }

    /// Working directory name under the job directory, e.g. `syn0`
    pub fn dir_name(&self) -> String {
        format!("{}{}", self.stage, self.index)
    }
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.stage, self.index)
    }
}

/// Stage instance lifecycle state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    /// Launched, not yet waiting
    Pending,
    /// Waiting for upstream instances
    Waiting,
    /// Tool invoked
    Running,
    Done,
    Failed,
    /// Left its wait because the run was aborted
    Cancelled,
}

impl InstanceStatus {
    /// Liveness flag: true until the instance reaches a terminal state
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            InstanceStatus::Done | InstanceStatus::Failed | InstanceStatus::Cancelled
        )
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstanceStatus::Pending => write!(f, "pending"),
            InstanceStatus::Waiting => write!(f, "waiting"),
            InstanceStatus::Running => write!(f, "running"),
            InstanceStatus::Done => write!(f, "done"),
            InstanceStatus::Failed => write!(f, "failed"),
            InstanceStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Shell command for one tool invocation
#[derive(Debug, Clone)]
pub struct ToolCommand {
    /// Full command line, run with `bash -c`
    pub script: String,
    pub workdir: PathBuf,
    pub env: HashMap<String, String>,
}

/// Result of a tool process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub duration: Duration,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Final record of one stage instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceOutcome {
    pub key: InstanceKey,
    pub status: InstanceStatus,
    pub workdir: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub duration: Duration,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub metrics: MetricRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl InstanceOutcome {
    pub fn new(key: InstanceKey, workdir: PathBuf) -> Self {
        Self {
            key,
            status: InstanceStatus::Pending,
            workdir,
            exit_code: None,
            duration: Duration::ZERO,
            started_at: Utc::now(),
            metrics: MetricRecord::new(),
            error: None,
        }
    }
}

/// Outcome of a whole run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub job_dir: PathBuf,
    pub outcomes: Vec<InstanceOutcome>,
}

impl RunReport {
    /// True when every launched instance finished successfully
    pub fn is_success(&self) -> bool {
        self.outcomes
            .iter()
            .all(|o| o.status == InstanceStatus::Done)
    }

    pub fn outcome(&self, stage: &str, index: usize) -> Option<&InstanceOutcome> {
        self.outcomes
            .iter()
            .find(|o| o.key.stage == stage && o.key.index == index)
    }

    pub fn failed(&self) -> impl Iterator<Item = &InstanceOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.status == InstanceStatus::Failed)
    }
}
