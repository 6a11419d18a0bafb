//! Flow execution
//!
//! A run spawns one tokio task per stage instance. Every instance receives
//! its own snapshot of the configuration, waits on the liveness of the
//! instances it depends on, runs its tool and publishes its final status.
//! The first failure sets a shared abort flag so instances still waiting
//! leave without running.

mod liveness;
mod select;
mod step;

pub use liveness::LivenessBoard;
pub use select::{FirstCandidate, InputSelector, MinScore, SelectionContext};

use crate::collect;
use crate::error::{EdaFlowError, Result};
use crate::executors::remote::{new_job_hash, RemoteDispatch, RemoteJob};
use crate::executors::shell::ShellExecutor;
use crate::executors::ExecutorTrait;
use crate::flowgraph::FlowGraph;
use crate::keypath;
use crate::models::{InstanceKey, InstanceOutcome, InstanceStatus, RunReport};
use crate::schema::{Schema, Value};
use crate::score::{metric_record, output_manifest, REAL_GROUP};
use crate::settings::SchedulerSettings;
use crate::telemetry::RunTelemetry;
use crate::tools::ToolRegistry;
use futures::future::join_all;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use step::{RunEnv, StepRunner};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Runs flow graphs
pub struct Scheduler {
    tools: ToolRegistry,
    executor: Arc<dyn ExecutorTrait>,
    selector: Arc<dyn InputSelector>,
    remote: Option<Arc<dyn RemoteDispatch>>,
    settings: SchedulerSettings,
    telemetry: RunTelemetry,
}

impl Scheduler {
    /// Scheduler with a local shell executor and first-replica selection
    pub fn new(tools: ToolRegistry) -> Result<Self> {
        Ok(Self {
            tools,
            executor: Arc::new(ShellExecutor::new()),
            selector: Arc::new(FirstCandidate),
            remote: None,
            settings: SchedulerSettings::default(),
            telemetry: RunTelemetry::new()?,
        })
    }

    pub fn with_executor(mut self, executor: Arc<dyn ExecutorTrait>) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_selector(mut self, selector: Arc<dyn InputSelector>) -> Self {
        self.selector = selector;
        self
    }

    /// Dispatch runs with `remote addr` set through `remote`
    pub fn with_remote(mut self, remote: Arc<dyn RemoteDispatch>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn with_settings(mut self, settings: SchedulerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn telemetry(&self) -> &RunTelemetry {
        &self.telemetry
    }

    /// Stages to run: `steplist` when set, every stage by depth otherwise
    pub fn steplist(schema: &Schema, graph: &FlowGraph) -> Vec<String> {
        let steplist = schema.get(["steplist"]).to_strings();
        if steplist.is_empty() {
            graph.getsteps()
        } else {
            steplist
        }
    }

    /// Spawn every instance of the selected stages
    ///
    /// All instances are registered on the liveness board before the first
    /// task starts. The configuration must already have passed
    /// [`Schema::check`].
    pub fn launch(&self, schema: &Schema) -> Result<RunHandle> {
        let graph = Arc::new(FlowGraph::from_schema(schema));
        let steps = Self::steplist(schema, &graph);
        for step in &steps {
            if graph.stage(step).is_none() {
                warn!("Ignoring unknown stage '{}' in steplist", step);
            }
        }
        let keys = graph.instances(&steps);

        let job_dir = schema.jobdir();
        std::fs::create_dir_all(&job_dir)?;
        info!(
            "Launching {} instances of {} stages in {}",
            keys.len(),
            steps.len(),
            job_dir.display()
        );

        let board = Arc::new(LivenessBoard::new(keys.iter().cloned()));
        let env = Arc::new(RunEnv {
            tools: self.tools.clone(),
            executor: self.executor.clone(),
            selector: self.selector.clone(),
            settings: self.settings.clone(),
            telemetry: self.telemetry.clone(),
            job_dir: job_dir.clone(),
            prestaged: !schema.get(["remote", "addr"]).is_empty(),
        });

        let handles = keys
            .into_iter()
            .map(|key| {
                let runner = StepRunner {
                    key: key.clone(),
                    schema: schema.clone(),
                    graph: graph.clone(),
                    board: board.clone(),
                    env: env.clone(),
                };
                (key, tokio::spawn(runner.run()))
            })
            .collect();

        Ok(RunHandle {
            board,
            handles,
            job_dir,
            poll_interval: self.settings.poll_interval(),
        })
    }

    /// Run the flow to completion and fold results back into `schema`
    ///
    /// The `remote key` credential is removed from the configuration first.
    /// With `remote addr` set and a dispatcher configured the job runs
    /// remotely; otherwise every selected instance runs locally. Metrics and
    /// per-stage status are written back into `schema` and the run's
    /// telemetry is written to `run.prom` in the job directory.
    pub async fn run(&self, schema: &mut Schema) -> Result<RunReport> {
        let credential = scrub_credential(schema);
        let remote_addr = schema.get(["remote", "addr"]);
        if !remote_addr.is_empty() {
            if let Some(remote) = &self.remote {
                return self.run_remote(schema, remote.as_ref(), credential).await;
            }
            info!("Running pre-staged job for {}", remote_addr);
        }

        schema.check()?;
        if schema.get(["hashmode"]).to_string() == "ALL" {
            let digests = collect::hash(schema);
            debug!(files = digests, "Hashed input files");
        }
        if remote_addr.is_empty() {
            schema.set_jobid();
        }

        let job_dir = schema.jobdir();
        if let (Some(remote), Some(key)) = (&self.remote, &credential) {
            remote
                .decrypt(&job_dir, key)
                .await
                .map_err(|e| EdaFlowError::Remote(e.to_string()))?;
        }

        let report = self.launch(schema)?.join().await;

        if let (Some(remote), Some(key)) = (&self.remote, &credential) {
            remote
                .encrypt(&job_dir, key)
                .await
                .map_err(|e| EdaFlowError::Remote(e.to_string()))?;
        }

        apply_report(schema, &report);
        if let Err(e) = self.telemetry.write_to(&job_dir.join("run.prom")) {
            warn!("Failed to write run telemetry: {}", e);
        }

        if report.is_success() {
            info!("Run finished in {}", job_dir.display());
        } else {
            for outcome in report.failed() {
                error!(
                    "Instance {} failed: {}",
                    outcome.key,
                    outcome.error.as_deref().unwrap_or("unknown error")
                );
            }
        }
        Ok(report)
    }

    async fn run_remote(
        &self,
        schema: &mut Schema,
        remote: &dyn RemoteDispatch,
        credential: Option<String>,
    ) -> Result<RunReport> {
        schema.check()?;
        if schema.get(["remote", "hash"]).is_empty() {
            schema.set(["remote", "hash"], new_job_hash());
        }
        let job = RemoteJob {
            config: schema.pruned(),
            job_hash: schema.get(["remote", "hash"]).to_string(),
            job_dir: schema.jobdir(),
            credential,
        };
        info!(
            "Dispatching job {} to {}",
            job.job_hash,
            schema.get(["remote", "addr"])
        );
        remote
            .dispatch(&job)
            .await
            .map_err(|e| EdaFlowError::Remote(e.to_string()))?;

        let graph = FlowGraph::from_schema(schema);
        let design = schema.get(["design"]).to_string();
        let outcomes = graph
            .instances(&Self::steplist(schema, &graph))
            .into_iter()
            .map(|key| remote_outcome(&job.job_dir, key, &design))
            .collect();
        let report = RunReport {
            job_dir: job.job_dir,
            outcomes,
        };
        apply_report(schema, &report);
        Ok(report)
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("tools", &self.tools)
            .field("remote", &self.remote.is_some())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// A launched run
pub struct RunHandle {
    board: Arc<LivenessBoard>,
    handles: Vec<(InstanceKey, JoinHandle<InstanceOutcome>)>,
    job_dir: PathBuf,
    poll_interval: std::time::Duration,
}

impl RunHandle {
    pub fn job_dir(&self) -> &Path {
        &self.job_dir
    }

    pub fn status(&self, key: &InstanceKey) -> Option<InstanceStatus> {
        self.board.status(key)
    }

    /// Stop instances that have not started their tool yet
    pub fn abort(&self) {
        warn!("Aborting run in {}", self.job_dir.display());
        self.board.abort();
    }

    /// Block until no instance of `stages` is active
    pub async fn wait(&self, stages: &[String]) {
        let keys: Vec<InstanceKey> = self
            .board
            .keys()
            .filter(|key| stages.contains(&key.stage))
            .cloned()
            .collect();
        self.board.wait(&keys, self.poll_interval).await;
    }

    /// Wait for every instance and collect their outcomes
    pub async fn join(self) -> RunReport {
        let (keys, handles): (Vec<_>, Vec<_>) = self.handles.into_iter().unzip();
        let results = join_all(handles).await;

        let outcomes = keys
            .into_iter()
            .zip(results)
            .map(|(key, result)| match result {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("Instance {} task failed: {}", key, e);
                    self.board.abort();
                    self.board.publish(&key, InstanceStatus::Failed);
                    let workdir = self.job_dir.join(key.dir_name());
                    let mut outcome = InstanceOutcome::new(key, workdir);
                    outcome.status = InstanceStatus::Failed;
                    outcome.error = Some(e.to_string());
                    outcome
                }
            })
            .collect();

        RunReport {
            job_dir: self.job_dir,
            outcomes,
        }
    }
}

/// Take `remote key` out of the configuration
fn scrub_credential(schema: &mut Schema) -> Option<String> {
    let key = schema.get(["remote", "key"]);
    if key.is_empty() {
        return None;
    }
    schema.set(["remote", "key"], Value::Null);
    Some(key.to_string())
}

/// Outcome of a remotely executed instance, read from its output manifest
fn remote_outcome(job_dir: &Path, key: InstanceKey, design: &str) -> InstanceOutcome {
    let manifest = output_manifest(job_dir, &key, design);
    let mut outcome = InstanceOutcome::new(key.clone(), job_dir.join(key.dir_name()));
    let mut instance = Schema::empty();
    if manifest.is_file() && instance.read_cfg(&manifest).is_ok() {
        outcome.status = InstanceStatus::Done;
        outcome.metrics = metric_record(&instance, &key.stage, key.index);
    } else {
        outcome.status = InstanceStatus::Failed;
        outcome.error = Some(format!("no output manifest at {}", manifest.display()));
    }
    outcome
}

/// Write instance metrics and per-stage status back into the configuration
fn apply_report(schema: &mut Schema, report: &RunReport) {
    let mut failed_stages = BTreeSet::new();
    for outcome in &report.outcomes {
        let key = &outcome.key;
        if outcome.status != InstanceStatus::Done {
            failed_stages.insert(key.stage.clone());
            continue;
        }
        for (name, value) in &outcome.metrics {
            schema.set(
                keypath!["metric", key.stage, key.index, REAL_GROUP, name],
                *value,
            );
        }
    }

    let stages: BTreeSet<&String> = report.outcomes.iter().map(|o| &o.key.stage).collect();
    for stage in stages {
        schema.set(["status", stage.as_str(), "active"], false);
        schema.set(
            ["status", stage.as_str(), "error"],
            failed_stages.contains(stage),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_steplist_defaults_to_depth_order() {
        let mut schema = Schema::new("top");
        schema.set("flowgraph import tool", "sh");
        schema.set("flowgraph syn tool", "sh");
        schema.set("flowgraph syn input", "import");
        let graph = FlowGraph::from_schema(&schema);
        assert_eq!(Scheduler::steplist(&schema, &graph), vec!["import", "syn"]);

        schema.set(["steplist"], vec!["syn"]);
        assert_eq!(Scheduler::steplist(&schema, &graph), vec!["syn"]);
    }

    #[test]
    fn test_scrub_credential() {
        let mut schema = Schema::new("top");
        assert_eq!(scrub_credential(&mut schema), None);

        schema.set("remote key", "secret");
        assert_eq!(scrub_credential(&mut schema).as_deref(), Some("secret"));
        assert!(schema.get("remote key").is_empty());
        assert!(!schema.has_error());
    }

    #[test]
    fn test_apply_report_sets_status_and_metrics() {
        let mut schema = Schema::new("top");
        let mut done = InstanceOutcome::new(InstanceKey::new("syn", 0), PathBuf::from("/tmp"));
        done.status = InstanceStatus::Done;
        done.metrics.insert("cells".to_string(), 12.0);
        let mut cancelled = InstanceOutcome::new(InstanceKey::new("place", 0), PathBuf::from("/tmp"));
        cancelled.status = InstanceStatus::Cancelled;

        let report = RunReport {
            job_dir: PathBuf::from("/tmp"),
            outcomes: vec![done, cancelled],
        };
        apply_report(&mut schema, &report);

        assert_eq!(schema.get("metric syn 0 real cells"), Value::Int(12));
        assert_eq!(schema.get("status syn error"), Value::Bool(false));
        assert_eq!(schema.get("status place error"), Value::Bool(true));
        assert_eq!(schema.get("status place active"), Value::Bool(false));
    }

    #[tokio::test]
    async fn test_run_rejects_invalid_config() {
        let scheduler = Scheduler::new(ToolRegistry::with_command_fallback()).unwrap();
        let mut schema = Schema::new("top");
        assert!(matches!(
            scheduler.run(&mut schema).await,
            Err(EdaFlowError::Config(_))
        ));
    }
}
