//! Execution of a single stage instance

use super::liveness::LivenessBoard;
use super::select::{InputSelector, SelectionContext};
use crate::collect::{collect, copy_dir};
use crate::error::{EdaFlowError, Result};
use crate::executors::ExecutorTrait;
use crate::flowgraph::{FlowGraph, Stage};
use crate::keypath;
use crate::models::{InstanceKey, InstanceOutcome, InstanceStatus, ToolCommand};
use crate::schema::{Schema, WriteOptions};
use crate::score::{metric_names, metric_record, output_manifest, REAL_GROUP};
use crate::settings::SchedulerSettings;
use crate::telemetry::RunTelemetry;
use crate::tools::{log_file_name, StepContext, ToolRegistry};
use chrono::Utc;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, info_span, Instrument};

/// Collaborators shared by every instance of one run
pub(crate) struct RunEnv {
    pub tools: ToolRegistry,
    pub executor: Arc<dyn ExecutorTrait>,
    pub selector: Arc<dyn InputSelector>,
    pub settings: SchedulerSettings,
    pub telemetry: RunTelemetry,
    pub job_dir: PathBuf,
    /// Working directories and inputs were staged by a remote front end
    pub prestaged: bool,
}

/// One stage instance with its own configuration snapshot
pub(crate) struct StepRunner {
    pub key: InstanceKey,
    pub schema: Schema,
    pub graph: Arc<FlowGraph>,
    pub board: Arc<LivenessBoard>,
    pub env: Arc<RunEnv>,
}

impl StepRunner {
    /// Wait for inputs, run the tool and publish the final status
    pub async fn run(self) -> InstanceOutcome {
        let span = info_span!("instance", stage = %self.key.stage, index = self.key.index);
        self.run_instance().instrument(span).await
    }

    async fn run_instance(mut self) -> InstanceOutcome {
        let start = Instant::now();
        let workdir = self.env.job_dir.join(self.key.dir_name());
        let mut outcome = InstanceOutcome::new(self.key.clone(), workdir.clone());

        self.board.publish(&self.key, InstanceStatus::Waiting);
        let upstream = self.upstream();
        if let Err(e) = self
            .board
            .wait_for_upstream(&self.key, &upstream, self.env.settings.wait_timeout())
            .await
        {
            let status = match e {
                EdaFlowError::WaitTimeout { .. } => {
                    error!("{}", e);
                    self.board.abort();
                    InstanceStatus::Failed
                }
                _ => {
                    info!("Skipping {}: run aborted", self.key);
                    InstanceStatus::Cancelled
                }
            };
            outcome.error = Some(e.to_string());
            return self.finish(outcome, status, start);
        }

        self.board.publish(&self.key, InstanceStatus::Running);
        info!("Running {}", self.key);
        outcome.started_at = Utc::now();
        self.env.telemetry.inc_active();
        let result = self.execute(&workdir).await;
        self.env.telemetry.dec_active();

        outcome.metrics = metric_record(&self.schema, &self.key.stage, self.key.index);
        match result {
            Ok(exit_code) => {
                outcome.exit_code = exit_code;
                self.finish(outcome, InstanceStatus::Done, start)
            }
            Err(e) => {
                error!(critical = true, "{}", e);
                if let EdaFlowError::ToolFailed { code, .. } = &e {
                    outcome.exit_code = *code;
                }
                outcome.error = Some(e.to_string());
                self.board.abort();
                self.finish(outcome, InstanceStatus::Failed, start)
            }
        }
    }

    fn finish(
        &self,
        mut outcome: InstanceOutcome,
        status: InstanceStatus,
        start: Instant,
    ) -> InstanceOutcome {
        outcome.status = status;
        outcome.duration = start.elapsed();
        self.env.telemetry.record_instance(
            &self.key.stage,
            &status.to_string(),
            outcome.duration.as_secs_f64(),
        );
        self.board.publish(&self.key, status);
        outcome
    }

    /// Every replica of every input stage
    fn upstream(&self) -> Vec<InstanceKey> {
        self.graph
            .inputs(&self.key.stage)
            .iter()
            .flat_map(|input| {
                let nproc = self.graph.stage(input).map(|s| s.nproc).unwrap_or(1);
                (0..nproc).map(move |index| InstanceKey::new(input.as_str(), index))
            })
            .collect()
    }

    async fn execute(&mut self, workdir: &Path) -> Result<Option<i32>> {
        let step = self.key.stage.clone();
        let index = self.key.index;
        let stage = self
            .graph
            .stage(&step)
            .cloned()
            .ok_or_else(|| EdaFlowError::Config(format!("stage '{}' is not in the flowgraph", step)))?;
        let tool = stage
            .tool
            .clone()
            .ok_or_else(|| EdaFlowError::Config(format!("stage '{}' has no tool", step)))?;

        let now = Utc::now();
        self.schema.set(
            keypath!["record", step, index, "date"],
            now.format("%Y-%m-%d").to_string(),
        );
        self.schema.set(
            keypath!["record", step, index, "time"],
            now.format("%H:%M:%S").to_string(),
        );
        self.schema.set(["arg", "step"], step.as_str());
        self.schema.set(["arg", "index"], index);

        let dir = workdir.to_path_buf();
        let prestaged = self.env.prestaged;
        run_blocking(move || prepare_workdir(&dir, prestaged)).await?;
        self.stage_inputs(&stage, workdir).await?;

        let driver = self
            .env
            .tools
            .get(&tool)
            .ok_or_else(|| EdaFlowError::UnknownTool(tool.clone()))?;
        let ctx = StepContext {
            step: &step,
            index,
            tool: &tool,
            workdir,
        };
        driver
            .setup_tool(&mut self.schema, &ctx)
            .map_err(|e| EdaFlowError::Other(format!("setup of tool '{}' failed: {}", tool, e)))?;

        let exe = self.schema.get(ctx.eda_key("exe")).to_string();
        if exe.is_empty() {
            return Err(EdaFlowError::ExecutableNotFound(tool.clone()));
        }
        let env = self.tool_env();
        let lookup = ToolCommand {
            script: String::new(),
            workdir: workdir.to_path_buf(),
            env: env.clone(),
        };
        let found = self
            .env
            .executor
            .locate(&exe, &lookup)
            .await
            .map_err(|e| EdaFlowError::Other(format!("failed to resolve '{}': {}", exe, e)))?;
        if !found {
            return Err(EdaFlowError::ExecutableNotFound(exe));
        }
        if !driver.check_version(&self.schema, &ctx) {
            return Err(EdaFlowError::Config(format!(
                "version check failed for tool '{}'",
                tool
            )));
        }

        if self.schema.get(ctx.eda_key("copy")).as_bool() == Some(true) {
            let refdirs: Vec<PathBuf> = self
                .schema
                .get(ctx.eda_key("refdir"))
                .to_strings()
                .iter()
                .map(|dir| self.schema.resolve_path(dir))
                .collect();
            let dest = workdir.to_path_buf();
            run_blocking(move || {
                for src in &refdirs {
                    debug!(refdir = %src.display(), "Copying reference directory");
                    copy_dir(src, &dest)?;
                }
                Ok(())
            })
            .await?;
        }

        self.write_manifests(workdir)?;

        let script = self.command_line(&ctx, &exe);
        write_run_script(workdir, &script)?;

        for name in metric_names(&self.schema) {
            self.schema
                .set(keypath!["metric", step, index, REAL_GROUP, name], 0);
        }

        let command = ToolCommand {
            script,
            workdir: workdir.to_path_buf(),
            env,
        };
        let result = self
            .env
            .executor
            .execute(&command)
            .await
            .map_err(|e| EdaFlowError::Other(format!("failed to run '{}': {}", exe, e)))?;
        self.schema
            .set(ctx.metric_key("runtime"), result.duration.as_secs_f64());

        if !result.success() {
            return Err(EdaFlowError::ToolFailed {
                instance: self.key.to_string(),
                code: result.exit_code,
                log: workdir.join(log_file_name(&exe)).display().to_string(),
            });
        }

        let status = driver.post_process(&mut self.schema, &ctx);
        if status != 0 {
            return Err(EdaFlowError::PostProcessFailed {
                instance: self.key.to_string(),
                status,
            });
        }

        let design = self.schema.get(["design"]).to_string();
        self.schema.write_cfg(
            output_manifest(&self.env.job_dir, &self.key, &design),
            WriteOptions::pruned(),
        )?;
        info!("Finished {} in {:.1}s", self.key, result.duration.as_secs_f64());
        Ok(result.exit_code)
    }

    /// Source stages collect design files; other stages copy the outputs of
    /// one selected replica of each input stage
    async fn stage_inputs(&self, stage: &Stage, workdir: &Path) -> Result<()> {
        let inputs_dir = workdir.join("inputs");
        if stage.is_source() {
            let schema = self.schema.clone();
            let copied = run_blocking(move || collect(&schema, &inputs_dir)).await?;
            debug!(files = copied, "Collected design inputs");
            return Ok(());
        }
        if self.env.prestaged {
            return Ok(());
        }

        let mut sources = Vec::with_capacity(stage.inputs.len());
        for input in &stage.inputs {
            let input_stage = self.graph.stage(input).ok_or_else(|| EdaFlowError::MissingInput {
                stage: stage.name.clone(),
                input: input.clone(),
            })?;
            let ctx = SelectionContext {
                schema: &self.schema,
                job_dir: &self.env.job_dir,
            };
            let chosen = InstanceKey::new(input.as_str(), self.env.selector.select(&ctx, input_stage));
            let src = self.env.job_dir.join(chosen.dir_name()).join("outputs");
            if !src.is_dir() {
                return Err(EdaFlowError::Other(format!(
                    "outputs of '{}' not found at {}",
                    chosen,
                    src.display()
                )));
            }
            info!("Staging outputs of {} as inputs", chosen);
            sources.push(src);
        }
        run_blocking(move || {
            fs::create_dir_all(&inputs_dir)?;
            for src in &sources {
                copy_dir(src, &inputs_dir)?;
            }
            Ok(())
        })
        .await
    }

    fn write_manifests(&self, workdir: &Path) -> Result<()> {
        let name = &self.env.settings.manifest_name;
        self.schema
            .write_cfg(workdir.join(format!("{}.json", name)), WriteOptions::default())?;
        self.schema
            .write_cfg(workdir.join(format!("{}.yaml", name)), WriteOptions::default())?;
        self.schema.write_cfg(
            workdir.join(format!("{}.tcl", name)),
            WriteOptions {
                prune: true,
                abspath: true,
            },
        )?;
        Ok(())
    }

    /// Executable, options and scripts with output sent to the tool log
    ///
    /// Quiet runs redirect everything to the log unless the stage is a
    /// breakpoint; otherwise output is also echoed and the tool's own exit
    /// status is preserved through the pipe.
    fn command_line(&self, ctx: &StepContext<'_>, exe: &str) -> String {
        let mut words = vec![exe.to_string()];
        words.extend(
            self.schema
                .get(keypath!["eda", ctx.tool, ctx.step, ctx.index, "option", "cmdline"])
                .to_strings(),
        );
        for script in self.schema.get(ctx.eda_key("script")).to_strings() {
            words.push(self.schema.resolve_path(&script).display().to_string());
        }
        let cmdline = words.join(" ");

        let log = log_file_name(exe);
        let quiet = self.schema.get(["quiet"]).as_bool().unwrap_or(false);
        let breakpoint = self
            .schema
            .get(["bkpt"])
            .to_strings()
            .iter()
            .any(|s| s == ctx.step);
        if quiet && !breakpoint {
            format!("{} > {} 2>&1", cmdline, log)
        } else {
            format!("{} 2>&1 | tee {} ; (exit ${{PIPESTATUS[0]}} )", cmdline, log)
        }
    }

    /// `env` parameters as process environment
    fn tool_env(&self) -> HashMap<String, String> {
        self.schema
            .getkeys(["env"])
            .into_iter()
            .map(|var| {
                let value = self.schema.get(["env", var.as_str()]).to_string();
                (var, value)
            })
            .collect()
    }
}

/// Run filesystem work on the blocking pool so large trees do not stall the
/// workers other instances share
async fn run_blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| EdaFlowError::Other(format!("staging task failed: {}", e)))?
}

/// Fresh working directory with `outputs/` and `reports/`
fn prepare_workdir(workdir: &Path, prestaged: bool) -> Result<()> {
    if workdir.exists() && !prestaged {
        fs::remove_dir_all(workdir)?;
    }
    fs::create_dir_all(workdir.join("outputs"))?;
    fs::create_dir_all(workdir.join("reports"))?;
    Ok(())
}

/// Replayable copy of the command in `run.sh`
fn write_run_script(workdir: &Path, script: &str) -> Result<()> {
    let path = workdir.join("run.sh");
    fs::write(&path, format!("#!/bin/bash\n{}\n", script))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
    }
    Ok(())
}
