//! CLI interface for edaflow

use crate::collect;
use crate::executors::shell::ShellExecutor;
use crate::executors::ExecutorTrait;
use crate::flowgraph::FlowGraph;
use crate::logging::{init_logging, LogConfig, LogFormat, LogLevel};
use crate::scheduler::{FirstCandidate, InputSelector, MinScore, Scheduler};
use crate::schema::{Field, KeyPath, ScalarKind, Schema, WriteOptions};
use crate::score;
use crate::settings::SchedulerSettings;
use crate::target::TargetRegistry;
use crate::tools::ToolRegistry;
use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

/// edaflow - Parameter-tree driven hardware compilation flows
#[derive(Parser, Debug)]
#[command(name = "edaflow")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Parameter-tree driven hardware compilation flows", long_about = None)]
pub struct Cli {
    /// Log level (critical, error, warning, info, debug, trace); overrides
    /// the `loglevel` parameter
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Log format (json, pretty or compact)
    #[arg(long, default_value = "pretty", global = true)]
    pub log_format: String,

    #[command(subcommand)]
    pub command: Commands,
}

/// Options that build the configuration every command works on
#[derive(Args, Debug, Clone, Default)]
pub struct ConfigArgs {
    /// Manifest to merge (.json or .yaml); repeatable
    #[arg(long = "cfg", value_name = "FILE")]
    pub cfg: Vec<PathBuf>,

    /// Target to load, e.g. ice40up5k_fpgaflow with `-p "mode fpga"`.
    /// ASIC targets need their platform registered by the embedding program
    #[arg(long)]
    pub target: Option<String>,

    /// Design name
    #[arg(long)]
    pub design: Option<String>,

    /// Parameter as "<key path> <value>"; a bare bool key path sets true
    #[arg(short = 'p', long = "param", value_name = "KEYPATH VALUE")]
    pub param: Vec<String>,

    /// Runner settings file
    #[arg(long)]
    pub settings: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the flow
    Run {
        #[command(flatten)]
        config: ConfigArgs,

        /// How downstream stages pick among upstream replicas
        #[arg(long, value_enum, default_value = "first")]
        select: SelectPolicy,
    },

    /// Validate the configuration and flow graph
    Check {
        #[command(flatten)]
        config: ConfigArgs,
    },

    /// List stages in execution order
    Steps {
        #[command(flatten)]
        config: ConfigArgs,
    },

    /// List the keys below a key path, or every leaf path
    Keys {
        #[command(flatten)]
        config: ConfigArgs,

        /// Branch key path; omit for every leaf path
        keypath: Option<String>,
    },

    /// Print a parameter
    Get {
        #[command(flatten)]
        config: ConfigArgs,

        /// Leaf key path
        keypath: String,

        /// Field to read (value, defvalue, switch, type, help, ...)
        #[arg(long, default_value = "value")]
        field: String,
    },

    /// Write the configuration as JSON, YAML or TCL
    Write {
        #[command(flatten)]
        config: ConfigArgs,

        /// Output manifest; the format follows the extension
        output: PathBuf,

        /// Keep only set values
        #[arg(long)]
        prune: bool,

        /// Rewrite file and directory values as absolute paths
        #[arg(long)]
        abspath: bool,
    },

    /// Compute SHA-256 digests of hashable file parameters
    Hash {
        #[command(flatten)]
        config: ConfigArgs,

        /// Write the hashed configuration here
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the metric table of the last run
    Summary {
        #[command(flatten)]
        config: ConfigArgs,
    },

    /// Print the flow graph in Graphviz DOT
    Graph {
        #[command(flatten)]
        config: ConfigArgs,

        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Upstream replica selection for the `run` command
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum SelectPolicy {
    /// Always the first replica
    First,
    /// The replica with the lowest weighted metric score
    MinScore,
}

impl Cli {
    /// Initialize logging based on CLI arguments
    pub fn init_logging(&self) -> anyhow::Result<()> {
        let level: LogLevel = self
            .log_level
            .as_deref()
            .unwrap_or(DEFAULT_LOG_LEVEL)
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))?;
        let format: LogFormat = self
            .log_format
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))?;
        init_logging(&LogConfig { level, format })
    }

    /// Execute the CLI command
    pub async fn execute(&self) -> anyhow::Result<()> {
        match &self.command {
            Commands::Run { config, select } => self.run_flow(config, *select).await,
            Commands::Check { config } => {
                let schema = self.load(config)?;
                schema.check()?;
                println!("✓ Configuration is valid");
                println!("  Design: {}", schema.get(["design"]));
                println!("  Stages: {}", schema.getsteps().join(" -> "));
                Ok(())
            }
            Commands::Steps { config } => {
                let schema = self.load(config)?;
                for step in schema.getsteps() {
                    println!("{}", step);
                }
                Ok(())
            }
            Commands::Keys { config, keypath } => {
                let schema = self.load(config)?;
                match keypath {
                    Some(path) => {
                        for key in schema.getkeys(path.as_str()) {
                            println!("{}", key);
                        }
                    }
                    None => {
                        for key in schema.allkeys() {
                            println!("{}", key);
                        }
                    }
                }
                ensure_clean(&schema)
            }
            Commands::Get {
                config,
                keypath,
                field,
            } => {
                let schema = self.load(config)?;
                let field: Field = field
                    .parse()
                    .map_err(|e: String| anyhow::anyhow!(e))?;
                println!("{}", schema.get_field(keypath.as_str(), field));
                ensure_clean(&schema)
            }
            Commands::Write {
                config,
                output,
                prune,
                abspath,
            } => {
                let schema = self.load(config)?;
                let options = WriteOptions {
                    prune: *prune,
                    abspath: *abspath,
                };
                schema.write_cfg(output, options)?;
                info!("Wrote configuration to {}", output.display());
                Ok(())
            }
            Commands::Hash { config, output } => {
                let mut schema = self.load(config)?;
                let count = collect::hash(&mut schema);
                schema.for_each_leaf(|path, leaf| {
                    if let Some(digests) = &leaf.hash {
                        if !digests.is_empty() {
                            println!("{}: {}", path, digests.join(" "));
                        }
                    }
                });
                info!("Hashed {} files", count);
                if let Some(output) = output {
                    schema.write_cfg(output, WriteOptions::pruned())?;
                }
                Ok(())
            }
            Commands::Summary { config } => {
                let schema = self.load(config)?;
                let graph = FlowGraph::from_schema(&schema);
                print!("{}", score::summary(&schema, &Scheduler::steplist(&schema, &graph)));
                Ok(())
            }
            Commands::Graph { config, output } => {
                let schema = self.load(config)?;
                let dot = FlowGraph::from_schema(&schema).to_dot();
                match output {
                    Some(path) => {
                        std::fs::write(path, dot)
                            .with_context(|| format!("failed to write {}", path.display()))?;
                        info!("Wrote flow graph to {}", path.display());
                    }
                    None => print!("{}", dot),
                }
                Ok(())
            }
        }
    }

    /// Build the configuration from command-line options
    ///
    /// Applied in order: design, log level, manifests, parameters, then the
    /// target, so platform and flow setup see the user's settings.
    pub fn load(&self, config: &ConfigArgs) -> anyhow::Result<Schema> {
        let mut schema = Schema::new(config.design.as_deref().unwrap_or_default());
        if let Some(level) = &self.log_level {
            let level: LogLevel = level.parse().map_err(|e: String| anyhow::anyhow!(e))?;
            schema.set(["loglevel"], level.as_param());
        }
        for cfg in &config.cfg {
            schema
                .read_cfg(cfg)
                .with_context(|| format!("failed to read {}", cfg.display()))?;
        }
        for param in &config.param {
            apply_param(&mut schema, param)?;
        }

        let has_target = config.target.is_some() || !schema.get(["target"]).is_empty();
        if has_target {
            TargetRegistry::builtin().load(&mut schema, config.target.as_deref())?;
        }
        ensure_clean(&schema)?;
        Ok(schema)
    }

    async fn run_flow(&self, config: &ConfigArgs, select: SelectPolicy) -> anyhow::Result<()> {
        let mut schema = self.load(config)?;
        let settings = SchedulerSettings::load(config.settings.as_deref())?;
        let selector: Arc<dyn InputSelector> = match select {
            SelectPolicy::First => Arc::new(FirstCandidate),
            SelectPolicy::MinScore => Arc::new(MinScore),
        };

        let executor = ShellExecutor::new();
        executor
            .health_check()
            .await
            .context("shell executor is unavailable")?;

        let scheduler = Scheduler::new(ToolRegistry::with_command_fallback())?
            .with_executor(Arc::new(executor))
            .with_selector(selector)
            .with_settings(settings);

        let report = scheduler.run(&mut schema).await?;
        let steps: Vec<String> = {
            let mut seen = Vec::new();
            for outcome in &report.outcomes {
                if !seen.contains(&outcome.key.stage) {
                    seen.push(outcome.key.stage.clone());
                }
            }
            seen
        };
        print!("{}", score::summary(&schema, &steps));

        if !report.is_success() {
            let failed: Vec<String> = report.failed().map(|o| o.key.to_string()).collect();
            error!("Run failed: {}", failed.join(", "));
            bail!("{} instance(s) failed", failed.len());
        }
        Ok(())
    }
}

/// Log level when `--log-level` is not given
const DEFAULT_LOG_LEVEL: &str = "warning";

/// Apply one `-p "<key path> <value>"` option
///
/// List leaves append the value, scalar leaves are overwritten and a bare
/// key path naming a bool leaf sets it to true.
fn apply_param(schema: &mut Schema, param: &str) -> anyhow::Result<()> {
    let words: Vec<&str> = param.split_whitespace().collect();
    if words.is_empty() {
        bail!("empty parameter");
    }

    // Longest prefix that names a leaf is the key path
    for split in (1..=words.len()).rev() {
        let path = KeyPath::from(&words[..split]);
        let Some(kind) = schema.leaf_type(&path) else {
            continue;
        };
        let rest = &words[split..];
        if rest.is_empty() {
            if kind.kind == ScalarKind::Bool && !kind.list {
                schema.set(&path, true);
                return Ok(());
            }
            bail!("parameter '{}' needs a value", path);
        }
        let value = rest.join(" ");
        if kind.list {
            schema.add(&path, value);
        } else {
            schema.set(&path, value);
        }
        return Ok(());
    }
    bail!("'{}' does not name a parameter", param)
}

fn ensure_clean(schema: &Schema) -> anyhow::Result<()> {
    if schema.has_error() {
        bail!("configuration errors were reported, see log");
    }
    Ok(())
}
