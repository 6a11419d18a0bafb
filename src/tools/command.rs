//! Generic command-line tool driver

use super::{log_file_name, StepContext, ToolDriver};
use crate::schema::Schema;
use std::fs;
use tracing::{debug, error, warn};

/// Log line prefix for reported metrics: `METRIC <name> <value>`
pub const METRIC_PREFIX: &str = "METRIC";

/// Driver for tools configured entirely through `eda` parameters
///
/// Setup defaults the executable to the tool name. Post-processing scans
/// `<exe>.log` in the working directory for `METRIC <name> <value>` lines and
/// records each as a real metric of the instance. A metric that cannot be
/// recorded (unknown name, value of the wrong type) fails the instance.
#[derive(Debug, Clone, Default)]
pub struct CommandTool;

impl CommandTool {
    pub fn new() -> Self {
        Self
    }
}

impl ToolDriver for CommandTool {
    fn setup_tool(&self, schema: &mut Schema, ctx: &StepContext<'_>) -> anyhow::Result<()> {
        let exe_key = ctx.eda_key("exe");
        if schema.get(&exe_key).is_empty() {
            debug!(tool = ctx.tool, "Defaulting executable to tool name");
            schema.set(&exe_key, ctx.tool);
        }
        Ok(())
    }

    fn post_process(&self, schema: &mut Schema, ctx: &StepContext<'_>) -> i32 {
        let exe = schema.get(ctx.eda_key("exe")).to_string();
        let log = ctx.workdir.join(log_file_name(&exe));
        let content = match fs::read_to_string(&log) {
            Ok(content) => content,
            Err(e) => {
                debug!(log = %log.display(), error = %e, "No tool log to scan");
                return 0;
            }
        };

        let mut rejected = 0;
        for line in content.lines() {
            let mut words = line.split_whitespace();
            if words.next() != Some(METRIC_PREFIX) {
                continue;
            }
            match (words.next(), words.next()) {
                (Some(name), Some(value)) => {
                    debug!(metric = name, value, "Recording metric");
                    if let Err(e) = schema.try_set(ctx.metric_key(name), value) {
                        error!(metric = name, error = %e, "Unable to record metric");
                        rejected += 1;
                    }
                }
                _ => warn!(line, "Malformed metric line"),
            }
        }
        if rejected > 0 {
            1
        } else {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Value;
    use tempfile::TempDir;

    #[test]
    fn test_setup_defaults_exe() {
        let temp = TempDir::new().unwrap();
        let mut schema = Schema::new("top");
        let ctx = StepContext {
            step: "syn",
            index: 0,
            tool: "yosys",
            workdir: temp.path(),
        };
        CommandTool::new().setup_tool(&mut schema, &ctx).unwrap();
        assert_eq!(schema.get(ctx.eda_key("exe")), Value::from("yosys"));

        // User-set executables are kept
        schema.set(ctx.eda_key("exe"), "/opt/yosys/bin/yosys");
        CommandTool::new().setup_tool(&mut schema, &ctx).unwrap();
        assert_eq!(
            schema.get(ctx.eda_key("exe")),
            Value::from("/opt/yosys/bin/yosys")
        );
    }

    #[test]
    fn test_post_process_reads_metrics() {
        let temp = TempDir::new().unwrap();
        fs::write(
            temp.path().join("yosys.log"),
            "starting\nMETRIC cells 1200\nMETRIC area_total 35.5\nMETRIC broken\n",
        )
        .unwrap();

        let mut schema = Schema::new("top");
        let ctx = StepContext {
            step: "syn",
            index: 0,
            tool: "yosys",
            workdir: temp.path(),
        };
        schema.set(ctx.eda_key("exe"), "/usr/bin/yosys");

        assert_eq!(CommandTool::new().post_process(&mut schema, &ctx), 0);
        assert_eq!(schema.get(ctx.metric_key("cells")), Value::Int(1200));
        assert_eq!(schema.get(ctx.metric_key("area_total")), Value::Float(35.5));
        assert!(!schema.has_error());
    }

    #[test]
    fn test_post_process_rejects_unrecordable_metrics() {
        let temp = TempDir::new().unwrap();
        fs::write(
            temp.path().join("yosys.log"),
            "METRIC cells 1.5\nMETRIC slack_worst 3\nMETRIC nets 80\n",
        )
        .unwrap();

        let mut schema = Schema::new("top");
        let ctx = StepContext {
            step: "syn",
            index: 0,
            tool: "yosys",
            workdir: temp.path(),
        };
        schema.set(ctx.eda_key("exe"), "yosys");

        assert_ne!(CommandTool::new().post_process(&mut schema, &ctx), 0);
        assert_eq!(schema.get(ctx.metric_key("cells")), Value::Null);
        assert_eq!(schema.get(ctx.metric_key("nets")), Value::Int(80));
    }
}
