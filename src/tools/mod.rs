//! Tool driver collaborators
//!
//! Each tool plugs into the scheduler through a [`ToolDriver`]: a setup hook
//! that fills in executable and option parameters for a stage instance, and
//! a post-process hook that harvests metrics from the tool's output. Drivers
//! are looked up by tool name in a [`ToolRegistry`].

mod command;

pub use command::CommandTool;

use crate::keypath;
use crate::schema::{KeyPath, Schema};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Identifies the instance a hook is called for
#[derive(Debug, Clone, Copy)]
pub struct StepContext<'a> {
    pub step: &'a str,
    pub index: usize,
    pub tool: &'a str,
    pub workdir: &'a Path,
}

impl StepContext<'_> {
    /// `eda <tool> <step> <index> <field...>`
    pub fn eda_key(&self, field: &str) -> KeyPath {
        keypath!["eda", self.tool, self.step, self.index, field]
    }

    /// `metric <step> <index> real <name>`
    pub fn metric_key(&self, name: &str) -> KeyPath {
        keypath!["metric", self.step, self.index, crate::score::REAL_GROUP, name]
    }
}

/// Log file the generated command line writes for an executable
pub fn log_file_name(exe: &str) -> String {
    let base = Path::new(exe)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| exe.to_string());
    format!("{}.log", base)
}

/// Per-tool setup and post-processing
pub trait ToolDriver: Send + Sync {
    /// Populate executable, version, option and thread parameters
    fn setup_tool(&self, schema: &mut Schema, ctx: &StepContext<'_>) -> anyhow::Result<()>;

    /// Parse tool output into metrics; 0 means success
    fn post_process(&self, schema: &mut Schema, ctx: &StepContext<'_>) -> i32;

    /// Accept or reject the installed tool version
    fn check_version(&self, _schema: &Schema, _ctx: &StepContext<'_>) -> bool {
        true
    }
}

/// Tool drivers by name
#[derive(Clone, Default)]
pub struct ToolRegistry {
    drivers: HashMap<String, Arc<dyn ToolDriver>>,
    fallback: Option<Arc<dyn ToolDriver>>,
}

impl ToolRegistry {
    /// Empty registry; unknown tools are an error
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry that drives unknown tools with [`CommandTool`]
    pub fn with_command_fallback() -> Self {
        Self {
            drivers: HashMap::new(),
            fallback: Some(Arc::new(CommandTool::new())),
        }
    }

    pub fn register(&mut self, tool: impl Into<String>, driver: Arc<dyn ToolDriver>) {
        self.drivers.insert(tool.into(), driver);
    }

    pub fn get(&self, tool: &str) -> Option<Arc<dyn ToolDriver>> {
        self.drivers
            .get(tool)
            .cloned()
            .or_else(|| self.fallback.clone())
    }

    pub fn contains(&self, tool: &str) -> bool {
        self.drivers.contains_key(tool)
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut tools: Vec<&String> = self.drivers.keys().collect();
        tools.sort();
        f.debug_struct("ToolRegistry")
            .field("tools", &tools)
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullTool;

    impl ToolDriver for NullTool {
        fn setup_tool(&self, _schema: &mut Schema, _ctx: &StepContext<'_>) -> anyhow::Result<()> {
            Ok(())
        }

        fn post_process(&self, _schema: &mut Schema, _ctx: &StepContext<'_>) -> i32 {
            0
        }
    }

    #[test]
    fn test_registry_lookup() {
        let mut registry = ToolRegistry::new();
        assert!(registry.get("yosys").is_none());

        registry.register("yosys", Arc::new(NullTool));
        assert!(registry.contains("yosys"));
        assert!(registry.get("yosys").is_some());
        assert!(registry.get("openroad").is_none());

        let fallback = ToolRegistry::with_command_fallback();
        assert!(fallback.get("openroad").is_some());
        assert!(!fallback.contains("openroad"));
    }

    #[test]
    fn test_log_file_name_uses_basename() {
        assert_eq!(log_file_name("/usr/bin/yosys"), "yosys.log");
        assert_eq!(log_file_name("sh"), "sh.log");
    }

    #[test]
    fn test_step_context_keys() {
        let workdir = Path::new("/tmp");
        let ctx = StepContext {
            step: "syn",
            index: 1,
            tool: "yosys",
            workdir,
        };
        assert_eq!(ctx.eda_key("exe").to_string(), "eda yosys syn 1 exe");
        assert_eq!(ctx.metric_key("cells").to_string(), "metric syn 1 real cells");
    }
}
