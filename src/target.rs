//! Target loading
//!
//! A target such as `freepdk45_asicflow` names a technology platform and an
//! optional flow. Platforms and flows are collaborators registered in a
//! [`TargetRegistry`]; loading a target runs their setup hooks against the
//! parameter tree. The built-in registry carries flows only, so ASIC targets
//! need their platform registered first. FPGA targets name a part instead.

use crate::error::{EdaFlowError, Result};
use crate::schema::Schema;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info};

/// Technology platform collaborator
pub trait Platform: Send + Sync {
    fn setup_platform(&self, schema: &mut Schema);
    fn setup_libs(&self, schema: &mut Schema);
    fn setup_design(&self, schema: &mut Schema);
}

/// Flow collaborator: wires stages and tools into the flow graph
pub trait Flow: Send + Sync {
    fn setup_flow(&self, schema: &mut Schema, platform: &str);
}

/// A linear pipeline of (stage, tool) pairs, each consuming the previous
#[derive(Debug, Clone)]
pub struct LinearFlow {
    stages: Vec<(String, String)>,
}

impl LinearFlow {
    pub fn new<I, S, T>(stages: I) -> Self
    where
        I: IntoIterator<Item = (S, T)>,
        S: Into<String>,
        T: Into<String>,
    {
        Self {
            stages: stages
                .into_iter()
                .map(|(s, t)| (s.into(), t.into()))
                .collect(),
        }
    }
}

impl Flow for LinearFlow {
    fn setup_flow(&self, schema: &mut Schema, _platform: &str) {
        for (i, (stage, tool)) in self.stages.iter().enumerate() {
            if i > 0 {
                let previous = self.stages[i - 1].0.as_str();
                schema.add(["flowgraph", stage.as_str(), "input"], previous);
            }
            schema.set(["flowgraph", stage.as_str(), "tool"], tool.as_str());
        }
    }
}

/// Open FPGA pipeline; place-and-route and bitstream tools follow the part
#[derive(Debug, Clone, Copy, Default)]
pub struct FpgaFlow;

impl Flow for FpgaFlow {
    fn setup_flow(&self, schema: &mut Schema, partname: &str) {
        let (apr, bitstream) = if partname.starts_with("ice") {
            ("nextpnr", "icepack")
        } else {
            ("openfpga", "openfpga")
        };
        LinearFlow::new([
            ("import", "verilator"),
            ("syn", "yosys"),
            ("apr", apr),
            ("bitstream", bitstream),
        ])
        .setup_flow(schema, partname);
    }
}

/// The open-source ASIC pipeline from import to export
pub fn asic_flow() -> LinearFlow {
    LinearFlow::new([
        ("import", "verilator"),
        ("syn", "yosys"),
        ("synopt", "openroad"),
        ("floorplan", "openroad"),
        ("place", "openroad"),
        ("cts", "openroad"),
        ("route", "openroad"),
        ("dfm", "openroad"),
        ("export", "klayout"),
    ])
}

/// Platform and flow collaborators by name
#[derive(Clone, Default)]
pub struct TargetRegistry {
    platforms: HashMap<String, Arc<dyn Platform>>,
    flows: HashMap<String, Arc<dyn Flow>>,
}

impl TargetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in `asicflow` and `fpgaflow`
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register_flow("asicflow", Arc::new(asic_flow()));
        registry.register_flow("fpgaflow", Arc::new(FpgaFlow));
        registry
    }

    pub fn register_platform(&mut self, name: impl Into<String>, platform: Arc<dyn Platform>) {
        self.platforms.insert(name.into(), platform);
    }

    pub fn register_flow(&mut self, name: impl Into<String>, flow: Arc<dyn Flow>) {
        self.flows.insert(name.into(), flow);
    }

    /// Load the target named by `target`, or by the `target` parameter
    ///
    /// In `fpga` mode the platform token is stored as `fpga partname`
    /// instead of loading a platform.
    pub fn load(&self, schema: &mut Schema, target: Option<&str>) -> Result<()> {
        if let Some(target) = target {
            schema.set(["target"], target);
        }
        let target = schema.get(["target"]).to_string();
        if target.is_empty() {
            error!(critical = true, "Target not defined");
            return Err(EdaFlowError::Target("target not defined".to_string()));
        }

        let tokens: Vec<&str> = target.split('_').collect();
        if tokens.len() > 2 {
            error!(critical = true, target = %target, "Target should have at most two tokens");
            return Err(EdaFlowError::Target(format!(
                "'{}' should be <platform>_<flow>",
                target
            )));
        }
        let platform = tokens[0];

        if schema.get(["mode"]).as_str() == Some("fpga") {
            info!(partname = platform, "Setting FPGA part");
            schema.set(["fpga", "partname"], platform);
        } else {
            let module = self.platforms.get(platform).ok_or_else(|| {
                error!(critical = true, platform, "Platform not found");
                EdaFlowError::Target(format!("platform '{}' not found", platform))
            })?;
            info!(platform, "Loading platform");
            module.setup_platform(schema);
            module.setup_libs(schema);
            module.setup_design(schema);
        }

        if let Some(&flow_name) = tokens.get(1) {
            let flow = self.flows.get(flow_name).ok_or_else(|| {
                error!(critical = true, flow = flow_name, "Flow not found");
                EdaFlowError::Target(format!("flow '{}' not found", flow_name))
            })?;
            info!(flow = flow_name, "Loading flow");
            flow.setup_flow(schema, platform);
        }
        Ok(())
    }
}
