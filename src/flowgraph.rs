//! Flow graph model for stage dependency resolution
//!
//! Stages and their input edges are read from the `flowgraph` family of the
//! parameter tree. Ordering is by longest input chain, which is consistent
//! with dependencies but does not order unrelated stages; the scheduler's
//! explicit waits enforce real execution order.

use crate::error::{EdaFlowError, Result};
use crate::models::InstanceKey;
use crate::schema::Schema;
use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::Write as _;

/// One named stage of the flow
#[derive(Debug, Clone, PartialEq)]
pub struct Stage {
    pub name: String,
    pub inputs: Vec<String>,
    pub nproc: usize,
    pub tool: Option<String>,
    pub showtool: Option<String>,
    pub weights: BTreeMap<String, f64>,
}

impl Stage {
    pub fn new(name: impl Into<String>, inputs: Vec<String>) -> Self {
        Self {
            name: name.into(),
            inputs,
            nproc: 1,
            tool: None,
            showtool: None,
            weights: BTreeMap::new(),
        }
    }

    /// A stage without inputs stages external files directly
    pub fn is_source(&self) -> bool {
        self.inputs.is_empty()
    }
}

/// Stage graph with edges from each input stage to its consumer
#[derive(Debug)]
pub struct FlowGraph {
    graph: DiGraph<String, ()>,
    stage_indices: HashMap<String, NodeIndex>,
    stages: BTreeMap<String, Stage>,
}

impl FlowGraph {
    /// Read every stage declared under `flowgraph`
    pub fn from_schema(schema: &Schema) -> Self {
        let stages = schema
            .getkeys(["flowgraph"])
            .into_iter()
            .map(|name| {
                let n = name.as_str();
                let weights = schema
                    .getkeys(["flowgraph", n, "weight"])
                    .into_iter()
                    .filter_map(|metric| {
                        schema
                            .get(["flowgraph", n, "weight", metric.as_str()])
                            .as_f64()
                            .map(|w| (metric, w))
                    })
                    .collect();
                let text = |field: &str| {
                    let value = schema.get(["flowgraph", n, field]);
                    (!value.is_empty()).then(|| value.to_string())
                };
                Stage {
                    inputs: schema.get(["flowgraph", n, "input"]).to_strings(),
                    nproc: schema
                        .get(["flowgraph", n, "nproc"])
                        .as_i64()
                        .map(|v| v.max(0) as usize)
                        .unwrap_or(1),
                    tool: text("tool"),
                    showtool: text("showtool"),
                    weights,
                    name,
                }
            })
            .collect();
        Self::from_stages(stages)
    }

    /// Build from explicit stages; inputs naming unknown stages get no edge
    pub fn from_stages(stages: Vec<Stage>) -> Self {
        let mut graph = DiGraph::new();
        let mut stage_indices = HashMap::new();

        for stage in &stages {
            let index = graph.add_node(stage.name.clone());
            stage_indices.insert(stage.name.clone(), index);
        }

        // Edge from input stage to consumer
        for stage in &stages {
            let stage_index = stage_indices[&stage.name];
            for input in &stage.inputs {
                if let Some(&input_index) = stage_indices.get(input) {
                    graph.add_edge(input_index, stage_index, ());
                }
            }
        }

        Self {
            graph,
            stage_indices,
            stages: stages.into_iter().map(|s| (s.name.clone(), s)).collect(),
        }
    }

    pub fn stage(&self, name: &str) -> Option<&Stage> {
        self.stages.get(name)
    }

    pub fn stages(&self) -> impl Iterator<Item = &Stage> {
        self.stages.values()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Reject missing inputs and cycles
    pub fn validate(&self) -> Result<()> {
        for stage in self.stages.values() {
            for input in &stage.inputs {
                if !self.stages.contains_key(input) {
                    return Err(EdaFlowError::MissingInput {
                        stage: stage.name.clone(),
                        input: input.clone(),
                    });
                }
            }
        }
        if is_cyclic_directed(&self.graph) {
            return Err(EdaFlowError::CycleDetected(self.find_cycle()));
        }
        Ok(())
    }

    fn find_cycle(&self) -> String {
        let mut visited = HashMap::new();
        let mut path = Vec::new();

        for node in self.graph.node_indices() {
            if !visited.contains_key(&node) {
                if let Some(cycle) = self.dfs_find_cycle(node, &mut visited, &mut path) {
                    return cycle;
                }
            }
        }

        "Unknown cycle".to_string()
    }

    fn dfs_find_cycle(
        &self,
        node: NodeIndex,
        visited: &mut HashMap<NodeIndex, bool>,
        path: &mut Vec<String>,
    ) -> Option<String> {
        if let Some(&in_path) = visited.get(&node) {
            if in_path {
                path.push(self.graph[node].clone());
                return Some(path.join(" -> "));
            }
            return None;
        }

        visited.insert(node, true);
        path.push(self.graph[node].clone());

        for neighbor in self.graph.neighbors(node) {
            if let Some(cycle) = self.dfs_find_cycle(neighbor, visited, path) {
                return Some(cycle);
            }
        }

        path.pop();
        visited.insert(node, false);
        None
    }

    /// Stage names ordered by longest input chain, shallowest first
    ///
    /// Stages of equal depth keep name order.
    pub fn getsteps(&self) -> Vec<String> {
        let mut cache = HashMap::new();
        let mut ordered: Vec<(usize, String)> = self
            .stages
            .keys()
            .map(|name| {
                let depth = self
                    .stage_indices
                    .get(name)
                    .map(|&idx| self.depth_of(idx, &mut cache, &mut HashSet::new()))
                    .unwrap_or(0);
                (depth, name.clone())
            })
            .collect();
        ordered.sort_by_key(|(depth, _)| *depth);
        ordered.into_iter().map(|(_, name)| name).collect()
    }

    /// Longest input chain from a source stage
    pub fn depth(&self, stage: &str) -> Option<usize> {
        let idx = *self.stage_indices.get(stage)?;
        Some(self.depth_of(idx, &mut HashMap::new(), &mut HashSet::new()))
    }

    fn depth_of(
        &self,
        node: NodeIndex,
        cache: &mut HashMap<NodeIndex, usize>,
        visiting: &mut HashSet<NodeIndex>,
    ) -> usize {
        if let Some(&depth) = cache.get(&node) {
            return depth;
        }
        // Cyclic graphs are rejected by validate(); stop rather than recurse forever
        if !visiting.insert(node) {
            return 0;
        }

        let mut max_depth = 0;
        for parent in self.graph.neighbors_directed(node, Direction::Incoming) {
            max_depth = max_depth.max(self.depth_of(parent, cache, visiting) + 1);
        }

        visiting.remove(&node);
        cache.insert(node, max_depth);
        max_depth
    }

    /// Stages that name `stage` as an input
    pub fn outputs(&self, stage: &str) -> Vec<String> {
        let mut consumers: Vec<String> = match self.stage_indices.get(stage) {
            Some(&index) => self
                .graph
                .neighbors(index)
                .map(|idx| self.graph[idx].clone())
                .collect(),
            None => Vec::new(),
        };
        consumers.sort();
        consumers.dedup();
        consumers
    }

    /// Declared input stages of `stage`
    pub fn inputs(&self, stage: &str) -> &[String] {
        self.stages
            .get(stage)
            .map(|s| s.inputs.as_slice())
            .unwrap_or(&[])
    }

    /// Every (stage, index) pair for the given stages
    pub fn instances(&self, steps: &[String]) -> Vec<InstanceKey> {
        steps
            .iter()
            .filter_map(|name| self.stages.get(name))
            .flat_map(|stage| (0..stage.nproc).map(move |i| InstanceKey::new(&stage.name, i)))
            .collect()
    }

    /// Graphviz DOT rendering, nodes labelled with their tool
    pub fn to_dot(&self) -> String {
        let mut dot = String::from("digraph flowgraph {\n    bgcolor=\"transparent\";\n");
        for stage in self.stages.values() {
            let label = match &stage.tool {
                Some(tool) => format!("{}\\n({})", stage.name, tool),
                None => stage.name.clone(),
            };
            let _ = writeln!(dot, "    \"{}\" [label=\"{}\"];", stage.name, label);
        }
        for edge in self.graph.raw_edges() {
            let _ = writeln!(
                dot,
                "    \"{}\" -> \"{}\";",
                self.graph[edge.source()],
                self.graph[edge.target()]
            );
        }
        dot.push_str("}\n");
        dot
    }
}

impl Schema {
    /// Stage names in dependency-consistent order
    pub fn getsteps(&self) -> Vec<String> {
        FlowGraph::from_schema(self).getsteps()
    }

    /// Immediate downstream consumers of a stage
    pub fn flowgraph_outputs(&self, stage: &str) -> Vec<String> {
        FlowGraph::from_schema(self).outputs(stage)
    }
}
