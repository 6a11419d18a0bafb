//! Addressable parameter store
//!
//! [`Schema`] owns a typed parameter tree. Reads and writes address leaves by
//! [`KeyPath`]; writes to absent dynamic keys instantiate them from the
//! parent's `default` template. Invalid paths and type mismatches never
//! unwind: they are logged and latch a sticky error flag that
//! [`Schema::check`] inspects before a run.

mod defaults;
mod keypath;
mod manifest;
mod node;
mod paths;
mod value;

pub use defaults::{schema_tree, METRICS};
pub use keypath::KeyPath;
pub use manifest::{ManifestFormat, WriteOptions};
pub use node::{Field, Leaf, Node, TEMPLATE_KEY};
pub use paths::{expand_env, search_paths};
pub use value::{LeafType, ScalarKind, Value};

use crate::error::{EdaFlowError, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error};

/// Typed, hierarchical configuration tree
#[derive(Debug)]
pub struct Schema {
    root: Node,
    error: AtomicBool,
}

impl Clone for Schema {
    fn clone(&self) -> Self {
        Self {
            root: self.root.clone(),
            error: AtomicBool::new(self.has_error()),
        }
    }
}

impl Default for Schema {
    fn default() -> Self {
        Self::empty()
    }
}

impl Schema {
    /// Create a tree populated with defaults for the given design
    pub fn new(design: &str) -> Self {
        let mut schema = Self::from_node(schema_tree());
        schema.set(["design"], design);
        schema
    }

    /// Create a tree with the full structure but every value unset
    pub fn empty() -> Self {
        let mut root = schema_tree();
        root.visit_leaves_mut(&mut |_, leaf| leaf.reset(false));
        Self::from_node(root)
    }

    /// Wrap an existing tree
    pub fn from_node(root: Node) -> Self {
        Self {
            root,
            error: AtomicBool::new(false),
        }
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    /// True once any configuration error has been reported
    pub fn has_error(&self) -> bool {
        self.error.load(Ordering::SeqCst)
    }

    pub fn clear_error(&self) {
        self.error.store(false, Ordering::SeqCst);
    }

    /// Log a configuration error and latch the error flag
    pub(crate) fn report(&self, err: &EdaFlowError) {
        error!(error = %err, "Configuration error");
        self.error.store(true, Ordering::SeqCst);
    }

    fn leaf(&self, path: &KeyPath) -> Result<&Leaf> {
        match self.root.lookup(path.segments()) {
            Some(Node::Leaf(leaf)) => Ok(leaf),
            Some(Node::Branch(_)) => Err(invalid_key(path, "addresses a branch, not a leaf")),
            None => Err(invalid_key(path, "no such parameter")),
        }
    }

    /// Apply a write to a leaf, instantiating templates along the way
    fn write_leaf<F>(&mut self, path: &KeyPath, apply: F) -> Result<()>
    where
        F: FnOnce(&mut Leaf) -> std::result::Result<(), String>,
    {
        debug!(key = %path, "Writing parameter");
        let leaf = self
            .root
            .instantiate(path.segments())
            .map_err(|reason| invalid_key(path, &reason))?;
        apply(leaf).map_err(|reason| EdaFlowError::TypeMismatch {
            key: path.to_string(),
            reason,
        })
    }

    /// Declared type of a leaf without reporting errors
    pub fn leaf_type(&self, path: impl Into<KeyPath>) -> Option<LeafType> {
        self.leaf(&path.into()).ok().map(|leaf| leaf.kind)
    }

    /// Read a leaf value; unset scalars and invalid paths yield [`Value::Null`]
    ///
    /// # Example
    ///
    /// ```
    /// use edaflow::schema::{Schema, Value};
    ///
    /// let schema = Schema::new("top");
    /// assert_eq!(schema.get(["jobname"]), Value::from("job"));
    /// assert_eq!(schema.get("flowgraph syn nproc"), Value::Int(1));
    /// ```
    pub fn get(&self, path: impl Into<KeyPath>) -> Value {
        self.get_field(path, Field::Value)
    }

    /// Read any leaf field
    pub fn get_field(&self, path: impl Into<KeyPath>, field: Field) -> Value {
        let path = path.into();
        match self.leaf(&path) {
            Ok(leaf) => match leaf.field(field) {
                Some(value) => value,
                None => {
                    let reason = format!("field {:?} is not present", field);
                    self.report(&invalid_key(&path, &reason));
                    Value::Null
                }
            },
            Err(e) => {
                self.report(&e);
                Value::Null
            }
        }
    }

    /// Overwrite a leaf value
    pub fn set(&mut self, path: impl Into<KeyPath>, value: impl Into<Value>) {
        self.set_field(path, Field::Value, value)
    }

    /// Overwrite any leaf field
    pub fn set_field(&mut self, path: impl Into<KeyPath>, field: Field, value: impl Into<Value>) {
        if let Err(e) = self.try_set_field(path, field, value) {
            self.report(&e);
        }
    }

    /// Overwrite a leaf value, returning the failure instead of latching it
    pub fn try_set(&mut self, path: impl Into<KeyPath>, value: impl Into<Value>) -> Result<()> {
        self.try_set_field(path, Field::Value, value)
    }

    pub fn try_set_field(
        &mut self,
        path: impl Into<KeyPath>,
        field: Field,
        value: impl Into<Value>,
    ) -> Result<()> {
        let value = value.into();
        self.write_leaf(&path.into(), |leaf| leaf.set_field(field, value))
    }

    /// Append to a list leaf; scalar leaves are overwritten
    pub fn add(&mut self, path: impl Into<KeyPath>, value: impl Into<Value>) {
        self.add_field(path, Field::Value, value)
    }

    pub fn add_field(&mut self, path: impl Into<KeyPath>, field: Field, value: impl Into<Value>) {
        let value = value.into();
        if let Err(e) = self.write_leaf(&path.into(), |leaf| leaf.add_field(field, value)) {
            self.report(&e);
        }
    }

    /// Immediate child keys of a branch, excluding the `default` template
    pub fn getkeys(&self, path: impl Into<KeyPath>) -> Vec<String> {
        let path = path.into();
        match self.root.lookup(path.segments()) {
            Some(Node::Branch(map)) => map
                .keys()
                .filter(|k| k.as_str() != TEMPLATE_KEY)
                .cloned()
                .collect(),
            Some(Node::Leaf(_)) => {
                self.report(&invalid_key(&path, "addresses a leaf, not a branch"));
                Vec::new()
            }
            None => {
                self.report(&invalid_key(&path, "no such parameter"));
                Vec::new()
            }
        }
    }

    /// Every full leaf key path in the tree, template paths included
    pub fn allkeys(&self) -> Vec<KeyPath> {
        let mut keys = Vec::new();
        self.root.visit_leaves(&mut |path, _| keys.push(path.clone()));
        keys
    }

    /// Visit every leaf
    pub fn for_each_leaf<F>(&self, mut f: F)
    where
        F: FnMut(&KeyPath, &Leaf),
    {
        self.root.visit_leaves(&mut f);
    }

    /// Minimal effective copy of this tree
    pub fn pruned(&self) -> Schema {
        let root = self.root.pruned().unwrap_or_default();
        Self {
            root,
            error: AtomicBool::new(self.has_error()),
        }
    }

    /// Merge leaf values from another tree
    ///
    /// List leaves append elements not already present; scalar leaves are
    /// overwritten. Keys absent here are copied over whole.
    pub fn merge(&mut self, source: &Node) {
        let mut problems = Vec::new();
        merge_node(&mut self.root, source, &mut Vec::new(), &mut problems);
        for problem in &problems {
            self.report(problem);
        }
    }

    /// Merge another schema's values into this one
    pub fn merge_schema(&mut self, other: &Schema) {
        self.merge(&other.root);
    }

    /// Restore every value to its default, or to empty
    pub fn reset(&mut self, use_defaults: bool) {
        self.root.visit_leaves_mut(&mut |_, leaf| leaf.reset(use_defaults));
    }

    /// Validate the configuration before a run
    ///
    /// Fails when an error has been reported, the design is unset, the flow
    /// graph is empty, a stage has no tool or no instances, or the flow graph
    /// names missing inputs or contains a cycle.
    pub fn check(&self) -> Result<()> {
        if self.has_error() {
            return Err(EdaFlowError::Config(
                "configuration errors were reported, see log".to_string(),
            ));
        }
        if self.get(["design"]).is_empty() {
            return Err(EdaFlowError::Config("design is not set".to_string()));
        }
        let steps = self.getkeys(["flowgraph"]);
        if steps.is_empty() {
            return Err(EdaFlowError::Config("flowgraph is empty".to_string()));
        }
        for step in &steps {
            if self.get(["flowgraph", step.as_str(), "tool"]).is_empty() {
                return Err(EdaFlowError::Config(format!(
                    "stage '{}' has no tool",
                    step
                )));
            }
            let nproc = self.get(["flowgraph", step.as_str(), "nproc"]).as_i64();
            if !matches!(nproc, Some(n) if n >= 1) {
                return Err(EdaFlowError::Config(format!(
                    "stage '{}' needs nproc of at least 1",
                    step
                )));
            }
        }
        crate::flowgraph::FlowGraph::from_schema(self).validate()
    }

    /// `<build_dir>/<design>/<jobname><jobid>`
    pub fn jobdir(&self) -> PathBuf {
        let build_dir = self.get(["build_dir"]).to_string();
        let build_dir = if build_dir.is_empty() {
            "build".to_string()
        } else {
            build_dir
        };
        let jobid = self.get(["jobid"]).as_i64().unwrap_or(0);
        PathBuf::from(expand_env(&build_dir))
            .join(self.get(["design"]).to_string())
            .join(format!("{}{}", self.get(["jobname"]), jobid))
    }

    /// `<jobdir>/<stage><index>`
    pub fn stepdir(&self, step: &str, index: usize) -> PathBuf {
        self.jobdir().join(format!("{}{}", step, index))
    }

    /// Pick the next free job index when `jobincr` is set and no index was
    /// chosen explicitly
    pub fn set_jobid(&mut self) {
        let incr = self.get(["jobincr"]).as_bool().unwrap_or(false);
        let current = self.get(["jobid"]).as_i64().unwrap_or(0);
        if !incr || current > 0 {
            return;
        }
        let jobname = self.get(["jobname"]).to_string();
        let design_dir = self
            .jobdir()
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let mut max = 0;
        if let Ok(entries) = std::fs::read_dir(&design_dir) {
            for entry in entries.flatten() {
                let name = entry.file_name().to_string_lossy().to_string();
                if let Some(id) = name
                    .strip_prefix(&jobname)
                    .and_then(|rest| rest.parse::<i64>().ok())
                {
                    max = max.max(id);
                }
            }
        }
        debug!(jobid = max + 1, "Selected job index");
        self.set(["jobid"], max + 1);
    }

    /// Resolve a file or directory value against the search path
    pub fn resolve_path(&self, value: &str) -> PathBuf {
        paths::resolve(&search_paths(self), value)
    }
}

fn invalid_key(path: &KeyPath, reason: &str) -> EdaFlowError {
    EdaFlowError::InvalidKeyPath {
        key: path.to_string(),
        reason: reason.to_string(),
    }
}

fn merge_node(
    dst: &mut Node,
    src: &Node,
    path: &mut Vec<String>,
    problems: &mut Vec<EdaFlowError>,
) {
    match (dst, src) {
        (Node::Leaf(dst_leaf), Node::Leaf(src_leaf)) => {
            if let Err(reason) = dst_leaf.merge_value(src_leaf) {
                problems.push(EdaFlowError::TypeMismatch {
                    key: path.join(" "),
                    reason,
                });
            }
        }
        (Node::Branch(dst_map), Node::Branch(src_map)) => {
            for (key, src_child) in src_map {
                path.push(key.clone());
                match dst_map.get_mut(key) {
                    Some(dst_child) => merge_node(dst_child, src_child, path, problems),
                    None => {
                        dst_map.insert(key.clone(), src_child.clone());
                    }
                }
                path.pop();
            }
        }
        (dst, src) => {
            problems.push(invalid_key(
                &KeyPath::from(path.clone()),
                "leaf and branch do not match",
            ));
            *dst = src.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keypath;

    #[test]
    fn test_set_get_list_round_trip_with_coercion() {
        let mut schema = Schema::new("top");
        schema.set(["eda", "yosys", "syn", "0", "woff"], vec!["a", "b"]);
        assert_eq!(
            schema.get(["eda", "yosys", "syn", "0", "woff"]),
            Value::from(vec!["a", "b"])
        );

        // Declared int list
        let mut root = schema_tree();
        if let Node::Branch(map) = &mut root {
            let mut leaf = map["jobid"].as_leaf().unwrap().clone();
            leaf.kind = LeafType::list_of(ScalarKind::Int);
            leaf.value = Value::List(vec![]);
            map.insert("ids".to_string(), Node::leaf(leaf));
        }
        let mut schema = Schema::from_node(root);
        schema.set(["ids"], vec!["3", "4"]);
        assert_eq!(schema.get(["ids"]), Value::List(vec![Value::Int(3), Value::Int(4)]));
        assert!(!schema.has_error());
    }

    #[test]
    fn test_scalar_set_promoted_on_list_leaf() {
        let mut schema = Schema::new("top");
        schema.set("flowgraph syn input", "import");
        assert_eq!(schema.get("flowgraph syn input"), Value::from(vec!["import"]));
    }

    #[test]
    fn test_add_appends_to_list() {
        let mut schema = Schema::new("top");
        schema.add("flowgraph place input", "syn");
        schema.add("flowgraph place input", "floorplan");
        assert_eq!(
            schema.get("flowgraph place input"),
            Value::from(vec!["syn", "floorplan"])
        );
    }

    #[test]
    fn test_unset_scalar_is_null() {
        let schema = Schema::new("top");
        assert_eq!(schema.get(["target"]), Value::Null);
        assert!(!schema.has_error());
    }

    #[test]
    fn test_invalid_key_sets_sticky_flag() {
        let mut schema = Schema::new("top");
        assert_eq!(schema.get(["no", "such", "key"]), Value::Null);
        assert!(schema.has_error());

        // Later valid operations do not clear it
        schema.set(["design"], "other");
        assert!(schema.has_error());
        assert!(schema.check().is_err());

        schema.clear_error();
        assert!(!schema.has_error());
    }

    #[test]
    fn test_type_mismatch_ignored_and_reported() {
        let mut schema = Schema::new("top");
        schema.set("flowgraph syn nproc", "many");
        assert!(schema.has_error());
        assert_eq!(schema.get("flowgraph syn nproc"), Value::Int(1));
    }

    #[test]
    fn test_try_set_returns_typed_errors() {
        let mut schema = Schema::new("top");
        assert!(matches!(
            schema.try_set("flowgraph syn nproc", "many"),
            Err(EdaFlowError::TypeMismatch { .. })
        ));
        assert!(matches!(
            schema.try_set(["no", "such", "key"], 1),
            Err(EdaFlowError::InvalidKeyPath { .. })
        ));
        assert!(!schema.has_error());

        assert!(schema.try_set("flowgraph syn nproc", "4").is_ok());
        assert_eq!(schema.get("flowgraph syn nproc"), Value::Int(4));
    }

    #[test]
    fn test_template_isolation() {
        let mut schema = Schema::new("top");
        let template_before = schema
            .root()
            .lookup(&KeyPath::from("flowgraph default").segments().to_vec())
            .cloned();

        schema.set("flowgraph syn tool", "yosys");

        let template_after = schema
            .root()
            .lookup(&KeyPath::from("flowgraph default").segments().to_vec())
            .cloned();
        assert_eq!(template_before, template_after);

        // New sibling has the template's structure
        let syn = schema.getkeys("flowgraph syn");
        let template = schema.getkeys("flowgraph default");
        assert_eq!(syn, template);
        assert_eq!(schema.get("flowgraph syn tool"), Value::from("yosys"));
    }

    #[test]
    fn test_getkeys_excludes_template() {
        let mut schema = Schema::new("top");
        assert!(schema.getkeys(["flowgraph"]).is_empty());
        schema.set("flowgraph import tool", "surelog");
        schema.set("flowgraph syn tool", "yosys");
        assert_eq!(schema.getkeys(["flowgraph"]), vec!["import", "syn"]);
    }

    #[test]
    fn test_allkeys_lists_leaves() {
        let schema = Schema::new("top");
        let keys = schema.allkeys();
        assert!(keys.contains(&KeyPath::from("design")));
        assert!(keys.contains(&KeyPath::from("flowgraph default nproc")));
    }

    #[test]
    fn test_prune_idempotent() {
        let mut schema = Schema::new("top");
        schema.set("flowgraph syn tool", "yosys");
        schema.set(keypath!["metric", "syn", 0, "real", "cells"], 10);

        let once = schema.pruned();
        let twice = once.pruned();
        assert_eq!(once.root(), twice.root());

        let top = once.root().children().unwrap();
        assert!(!top.contains_key(TEMPLATE_KEY));
        assert!(!top.contains_key("target"));
        assert_eq!(once.get(keypath!["metric", "syn", 0, "real", "cells"]), Value::Int(10));
    }

    #[test]
    fn test_merge_dedups_lists_and_overwrites_scalars() {
        let mut base = Schema::new("top");
        base.add("flowgraph syn input", "import");
        base.set(["jobname"], "first");

        let mut other = Schema::new("top");
        other.add("flowgraph syn input", "import");
        other.add("flowgraph syn input", "lint");
        other.set(["jobname"], "second");

        base.merge_schema(&other);
        assert_eq!(
            base.get("flowgraph syn input"),
            Value::from(vec!["import", "lint"])
        );
        assert_eq!(base.get(["jobname"]), Value::from("second"));
    }

    #[test]
    fn test_empty_schema_has_no_values() {
        let schema = Schema::empty();
        assert_eq!(schema.get(["jobname"]), Value::Null);
        assert_eq!(schema.get(["steplist"]), Value::List(vec![]));
    }

    #[test]
    fn test_check_requires_tool_and_flowgraph() {
        let mut schema = Schema::new("top");
        assert!(schema.check().is_err());

        schema.set("flowgraph import nproc", 1);
        assert!(matches!(schema.check(), Err(EdaFlowError::Config(_))));

        schema.set("flowgraph import tool", "surelog");
        assert!(schema.check().is_ok());

        schema.set("flowgraph import nproc", 0);
        assert!(matches!(schema.check(), Err(EdaFlowError::Config(_))));
        schema.set("flowgraph import nproc", 1);

        schema.add("flowgraph syn input", "missing");
        schema.set("flowgraph syn tool", "yosys");
        assert!(matches!(
            schema.check(),
            Err(EdaFlowError::MissingInput { .. })
        ));
    }

    #[test]
    fn test_jobdir_and_set_jobid() {
        let temp = tempfile::TempDir::new().unwrap();
        let mut schema = Schema::new("top");
        schema.set(["build_dir"], temp.path().to_string_lossy().to_string());
        std::fs::create_dir_all(temp.path().join("top").join("job3")).unwrap();
        std::fs::create_dir_all(temp.path().join("top").join("job1")).unwrap();

        schema.set_jobid();
        assert_eq!(schema.get(["jobid"]), Value::Int(4));
        assert_eq!(schema.jobdir(), temp.path().join("top").join("job4"));
        assert_eq!(schema.stepdir("syn", 0), temp.path().join("top/job4/syn0"));
    }

    #[test]
    fn test_set_jobid_respects_explicit_id() {
        let mut schema = Schema::new("top");
        schema.set(["jobid"], 7);
        schema.set_jobid();
        assert_eq!(schema.get(["jobid"]), Value::Int(7));
    }
}
