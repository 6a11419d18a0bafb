//! Parameter tree nodes: typed leaves and keyed branches

use super::keypath::KeyPath;
use super::value::{LeafType, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Reserved branch key holding the template for dynamically named children
pub const TEMPLATE_KEY: &str = "default";

/// A terminal parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Leaf {
    #[serde(default)]
    pub switch: String,
    #[serde(rename = "type")]
    pub kind: LeafType,
    #[serde(default)]
    pub requirement: String,
    pub defvalue: Value,
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub short_help: String,
    #[serde(default)]
    pub param_help: String,
    #[serde(default)]
    pub example: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub help: Option<String>,
    /// Present on file leaves; `true` marks the file for collection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copy: Option<bool>,
    /// Present on hashable leaves; one digest per file value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<Vec<String>>,
}

/// Addressable fields of a leaf
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Value,
    DefValue,
    Type,
    Switch,
    Requirement,
    ShortHelp,
    ParamHelp,
    Help,
    Example,
    Copy,
    Hash,
}

impl FromStr for Field {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "value" => Ok(Field::Value),
            "defvalue" => Ok(Field::DefValue),
            "type" => Ok(Field::Type),
            "switch" => Ok(Field::Switch),
            "requirement" => Ok(Field::Requirement),
            "short_help" => Ok(Field::ShortHelp),
            "param_help" => Ok(Field::ParamHelp),
            "help" => Ok(Field::Help),
            "example" => Ok(Field::Example),
            "copy" => Ok(Field::Copy),
            "hash" | "filehash" => Ok(Field::Hash),
            other => Err(format!("unknown field '{}'", other)),
        }
    }
}

impl Leaf {
    /// Read a field; `None` when the leaf does not carry it
    pub fn field(&self, field: Field) -> Option<Value> {
        match field {
            Field::Value => Some(self.value.clone()),
            Field::DefValue => Some(self.defvalue.clone()),
            Field::Type => Some(Value::Str(self.kind.to_string())),
            Field::Switch => Some(Value::Str(self.switch.clone())),
            Field::Requirement => Some(Value::Str(self.requirement.clone())),
            Field::ShortHelp => Some(Value::Str(self.short_help.clone())),
            Field::ParamHelp => Some(Value::Str(self.param_help.clone())),
            Field::Help => self.help.clone().map(Value::Str),
            Field::Example => Some(Value::from(self.example.clone())),
            Field::Copy => self.copy.map(Value::Bool),
            Field::Hash => self.hash.clone().map(Value::from),
        }
    }

    /// Overwrite a field, coercing to the field's type
    pub fn set_field(&mut self, field: Field, value: Value) -> Result<(), String> {
        match field {
            Field::Value => self.value = self.kind.coerce(value)?,
            Field::DefValue => self.defvalue = self.kind.coerce(value)?,
            Field::Type => return Err("leaf type is fixed after creation".to_string()),
            Field::Switch => self.switch = value.to_string(),
            Field::Requirement => self.requirement = value.to_string(),
            Field::ShortHelp => self.short_help = value.to_string(),
            Field::ParamHelp => self.param_help = value.to_string(),
            Field::Help => self.help = Some(value.to_string()),
            Field::Example => self.example = value.to_strings(),
            Field::Copy => {
                self.copy = Some(
                    value
                        .as_bool()
                        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
                        .ok_or_else(|| format!("copy flag must be a boolean, got '{}'", value))?,
                )
            }
            Field::Hash => self.hash = Some(value.to_strings()),
        }
        Ok(())
    }

    /// Append to a list field; scalar fields are overwritten
    pub fn add_field(&mut self, field: Field, value: Value) -> Result<(), String> {
        match field {
            Field::Value if self.kind.list => {
                let items = self.kind.coerce(value)?;
                match (&mut self.value, items) {
                    (Value::List(current), Value::List(new)) => current.extend(new),
                    (slot, items) => *slot = items,
                }
                Ok(())
            }
            Field::Example => {
                self.example.extend(value.to_strings());
                Ok(())
            }
            Field::Hash => {
                self.hash.get_or_insert_with(Vec::new).extend(value.to_strings());
                Ok(())
            }
            other => self.set_field(other, value),
        }
    }

    /// Restore the value to its default, or to empty
    pub fn reset(&mut self, use_default: bool) {
        self.value = if use_default && !self.defvalue.is_null() {
            self.defvalue.clone()
        } else {
            self.kind.empty_value()
        };
    }

    /// Merge another leaf's value: lists append unseen elements, scalars overwrite
    pub fn merge_value(&mut self, source: &Leaf) -> Result<(), String> {
        let incoming = self.kind.coerce(source.value.clone())?;
        match (&mut self.value, incoming) {
            (Value::List(current), Value::List(new)) => {
                for item in new {
                    if !current.contains(&item) {
                        current.push(item);
                    }
                }
            }
            (slot, incoming) => *slot = incoming,
        }
        Ok(())
    }
}

/// A node of the parameter tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Node {
    Leaf(Box<Leaf>),
    Branch(BTreeMap<String, Node>),
}

impl Default for Node {
    fn default() -> Self {
        Node::Branch(BTreeMap::new())
    }
}

impl Node {
    pub fn leaf(leaf: Leaf) -> Self {
        Node::Leaf(Box::new(leaf))
    }

    pub fn as_leaf(&self) -> Option<&Leaf> {
        match self {
            Node::Leaf(leaf) => Some(leaf),
            Node::Branch(_) => None,
        }
    }

    pub fn children(&self) -> Option<&BTreeMap<String, Node>> {
        match self {
            Node::Branch(map) => Some(map),
            Node::Leaf(_) => None,
        }
    }

    /// Look up a descendant, falling back to `default` templates for absent
    /// dynamic keys without instantiating them
    pub fn lookup(&self, path: &[String]) -> Option<&Node> {
        let mut node = self;
        for segment in path {
            let map = node.children()?;
            node = map.get(segment).or_else(|| map.get(TEMPLATE_KEY))?;
        }
        Some(node)
    }

    /// Mutable descent that instantiates absent keys from their parent's
    /// `default` template
    pub fn instantiate(&mut self, path: &[String]) -> Result<&mut Leaf, String> {
        match (self, path.split_first()) {
            (Node::Leaf(leaf), None) => Ok(&mut **leaf),
            (Node::Branch(_), None) => Err("key path ends at a branch".to_string()),
            (Node::Leaf(_), Some((segment, _))) => {
                Err(format!("'{}' descends past a leaf", segment))
            }
            (Node::Branch(map), Some((segment, rest))) => {
                if !map.contains_key(segment) {
                    let template = map
                        .get(TEMPLATE_KEY)
                        .cloned()
                        .ok_or_else(|| format!("'{}' is not a valid key", segment))?;
                    map.insert(segment.clone(), template);
                }
                match map.get_mut(segment) {
                    Some(child) => child.instantiate(rest),
                    None => Err(format!("'{}' is not a valid key", segment)),
                }
            }
        }
    }

    /// Visit every leaf with its full key path, templates included
    pub fn visit_leaves<F>(&self, f: &mut F)
    where
        F: FnMut(&KeyPath, &Leaf),
    {
        fn walk<F: FnMut(&KeyPath, &Leaf)>(node: &Node, path: &mut Vec<String>, f: &mut F) {
            match node {
                Node::Leaf(leaf) => f(&KeyPath::from(path.clone()), leaf),
                Node::Branch(map) => {
                    for (key, child) in map {
                        path.push(key.clone());
                        walk(child, path, f);
                        path.pop();
                    }
                }
            }
        }
        walk(self, &mut Vec::new(), f);
    }

    /// Mutable counterpart of [`Node::visit_leaves`]
    pub fn visit_leaves_mut<F>(&mut self, f: &mut F)
    where
        F: FnMut(&KeyPath, &mut Leaf),
    {
        fn walk<F: FnMut(&KeyPath, &mut Leaf)>(
            node: &mut Node,
            path: &mut Vec<String>,
            f: &mut F,
        ) {
            match node {
                Node::Leaf(leaf) => f(&KeyPath::from(path.clone()), leaf),
                Node::Branch(map) => {
                    for (key, child) in map.iter_mut() {
                        path.push(key.clone());
                        walk(child, path, f);
                        path.pop();
                    }
                }
            }
        }
        walk(self, &mut Vec::new(), f);
    }

    /// Minimal effective subtree
    ///
    /// Drops `default` templates, long-form help and every leaf whose value
    /// is empty. Branches left without children are dropped too; `None` means
    /// nothing effective remains.
    pub fn pruned(&self) -> Option<Node> {
        match self {
            Node::Leaf(leaf) => {
                if leaf.value.is_empty() {
                    None
                } else {
                    let mut leaf = leaf.clone();
                    leaf.help = None;
                    Some(Node::Leaf(leaf))
                }
            }
            Node::Branch(map) => {
                let kept: BTreeMap<String, Node> = map
                    .iter()
                    .filter(|(key, _)| key.as_str() != TEMPLATE_KEY)
                    .filter_map(|(key, child)| child.pruned().map(|c| (key.clone(), c)))
                    .collect();
                if kept.is_empty() {
                    None
                } else {
                    Some(Node::Branch(kept))
                }
            }
        }
    }
}
