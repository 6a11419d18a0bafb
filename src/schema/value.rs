//! Typed leaf values and leaf type tags
//!
//! A leaf declares one [`LeafType`] at creation: a scalar kind, optionally
//! wrapped in a list. Every write is coerced to that type through
//! [`LeafType::coerce`], so values read back are already typed.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Scalar kinds a leaf can hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    Str,
    Int,
    Float,
    Bool,
    File,
    Dir,
}

impl ScalarKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScalarKind::Str => "str",
            ScalarKind::Int => "int",
            ScalarKind::Float => "float",
            ScalarKind::Bool => "bool",
            ScalarKind::File => "file",
            ScalarKind::Dir => "dir",
        }
    }

    /// File and directory kinds are resolved against the search path
    pub fn is_path(&self) -> bool {
        matches!(self, ScalarKind::File | ScalarKind::Dir)
    }

    fn coerce(&self, value: Value) -> Result<Value, String> {
        match (self, value) {
            (_, Value::Null) => Err("null is not a valid element".to_string()),
            (_, Value::List(_)) => Err("nested lists are not allowed".to_string()),
            (ScalarKind::Str | ScalarKind::File | ScalarKind::Dir, Value::Str(s)) => {
                Ok(Value::Str(s))
            }
            (ScalarKind::Str | ScalarKind::File | ScalarKind::Dir, other) => {
                Ok(Value::Str(other.to_string()))
            }
            (ScalarKind::Int, Value::Int(i)) => Ok(Value::Int(i)),
            (ScalarKind::Int, Value::Float(f)) if f.fract() == 0.0 => Ok(Value::Int(f as i64)),
            (ScalarKind::Int, Value::Str(s)) => s
                .trim()
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|_| format!("'{}' is not an integer", s)),
            (ScalarKind::Float, Value::Float(f)) => Ok(Value::Float(f)),
            (ScalarKind::Float, Value::Int(i)) => Ok(Value::Float(i as f64)),
            (ScalarKind::Float, Value::Str(s)) => s
                .trim()
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| format!("'{}' is not a float", s)),
            (ScalarKind::Bool, Value::Bool(b)) => Ok(Value::Bool(b)),
            (ScalarKind::Bool, Value::Str(s)) => match s.trim().to_lowercase().as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => Err(format!("'{}' is not a boolean", s)),
            },
            (kind, other) => Err(format!("{} cannot hold '{}'", kind.as_str(), other)),
        }
    }
}

impl FromStr for ScalarKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "str" | "string" => Ok(ScalarKind::Str),
            "int" => Ok(ScalarKind::Int),
            "float" => Ok(ScalarKind::Float),
            "bool" => Ok(ScalarKind::Bool),
            "file" => Ok(ScalarKind::File),
            "dir" => Ok(ScalarKind::Dir),
            other => Err(format!("unknown scalar kind '{}'", other)),
        }
    }
}

/// Declared type of a leaf, serialized as `int` or `[int]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LeafType {
    pub kind: ScalarKind,
    pub list: bool,
}

impl LeafType {
    pub const fn scalar(kind: ScalarKind) -> Self {
        Self { kind, list: false }
    }

    pub const fn list_of(kind: ScalarKind) -> Self {
        Self { kind, list: true }
    }

    /// Value a leaf of this type holds when unset
    pub fn empty_value(&self) -> Value {
        if self.list {
            Value::List(Vec::new())
        } else {
            Value::Null
        }
    }

    /// Coerce a value to this type
    ///
    /// List leaves promote a single scalar to a one-element list and coerce
    /// every element. Scalar leaves reject lists.
    pub fn coerce(&self, value: Value) -> Result<Value, String> {
        if self.list {
            match value {
                Value::Null => Ok(Value::List(Vec::new())),
                Value::List(items) => items
                    .into_iter()
                    .map(|item| self.kind.coerce(item))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::List),
                scalar => Ok(Value::List(vec![self.kind.coerce(scalar)?])),
            }
        } else {
            match value {
                Value::Null => Ok(Value::Null),
                Value::List(_) => Err(format!("{} leaf cannot hold a list", self)),
                scalar => self.kind.coerce(scalar),
            }
        }
    }
}

impl fmt::Display for LeafType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.list {
            write!(f, "[{}]", self.kind.as_str())
        } else {
            f.write_str(self.kind.as_str())
        }
    }
}

impl FromStr for LeafType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.strip_prefix('[').and_then(|rest| rest.strip_suffix(']')) {
            Some(inner) => Ok(LeafType::list_of(inner.trim().parse()?)),
            None => Ok(LeafType::scalar(s.parse()?)),
        }
    }
}

impl TryFrom<String> for LeafType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<LeafType> for String {
    fn from(value: LeafType) -> Self {
        value.to_string()
    }
}

/// A leaf value
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Unset, an empty list or an empty string
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Null => true,
            Value::List(items) => items.is_empty(),
            Value::Str(s) => s.is_empty(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Every element rendered as a string; a scalar yields one element and
    /// null yields none
    pub fn to_strings(&self) -> Vec<String> {
        match self {
            Value::Null => Vec::new(),
            Value::List(items) => items.iter().map(|v| v.to_string()).collect(),
            scalar => vec![scalar.to_string()],
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Str(s) => f.write_str(s),
            Value::List(items) => {
                let rendered: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                f.write_str(&rendered.join(" "))
            }
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value as i64)
    }
}

impl From<usize> for Value {
    fn from(value: usize) -> Self {
        Value::Int(value as i64)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

impl From<&String> for Value {
    fn from(value: &String) -> Self {
        Value::Str(value.clone())
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(values: Vec<T>) -> Self {
        Value::List(values.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}
