//! Ordered key-segment addresses into the parameter tree

use serde::{Deserialize, Serialize};
use std::fmt;

/// Address of a node in the parameter tree, e.g. `flowgraph syn input`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct KeyPath(Vec<String>);

impl KeyPath {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// The empty path, addressing the tree root
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn last(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    /// Returns a new path with `segment` appended
    pub fn join(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Self(segments)
    }

    /// True when any segment is the given key
    pub fn contains(&self, segment: &str) -> bool {
        self.0.iter().any(|s| s == segment)
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(" "))
    }
}

impl From<&str> for KeyPath {
    /// Splits on whitespace: `"flowgraph syn nproc"`
    fn from(value: &str) -> Self {
        Self::new(value.split_whitespace())
    }
}

impl From<Vec<String>> for KeyPath {
    fn from(value: Vec<String>) -> Self {
        Self(value)
    }
}

impl From<&[&str]> for KeyPath {
    fn from(value: &[&str]) -> Self {
        Self::new(value.iter().copied())
    }
}

impl<const N: usize> From<[&str; N]> for KeyPath {
    fn from(value: [&str; N]) -> Self {
        Self::new(value)
    }
}

impl From<&KeyPath> for KeyPath {
    fn from(value: &KeyPath) -> Self {
        value.clone()
    }
}

/// Build a [`KeyPath`] from heterogeneous segments
///
/// # Example
///
/// ```
/// use edaflow::keypath;
///
/// let index = 0;
/// let path = keypath!["eda", "yosys", "syn", index, "exe"];
/// assert_eq!(path.to_string(), "eda yosys syn 0 exe");
/// ```
#[macro_export]
macro_rules! keypath {
    ($($segment:expr),* $(,)?) => {
        $crate::schema::KeyPath::new([$($segment.to_string()),*])
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_str_splits_whitespace() {
        let path = KeyPath::from("flowgraph  syn input");
        assert_eq!(path.segments(), &["flowgraph", "syn", "input"]);
        assert_eq!(path.to_string(), "flowgraph syn input");
    }

    #[test]
    fn test_join_and_last() {
        let path = KeyPath::from(["metric", "syn"]).join("0");
        assert_eq!(path.len(), 3);
        assert_eq!(path.last(), Some("0"));
        assert!(path.contains("syn"));
    }

    #[test]
    fn test_macro_mixes_types() {
        let step = String::from("place");
        let path = keypath!["metric", step, 2, "real", "cells"];
        assert_eq!(path.to_string(), "metric place 2 real cells");
    }
}
