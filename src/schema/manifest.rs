//! Manifest reading and writing
//!
//! Three representations of the same tree:
//! - JSON: full field-preserving tree
//! - YAML: same tree, human editable, with a banner
//! - TCL: one `dict set sc_cfg ...` statement per leaf for tool scripts

use super::node::{Node, TEMPLATE_KEY};
use super::paths;
use super::value::Value;
use super::Schema;
use crate::error::{EdaFlowError, Result};
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use tracing::{debug, error, info};

const BANNER: &str = "#############################################\n\
                      # Auto-generated manifest, do not edit\n\
                      #############################################\n";

/// Manifest representation, chosen by file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestFormat {
    Json,
    Yaml,
    Tcl,
}

impl ManifestFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "json" => Some(ManifestFormat::Json),
            "yaml" | "yml" => Some(ManifestFormat::Yaml),
            "tcl" => Some(ManifestFormat::Tcl),
            _ => None,
        }
    }
}

/// Options for [`Schema::write_cfg`]
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    /// Write the minimal effective tree
    pub prune: bool,
    /// Rewrite file and directory values as absolute paths
    pub abspath: bool,
}

impl WriteOptions {
    pub fn pruned() -> Self {
        Self {
            prune: true,
            abspath: false,
        }
    }
}

impl Schema {
    /// Read a JSON or YAML manifest and merge it into this tree
    ///
    /// Unreadable or unrecognized files are logged as errors and latch the
    /// error flag.
    pub fn read_cfg(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        info!(path = %path.display(), "Reading manifest");
        let outcome = read_node(path);
        match outcome {
            Ok(node) => {
                self.merge(&node);
                Ok(())
            }
            Err(e) => {
                error!(path = %path.display(), "Failed to read manifest");
                self.report(&e);
                Err(e)
            }
        }
    }

    /// Write this tree as a manifest; the format follows the file extension
    ///
    /// # Arguments
    ///
    /// * `path` - Destination; parent directories are created
    /// * `options` - Pruning and path rewriting
    pub fn write_cfg(&self, path: impl AsRef<Path>, options: WriteOptions) -> Result<()> {
        let path = path.as_ref();
        let format = ManifestFormat::from_path(path).ok_or_else(|| {
            EdaFlowError::Config(format!("unrecognized manifest format: {}", path.display()))
        })?;
        debug!(path = %path.display(), ?format, "Writing manifest");

        let mut tree = if options.prune {
            self.pruned()
        } else {
            self.clone()
        };
        if options.abspath {
            tree.absolutize(self);
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let content = match format {
            ManifestFormat::Json => serde_json::to_string_pretty(tree.root())?,
            ManifestFormat::Yaml => format!("{}{}", BANNER, serde_yaml::to_string(tree.root())?),
            ManifestFormat::Tcl => to_tcl(tree.root()),
        };
        fs::write(path, content)?;
        Ok(())
    }

    fn absolutize(&mut self, resolver: &Schema) {
        let search = paths::search_paths(resolver);
        self.root.visit_leaves_mut(&mut |_, leaf| {
            if !leaf.kind.kind.is_path() {
                return;
            }
            let rewrite = |v: &Value| match v {
                Value::Str(s) if !s.is_empty() => Value::Str(
                    paths::resolve(&search, s).to_string_lossy().to_string(),
                ),
                other => other.clone(),
            };
            leaf.value = match &leaf.value {
                Value::List(items) => Value::List(items.iter().map(rewrite).collect()),
                scalar => rewrite(scalar),
            };
        });
    }
}

fn read_node(path: &Path) -> Result<Node> {
    let format = ManifestFormat::from_path(path);
    let content = fs::read_to_string(path)?;
    match format {
        Some(ManifestFormat::Json) => Ok(serde_json::from_str(&content)?),
        Some(ManifestFormat::Yaml) => Ok(serde_yaml::from_str(&content)?),
        _ => Err(EdaFlowError::Config(format!(
            "unrecognized manifest format: {}",
            path.display()
        ))),
    }
}

/// Render one `dict set` statement per leaf
pub(crate) fn to_tcl(root: &Node) -> String {
    let mut out = String::from(BANNER);
    root.visit_leaves(&mut |path, leaf| {
        if path.contains(TEMPLATE_KEY) {
            return;
        }
        let values: Vec<String> = leaf.value.to_strings().iter().map(|v| tcl_word(v)).collect();
        let _ = writeln!(
            out,
            "dict set sc_cfg {} [list {}]",
            path.iter().map(tcl_word).collect::<Vec<_>>().join(" "),
            values.join(" ")
        );
    });
    out
}

fn tcl_word(value: &str) -> String {
    let mut word = match value.strip_prefix('$') {
        Some(rest) => {
            let end = rest.find('/').unwrap_or(rest.len());
            format!("$env({}){}", &rest[..end], &rest[end..])
        }
        None => value.to_string(),
    };
    word = word.replace(';', "\\;");
    if word.is_empty() || word.contains(char::is_whitespace) {
        format!("{{{}}}", word)
    } else {
        word
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keypath;
    use tempfile::TempDir;

    fn sample() -> Schema {
        let mut schema = Schema::new("top");
        schema.set("flowgraph import tool", "surelog");
        schema.add("flowgraph syn input", "import");
        schema.set("flowgraph syn tool", "yosys");
        schema.set(keypath!["flowgraph", "syn", "weight", "cells"], 2.5);
        schema.add(["source"], "rtl/top.v");
        schema.set(keypath!["metric", "syn", 0, "real", "cells"], 42);
        schema
    }

    #[test]
    fn test_json_manifest_fidelity() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("sc_manifest.json");
        let original = sample();
        original.write_cfg(&path, WriteOptions::default()).unwrap();

        let mut restored = Schema::empty();
        restored.read_cfg(&path).unwrap();
        assert!(!restored.has_error());
        for key in original.allkeys() {
            assert_eq!(original.get(&key), restored.get(&key), "mismatch at {}", key);
        }
    }

    #[test]
    fn test_yaml_manifest_fidelity() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("sc_manifest.yaml");
        let original = sample();
        original.write_cfg(&path, WriteOptions::default()).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("####"));

        let mut restored = Schema::empty();
        restored.read_cfg(&path).unwrap();
        for key in original.allkeys() {
            assert_eq!(original.get(&key), restored.get(&key), "mismatch at {}", key);
        }
    }

    #[test]
    fn test_pruned_json_omits_unset() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("out").join("top.pkg.json");
        sample().write_cfg(&path, WriteOptions::pruned()).unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert!(json.get("target").is_none());
        assert!(json["flowgraph"].get("default").is_none());
        assert_eq!(json["flowgraph"]["syn"]["tool"]["value"], "yosys");
    }

    #[test]
    fn test_tcl_manifest_statements() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("sc_manifest.tcl");
        let mut schema = sample();
        schema.add(["define"], "A;B");
        schema
            .write_cfg(
                &path,
                WriteOptions {
                    prune: true,
                    abspath: true,
                },
            )
            .unwrap();

        let tcl = fs::read_to_string(&path).unwrap();
        assert!(tcl.contains("dict set sc_cfg flowgraph syn input [list import]"));
        assert!(tcl.contains("dict set sc_cfg define [list A\\;B]"));
        assert!(!tcl.contains("dict set sc_cfg flowgraph default"));
        let source_line = tcl
            .lines()
            .find(|l| l.starts_with("dict set sc_cfg source "))
            .unwrap();
        assert!(source_line.contains("/rtl/top.v"));
        assert!(!source_line.contains("[list rtl/top.v]"));
    }

    #[test]
    fn test_tcl_word_rewrites_env() {
        assert_eq!(tcl_word("$PDK/lib.lef"), "$env(PDK)/lib.lef");
        assert_eq!(tcl_word("a b"), "{a b}");
        assert_eq!(tcl_word(""), "{}");
    }

    #[test]
    fn test_read_unrecognized_format_is_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("settings.txt");
        fs::write(&path, "design top").unwrap();

        let mut schema = Schema::new("top");
        assert!(schema.read_cfg(&path).is_err());
        assert!(schema.has_error());
    }

    #[test]
    fn test_read_missing_file_is_error() {
        let mut schema = Schema::new("top");
        assert!(matches!(
            schema.read_cfg("/nonexistent/manifest.json"),
            Err(EdaFlowError::Io(_))
        ));
    }
}
