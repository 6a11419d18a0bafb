//! File parameter resolution

use super::Schema;
use std::env;
use std::path::{Path, PathBuf};

/// Environment variable holding extra search directories
pub const SCPATH_ENV: &str = "SCPATH";

/// Expand a leading `$VAR` (or `${VAR}`) from the environment
///
/// Unknown variables are left in place.
pub fn expand_env(value: &str) -> String {
    let Some(rest) = value.strip_prefix('$') else {
        return value.to_string();
    };
    let (name, tail) = if let Some(braced) = rest.strip_prefix('{') {
        match braced.find('}') {
            Some(end) => (&braced[..end], &braced[end + 1..]),
            None => return value.to_string(),
        }
    } else {
        let end = rest.find(['/', '\\']).unwrap_or(rest.len());
        (&rest[..end], &rest[end..])
    };
    match env::var(name) {
        Ok(prefix) => format!("{}{}", prefix, tail),
        Err(_) => value.to_string(),
    }
}

/// Directories searched for relative file parameters: the `scpath` leaf
/// followed by `$SCPATH`
pub fn search_paths(schema: &Schema) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = schema
        .get(["scpath"])
        .to_strings()
        .iter()
        .map(|d| PathBuf::from(expand_env(d)))
        .collect();
    if let Ok(extra) = env::var(SCPATH_ENV) {
        dirs.extend(env::split_paths(&extra));
    }
    dirs
}

/// Resolve a file value: expand `$VAR`, then try each search directory for
/// relative paths. Falls back to the path relative to the working directory.
pub(crate) fn resolve(search: &[PathBuf], value: &str) -> PathBuf {
    let expanded = PathBuf::from(expand_env(value));
    if expanded.is_absolute() {
        return expanded;
    }
    search
        .iter()
        .map(|dir| dir.join(&expanded))
        .find(|candidate| candidate.exists())
        .unwrap_or_else(|| absolute(&expanded))
}

/// Absolute form of a path without touching the filesystem
pub(crate) fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_expand_env_prefix() {
        env::set_var("EDAFLOW_TEST_ROOT", "/opt/pdk");
        assert_eq!(expand_env("$EDAFLOW_TEST_ROOT/lib/a.lef"), "/opt/pdk/lib/a.lef");
        assert_eq!(expand_env("${EDAFLOW_TEST_ROOT}/x"), "/opt/pdk/x");
        assert_eq!(expand_env("plain/path"), "plain/path");
        assert_eq!(expand_env("$EDAFLOW_UNSET_VAR_XYZ/a"), "$EDAFLOW_UNSET_VAR_XYZ/a");
    }

    #[test]
    fn test_resolve_uses_search_path() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("top.v"), "module top; endmodule").unwrap();

        let resolved = resolve(&[temp.path().to_path_buf()], "top.v");
        assert_eq!(resolved, temp.path().join("top.v"));

        let missing = resolve(&[temp.path().to_path_buf()], "missing.v");
        assert!(missing.is_absolute());
        assert!(missing.ends_with("missing.v"));
    }

    #[test]
    fn test_search_paths_from_schema() {
        let mut schema = Schema::new("top");
        schema.add(["scpath"], "/tmp/libs");
        let dirs = search_paths(&schema);
        assert_eq!(dirs[0], PathBuf::from("/tmp/libs"));
    }
}
