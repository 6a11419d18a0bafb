//! Input staging and file provenance
//!
//! `collect` copies file parameters into a stage's `inputs/` directory;
//! `hash` records SHA-256 digests of hashable file parameters.

use crate::error::Result;
use crate::schema::{Field, KeyPath, ScalarKind, Schema, TEMPLATE_KEY};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Copy every copyable file parameter into `dest`
///
/// A file leaf is copyable when its `copy` flag is set, or when the global
/// `copyall` option is true. Missing source files are logged and skipped.
/// Returns the number of files copied.
pub fn collect(schema: &Schema, dest: &Path) -> Result<usize> {
    fs::create_dir_all(dest)?;
    let copyall = schema.get(["copyall"]).as_bool().unwrap_or(false);

    let mut sources = Vec::new();
    schema.for_each_leaf(|path, leaf| {
        if path.contains(TEMPLATE_KEY) || leaf.kind.kind != ScalarKind::File {
            return;
        }
        if copyall || leaf.copy == Some(true) {
            sources.extend(leaf.value.to_strings());
        }
    });

    let mut copied = 0;
    for source in sources.iter().filter(|s| !s.is_empty()) {
        let path = schema.resolve_path(source);
        let Some(name) = path.file_name() else {
            continue;
        };
        if !path.is_file() {
            warn!(file = %path.display(), "Collect source not found, skipping");
            continue;
        }
        debug!(file = %path.display(), "Collecting input");
        fs::copy(&path, dest.join(name))?;
        copied += 1;
    }
    Ok(copied)
}

/// Recompute digests for every hashable file parameter
///
/// Each hashable leaf's digest list is replaced with one SHA-256 hex digest
/// per file value. Files that cannot be read are logged and skipped.
/// Returns the number of digests computed.
pub fn hash(schema: &mut Schema) -> usize {
    let mut targets: Vec<(KeyPath, Vec<String>)> = Vec::new();
    schema.for_each_leaf(|path, leaf| {
        if leaf.hash.is_some() && !path.contains(TEMPLATE_KEY) && !leaf.value.is_empty() {
            targets.push((path.clone(), leaf.value.to_strings()));
        }
    });

    let mut count = 0;
    for (path, values) in targets {
        let digests: Vec<String> = values
            .iter()
            .filter_map(|value| {
                let file = schema.resolve_path(value);
                match file_digest(&file) {
                    Ok(digest) => Some(digest),
                    Err(e) => {
                        warn!(file = %file.display(), error = %e, "Unable to hash file");
                        None
                    }
                }
            })
            .collect();
        count += digests.len();
        schema.set_field(&path, Field::Hash, digests);
    }
    count
}

/// SHA-256 hex digest of a file's contents
pub fn file_digest(path: &Path) -> std::io::Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 4096];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Recursively copy a directory tree, merging into `dst`
pub fn copy_dir(src: &Path, dst: &Path) -> std::io::Result<u64> {
    let mut copied = 0;
    for entry in WalkDir::new(src).min_depth(1) {
        let entry = entry.map_err(std::io::Error::from)?;
        let relative = match entry.path().strip_prefix(src) {
            Ok(rel) => rel,
            Err(_) => continue,
        };
        let target: PathBuf = dst.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Value;
    use tempfile::TempDir;

    #[test]
    fn test_collect_copies_flagged_files() {
        let temp = TempDir::new().unwrap();
        let rtl = temp.path().join("top.v");
        let sdc = temp.path().join("top.sdc");
        let lef = temp.path().join("cells.lef");
        fs::write(&rtl, "module top; endmodule").unwrap();
        fs::write(&sdc, "create_clock").unwrap();
        fs::write(&lef, "MACRO").unwrap();

        let mut schema = Schema::new("top");
        schema.add(["source"], rtl.to_string_lossy().to_string());
        schema.add(["constraint"], sdc.to_string_lossy().to_string());
        schema.add(["library", "stdcells", "lef"], lef.to_string_lossy().to_string());

        let dest = temp.path().join("inputs");
        let copied = collect(&schema, &dest).unwrap();
        assert_eq!(copied, 2);
        assert!(dest.join("top.v").exists());
        assert!(dest.join("top.sdc").exists());
        assert!(!dest.join("cells.lef").exists());

        schema.set(["copyall"], true);
        assert_eq!(collect(&schema, &dest).unwrap(), 3);
        assert!(dest.join("cells.lef").exists());
    }

    #[test]
    fn test_hash_records_digests() {
        let temp = TempDir::new().unwrap();
        let rtl = temp.path().join("abc.v");
        fs::write(&rtl, "abc").unwrap();

        let mut schema = Schema::new("top");
        schema.add(["source"], rtl.to_string_lossy().to_string());
        assert_eq!(hash(&mut schema), 1);
        assert_eq!(
            schema.get_field(["source"], Field::Hash),
            Value::from(vec![
                "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
            ])
        );

        // Rehashing replaces rather than appends
        assert_eq!(hash(&mut schema), 1);
        assert_eq!(
            schema.get_field(["source"], Field::Hash).to_strings().len(),
            1
        );
        assert!(!schema.has_error());
    }

    #[test]
    fn test_copy_dir_recursive() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("outputs");
        fs::create_dir_all(src.join("reports")).unwrap();
        fs::write(src.join("top.vg"), "netlist").unwrap();
        fs::write(src.join("reports").join("area.rpt"), "area").unwrap();

        let dst = temp.path().join("inputs");
        assert_eq!(copy_dir(&src, &dst).unwrap(), 2);
        assert!(dst.join("top.vg").exists());
        assert!(dst.join("reports").join("area.rpt").exists());
    }
}
