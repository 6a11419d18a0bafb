//! Upstream alternative selection
//!
//! When an input stage runs several replicas, a downstream instance stages
//! the outputs of exactly one of them.

use crate::flowgraph::Stage;
use crate::models::InstanceKey;
use crate::schema::Schema;
use crate::score::{min_score, output_manifest};
use std::path::Path;
use tracing::{debug, warn};

/// What a selector may consult
#[derive(Debug, Clone, Copy)]
pub struct SelectionContext<'a> {
    /// Configuration of the consuming instance
    pub schema: &'a Schema,
    pub job_dir: &'a Path,
}

/// Picks which replica of an input stage feeds a consumer
pub trait InputSelector: Send + Sync {
    /// Replica index of `input` to stage
    fn select(&self, ctx: &SelectionContext<'_>, input: &Stage) -> usize;
}

/// Always the first replica
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstCandidate;

impl InputSelector for FirstCandidate {
    fn select(&self, _ctx: &SelectionContext<'_>, _input: &Stage) -> usize {
        0
    }
}

/// Lowest-scoring replica, judged from each replica's output manifest
///
/// Replicas without a readable manifest are skipped; when none remain the
/// first replica is chosen.
#[derive(Debug, Clone, Copy, Default)]
pub struct MinScore;

impl InputSelector for MinScore {
    fn select(&self, ctx: &SelectionContext<'_>, input: &Stage) -> usize {
        let design = ctx.schema.get(["design"]).to_string();
        let mut merged = Schema::empty();
        let mut candidates = Vec::new();

        for index in 0..input.nproc {
            let key = InstanceKey::new(&input.name, index);
            let manifest = output_manifest(ctx.job_dir, &key, &design);
            if !manifest.is_file() {
                continue;
            }
            match merged.read_cfg(&manifest) {
                Ok(()) => candidates.push(key),
                Err(e) => warn!(instance = %key, error = %e, "Skipping unreadable candidate"),
            }
        }

        let chosen = min_score(&merged, &candidates)
            .map(|key| key.index)
            .unwrap_or(0);
        debug!(stage = %input.name, index = chosen, "Selected input replica");
        chosen
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keypath;
    use crate::schema::WriteOptions;
    use tempfile::TempDir;

    fn write_replica(job_dir: &Path, index: usize, cells: i64) {
        let mut schema = Schema::new("top");
        schema.set(keypath!["metric", "syn", index, "real", "cells"], cells);
        let key = InstanceKey::new("syn", index);
        schema
            .write_cfg(output_manifest(job_dir, &key, "top"), WriteOptions::pruned())
            .unwrap();
    }

    #[test]
    fn test_first_candidate() {
        let schema = Schema::new("top");
        let temp = TempDir::new().unwrap();
        let ctx = SelectionContext {
            schema: &schema,
            job_dir: temp.path(),
        };
        let mut stage = Stage::new("syn", vec![]);
        stage.nproc = 4;
        assert_eq!(FirstCandidate.select(&ctx, &stage), 0);
    }

    #[test]
    fn test_min_score_reads_manifests() {
        let temp = TempDir::new().unwrap();
        write_replica(temp.path(), 0, 900);
        write_replica(temp.path(), 1, 300);
        write_replica(temp.path(), 2, 600);

        let schema = Schema::new("top");
        let ctx = SelectionContext {
            schema: &schema,
            job_dir: temp.path(),
        };
        let mut stage = Stage::new("syn", vec![]);
        stage.nproc = 3;
        assert_eq!(MinScore.select(&ctx, &stage), 1);
    }

    #[test]
    fn test_min_score_without_manifests() {
        let temp = TempDir::new().unwrap();
        let schema = Schema::new("top");
        let ctx = SelectionContext {
            schema: &schema,
            job_dir: temp.path(),
        };
        let mut stage = Stage::new("syn", vec![]);
        stage.nproc = 2;
        assert_eq!(MinScore.select(&ctx, &stage), 0);
    }
}
