//! Metric records and weighted scoring of stage instances

use crate::keypath;
use crate::models::{InstanceKey, MetricRecord};
use crate::schema::{Schema, TEMPLATE_KEY};
use std::fmt::Write as _;
use std::path::Path;
use tracing::debug;

/// Metric group written by tools after a run
pub const REAL_GROUP: &str = "real";

/// Names of every declared metric
pub fn metric_names(schema: &Schema) -> Vec<String> {
    schema.getkeys([
        "metric",
        TEMPLATE_KEY,
        TEMPLATE_KEY,
        TEMPLATE_KEY,
    ])
}

/// Measured metrics of one instance; unset metrics are omitted
pub fn metric_record(schema: &Schema, step: &str, index: usize) -> MetricRecord {
    metric_names(schema)
        .into_iter()
        .filter_map(|name| {
            schema
                .get(keypath!["metric", step, index, REAL_GROUP, name])
                .as_f64()
                .map(|value| (name, value))
        })
        .collect()
}

/// Weighted sum of an instance's metrics
///
/// Every declared metric contributes `value * weight`. Unset metrics count
/// as zero and metrics without an explicit stage weight use 1.0.
pub fn score(schema: &Schema, step: &str, index: usize) -> f64 {
    let weighted = schema.getkeys(["flowgraph", step, "weight"]);
    metric_names(schema)
        .iter()
        .map(|name| {
            let value = schema
                .get(keypath!["metric", step, index, REAL_GROUP, name])
                .as_f64()
                .unwrap_or(0.0);
            let weight = if weighted.contains(name) {
                schema
                    .get(keypath!["flowgraph", step, "weight", name])
                    .as_f64()
                    .unwrap_or(1.0)
            } else {
                1.0
            };
            value * weight
        })
        .sum()
}

/// Instance with the lowest score; ties keep the first candidate
pub fn min_score(schema: &Schema, candidates: &[InstanceKey]) -> Option<InstanceKey> {
    let mut best: Option<(f64, &InstanceKey)> = None;
    for key in candidates {
        let value = score(schema, &key.stage, key.index);
        debug!(instance = %key, score = value, "Scored candidate");
        if best.map_or(true, |(current, _)| value < current) {
            best = Some((value, key));
        }
    }
    best.map(|(_, key)| key.clone())
}

/// Path of an instance's output manifest
pub fn output_manifest(job_dir: &Path, key: &InstanceKey, design: &str) -> std::path::PathBuf {
    job_dir
        .join(key.dir_name())
        .join("outputs")
        .join(format!("{}.pkg.json", design))
}

/// Metric table across instances, one column per instance and a final
/// score row
///
/// Metrics are read from each instance's output manifest when present and
/// from `schema` otherwise.
pub fn summary(schema: &Schema, steps: &[String]) -> String {
    let job_dir = schema.jobdir();
    let design = schema.get(["design"]).to_string();
    let graph = crate::flowgraph::FlowGraph::from_schema(schema);
    let keys = graph.instances(steps);

    let mut merged = schema.clone();
    for key in &keys {
        let manifest = output_manifest(&job_dir, key, &design);
        if manifest.is_file() {
            let mut instance = Schema::empty();
            if instance.read_cfg(&manifest).is_ok() {
                for (name, value) in metric_record(&instance, &key.stage, key.index) {
                    merged.set(keypath!["metric", key.stage, key.index, REAL_GROUP, name], value);
                }
            }
        }
    }

    let names = metric_names(&merged);
    let width = names.iter().map(String::len).max().unwrap_or(6).max(6);
    let mut out = String::new();
    let _ = write!(out, "{:width$}", "metric", width = width);
    for key in &keys {
        let _ = write!(out, " {:>12}", key.to_string());
    }
    out.push('\n');

    for name in &names {
        let row: Vec<String> = keys
            .iter()
            .map(|key| {
                merged
                    .get(keypath!["metric", key.stage, key.index, REAL_GROUP, name])
                    .as_f64()
                    .map(|v| format!("{:>12.3}", v))
                    .unwrap_or_else(|| format!("{:>12}", "---"))
            })
            .collect();
        let _ = writeln!(out, "{:width$} {}", name, row.join(" "), width = width);
    }

    let scores: Vec<String> = keys
        .iter()
        .map(|key| format!("{:>12.3}", score(&merged, &key.stage, key.index)))
        .collect();
    let _ = writeln!(out, "{:width$} {}", "score", scores.join(" "), width = width);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_weighted_sum() {
        let mut schema = Schema::new("top");
        schema.set(keypath!["metric", "syn", 0, "real", "cells"], 100);
        schema.set(keypath!["metric", "syn", 0, "real", "wirelength"], 2000);
        schema.set("flowgraph syn weight wirelength", 0.1);

        let value = score(&schema, "syn", 0);
        assert!((value - 300.0).abs() < 1e-9);
    }

    #[test]
    fn test_unset_metrics_score_zero() {
        let schema = Schema::new("top");
        assert_eq!(score(&schema, "syn", 0), 0.0);
        assert!(!schema.has_error());
    }

    #[test]
    fn test_metric_record_omits_unset() {
        let mut schema = Schema::new("top");
        schema.set(keypath!["metric", "place", 1, "real", "drv"], 4);
        let record = metric_record(&schema, "place", 1);
        assert_eq!(record.len(), 1);
        assert_eq!(record["drv"], 4.0);
    }

    #[test]
    fn test_min_score_picks_lowest() {
        let mut schema = Schema::new("top");
        schema.set(keypath!["metric", "syn", 0, "real", "cells"], 500);
        schema.set(keypath!["metric", "syn", 1, "real", "cells"], 200);
        schema.set(keypath!["metric", "syn", 2, "real", "cells"], 200);

        let candidates: Vec<InstanceKey> = (0..3).map(|i| InstanceKey::new("syn", i)).collect();
        assert_eq!(
            min_score(&schema, &candidates),
            Some(InstanceKey::new("syn", 1))
        );
        assert_eq!(min_score(&schema, &[]), None);
    }

    #[test]
    fn test_metric_names_declared() {
        let schema = Schema::new("top");
        let names = metric_names(&schema);
        assert!(names.contains(&"cells".to_string()));
        assert!(names.contains(&"runtime".to_string()));
        assert_eq!(names.len(), crate::schema::METRICS.len());
    }

    #[test]
    fn test_summary_table() {
        let mut schema = Schema::new("top");
        schema.set("flowgraph syn tool", "yosys");
        schema.set(keypath!["metric", "syn", 0, "real", "cells"], 10);
        let table = summary(&schema, &["syn".to_string()]);
        assert!(table.starts_with("metric"));
        assert!(table.contains("syn/0"));
        let score_line = table.lines().last().unwrap();
        assert!(score_line.starts_with("score"));
        assert!(score_line.contains("10.000"));
    }
}
