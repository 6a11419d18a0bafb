//! Prometheus run telemetry
//!
//! Counters and timings for stage instances, rendered in the Prometheus text
//! format and written next to the job's manifests at the end of a run.
//!
//! # Available Metrics
//!
//! - `edaflow_instance_executions_total{stage, status}` - Counter of finished instances
//! - `edaflow_instance_duration_seconds{stage}` - Histogram of instance durations
//! - `edaflow_active_instances` - Gauge of instances currently running a tool

use crate::error::Result;
use prometheus::{CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};
use std::path::Path;
use std::sync::Arc;

/// Histogram bucket boundaries for instance durations (in seconds)
const INSTANCE_DURATION_BUCKETS: &[f64] = &[1.0, 10.0, 60.0, 300.0, 900.0, 3600.0, 14400.0];

/// Per-scheduler telemetry registry
#[derive(Clone)]
pub struct RunTelemetry {
    registry: Arc<Registry>,
    instance_executions: CounterVec,
    instance_duration: HistogramVec,
    active_instances: Gauge,
}

impl RunTelemetry {
    /// Create a registry with all run metrics registered
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let instance_executions = CounterVec::new(
            Opts::new(
                "edaflow_instance_executions_total",
                "Total number of finished stage instances",
            ),
            &["stage", "status"],
        )?;

        let instance_duration = HistogramVec::new(
            HistogramOpts::new(
                "edaflow_instance_duration_seconds",
                "Stage instance duration in seconds",
            )
            .buckets(INSTANCE_DURATION_BUCKETS.to_vec()),
            &["stage"],
        )?;

        let active_instances = Gauge::with_opts(Opts::new(
            "edaflow_active_instances",
            "Stage instances running a tool",
        ))?;

        registry.register(Box::new(instance_executions.clone()))?;
        registry.register(Box::new(instance_duration.clone()))?;
        registry.register(Box::new(active_instances.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            instance_executions,
            instance_duration,
            active_instances,
        })
    }

    /// Record a finished instance
    ///
    /// # Arguments
    ///
    /// * `stage` - Stage name
    /// * `status` - Final status ("done", "failed", "cancelled")
    /// * `duration_secs` - Instance duration in seconds
    pub fn record_instance(&self, stage: &str, status: &str, duration_secs: f64) {
        self.instance_executions
            .with_label_values(&[stage, status])
            .inc();
        self.instance_duration
            .with_label_values(&[stage])
            .observe(duration_secs);
    }

    pub fn inc_active(&self) {
        self.active_instances.inc();
    }

    pub fn dec_active(&self) {
        self.active_instances.dec();
    }

    /// Prometheus text exposition of every metric
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).to_string())
    }

    /// Write the text exposition to a file
    pub fn write_to(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.render()?)?;
        Ok(())
    }
}

impl std::fmt::Debug for RunTelemetry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunTelemetry").finish_non_exhaustive()
    }
}
