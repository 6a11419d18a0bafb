//! Scheduler settings
//!
//! Layered with the `config` crate: built-in defaults, then an optional
//! settings file, then `EDAFLOW_*` environment variables.

use crate::error::Result;
use crate::models::DEFAULT_POLL_INTERVAL_MS;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Runner behaviour that is not part of the design configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SchedulerSettings {
    /// Interval between liveness polls in [`crate::scheduler::RunHandle::wait`]
    pub poll_interval_ms: u64,
    /// Bound on how long an instance waits for its inputs; unset waits forever
    #[serde(default)]
    pub wait_timeout_secs: Option<u64>,
    /// Basename of the per-instance manifests
    pub manifest_name: String,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            wait_timeout_secs: None,
            manifest_name: "sc_manifest".to_string(),
        }
    }
}

impl SchedulerSettings {
    /// Load settings from `path` (or `edaflow.*` in the working directory)
    /// and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let defaults = Self::default();
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name("edaflow").required(false),
        };
        let settings = Config::builder()
            .set_default("poll_interval_ms", defaults.poll_interval_ms)?
            .set_default("manifest_name", defaults.manifest_name)?
            .add_source(file)
            .add_source(Environment::with_prefix("EDAFLOW"))
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn wait_timeout(&self) -> Option<Duration> {
        self.wait_timeout_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let settings = SchedulerSettings::default();
        assert_eq!(settings.poll_interval(), Duration::from_secs(1));
        assert_eq!(settings.wait_timeout(), None);
        assert_eq!(settings.manifest_name, "sc_manifest");
    }

    #[test]
    fn test_load_from_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("edaflow.toml");
        std::fs::write(&path, "poll_interval_ms = 250\nwait_timeout_secs = 600\n").unwrap();

        let settings = SchedulerSettings::load(Some(&path)).unwrap();
        assert_eq!(settings.poll_interval(), Duration::from_millis(250));
        assert_eq!(settings.wait_timeout(), Some(Duration::from_secs(600)));
        assert_eq!(settings.manifest_name, "sc_manifest");
    }

    #[test]
    fn test_missing_required_file() {
        let result = SchedulerSettings::load(Some(Path::new("/nonexistent/edaflow.toml")));
        assert!(result.is_err());
    }
}
