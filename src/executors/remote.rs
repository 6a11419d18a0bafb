//! Remote job dispatch
//!
//! The network layer itself lives outside this crate. A [`RemoteDispatch`]
//! implementation receives the pruned configuration and a job hash, runs the
//! job elsewhere and materializes each instance's output manifest under the
//! local job directory before returning.

use crate::schema::Schema;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// A job handed to a remote dispatcher
#[derive(Debug, Clone)]
pub struct RemoteJob {
    /// Pruned configuration with the credential removed
    pub config: Schema,
    /// Job identity, stored in `remote hash`
    pub job_hash: String,
    /// Local directory where results must be materialized
    pub job_dir: PathBuf,
    /// Value of `remote key`, kept out of `config`
    pub credential: Option<String>,
}

/// Asynchronous remote execution collaborator
#[async_trait]
pub trait RemoteDispatch: Send + Sync {
    /// Upload, run and download a job
    async fn dispatch(&self, job: &RemoteJob) -> anyhow::Result<()>;

    /// Decrypt pre-staged job data with a credential scrubbed from the
    /// configuration
    async fn decrypt(&self, _job_dir: &Path, _key: &str) -> anyhow::Result<()> {
        Ok(())
    }

    /// Re-encrypt job data after a local run
    async fn encrypt(&self, _job_dir: &Path, _key: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

/// New job identity: a v4 uuid in simple hex form
pub fn new_job_hash() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_hash_format() {
        let hash = new_job_hash();
        assert_eq!(hash.len(), 32);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(hash, new_job_hash());
    }
}
