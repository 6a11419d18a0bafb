//! Shared liveness and abort state
//!
//! Each instance publishes its [`InstanceStatus`] on its own watch channel
//! and a single watch channel carries the abort flag. Every instance is
//! registered as pending before any task is spawned, so a fast downstream
//! instance can never observe an upstream instance as already finished.

use crate::error::{EdaFlowError, Result};
use crate::models::{InstanceKey, InstanceStatus};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

/// Status channels for every instance of a run plus the abort flag
#[derive(Debug)]
pub struct LivenessBoard {
    instances: HashMap<InstanceKey, watch::Sender<InstanceStatus>>,
    abort: watch::Sender<bool>,
}

impl LivenessBoard {
    /// Register every instance as pending
    pub fn new(keys: impl IntoIterator<Item = InstanceKey>) -> Self {
        let instances = keys
            .into_iter()
            .map(|key| (key, watch::channel(InstanceStatus::Pending).0))
            .collect();
        let (abort, _) = watch::channel(false);
        Self { instances, abort }
    }

    pub fn publish(&self, key: &InstanceKey, status: InstanceStatus) {
        if let Some(sender) = self.instances.get(key) {
            debug!(instance = %key, %status, "Instance status changed");
            sender.send_replace(status);
        }
    }

    pub fn status(&self, key: &InstanceKey) -> Option<InstanceStatus> {
        self.instances.get(key).map(|sender| *sender.borrow())
    }

    /// Liveness flag; instances outside this run are never active
    pub fn is_active(&self, key: &InstanceKey) -> bool {
        self.status(key).map(|s| s.is_active()).unwrap_or(false)
    }

    pub fn contains(&self, key: &InstanceKey) -> bool {
        self.instances.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &InstanceKey> {
        self.instances.keys()
    }

    /// Set the shared abort flag
    pub fn abort(&self) {
        self.abort.send_replace(true);
    }

    pub fn is_aborted(&self) -> bool {
        *self.abort.borrow()
    }

    /// Wait until every upstream instance is done
    ///
    /// Returns [`EdaFlowError::Aborted`] as soon as the abort flag is set or
    /// an upstream instance ends without success, and
    /// [`EdaFlowError::WaitTimeout`] when `timeout` elapses first. Upstream
    /// keys that are not part of this run are treated as complete.
    pub async fn wait_for_upstream(
        &self,
        instance: &InstanceKey,
        upstream: &[InstanceKey],
        timeout: Option<Duration>,
    ) -> Result<()> {
        let mut abort_rx = self.abort.subscribe();

        let completion = async {
            for key in upstream {
                let Some(sender) = self.instances.get(key) else {
                    continue;
                };
                let mut rx = sender.subscribe();
                let status = match rx.wait_for(|s| s.is_terminal()).await {
                    Ok(status) => *status,
                    Err(_) => InstanceStatus::Failed,
                };
                if status != InstanceStatus::Done {
                    return Err(EdaFlowError::Aborted(instance.to_string()));
                }
            }
            Ok(())
        };

        let guarded = async {
            tokio::select! {
                biased;
                _ = abort_rx.wait_for(|aborted| *aborted) => {
                    Err(EdaFlowError::Aborted(instance.to_string()))
                }
                result = completion => result,
            }
        };

        match timeout {
            Some(limit) => tokio::time::timeout(limit, guarded)
                .await
                .map_err(|_| EdaFlowError::WaitTimeout {
                    instance: instance.to_string(),
                    secs: limit.as_secs(),
                })?,
            None => guarded.await,
        }
    }

    /// Poll at a fixed interval until none of `keys` is active
    pub async fn wait(&self, keys: &[InstanceKey], interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if keys.iter().all(|key| !self.is_active(key)) {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn key(stage: &str, index: usize) -> InstanceKey {
        InstanceKey::new(stage, index)
    }

    #[test]
    fn test_all_registered_pending() {
        let board = LivenessBoard::new(vec![key("import", 0), key("syn", 0)]);
        assert_eq!(board.status(&key("import", 0)), Some(InstanceStatus::Pending));
        assert!(board.is_active(&key("syn", 0)));
        assert!(!board.is_active(&key("place", 0)));
        assert!(!board.is_aborted());
    }

    #[tokio::test]
    async fn test_wait_returns_after_upstream_done() {
        let board = Arc::new(LivenessBoard::new(vec![key("import", 0), key("syn", 0)]));
        let waiter = {
            let board = board.clone();
            tokio::spawn(async move {
                board
                    .wait_for_upstream(&key("syn", 0), &[key("import", 0)], None)
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        board.publish(&key("import", 0), InstanceStatus::Done);
        assert!(waiter.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_abort_releases_waiters() {
        let board = Arc::new(LivenessBoard::new(vec![key("import", 0), key("syn", 0)]));
        let waiter = {
            let board = board.clone();
            tokio::spawn(async move {
                board
                    .wait_for_upstream(&key("syn", 0), &[key("import", 0)], None)
                    .await
            })
        };

        board.abort();
        assert!(matches!(
            waiter.await.unwrap(),
            Err(EdaFlowError::Aborted(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_upstream_is_abort() {
        let board = LivenessBoard::new(vec![key("import", 0), key("syn", 0)]);
        board.publish(&key("import", 0), InstanceStatus::Failed);
        let result = board
            .wait_for_upstream(&key("syn", 0), &[key("import", 0)], None)
            .await;
        assert!(matches!(result, Err(EdaFlowError::Aborted(_))));
    }

    #[tokio::test]
    async fn test_wait_timeout() {
        let board = LivenessBoard::new(vec![key("import", 0), key("syn", 0)]);
        let result = board
            .wait_for_upstream(
                &key("syn", 0),
                &[key("import", 0)],
                Some(Duration::from_millis(50)),
            )
            .await;
        assert!(matches!(result, Err(EdaFlowError::WaitTimeout { .. })));
    }

    #[tokio::test]
    async fn test_upstream_outside_run_is_complete() {
        let board = LivenessBoard::new(vec![key("syn", 0)]);
        let result = board
            .wait_for_upstream(&key("syn", 0), &[key("import", 0)], None)
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_poll_wait() {
        let board = Arc::new(LivenessBoard::new(vec![key("a", 0), key("a", 1)]));
        let keys = vec![key("a", 0), key("a", 1)];
        let waiter = {
            let board = board.clone();
            let keys = keys.clone();
            tokio::spawn(async move { board.wait(&keys, Duration::from_millis(10)).await })
        };
        board.publish(&keys[0], InstanceStatus::Done);
        board.publish(&keys[1], InstanceStatus::Failed);
        tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
