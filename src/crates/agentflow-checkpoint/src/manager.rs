//! Checkpoint lifecycle management
//!
//! [`CheckpointManager`] sits between the workflow engine and a
//! [`CheckpointStore`]: the engine exports its state as a JSON blob at a
//! superstep boundary, the manager derives a content-based ID, persists the
//! snapshot, and hands back a [`CheckpointInfo`] handle. Restoring from a
//! handle returns the stored state verbatim and never mutates the stored
//! checkpoint, so the same handle can be restored repeatedly (time-travel
//! replay, before/after comparisons).
//!
//! A manager is scoped to a single run. Deduplication state (content
//! hashing) lives inside the manager, never in process-wide statics.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use crate::checkpoint::{Checkpoint, CheckpointInfo};
use crate::error::{CheckpointError, Result};
use crate::store::CheckpointStore;

/// Creates, restores, and prunes checkpoints for one workflow run.
#[derive(Clone)]
pub struct CheckpointManager {
    store: Arc<dyn CheckpointStore>,
    run_id: String,
}

impl CheckpointManager {
    /// Create a manager for a fresh run with a generated run ID.
    pub fn new(store: Arc<dyn CheckpointStore>) -> Self {
        Self::for_run(store, Uuid::new_v4().to_string())
    }

    /// Create a manager bound to an existing run ID (used when resuming).
    pub fn for_run(store: Arc<dyn CheckpointStore>, run_id: impl Into<String>) -> Self {
        Self {
            store,
            run_id: run_id.into(),
        }
    }

    /// The run this manager checkpoints.
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Persist a state snapshot taken at the close of `step`.
    ///
    /// The checkpoint ID is derived from the run, step, and serialized state,
    /// so saving an identical snapshot twice is idempotent.
    pub async fn create_checkpoint(
        &self,
        step: u64,
        state: serde_json::Value,
        parent: Option<&CheckpointInfo>,
    ) -> Result<CheckpointInfo> {
        let id = self.derive_id(step, &state)?;
        let mut checkpoint = Checkpoint::new(id, self.run_id.clone(), step, state);
        if let Some(parent) = parent {
            checkpoint = checkpoint.with_parent(parent.id.clone());
        }

        self.store.save(&checkpoint).await?;
        debug!(run = %self.run_id, step, id = %checkpoint.id, "created checkpoint");
        Ok(checkpoint.info())
    }

    /// Load the state snapshot a handle refers to.
    ///
    /// The stored checkpoint is left untouched; restoring twice from the
    /// same handle yields identical state.
    pub async fn restore_checkpoint(&self, info: &CheckpointInfo) -> Result<serde_json::Value> {
        let checkpoint = self
            .store
            .load(&info.id)
            .await?
            .ok_or_else(|| CheckpointError::NotFound(info.id.clone()))?;
        debug!(run = %self.run_id, step = checkpoint.step, id = %checkpoint.id, "restored checkpoint");
        Ok(checkpoint.state)
    }

    /// List this run's checkpoint handles, oldest first.
    pub async fn list(&self) -> Result<Vec<CheckpointInfo>> {
        self.store.list(&self.run_id).await
    }

    /// The most recent checkpoint for this run, if any.
    pub async fn latest(&self) -> Result<Option<CheckpointInfo>> {
        Ok(self.store.list(&self.run_id).await?.into_iter().last())
    }

    /// Delete checkpoints taken after `step`.
    ///
    /// Optional cleanup after restoring to an earlier point; restores
    /// themselves never require it.
    pub async fn prune_after(&self, step: u64) -> Result<usize> {
        let infos = self.store.list(&self.run_id).await?;
        let mut pruned = 0;
        for info in infos.into_iter().filter(|i| i.step > step) {
            self.store.delete(&info.id).await?;
            pruned += 1;
        }
        if pruned > 0 {
            debug!(run = %self.run_id, step, pruned, "pruned checkpoints");
        }
        Ok(pruned)
    }

    fn derive_id(&self, step: u64, state: &serde_json::Value) -> Result<String> {
        let bytes = serde_json::to_vec(state)?;
        let mut hasher = DefaultHasher::new();
        self.run_id.hash(&mut hasher);
        step.hash(&mut hasher);
        bytes.hash(&mut hasher);
        Ok(format!("{:016x}", hasher.finish()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryCheckpointStore;
    use serde_json::json;

    fn manager() -> CheckpointManager {
        CheckpointManager::for_run(Arc::new(MemoryCheckpointStore::new()), "run-1")
    }

    #[tokio::test]
    async fn create_and_restore_round_trip() {
        let mgr = manager();
        let state = json!({"messages": [{"target": "judge", "data": 50}]});

        let info = mgr.create_checkpoint(2, state.clone(), None).await.unwrap();
        assert_eq!(info.step, 2);

        let restored = mgr.restore_checkpoint(&info).await.unwrap();
        assert_eq!(restored, state);
    }

    #[tokio::test]
    async fn restoring_twice_yields_identical_state() {
        let mgr = manager();
        let info = mgr
            .create_checkpoint(0, json!({"count": 7}), None)
            .await
            .unwrap();

        let first = mgr.restore_checkpoint(&info).await.unwrap();
        let second = mgr.restore_checkpoint(&info).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn identical_state_yields_identical_id() {
        let mgr = manager();
        let a = mgr
            .create_checkpoint(1, json!({"v": 1}), None)
            .await
            .unwrap();
        let b = mgr
            .create_checkpoint(1, json!({"v": 1}), None)
            .await
            .unwrap();
        assert_eq!(a.id, b.id);

        let c = mgr
            .create_checkpoint(1, json!({"v": 2}), None)
            .await
            .unwrap();
        assert_ne!(a.id, c.id);
    }

    #[tokio::test]
    async fn parent_chain_is_recorded() {
        let mgr = manager();
        let first = mgr
            .create_checkpoint(0, json!({"s": 0}), None)
            .await
            .unwrap();
        let second = mgr
            .create_checkpoint(1, json!({"s": 1}), Some(&first))
            .await
            .unwrap();
        assert_eq!(second.parent.as_deref(), Some(first.id.as_str()));
    }

    #[tokio::test]
    async fn restore_unknown_handle_fails() {
        let mgr = manager();
        let bogus = CheckpointInfo {
            id: "no-such".to_string(),
            run_id: "run-1".to_string(),
            step: 0,
            ts: chrono::Utc::now(),
            parent: None,
        };
        let err = mgr.restore_checkpoint(&bogus).await.unwrap_err();
        assert!(matches!(err, CheckpointError::NotFound(_)));
    }

    #[tokio::test]
    async fn prune_after_removes_newer_checkpoints() {
        let mgr = manager();
        for step in 0..5 {
            mgr.create_checkpoint(step, json!({"s": step}), None)
                .await
                .unwrap();
        }

        let pruned = mgr.prune_after(2).await.unwrap();
        assert_eq!(pruned, 2);

        let steps: Vec<u64> = mgr.list().await.unwrap().iter().map(|i| i.step).collect();
        assert_eq!(steps, vec![0, 1, 2]);
    }
}
