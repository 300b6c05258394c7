//! Core checkpoint data structures
//!
//! A [`Checkpoint`] is an immutable snapshot of a workflow run captured at a
//! superstep boundary. The engine hands the checkpoint system an opaque,
//! JSON-serializable state blob; this crate never inspects it. Callers hold
//! on to the lightweight [`CheckpointInfo`] handle and use it to restore the
//! full snapshot later.
//!
//! Checkpoints form a chain through their `parent` field: each checkpoint
//! records the checkpoint it was taken after, which preserves lineage across
//! restores and resumed runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Checkpoint identifier. Derived from the snapshot content, so two
/// checkpoints with identical state at the same step share an ID.
pub type CheckpointId = String;

/// A complete, immutable snapshot of workflow run state.
///
/// Once created a checkpoint is never mutated; restoring it any number of
/// times yields the same state. The `state` field is the engine's exported
/// snapshot and is treated as opaque by every store backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Content-derived identifier
    pub id: CheckpointId,

    /// Run this checkpoint belongs to
    pub run_id: String,

    /// Superstep at whose close this snapshot was taken
    pub step: u64,

    /// Creation timestamp
    pub ts: DateTime<Utc>,

    /// Opaque engine state (exported step context, executor states, edge state)
    pub state: serde_json::Value,

    /// Checkpoint this one was taken after, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<CheckpointId>,
}

impl Checkpoint {
    /// Create a new checkpoint snapshot stamped with the current time.
    pub fn new(
        id: CheckpointId,
        run_id: impl Into<String>,
        step: u64,
        state: serde_json::Value,
    ) -> Self {
        Self {
            id,
            run_id: run_id.into(),
            step,
            ts: Utc::now(),
            state,
            parent: None,
        }
    }

    /// Record the checkpoint this snapshot was taken after.
    pub fn with_parent(mut self, parent: CheckpointId) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Project the identifying handle for this checkpoint.
    pub fn info(&self) -> CheckpointInfo {
        CheckpointInfo {
            id: self.id.clone(),
            run_id: self.run_id.clone(),
            step: self.step,
            ts: self.ts,
            parent: self.parent.clone(),
        }
    }
}

/// Lightweight handle identifying a stored checkpoint.
///
/// Contains no state; cheap to clone and safe to keep around after the
/// underlying run has finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointInfo {
    /// Checkpoint identifier
    pub id: CheckpointId,

    /// Run the checkpoint belongs to
    pub run_id: String,

    /// Superstep the checkpoint was taken at
    pub step: u64,

    /// Creation timestamp
    pub ts: DateTime<Utc>,

    /// Parent checkpoint, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<CheckpointId>,
}
