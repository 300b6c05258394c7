//! Whole-run snapshots for checkpoint export and restore
//!
//! [`RunSnapshot`] is the closure-free projection of everything a
//! [`WorkflowRunner`](crate::runner::WorkflowRunner) needs to resume:
//! the queued messages, stateful executor snapshots, fan-in join buffers,
//! shared state, pending external requests, and the step counter. Edge
//! state is keyed by [`EdgeInfo`] — structural identity, not object
//! identity — because the workflow graph is rebuilt fresh on restore.
//! Conditions and partitioners are never serialized; they are re-derived
//! from the workflow definition.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::edge::EdgeInfo;
use crate::executor::ExecutorId;
use crate::message::{PortableMessageEnvelope, PortableValue};
use crate::port::PendingRequest;
use crate::state::StateUpdate;

/// Serializable state of one fan-in join at snapshot time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeSnapshot {
    /// Structural identity of the edge the buffer belongs to
    pub info: EdgeInfo,
    /// Buffered contributions per source, in arrival order
    pub pending: Vec<(ExecutorId, Vec<PortableValue>)>,
}

/// Complete runtime state of a workflow run at a superstep boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSnapshot {
    /// Superstep count at snapshot time
    pub step: u64,
    /// Queued messages, in delivery order
    pub messages: Vec<PortableMessageEnvelope>,
    /// Internal state of stateful executors
    pub executors: BTreeMap<ExecutorId, Value>,
    /// Fan-in join buffers, keyed by structural edge identity
    pub edges: Vec<EdgeSnapshot>,
    /// Shared scoped state entries
    pub shared_state: Vec<StateUpdate>,
    /// External requests still awaiting a response
    pub pending_requests: Vec<PendingRequest>,
    /// Completion data, if an executor already requested completion
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion: Option<Value>,
    /// Most recently yielded output
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_output: Option<Value>,
}
