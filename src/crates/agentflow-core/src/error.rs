//! Error types for workflow construction and execution
//!
//! Build-time problems (dangling executor references, duplicate edges,
//! start-type mismatches) surface synchronously from the builder and never
//! produce a partial [`Workflow`](crate::workflow::Workflow). Runtime
//! problems are reported per executor branch: the failing branch halts, the
//! rest of the superstep completes, and the failure reaches observers as an
//! [`ExecutorFailed`](crate::event::WorkflowEvent::ExecutorFailed) event.
//! Suppressed deliveries (a condition returning false, a partitioner
//! selecting no targets) are normal control flow, not errors.

use thiserror::Error;

/// Convenience result type using [`WorkflowError`]
pub type Result<T> = std::result::Result<T, WorkflowError>;

/// Errors raised while building or executing a workflow
#[derive(Error, Debug)]
pub enum WorkflowError {
    /// Workflow structure validation failed at build time
    #[error("Workflow validation failed: {0}")]
    Validation(String),

    /// A second unconditional edge was registered for the same pair
    #[error("An unconditional edge from '{from}' to '{target}' already exists")]
    DuplicateEdge {
        /// Source executor of the offending edge
        from: String,
        /// Target executor of the offending edge
        target: String,
    },

    /// An executor referenced by ID was never bound to an instance
    #[error("Executor '{0}' was referenced but never bound")]
    UnboundExecutor(String),

    /// A message handler raised an error
    #[error("Executor '{executor}' failed handling '{message_type}': {message}")]
    ExecutorFailure {
        /// Executor whose handler failed
        executor: String,
        /// Type tag of the message being handled
        message_type: String,
        /// Underlying error text
        message: String,
    },

    /// An executor received a message type it declares no handler for
    #[error("Executor '{executor}' has no handler for message type '{message_type}'")]
    NoHandler {
        /// Executor the message was delivered to
        executor: String,
        /// Type tag of the undeliverable message
        message_type: String,
    },

    /// A message payload could not be coerced to the requested type
    #[error("Cannot coerce value tagged '{actual}' to '{expected}'")]
    Coercion {
        /// Type the caller asked for
        expected: String,
        /// Type tag carried by the value
        actual: String,
    },

    /// Routing a produced message failed
    #[error("Routing failed for message from '{from}': {message}")]
    Routing {
        /// Source executor of the message
        from: String,
        /// Failure description
        message: String,
    },

    /// A partitioner selected an index outside the target list
    #[error("Partitioner on edge {edge_id} returned index {index}, but the edge has {target_count} targets")]
    InvalidPartition {
        /// Fan-out edge being evaluated
        edge_id: u64,
        /// Offending index
        index: usize,
        /// Number of targets on the edge
        target_count: usize,
    },

    /// A checkpoint snapshot does not structurally match the current workflow
    #[error("Checkpoint does not match the current workflow: {0}")]
    SnapshotMismatch(String),

    /// A response arrived for a request that is not pending
    #[error("No pending external request with ID '{0}'")]
    UnknownRequest(String),

    /// A response payload does not match the port's declared response type
    #[error("Response to request '{request_id}' has type '{actual}', expected '{expected}'")]
    ResponseType {
        /// Request being answered
        request_id: String,
        /// Response type the port declares
        expected: String,
        /// Type tag of the supplied payload
        actual: String,
    },

    /// General execution failure without a specific executor context
    #[error("Execution failed: {0}")]
    Execution(String),

    /// Checkpoint persistence failure
    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] agentflow_checkpoint::CheckpointError),

    /// JSON serialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl WorkflowError {
    /// Wrap a handler error with its executor and message-type context.
    pub fn executor_failure(
        executor: impl Into<String>,
        message_type: impl Into<String>,
        message: impl std::fmt::Display,
    ) -> Self {
        Self::ExecutorFailure {
            executor: executor.into(),
            message_type: message_type.into(),
            message: message.to_string(),
        }
    }
}
