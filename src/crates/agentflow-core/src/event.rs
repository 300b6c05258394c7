//! Workflow event stream types
//!
//! Events are the engine's observability surface: an ordered, closed set of
//! variants emitted to the run's event stream as the scheduler progresses.
//! They are purely observational — consuming or dropping them never changes
//! scheduler behavior. Within one superstep all executor events precede the
//! step's [`SuperstepCompleted`](WorkflowEvent::SuperstepCompleted);
//! [`WorkflowCompleted`](WorkflowEvent::WorkflowCompleted) is terminal for
//! the stream.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::executor::ExecutorId;

/// Events emitted during a workflow run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum WorkflowEvent {
    /// An executor is about to handle a message
    ExecutorInvoked {
        /// Executor receiving the message
        executor_id: ExecutorId,
        /// Type tag of the delivered message
        message_type: String,
    },

    /// An executor finished its batch for the current step
    ExecutorCompleted {
        /// Executor that completed
        executor_id: ExecutorId,
    },

    /// An executor's handler (or its routing) failed; the branch halts
    ExecutorFailed {
        /// Executor that failed
        executor_id: ExecutorId,
        /// Failure description
        error: String,
    },

    /// A superstep finished: all deliveries handled, outputs routed
    SuperstepCompleted {
        /// 1-based superstep number
        step: u64,
        /// Messages delivered during this step
        delivered: usize,
        /// Messages queued for the next step
        queued: usize,
    },

    /// An executor yielded a value to the run's output
    WorkflowOutput {
        /// Yielded value
        data: Value,
    },

    /// The run reached quiescence or an executor requested completion
    WorkflowCompleted {
        /// Completion data, or the last yielded output
        output: Option<Value>,
    },

    /// Routing reached an input port; the run awaits an external response
    RequestInfo {
        /// Identifier to echo back via `send_response`
        request_id: String,
        /// Port that raised the request
        port_id: String,
        /// Request payload
        request: Value,
    },
}
