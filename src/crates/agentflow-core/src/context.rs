//! Per-invocation workflow context
//!
//! Handlers never touch the scheduler directly. Every effect — outbound
//! messages, yielded outputs, custom events, completion requests, shared
//! state writes — goes through a [`WorkflowContext`] that buffers it until
//! the handler returns. The scheduler drains the buffer during the routing
//! phase, which is what keeps superstep semantics intact: nothing a handler
//! produces is visible to the rest of the graph before the barrier.
//!
//! Contexts are cheap clones over a shared buffer, so an executor marked
//! thread-safe can have several in-flight handler calls appending effects
//! concurrently; the buffer lock serializes them.

use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::Result;
use crate::event::WorkflowEvent;
use crate::executor::ExecutorId;
use crate::message::{MessageEnvelope, PortableValue};
use crate::state::{SharedState, StateScope, StateUpdate};

/// Effects buffered by a context during handler execution.
#[derive(Debug, Default)]
pub(crate) struct ContextEffects {
    pub(crate) messages: Vec<MessageEnvelope>,
    pub(crate) events: Vec<WorkflowEvent>,
    pub(crate) outputs: Vec<serde_json::Value>,
    pub(crate) completion: Option<serde_json::Value>,
    pub(crate) state_updates: Vec<StateUpdate>,
}

/// The interface an executor sees while handling a message.
#[derive(Clone)]
pub struct WorkflowContext {
    executor_id: ExecutorId,
    step: u64,
    effects: Arc<Mutex<ContextEffects>>,
    shared: SharedState,
    cancel: CancellationToken,
}

impl WorkflowContext {
    pub(crate) fn new(
        executor_id: ExecutorId,
        step: u64,
        shared: SharedState,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            executor_id,
            step,
            effects: Arc::new(Mutex::new(ContextEffects::default())),
            shared,
            cancel,
        }
    }

    /// ID of the executor this context was created for.
    pub fn executor_id(&self) -> &str {
        &self.executor_id
    }

    /// Current superstep number (1-based).
    pub fn step(&self) -> u64 {
        self.step
    }

    /// Send a message along this executor's outgoing edges.
    pub fn send_message<T: Serialize>(&self, message: &T) -> Result<()> {
        let envelope =
            MessageEnvelope::new(PortableValue::new(message)?, self.executor_id.clone());
        self.lock().messages.push(envelope);
        Ok(())
    }

    /// Send a message directly to a named executor, bypassing edges.
    pub fn send_message_to<T: Serialize>(
        &self,
        message: &T,
        target: impl Into<ExecutorId>,
    ) -> Result<()> {
        let envelope = MessageEnvelope::addressed(
            PortableValue::new(message)?,
            self.executor_id.clone(),
            target,
        );
        self.lock().messages.push(envelope);
        Ok(())
    }

    /// Yield a value to the run's output stream.
    pub fn yield_output<T: Serialize>(&self, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.lock().outputs.push(value);
        Ok(())
    }

    /// Request run completion with the given data at the end of this step.
    ///
    /// The first completion request wins; later ones are ignored.
    pub fn complete<T: Serialize>(&self, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        let mut effects = self.lock();
        if effects.completion.is_some() {
            warn!(executor = %self.executor_id, "completion already requested; ignoring");
        } else {
            effects.completion = Some(value);
        }
        Ok(())
    }

    /// Emit a custom event into the run's event stream.
    pub fn add_event(&self, event: WorkflowEvent) {
        self.lock().events.push(event);
    }

    /// Read a shared state entry as of the last superstep barrier.
    pub fn read_state(&self, scope: &StateScope, key: &str) -> Option<serde_json::Value> {
        self.shared.read(scope, key)
    }

    /// Queue a shared state write, applied at the superstep barrier.
    pub fn queue_state_update<T: Serialize>(
        &self,
        scope: StateScope,
        key: impl Into<String>,
        value: &T,
    ) -> Result<()> {
        let update = StateUpdate {
            scope,
            key: key.into(),
            value: serde_json::to_value(value)?,
        };
        self.lock().state_updates.push(update);
        Ok(())
    }

    /// The run's cancellation token; handlers observe it cooperatively.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub(crate) fn take_effects(&self) -> ContextEffects {
        std::mem::take(&mut *self.lock())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ContextEffects> {
        self.effects.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for WorkflowContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowContext")
            .field("executor_id", &self.executor_id)
            .field("step", &self.step)
            .finish()
    }
}
