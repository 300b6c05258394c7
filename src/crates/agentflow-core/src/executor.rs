//! Executors: the graph's message-handling nodes
//!
//! An [`Executor`] is a named unit of computation declaring the message
//! types it accepts. Handler dispatch is an explicit registry built once at
//! construction — a map from message type tag to a boxed async closure —
//! so one executor can serve many typed handlers without any runtime
//! reflection. [`FunctionExecutor`] is the standard way to turn plain
//! closures into executors; hand-written implementations of the trait work
//! the same way and the engine does not distinguish between them.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::context::WorkflowContext;
use crate::error::{Result, WorkflowError};
use crate::message::{type_tag_of, PortableValue};

/// Executor identifier - unique name for each node in the workflow
pub type ExecutorId = String;

/// Boxed future returned by message handlers.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

type BoxedHandler = Arc<dyn Fn(PortableValue, WorkflowContext) -> HandlerFuture + Send + Sync>;

/// A named, typed message-handling unit.
///
/// Executors are constructed once per workflow instance and live for the
/// duration of a run. Stateful executors keep their state behind interior
/// mutability and may expose it to checkpoints through
/// [`snapshot_state`](Self::snapshot_state) /
/// [`restore_state`](Self::restore_state).
#[async_trait]
pub trait Executor: Send + Sync {
    /// Stable identifier, unique within a workflow.
    fn id(&self) -> &str;

    /// Type tags of the messages this executor accepts.
    fn input_types(&self) -> Vec<String>;

    /// Handle one delivered message.
    ///
    /// Outbound messages, outputs, and events go through `ctx`; they are
    /// collected by the scheduler after the handler returns and routed at
    /// the superstep barrier.
    async fn handle(&self, message: PortableValue, ctx: &WorkflowContext) -> Result<()>;

    /// Whether the runtime may dispatch this executor's message batch as
    /// concurrently awaited handler calls. Non-thread-safe executors (the
    /// default) have their batch awaited strictly sequentially.
    fn is_thread_safe(&self) -> bool {
        false
    }

    /// Export internal state for checkpointing. `None` means stateless.
    fn snapshot_state(&self) -> Result<Option<serde_json::Value>> {
        Ok(None)
    }

    /// Restore internal state from a checkpoint snapshot.
    fn restore_state(&self, _state: serde_json::Value) -> Result<()> {
        Ok(())
    }
}

/// Registry mapping message type tags to typed async handlers.
///
/// Built once at executor construction. Each registered handler performs a
/// checked downcast from [`PortableValue`] to its declared type before
/// running; a message whose tag has no registered handler is a
/// [`WorkflowError::NoHandler`].
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, BoxedHandler>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for messages of type `T`.
    ///
    /// Registering a second handler for the same type replaces the first.
    pub fn on<T, F, Fut>(mut self, handler: F) -> Self
    where
        T: DeserializeOwned + Send + 'static,
        F: Fn(T, WorkflowContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let boxed: BoxedHandler = Arc::new(move |value: PortableValue, ctx: WorkflowContext| {
            match value.extract::<T>() {
                Ok(typed) => Box::pin(handler(typed, ctx)) as HandlerFuture,
                Err(err) => Box::pin(std::future::ready(Err(err))) as HandlerFuture,
            }
        });
        self.handlers.insert(type_tag_of::<T>().to_string(), boxed);
        self
    }

    /// Type tags with a registered handler, sorted for stable reporting.
    pub fn accepted_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }

    /// Whether a handler exists for the given type tag.
    pub fn accepts(&self, type_tag: &str) -> bool {
        self.handlers.contains_key(type_tag)
    }

    /// Dispatch a message to its handler.
    pub async fn dispatch(
        &self,
        executor_id: &str,
        message: PortableValue,
        ctx: WorkflowContext,
    ) -> Result<()> {
        match self.handlers.get(message.type_tag()) {
            Some(handler) => handler(message, ctx).await,
            None => Err(WorkflowError::NoHandler {
                executor: executor_id.to_string(),
                message_type: message.type_tag().to_string(),
            }),
        }
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("types", &self.accepted_types())
            .finish()
    }
}

/// An executor assembled from a handler registry.
///
/// The usual way to wrap plain async functions as graph nodes:
///
/// ```rust
/// use agentflow_core::{FunctionExecutor, HandlerRegistry};
///
/// let doubler = FunctionExecutor::new(
///     "doubler",
///     HandlerRegistry::new().on::<u32, _, _>(|n, ctx| async move {
///         ctx.send_message(&(n * 2))
///     }),
/// );
/// ```
pub struct FunctionExecutor {
    id: ExecutorId,
    registry: HandlerRegistry,
    thread_safe: bool,
}

impl FunctionExecutor {
    /// Wrap a registry under the given executor ID.
    pub fn new(id: impl Into<ExecutorId>, registry: HandlerRegistry) -> Self {
        Self {
            id: id.into(),
            registry,
            thread_safe: false,
        }
    }

    /// Mark the wrapped handlers as safe for concurrent dispatch.
    pub fn thread_safe(mut self) -> Self {
        self.thread_safe = true;
        self
    }
}

#[async_trait]
impl Executor for FunctionExecutor {
    fn id(&self) -> &str {
        &self.id
    }

    fn input_types(&self) -> Vec<String> {
        self.registry.accepted_types()
    }

    async fn handle(&self, message: PortableValue, ctx: &WorkflowContext) -> Result<()> {
        self.registry.dispatch(&self.id, message, ctx.clone()).await
    }

    fn is_thread_safe(&self) -> bool {
        self.thread_safe
    }
}

impl std::fmt::Debug for FunctionExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionExecutor")
            .field("id", &self.id)
            .field("types", &self.registry.accepted_types())
            .field("thread_safe", &self.thread_safe)
            .finish()
    }
}
