//! # agentflow-core - Workflow Orchestration Engine
//!
//! A deterministic, replayable execution engine for directed graphs of
//! message-passing executors. Executors declare typed message handlers;
//! edges route produced messages directly, fanned out across target lists,
//! or joined from several sources into one target; the scheduler advances
//! the run in discrete **supersteps** until no messages remain. Runtime
//! state snapshots cleanly at every superstep boundary, so runs can be
//! paused, resumed, rolled back, and replayed through the companion
//! `agentflow-checkpoint` crate.
//!
//! ## Execution model
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │  Superstep N                                         │
//! │                                                      │
//! │  1. Dispatch: drain queued messages, group by target │
//! │        ↓                                             │
//! │  2. Execute: each target handles its batch           │
//! │     (FIFO per target, targets run concurrently)      │
//! │        ↓                                             │
//! │  3. Route: outputs evaluated against outgoing edges  │
//! │     conditions · partitioned fan-out · fan-in joins  │
//! │        ↓                                             │
//! │  4. Barrier: state updates apply, events flush,      │
//! │     checkpoint taken                                 │
//! └──────────────────────────────────────────────────────┘
//!                 ↓
//!     messages queued?  → next superstep
//!     requests pending? → suspend for external input
//!     otherwise         → WorkflowCompleted
//! ```
//!
//! Cycles are first-class: an edge back to an earlier executor simply
//! queues work for a later superstep, so iterative agent loops terminate
//! through quiescence or an explicit completion, never stack depth.
//!
//! ## Quick start
//!
//! ```rust
//! use agentflow_core::{
//!     FunctionExecutor, HandlerRegistry, InProcessExecution, WorkflowBuilder,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let doubler = Arc::new(FunctionExecutor::new(
//!         "doubler",
//!         HandlerRegistry::new().on::<u32, _, _>(|n, ctx| async move {
//!             ctx.send_message(&(n * 2))
//!         }),
//!     ));
//!     let sink = Arc::new(FunctionExecutor::new(
//!         "sink",
//!         HandlerRegistry::new().on::<u32, _, _>(|n, ctx| async move {
//!             ctx.yield_output(&n)
//!         }),
//!     ));
//!
//!     let mut builder = WorkflowBuilder::new("doubler");
//!     builder.bind_executor(doubler)?;
//!     builder.bind_executor(sink)?;
//!     builder.add_edge("doubler", "sink")?;
//!     let workflow = builder.build::<u32>()?;
//!
//!     let outcome = InProcessExecution::run(workflow, &21u32).await?;
//!     assert_eq!(outcome.output, Some(serde_json::json!(42)));
//!     Ok(())
//! }
//! ```
//!
//! ## Module map
//!
//! - [`executor`] — the [`Executor`] trait, [`HandlerRegistry`] dispatch,
//!   [`FunctionExecutor`]
//! - [`edge`] — direct / fan-out / fan-in edges, typed conditions and
//!   partitioners, structural [`EdgeInfo`] identity
//! - [`builder`] — [`WorkflowBuilder`] validation and graph assembly
//! - [`runner`] — the superstep scheduler
//! - [`step`] — per-step message queues and fan-in join buffers
//! - [`context`] — the [`WorkflowContext`] handed to handlers
//! - [`port`] — human-in-the-loop input ports
//! - [`state`] — shared scoped state applied at step barriers
//! - [`snapshot`] — whole-run snapshots for checkpoint export/restore
//! - [`execution`] — [`InProcessExecution`] and the [`StreamingRun`] handle
//! - [`event`] — the [`WorkflowEvent`] observer stream

pub mod builder;
pub mod context;
pub mod edge;
pub mod error;
pub mod event;
pub mod execution;
pub mod executor;
pub mod message;
pub mod port;
pub mod runner;
pub mod snapshot;
pub mod state;
pub mod step;
pub mod workflow;

pub use builder::WorkflowBuilder;
pub use context::WorkflowContext;
pub use edge::{Edge, EdgeCondition, EdgeId, EdgeInfo, EdgeKind, EdgePartitioner};
pub use error::{Result, WorkflowError};
pub use event::WorkflowEvent;
pub use execution::{InProcessExecution, RunOutcome, StreamingRun};
pub use executor::{Executor, ExecutorId, FunctionExecutor, HandlerRegistry};
pub use message::{
    type_tag_of, MessageEnvelope, PortableMessageEnvelope, PortableValue, INPUT_SOURCE,
};
pub use port::{ExternalResponse, InputPort, PendingRequest};
pub use runner::{RunOptions, RunStatus, WorkflowRunner};
pub use snapshot::{EdgeSnapshot, RunSnapshot};
pub use state::{SharedState, StateScope, StateUpdate};
pub use step::{FanInState, StepContext};
pub use workflow::Workflow;
