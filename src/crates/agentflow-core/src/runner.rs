//! The superstep scheduler
//!
//! [`WorkflowRunner`] advances a run through discrete supersteps. Each step:
//!
//! 1. **Dispatching** — the pending [`StepContext`] is drained and grouped
//!    by target executor.
//! 2. **Executing** — each target handles its batch; messages to one target
//!    are delivered in arrival order, distinct targets run concurrently,
//!    and every invocation buffers its effects in its own context.
//! 3. **Routing** — produced messages are evaluated against the source's
//!    outgoing edges (conditions, partitioners, fan-in joins) into the
//!    *next* step context; shared state updates apply at this barrier.
//!
//! The loop reaches quiescence when no messages remain: the run completes,
//! or suspends if external requests are still pending. A handler failure
//! halts its own branch — sibling targets already dispatched in the same
//! step run to completion, and the failure surfaces as an
//! [`ExecutorFailed`](WorkflowEvent::ExecutorFailed) event.
//!
//! Determinism: targets are processed in stable order, per-target delivery
//! preserves arrival order, and routing happens sequentially in that same
//! stable order, so a restored checkpoint replays identically given the
//! same external inputs.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::context::{ContextEffects, WorkflowContext};
use crate::edge::{Edge, EdgeId, EdgeInfo, EdgeKind};
use crate::error::{Result, WorkflowError};
use crate::event::WorkflowEvent;
use crate::executor::{Executor, ExecutorId};
use crate::message::{MessageEnvelope, PortableValue, INPUT_SOURCE};
use crate::port::{ExternalResponse, PendingRequest};
use crate::snapshot::{EdgeSnapshot, RunSnapshot};
use crate::state::SharedState;
use crate::step::{FanInState, StepContext};
use crate::workflow::Workflow;

/// Options governing a single run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Upper bound on supersteps; exceeding it fails the run.
    pub max_steps: u64,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self { max_steps: 256 }
    }
}

/// Lifecycle state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Messages are queued and the next superstep may begin
    Idle,
    /// A superstep is executing
    Running,
    /// Quiescent with external requests pending
    AwaitingInput,
    /// The run finished
    Completed,
    /// The run failed with an unrecoverable error
    Failed,
}

/// Outcome of one target executor's batch within a superstep.
struct TargetOutcome {
    target: ExecutorId,
    events: Vec<WorkflowEvent>,
    effects: ContextEffects,
    failed: bool,
}

/// The superstep scheduler for one workflow run.
pub struct WorkflowRunner {
    workflow: Workflow,
    step: u64,
    queue: StepContext,
    fan_in: FanInState,
    shared: SharedState,
    pending_requests: HashMap<String, PendingRequest>,
    completion: Option<serde_json::Value>,
    last_output: Option<serde_json::Value>,
    status: RunStatus,
    events: Option<mpsc::UnboundedSender<WorkflowEvent>>,
    cancel: CancellationToken,
    max_steps: u64,
}

impl WorkflowRunner {
    /// Create a runner over a workflow definition.
    pub fn new(
        workflow: Workflow,
        events: mpsc::UnboundedSender<WorkflowEvent>,
        cancel: CancellationToken,
        options: RunOptions,
    ) -> Self {
        Self {
            workflow,
            step: 0,
            queue: StepContext::new(),
            fan_in: FanInState::default(),
            shared: SharedState::new(),
            pending_requests: HashMap::new(),
            completion: None,
            last_output: None,
            status: RunStatus::Idle,
            events: Some(events),
            cancel,
            max_steps: options.max_steps,
        }
    }

    /// Current run status.
    pub fn status(&self) -> RunStatus {
        self.status
    }

    /// Supersteps executed so far.
    pub fn step(&self) -> u64 {
        self.step
    }

    /// Completion data if set, otherwise the last yielded output.
    pub fn output(&self) -> Option<&serde_json::Value> {
        self.completion.as_ref().or(self.last_output.as_ref())
    }

    /// Whether messages are queued for the next superstep.
    pub fn has_pending_messages(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Queue the run's input message for the start executor.
    pub fn enqueue_input<T: serde::Serialize>(&mut self, input: &T) -> Result<()> {
        let value = PortableValue::new(input)?;
        if value.type_tag() != self.workflow.input_type() {
            return Err(WorkflowError::Validation(format!(
                "workflow accepts input type '{}', got '{}'",
                self.workflow.input_type(),
                value.type_tag()
            )));
        }
        let start = self.workflow.start_id().to_string();
        self.queue
            .push(start, MessageEnvelope::new(value, INPUT_SOURCE));
        Ok(())
    }

    /// Answer a pending external request.
    ///
    /// The response payload must match the port's declared response type;
    /// an unknown request ID or a mismatched payload fails the call and
    /// leaves the run suspended. A valid response becomes an inbound
    /// message for the next superstep, routed along the port's outgoing
    /// edges (or back to the requesting executor when the port has none).
    pub fn send_response(&mut self, response: ExternalResponse) -> Result<()> {
        let pending = self
            .pending_requests
            .remove(&response.request_id)
            .ok_or_else(|| WorkflowError::UnknownRequest(response.request_id.clone()))?;

        let port = self
            .workflow
            .port(&pending.port_id)
            .cloned()
            .ok_or_else(|| {
                WorkflowError::SnapshotMismatch(format!(
                    "pending request '{}' references unknown port '{}'",
                    pending.request_id, pending.port_id
                ))
            })?;

        if response.payload.type_tag() != port.response_type() {
            let err = WorkflowError::ResponseType {
                request_id: response.request_id.clone(),
                expected: port.response_type().to_string(),
                actual: response.payload.type_tag().to_string(),
            };
            // The request stays pending; the run remains suspended.
            self.pending_requests
                .insert(pending.request_id.clone(), pending);
            return Err(err);
        }

        debug!(request = %response.request_id, port = %port.id(), "external response accepted");
        let envelope = MessageEnvelope::new(response.payload, port.id());
        let mut queue = std::mem::take(&mut self.queue);
        let routed = if self.workflow.outgoing(port.id()).is_empty() {
            // No outgoing edges: deliver straight back to the requester.
            queue.push(pending.source.clone(), envelope);
            Ok(())
        } else {
            self.route_message(port.id(), envelope, &mut queue)
        };
        self.queue = queue;
        routed?;

        if self.status == RunStatus::AwaitingInput {
            self.status = RunStatus::Idle;
        }
        Ok(())
    }

    /// Discard the buffered contributions of a fan-in join.
    ///
    /// Explicit escape hatch for joins whose remaining sources will never
    /// fire again; the engine itself never expires a join.
    pub fn abandon_join(&mut self, edge_id: EdgeId) -> bool {
        let dropped = self.fan_in.abandon(edge_id);
        if dropped {
            warn!(edge = edge_id, "abandoned fan-in join buffer");
        }
        dropped
    }

    /// Execute one superstep, returning the status afterwards.
    ///
    /// With an empty queue this only resolves the terminal state:
    /// `AwaitingInput` when requests are pending, `Completed` otherwise.
    pub async fn run_superstep(&mut self) -> Result<RunStatus> {
        if matches!(self.status, RunStatus::Completed | RunStatus::Failed) {
            return Ok(self.status);
        }

        if self.queue.is_empty() {
            self.conclude();
            return Ok(self.status);
        }

        if self.step >= self.max_steps {
            self.status = RunStatus::Failed;
            return Err(WorkflowError::Execution(format!(
                "maximum supersteps ({}) exceeded",
                self.max_steps
            )));
        }

        self.status = RunStatus::Running;
        self.step += 1;
        let step = self.step;
        let batches = self.queue.drain();
        let delivered: usize = batches.values().map(Vec::len).sum();
        debug!(step, delivered, targets = batches.len(), "superstep dispatching");

        // Executing: distinct targets run concurrently, each with its own
        // effect buffer; results come back in the stable dispatch order.
        let mut invocations = Vec::with_capacity(batches.len());
        for (target, envelopes) in batches {
            let executor = self.workflow.executor(&target).cloned();
            let ctx = WorkflowContext::new(
                target.clone(),
                step,
                self.shared.clone(),
                self.cancel.clone(),
            );
            invocations.push(run_target(target, executor, envelopes, ctx));
        }
        let outcomes = futures::future::join_all(invocations).await;

        // Routing: sequential, in the same stable order.
        let mut next = StepContext::new();
        let mut state_updates = Vec::new();
        for outcome in outcomes {
            for event in outcome.events {
                self.emit(event);
            }
            if outcome.failed {
                continue;
            }

            let effects = outcome.effects;
            for event in effects.events {
                self.emit(event);
            }
            for output in effects.outputs {
                self.last_output = Some(output.clone());
                self.emit(WorkflowEvent::WorkflowOutput { data: output });
            }

            let mut branch_failed = false;
            for envelope in effects.messages {
                if let Err(err) = self.route_message(&outcome.target, envelope, &mut next) {
                    error!(executor = %outcome.target, error = %err, "routing failed; halting branch");
                    self.emit(WorkflowEvent::ExecutorFailed {
                        executor_id: outcome.target.clone(),
                        error: err.to_string(),
                    });
                    branch_failed = true;
                    break;
                }
            }
            if branch_failed {
                continue;
            }

            state_updates.extend(effects.state_updates);
            if let Some(completion) = effects.completion {
                if self.completion.is_none() {
                    self.completion = Some(completion);
                } else {
                    warn!(executor = %outcome.target, "completion already requested; ignoring");
                }
            }
        }

        // Barrier: state updates become visible to the next step.
        self.shared.apply(state_updates);

        let queued = next.message_count();
        self.queue = next;
        self.emit(WorkflowEvent::SuperstepCompleted {
            step,
            delivered,
            queued,
        });

        if self.completion.is_some() || self.queue.is_empty() {
            self.conclude();
        } else {
            self.status = RunStatus::Idle;
        }
        Ok(self.status)
    }

    /// Resolve the terminal state once no further superstep can begin.
    fn conclude(&mut self) {
        if self.completion.is_none()
            && self.queue.is_empty()
            && !self.pending_requests.is_empty()
        {
            self.status = RunStatus::AwaitingInput;
            return;
        }
        self.emit(WorkflowEvent::WorkflowCompleted {
            output: self.output().cloned(),
        });
        self.status = RunStatus::Completed;
    }

    /// Route one produced message into the next step context.
    fn route_message(
        &mut self,
        source: &str,
        envelope: MessageEnvelope,
        next: &mut StepContext,
    ) -> Result<()> {
        if let Some(target) = envelope.target.clone() {
            return self.deliver(&target, source, envelope.data, next);
        }

        let edges: Vec<Edge> = self.workflow.outgoing(source).to_vec();
        if edges.is_empty() {
            debug!(source = %source, "message has no outgoing edges; dropping");
            return Ok(());
        }

        for edge in edges {
            match edge {
                Edge::Direct {
                    target, condition, ..
                } => {
                    if let Some(condition) = &condition {
                        if !condition.evaluate(&envelope.data) {
                            continue;
                        }
                    }
                    self.deliver(&target, source, envelope.data.clone(), next)?;
                }
                Edge::FanOut {
                    id,
                    targets,
                    partitioner,
                    ..
                } => {
                    let indices = match &partitioner {
                        Some(partitioner) => partitioner.select(&envelope.data, targets.len()),
                        None => (0..targets.len()).collect(),
                    };
                    for index in indices {
                        let Some(target) = targets.get(index) else {
                            return Err(WorkflowError::InvalidPartition {
                                edge_id: id,
                                index,
                                target_count: targets.len(),
                            });
                        };
                        self.deliver(target, source, envelope.data.clone(), next)?;
                    }
                }
                Edge::FanIn {
                    id,
                    sources,
                    target,
                } => {
                    let contribution = self.fan_in.record(
                        id,
                        &sources,
                        &source.to_string(),
                        envelope.data.clone(),
                    );
                    if let Some(flush) = contribution {
                        for (from, data) in flush {
                            self.deliver(&target, &from, data, next)?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Deliver a message to an executor queue or park it at a port.
    fn deliver(
        &mut self,
        target: &str,
        source: &str,
        data: PortableValue,
        next: &mut StepContext,
    ) -> Result<()> {
        if self.workflow.port(target).is_some() {
            return self.park_at_port(source, target, data);
        }
        if self.workflow.executor(target).is_none() {
            return Err(WorkflowError::Routing {
                from: source.to_string(),
                message: format!("unknown delivery target '{}'", target),
            });
        }
        next.push(target, MessageEnvelope::new(data, source));
        Ok(())
    }

    /// Park a message at an input port and raise the external request.
    fn park_at_port(&mut self, source: &str, port_id: &str, data: PortableValue) -> Result<()> {
        let port = self.workflow.port(port_id).cloned().ok_or_else(|| {
            WorkflowError::Routing {
                from: source.to_string(),
                message: format!("unknown port '{}'", port_id),
            }
        })?;

        if data.type_tag() != port.request_type() {
            return Err(WorkflowError::Routing {
                from: source.to_string(),
                message: format!(
                    "port '{}' accepts requests of type '{}', got '{}'",
                    port_id,
                    port.request_type(),
                    data.type_tag()
                ),
            });
        }

        let request_id = Uuid::new_v4().to_string();
        self.pending_requests.insert(
            request_id.clone(),
            PendingRequest {
                request_id: request_id.clone(),
                port_id: port_id.to_string(),
                source: source.to_string(),
            },
        );
        debug!(request = %request_id, port = %port_id, source = %source, "external request raised");
        self.emit(WorkflowEvent::RequestInfo {
            request_id,
            port_id: port_id.to_string(),
            request: data.as_json().clone(),
        });
        Ok(())
    }

    /// Export the complete runtime state at the current superstep boundary.
    pub fn export_snapshot(&self) -> Result<RunSnapshot> {
        let mut executors = BTreeMap::new();
        for (id, executor) in self.workflow.executors() {
            if let Some(state) = executor.snapshot_state()? {
                executors.insert(id.clone(), state);
            }
        }

        let edges = self
            .workflow
            .edge_infos()
            .into_iter()
            .filter(|info| info.kind == EdgeKind::FanIn)
            .map(|info| EdgeSnapshot {
                pending: self.fan_in.export_join(info.id),
                info,
            })
            .collect();

        let mut pending_requests: Vec<PendingRequest> =
            self.pending_requests.values().cloned().collect();
        pending_requests.sort_by(|a, b| a.request_id.cmp(&b.request_id));

        Ok(RunSnapshot {
            step: self.step,
            messages: self.queue.export(),
            executors,
            edges,
            shared_state: self.shared.export(),
            pending_requests,
            completion: self.completion.clone(),
            last_output: self.last_output.clone(),
        })
    }

    /// Re-hydrate runtime state from a snapshot.
    ///
    /// Every fragment must match the current workflow structurally: a
    /// snapshot referencing an executor or edge that no longer exists
    /// fails fast with a descriptive error, leaving no partial state
    /// applied to message queues or executors.
    pub fn restore_snapshot(&mut self, snapshot: RunSnapshot) -> Result<()> {
        // Validate before mutating anything.
        for envelope in &snapshot.messages {
            if self.workflow.executor(&envelope.target).is_none()
                && self.workflow.port(&envelope.target).is_none()
            {
                return Err(WorkflowError::SnapshotMismatch(format!(
                    "checkpoint queues a message for '{}', which is not in the current workflow",
                    envelope.target
                )));
            }
        }
        for id in snapshot.executors.keys() {
            if self.workflow.executor(id).is_none() {
                return Err(WorkflowError::SnapshotMismatch(format!(
                    "checkpoint carries state for executor '{}', which is not in the current workflow",
                    id
                )));
            }
        }
        for request in &snapshot.pending_requests {
            if self.workflow.port(&request.port_id).is_none() {
                return Err(WorkflowError::SnapshotMismatch(format!(
                    "checkpoint carries a pending request for port '{}', which is not in the current workflow",
                    request.port_id
                )));
            }
        }

        // Resolve each edge fragment to the matching edge in this workflow.
        let current = self.workflow.edge_infos();
        let mut resolved_edges = Vec::with_capacity(snapshot.edges.len());
        for fragment in &snapshot.edges {
            let matches: Vec<&EdgeInfo> = current
                .iter()
                .filter(|info| info.is_match(&fragment.info))
                .collect();
            let resolved = matches
                .iter()
                .find(|info| info.id == fragment.info.id)
                .copied()
                .or(if matches.len() == 1 {
                    Some(matches[0])
                } else {
                    None
                });
            match resolved {
                Some(info) => resolved_edges.push((info.id, fragment.pending.clone())),
                None => {
                    return Err(WorkflowError::SnapshotMismatch(format!(
                        "no edge in the current workflow matches checkpointed edge {:?} {:?} -> {:?}",
                        fragment.info.kind, fragment.info.sources, fragment.info.targets
                    )))
                }
            }
        }

        for (id, state) in &snapshot.executors {
            if let Some(executor) = self.workflow.executor(id) {
                executor.restore_state(state.clone())?;
            }
        }

        self.fan_in.clear();
        for (edge_id, pending) in resolved_edges {
            self.fan_in.import_join(edge_id, pending);
        }

        self.queue = StepContext::import(snapshot.messages);
        self.shared.import(snapshot.shared_state);
        self.pending_requests = snapshot
            .pending_requests
            .into_iter()
            .map(|request| (request.request_id.clone(), request))
            .collect();
        self.step = snapshot.step;
        self.completion = snapshot.completion;
        self.last_output = snapshot.last_output;
        self.status = if self.queue.is_empty() && !self.pending_requests.is_empty() {
            RunStatus::AwaitingInput
        } else {
            RunStatus::Idle
        };
        debug!(step = self.step, queued = self.queue.message_count(), "restored snapshot");
        Ok(())
    }

    /// Mark the run as failed (driver-level errors).
    pub fn mark_failed(&mut self) {
        self.status = RunStatus::Failed;
    }

    /// Close the event channel so consumers observe end-of-stream.
    pub fn shutdown_events(&mut self) {
        self.events = None;
    }

    fn emit(&self, event: WorkflowEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}

/// Execute one target's message batch for the current step.
///
/// Messages are handed to the executor in arrival order. Non-thread-safe
/// executors (the default) have the batch awaited strictly sequentially;
/// thread-safe executors get their handler calls started in arrival order
/// but awaited concurrently. A failure wraps the underlying error with the
/// executor and message-type context and halts the batch.
async fn run_target(
    target: ExecutorId,
    executor: Option<Arc<dyn Executor>>,
    envelopes: Vec<MessageEnvelope>,
    ctx: WorkflowContext,
) -> TargetOutcome {
    let mut events = Vec::new();

    let Some(executor) = executor else {
        // Unreachable after build validation; a corrupted queue surfaces
        // as a failed branch, not a panic.
        let failure = WorkflowError::Execution(format!("no executor bound for '{}'", target));
        error!(executor = %target, error = %failure, "dispatch failed");
        events.push(WorkflowEvent::ExecutorFailed {
            executor_id: target.clone(),
            error: failure.to_string(),
        });
        return TargetOutcome {
            target,
            events,
            effects: ContextEffects::default(),
            failed: true,
        };
    };

    let mut failure: Option<WorkflowError> = None;
    if executor.is_thread_safe() {
        for envelope in &envelopes {
            events.push(WorkflowEvent::ExecutorInvoked {
                executor_id: target.clone(),
                message_type: envelope.data.type_tag().to_string(),
            });
        }
        let handlers: Vec<_> = envelopes
            .iter()
            .map(|envelope| executor.handle(envelope.data.clone(), &ctx))
            .collect();
        let results = futures::future::join_all(handlers).await;
        failure = results
            .into_iter()
            .zip(envelopes.iter())
            .find_map(|(result, envelope)| {
                result.err().map(|err| {
                    WorkflowError::executor_failure(
                        target.clone(),
                        envelope.data.type_tag(),
                        err,
                    )
                })
            });
    } else {
        for envelope in &envelopes {
            events.push(WorkflowEvent::ExecutorInvoked {
                executor_id: target.clone(),
                message_type: envelope.data.type_tag().to_string(),
            });
            if let Err(err) = executor.handle(envelope.data.clone(), &ctx).await {
                failure = Some(WorkflowError::executor_failure(
                    target.clone(),
                    envelope.data.type_tag(),
                    err,
                ));
                break;
            }
        }
    }

    let failed = failure.is_some();
    match failure {
        Some(err) => {
            error!(executor = %target, error = %err, "executor failed; halting branch");
            events.push(WorkflowEvent::ExecutorFailed {
                executor_id: target.clone(),
                error: err.to_string(),
            });
        }
        None => events.push(WorkflowEvent::ExecutorCompleted {
            executor_id: target.clone(),
        }),
    }

    TargetOutcome {
        target,
        events,
        effects: ctx.take_effects(),
        failed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::WorkflowBuilder;
    use crate::executor::{FunctionExecutor, HandlerRegistry};

    fn looping_workflow() -> Workflow {
        // a -> a forever.
        let a = Arc::new(FunctionExecutor::new(
            "a",
            HandlerRegistry::new().on::<u32, _, _>(|n, ctx| async move { ctx.send_message(&n) }),
        ));
        let mut builder = WorkflowBuilder::new("a");
        builder.bind_executor(a).unwrap();
        builder.add_edge("a", "a").unwrap();
        builder.build::<u32>().unwrap()
    }

    fn runner_with(workflow: Workflow, options: RunOptions) -> WorkflowRunner {
        let (tx, _rx) = mpsc::unbounded_channel();
        // Dropping the receiver is fine: emit ignores send failures.
        WorkflowRunner::new(workflow, tx, CancellationToken::new(), options)
    }

    #[tokio::test]
    async fn exceeding_max_steps_fails_the_run() {
        let mut runner = runner_with(looping_workflow(), RunOptions { max_steps: 3 });
        runner.enqueue_input(&1u32).unwrap();

        for _ in 0..3 {
            assert_eq!(runner.run_superstep().await.unwrap(), RunStatus::Idle);
        }
        let err = runner.run_superstep().await.unwrap_err();
        assert!(matches!(err, WorkflowError::Execution(_)));
        assert_eq!(runner.status(), RunStatus::Failed);
    }

    #[tokio::test]
    async fn mismatched_input_type_is_rejected() {
        let mut runner = runner_with(looping_workflow(), RunOptions::default());
        let err = runner.enqueue_input(&"text").unwrap_err();
        assert!(matches!(err, WorkflowError::Validation(_)));
        assert!(!runner.has_pending_messages());
    }

    #[tokio::test]
    async fn empty_queue_concludes_immediately() {
        let mut runner = runner_with(looping_workflow(), RunOptions::default());
        assert_eq!(runner.run_superstep().await.unwrap(), RunStatus::Completed);
        // Terminal states are sticky.
        assert_eq!(runner.run_superstep().await.unwrap(), RunStatus::Completed);
    }

    #[tokio::test]
    async fn abandon_join_reports_whether_state_was_dropped() {
        let mut runner = runner_with(looping_workflow(), RunOptions::default());
        assert!(!runner.abandon_join(99));
    }
}
