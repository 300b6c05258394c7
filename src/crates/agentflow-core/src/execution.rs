//! In-process execution environment
//!
//! [`InProcessExecution`] drives a [`WorkflowRunner`] to completion on a
//! background task and exposes the run as a [`StreamingRun`]: a
//! single-consumer ordered event stream, a handle for answering external
//! requests, cooperative cancellation, and `join` for the final outcome.
//!
//! With a [`CheckpointManager`] attached, a checkpoint is taken
//! automatically after every completed superstep, and
//! [`resume_from_checkpoint`](InProcessExecution::resume_from_checkpoint)
//! restores any prior checkpoint into a fresh workflow instance and
//! continues from exactly that state.

use std::sync::Arc;

use agentflow_checkpoint::{CheckpointInfo, CheckpointManager};
use serde::Serialize;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::edge::EdgeId;
use crate::error::{Result, WorkflowError};
use crate::event::WorkflowEvent;
use crate::port::ExternalResponse;
use crate::runner::{RunOptions, RunStatus, WorkflowRunner};
use crate::snapshot::RunSnapshot;
use crate::workflow::Workflow;

/// Final result of a run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Terminal status
    pub status: RunStatus,
    /// Completion data or last yielded output
    pub output: Option<serde_json::Value>,
    /// Events not consumed through [`StreamingRun::watch_stream`]
    pub events: Vec<WorkflowEvent>,
}

/// Entry points for running workflows within the current process.
pub struct InProcessExecution;

impl InProcessExecution {
    /// Run a workflow to completion, collecting every event.
    pub async fn run<T: Serialize>(workflow: Workflow, input: &T) -> Result<RunOutcome> {
        let run = Self::stream(workflow, input)?;
        run.join().await
    }

    /// Start a run and return its live handle.
    pub fn stream<T: Serialize>(workflow: Workflow, input: &T) -> Result<StreamingRun> {
        Self::launch(workflow, None, None, |runner| runner.enqueue_input(input))
    }

    /// Start a run that checkpoints after each completed superstep.
    pub fn stream_with_checkpoints<T: Serialize>(
        workflow: Workflow,
        input: &T,
        manager: CheckpointManager,
    ) -> Result<StreamingRun> {
        Self::launch(workflow, Some(manager), None, |runner| {
            runner.enqueue_input(input)
        })
    }

    /// Restore a checkpoint into a fresh workflow instance and continue.
    ///
    /// New checkpoints taken by the resumed run chain from the restored
    /// one. The stored checkpoint itself is never mutated, so the same
    /// handle can be resumed from repeatedly.
    pub async fn resume_from_checkpoint(
        workflow: Workflow,
        manager: CheckpointManager,
        info: &CheckpointInfo,
    ) -> Result<StreamingRun> {
        let state = manager.restore_checkpoint(info).await?;
        let snapshot: RunSnapshot = serde_json::from_value(state)?;
        Self::launch(workflow, Some(manager), Some(info.clone()), |runner| {
            runner.restore_snapshot(snapshot)
        })
    }

    fn launch(
        workflow: Workflow,
        manager: Option<CheckpointManager>,
        parent: Option<CheckpointInfo>,
        prepare: impl FnOnce(&mut WorkflowRunner) -> Result<()>,
    ) -> Result<StreamingRun> {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let mut runner = WorkflowRunner::new(workflow, tx, cancel.clone(), RunOptions::default());
        prepare(&mut runner)?;

        let runner = Arc::new(Mutex::new(runner));
        let notify = Arc::new(Notify::new());
        let handle = tokio::spawn(drive(
            runner.clone(),
            notify.clone(),
            cancel.clone(),
            manager,
            parent,
        ));

        Ok(StreamingRun {
            runner,
            events: Some(rx),
            notify,
            cancel,
            handle,
        })
    }
}

/// A live, observable workflow run.
pub struct StreamingRun {
    runner: Arc<Mutex<WorkflowRunner>>,
    events: Option<mpsc::UnboundedReceiver<WorkflowEvent>>,
    notify: Arc<Notify>,
    cancel: CancellationToken,
    handle: tokio::task::JoinHandle<Result<()>>,
}

impl StreamingRun {
    /// Take the run's event stream.
    ///
    /// Single-consumer, ordered, non-replayable: events arrive strictly in
    /// the order the scheduler produced them, and the stream ends when the
    /// run terminates. A second call returns an already-closed stream.
    pub fn watch_stream(&mut self) -> UnboundedReceiverStream<WorkflowEvent> {
        match self.events.take() {
            Some(rx) => UnboundedReceiverStream::new(rx),
            None => {
                let (_, rx) = mpsc::unbounded_channel();
                UnboundedReceiverStream::new(rx)
            }
        }
    }

    /// Answer a pending external request and wake the scheduler.
    pub async fn send_response(&self, response: ExternalResponse) -> Result<()> {
        let mut runner = self.runner.lock().await;
        runner.send_response(response)?;
        drop(runner);
        self.notify.notify_one();
        Ok(())
    }

    /// Discard a fan-in join buffer whose remaining sources will never fire.
    pub async fn abandon_join(&self, edge_id: EdgeId) -> bool {
        self.runner.lock().await.abandon_join(edge_id)
    }

    /// Current run status.
    pub async fn status(&self) -> RunStatus {
        self.runner.lock().await.status()
    }

    /// Request cooperative cancellation.
    ///
    /// In-flight handlers observe the token through their context; a
    /// checkpoint already committed is never corrupted.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the run to finish and collect its outcome.
    ///
    /// Any events not consumed through [`watch_stream`](Self::watch_stream)
    /// are drained into the outcome.
    pub async fn join(mut self) -> Result<RunOutcome> {
        let result = self
            .handle
            .await
            .map_err(|err| WorkflowError::Execution(format!("run task failed: {err}")))?;
        result?;

        let mut events = Vec::new();
        if let Some(mut rx) = self.events.take() {
            while let Ok(event) = rx.try_recv() {
                events.push(event);
            }
        }

        let runner = self.runner.lock().await;
        Ok(RunOutcome {
            status: runner.status(),
            output: runner.output().cloned(),
            events,
        })
    }
}

/// Background driver: advance supersteps until terminal, checkpointing at
/// each boundary when a manager is attached.
async fn drive(
    runner: Arc<Mutex<WorkflowRunner>>,
    notify: Arc<Notify>,
    cancel: CancellationToken,
    manager: Option<CheckpointManager>,
    mut parent: Option<CheckpointInfo>,
) -> Result<()> {
    let result = drive_inner(&runner, &notify, &cancel, manager.as_ref(), &mut parent).await;

    let mut runner = runner.lock().await;
    if let Err(err) = &result {
        error!(error = %err, "workflow run failed");
        runner.mark_failed();
    }
    runner.shutdown_events();
    result
}

async fn drive_inner(
    runner: &Arc<Mutex<WorkflowRunner>>,
    notify: &Arc<Notify>,
    cancel: &CancellationToken,
    manager: Option<&CheckpointManager>,
    parent: &mut Option<CheckpointInfo>,
) -> Result<()> {
    loop {
        if cancel.is_cancelled() {
            debug!("run cancelled");
            return Ok(());
        }

        let mut guard = runner.lock().await;
        match guard.status() {
            RunStatus::Completed | RunStatus::Failed => return Ok(()),
            RunStatus::AwaitingInput => {
                drop(guard);
                tokio::select! {
                    _ = notify.notified() => continue,
                    _ = cancel.cancelled() => continue,
                }
            }
            _ => {
                let before = guard.step();
                guard.run_superstep().await?;

                if let Some(manager) = manager {
                    if guard.step() != before {
                        let snapshot = guard.export_snapshot()?;
                        let state = serde_json::to_value(&snapshot)?;
                        let info = manager
                            .create_checkpoint(guard.step(), state, parent.as_ref())
                            .await?;
                        *parent = Some(info);
                    }
                }
            }
        }
    }
}
