//! Checkpoint round-trip, rollback, replay determinism, and structural
//! mismatch detection on restore.

mod common;

use std::sync::Arc;

use agentflow_checkpoint::{CheckpointManager, FileCheckpointStore, MemoryCheckpointStore};
use agentflow_core::{
    EdgeInfo, EdgeKind, EdgeSnapshot, FunctionExecutor, HandlerRegistry, PortableMessageEnvelope,
    PortableValue, RunOptions, RunSnapshot, RunStatus, WorkflowBuilder, WorkflowError,
    WorkflowEvent, WorkflowRunner,
};
use common::{guess_workflow, GuessExecutor, JudgeExecutor, NumberSignal};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn runner_for(
    workflow: agentflow_core::Workflow,
) -> (WorkflowRunner, mpsc::UnboundedReceiver<WorkflowEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let runner = WorkflowRunner::new(
        workflow,
        tx,
        CancellationToken::new(),
        RunOptions::default(),
    );
    (runner, rx)
}

fn drain(rx: &mut mpsc::UnboundedReceiver<WorkflowEvent>) -> Vec<WorkflowEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Drive the guess loop for `steps` supersteps, checkpointing each one.
async fn run_and_checkpoint(
    manager: &CheckpointManager,
    judge: &Arc<JudgeExecutor>,
    runner: &mut WorkflowRunner,
    steps: u64,
) -> Vec<agentflow_checkpoint::CheckpointInfo> {
    let mut infos = Vec::new();
    for _ in 0..steps {
        runner.run_superstep().await.unwrap();
        let snapshot = runner.export_snapshot().unwrap();
        let state = serde_json::to_value(&snapshot).unwrap();
        let info = manager
            .create_checkpoint(runner.step(), state, infos.last())
            .await
            .unwrap();
        infos.push(info);
    }
    assert!(judge.tries() > 0);
    infos
}

#[tokio::test]
async fn restoring_an_earlier_checkpoint_reverts_executor_state() {
    let manager = CheckpointManager::for_run(Arc::new(MemoryCheckpointStore::new()), "guess-run");

    // Run 6 supersteps, checkpointing each. The judge has seen guesses at
    // steps 2, 4, and 6.
    let guesser = Arc::new(GuessExecutor::new());
    let judge = Arc::new(JudgeExecutor::new(42));
    let (mut runner, _rx) = runner_for(guess_workflow(guesser, judge.clone()));
    runner.enqueue_input(&NumberSignal::Init).unwrap();
    let infos = run_and_checkpoint(&manager, &judge, &mut runner, 6).await;

    assert_eq!(infos.len(), 6);
    assert_eq!(judge.tries(), 3);

    // Restore checkpoint index 2 (taken at the close of step 3) into a
    // fresh workflow instance: the try-count reverts from 3 to 1.
    let guesser2 = Arc::new(GuessExecutor::new());
    let judge2 = Arc::new(JudgeExecutor::new(42));
    let (mut runner2, _rx2) = runner_for(guess_workflow(guesser2, judge2.clone()));

    let state = manager.restore_checkpoint(&infos[2]).await.unwrap();
    let snapshot: RunSnapshot = serde_json::from_value(state).unwrap();
    runner2.restore_snapshot(snapshot).unwrap();

    assert_eq!(runner2.step(), 3);
    assert_eq!(judge2.tries(), 1);
    assert_eq!(judge2.guesses(), vec![50]);

    // Replaying from the restore point still converges on the target.
    while !matches!(
        runner2.status(),
        RunStatus::Completed | RunStatus::Failed
    ) {
        runner2.run_superstep().await.unwrap();
    }
    assert_eq!(runner2.status(), RunStatus::Completed);
    assert_eq!(
        runner2.output(),
        Some(&serde_json::json!("Guessed the number: 42"))
    );
    assert_eq!(judge2.guesses(), vec![50, 25, 37, 43, 40, 41, 42]);
}

#[tokio::test]
async fn restoring_the_same_checkpoint_twice_replays_identically() {
    let manager = CheckpointManager::for_run(Arc::new(MemoryCheckpointStore::new()), "replay-run");

    let guesser = Arc::new(GuessExecutor::new());
    let judge = Arc::new(JudgeExecutor::new(42));
    let (mut runner, _rx) = runner_for(guess_workflow(guesser, judge.clone()));
    runner.enqueue_input(&NumberSignal::Init).unwrap();
    let infos = run_and_checkpoint(&manager, &judge, &mut runner, 6).await;

    let mut replays = Vec::new();
    for _ in 0..2 {
        let guesser = Arc::new(GuessExecutor::new());
        let judge = Arc::new(JudgeExecutor::new(42));
        let (mut runner, mut rx) = runner_for(guess_workflow(guesser, judge.clone()));

        let state = manager.restore_checkpoint(&infos[2]).await.unwrap();
        let snapshot: RunSnapshot = serde_json::from_value(state).unwrap();
        runner.restore_snapshot(snapshot).unwrap();

        while !matches!(
            runner.status(),
            RunStatus::Completed | RunStatus::Failed
        ) {
            runner.run_superstep().await.unwrap();
        }
        replays.push((
            runner.output().cloned(),
            judge.guesses(),
            drain(&mut rx),
        ));
    }

    // Identical state, identical guesses, identical event sequence.
    assert_eq!(replays[0], replays[1]);
    assert_eq!(
        replays[0].0,
        Some(serde_json::json!("Guessed the number: 42"))
    );
}

#[tokio::test]
async fn checkpoints_survive_the_file_backed_store() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = Arc::new(FileCheckpointStore::new(dir.path()).await.unwrap());
    let manager = CheckpointManager::for_run(store, "file-run");

    let guesser = Arc::new(GuessExecutor::new());
    let judge = Arc::new(JudgeExecutor::new(42));
    let (mut runner, _rx) = runner_for(guess_workflow(guesser, judge.clone()));
    runner.enqueue_input(&NumberSignal::Init).unwrap();
    let infos = run_and_checkpoint(&manager, &judge, &mut runner, 4).await;

    // Restore through the file store into a fresh instance.
    let guesser2 = Arc::new(GuessExecutor::new());
    let judge2 = Arc::new(JudgeExecutor::new(42));
    let (mut runner2, _rx2) = runner_for(guess_workflow(guesser2, judge2.clone()));
    let state = manager.restore_checkpoint(&infos[3]).await.unwrap();
    runner2
        .restore_snapshot(serde_json::from_value(state).unwrap())
        .unwrap();

    assert_eq!(runner2.step(), 4);
    assert_eq!(judge2.tries(), 2);
}

#[tokio::test]
async fn snapshot_referencing_unknown_executor_fails_restore() {
    let sink = Arc::new(FunctionExecutor::new(
        "sink",
        HandlerRegistry::new().on::<u32, _, _>(|_, _| async move { Ok(()) }),
    ));
    let mut builder = WorkflowBuilder::new("sink");
    builder.bind_executor(sink).unwrap();
    let workflow = builder.build::<u32>().unwrap();

    let snapshot = RunSnapshot {
        step: 1,
        messages: vec![PortableMessageEnvelope {
            target: "ghost".to_string(),
            source: "sink".to_string(),
            data: PortableValue::new(&1u32).unwrap(),
        }],
        executors: Default::default(),
        edges: Vec::new(),
        shared_state: Vec::new(),
        pending_requests: Vec::new(),
        completion: None,
        last_output: None,
    };

    let (mut runner, _rx) = runner_for(workflow);
    let err = runner.restore_snapshot(snapshot).unwrap_err();
    assert!(matches!(err, WorkflowError::SnapshotMismatch(_)));
    assert!(err.to_string().contains("ghost"));
}

#[tokio::test]
async fn snapshot_referencing_unmatched_edge_fails_restore() {
    let sink = Arc::new(FunctionExecutor::new(
        "sink",
        HandlerRegistry::new().on::<u32, _, _>(|_, _| async move { Ok(()) }),
    ));
    let mut builder = WorkflowBuilder::new("sink");
    builder.bind_executor(sink).unwrap();
    let workflow = builder.build::<u32>().unwrap();

    // The snapshot carries fan-in state for an edge this workflow lacks.
    let snapshot = RunSnapshot {
        step: 2,
        messages: Vec::new(),
        executors: Default::default(),
        edges: vec![EdgeSnapshot {
            info: EdgeInfo {
                id: 0,
                kind: EdgeKind::FanIn,
                sources: vec!["a".to_string(), "b".to_string()],
                targets: vec!["sink".to_string()],
                has_condition: false,
                has_partitioner: false,
            },
            pending: vec![("a".to_string(), vec![PortableValue::new(&1u32).unwrap()])],
        }],
        shared_state: Vec::new(),
        pending_requests: Vec::new(),
        completion: None,
        last_output: None,
    };

    let (mut runner, _rx) = runner_for(workflow);
    let err = runner.restore_snapshot(snapshot).unwrap_err();
    assert!(matches!(err, WorkflowError::SnapshotMismatch(_)));
}

#[tokio::test]
async fn fan_in_buffers_survive_checkpoint_round_trips() {
    // a contributes before the checkpoint; after restoring into a fresh
    // workflow, b's contribution completes the join with a's *restored*
    // message.
    let build = |joined: Arc<std::sync::Mutex<Vec<u32>>>| {
        let forward = |id: &str| -> Arc<FunctionExecutor> {
            Arc::new(FunctionExecutor::new(
                id,
                HandlerRegistry::new()
                    .on::<u32, _, _>(|n, ctx| async move { ctx.send_message(&n) }),
            ))
        };
        let join = Arc::new(FunctionExecutor::new(
            "join",
            HandlerRegistry::new().on::<u32, _, _>(move |n, _| {
                let joined = joined.clone();
                async move {
                    joined.lock().unwrap().push(n);
                    Ok(())
                }
            }),
        ));

        let mut builder = WorkflowBuilder::new("starter");
        builder.bind_executor(forward("starter")).unwrap();
        builder.bind_executor(forward("a")).unwrap();
        builder.bind_executor(forward("b")).unwrap();
        builder.bind_executor(join).unwrap();
        builder.add_edge("starter", "a").unwrap();
        // b only hears about large inputs.
        builder
            .add_conditional_edge::<u32, _>("starter", "b", |n| *n > 100)
            .unwrap();
        builder.add_fan_in_edge("join", ["a", "b"]).unwrap();
        builder.build::<u32>().unwrap()
    };

    let joined: Arc<std::sync::Mutex<Vec<u32>>> = Arc::new(std::sync::Mutex::new(Vec::new()));
    let (mut runner, _rx) = runner_for(build(joined.clone()));
    runner.enqueue_input(&7u32).unwrap();
    runner.run_superstep().await.unwrap(); // starter -> a
    runner.run_superstep().await.unwrap(); // a buffers 7 at the join

    let snapshot = runner.export_snapshot().unwrap();
    assert!(snapshot.edges.iter().any(|edge| !edge.pending.is_empty()));
    let state = serde_json::to_value(&snapshot).unwrap();

    let joined2: Arc<std::sync::Mutex<Vec<u32>>> = Arc::new(std::sync::Mutex::new(Vec::new()));
    let (mut runner2, _rx2) = runner_for(build(joined2.clone()));
    runner2
        .restore_snapshot(serde_json::from_value(state).unwrap())
        .unwrap();

    // A large input reaches both a and b; b's contribution completes the
    // join, which flushes a's restored 7 first (FIFO per source).
    runner2.enqueue_input(&200u32).unwrap();
    while !matches!(runner2.status(), RunStatus::Completed | RunStatus::Failed) {
        runner2.run_superstep().await.unwrap();
    }
    assert_eq!(*joined2.lock().unwrap(), vec![7, 200]);
}
