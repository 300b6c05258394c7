//! Guess-the-number scenario: cyclic edges, iterative supersteps, and
//! termination on an explicit completion.

mod common;

use std::sync::Arc;

use agentflow_core::{InProcessExecution, RunStatus, WorkflowEvent};
use common::{guess_workflow, GuessExecutor, JudgeExecutor, NumberSignal};

#[tokio::test]
async fn binary_search_converges_on_the_target() {
    let guesser = Arc::new(GuessExecutor::new());
    let judge = Arc::new(JudgeExecutor::new(42));
    let workflow = guess_workflow(guesser, judge.clone());

    let outcome = InProcessExecution::run(workflow, &NumberSignal::Init)
        .await
        .unwrap();

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(
        outcome.output,
        Some(serde_json::json!("Guessed the number: 42"))
    );

    // Binary search over [1, 100] with target 42.
    assert_eq!(judge.guesses(), vec![50, 25, 37, 43, 40, 41, 42]);
    assert_eq!(judge.tries(), 7);
}

#[tokio::test]
async fn each_exchange_is_its_own_superstep() {
    let guesser = Arc::new(GuessExecutor::new());
    let judge = Arc::new(JudgeExecutor::new(42));
    let workflow = guess_workflow(guesser, judge);

    let outcome = InProcessExecution::run(workflow, &NumberSignal::Init)
        .await
        .unwrap();

    // 7 guesses + 7 verdicts + the completing Matched handling: one
    // executor invocation per superstep around the cycle.
    let steps = outcome
        .events
        .iter()
        .filter(|event| matches!(event, WorkflowEvent::SuperstepCompleted { .. }))
        .count();
    assert_eq!(steps, 15);

    // Every step delivered exactly one message.
    assert!(outcome.events.iter().all(|event| !matches!(
        event,
        WorkflowEvent::SuperstepCompleted { delivered, .. } if *delivered != 1
    )));

    // The completion event is last.
    assert!(matches!(
        outcome.events.last(),
        Some(WorkflowEvent::WorkflowCompleted { .. })
    ));
}

#[tokio::test]
async fn completion_halts_the_cycle_immediately() {
    let guesser = Arc::new(GuessExecutor::new());
    // Target equal to the first guess: one guess, one verdict, done.
    let judge = Arc::new(JudgeExecutor::new(50));
    let workflow = guess_workflow(guesser, judge.clone());

    let outcome = InProcessExecution::run(workflow, &NumberSignal::Init)
        .await
        .unwrap();

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(
        outcome.output,
        Some(serde_json::json!("Guessed the number: 50"))
    );
    assert_eq!(judge.tries(), 1);
}
