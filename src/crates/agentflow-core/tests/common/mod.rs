//! Guess-the-number scenario: a cyclic two-executor graph used by the
//! scenario and checkpoint tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex, PoisonError};

use agentflow_core::{
    type_tag_of, Executor, PortableValue, Result, Workflow, WorkflowBuilder, WorkflowContext,
    WorkflowError,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NumberSignal {
    Init,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Guess {
    pub value: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Verdict {
    Above,
    Below,
    Matched { value: u32 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GuessState {
    low: u32,
    high: u32,
    last: Option<u32>,
}

impl Default for GuessState {
    fn default() -> Self {
        Self {
            low: 1,
            high: 100,
            last: None,
        }
    }
}

/// Binary-searching guesser: halves the range on every verdict.
pub struct GuessExecutor {
    state: Mutex<GuessState>,
}

impl GuessExecutor {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GuessState::default()),
        }
    }

    fn guess(&self, ctx: &WorkflowContext) -> Result<()> {
        let value = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            let value = (state.low + state.high) / 2;
            state.last = Some(value);
            value
        };
        ctx.send_message(&Guess { value })
    }
}

#[async_trait]
impl Executor for GuessExecutor {
    fn id(&self) -> &str {
        "guesser"
    }

    fn input_types(&self) -> Vec<String> {
        vec![
            type_tag_of::<NumberSignal>().to_string(),
            type_tag_of::<Verdict>().to_string(),
        ]
    }

    async fn handle(&self, message: PortableValue, ctx: &WorkflowContext) -> Result<()> {
        if message.type_tag() == type_tag_of::<NumberSignal>() {
            let NumberSignal::Init = message.extract()?;
            {
                let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
                *state = GuessState::default();
            }
            return self.guess(ctx);
        }

        if message.type_tag() == type_tag_of::<Verdict>() {
            let verdict: Verdict = message.extract()?;
            let last = self
                .state
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .last;
            let Some(last) = last else {
                return Err(WorkflowError::Execution(
                    "verdict received before any guess".to_string(),
                ));
            };
            match verdict {
                Verdict::Above => {
                    self.state
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .high = last - 1;
                    return self.guess(ctx);
                }
                Verdict::Below => {
                    self.state
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .low = last + 1;
                    return self.guess(ctx);
                }
                Verdict::Matched { value } => {
                    return ctx.complete(&format!("Guessed the number: {value}"));
                }
            }
        }

        Err(WorkflowError::NoHandler {
            executor: self.id().to_string(),
            message_type: message.type_tag().to_string(),
        })
    }

    fn snapshot_state(&self) -> Result<Option<serde_json::Value>> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(Some(serde_json::to_value(&*state)?))
    }

    fn restore_state(&self, state: serde_json::Value) -> Result<()> {
        let restored: GuessState = serde_json::from_value(state)?;
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = restored;
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct JudgeState {
    tries: u32,
    guesses: Vec<u32>,
}

/// Judges guesses against a fixed target, counting attempts.
pub struct JudgeExecutor {
    target: u32,
    state: Mutex<JudgeState>,
}

impl JudgeExecutor {
    pub fn new(target: u32) -> Self {
        Self {
            target,
            state: Mutex::new(JudgeState::default()),
        }
    }

    pub fn tries(&self) -> u32 {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .tries
    }

    pub fn guesses(&self) -> Vec<u32> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .guesses
            .clone()
    }
}

#[async_trait]
impl Executor for JudgeExecutor {
    fn id(&self) -> &str {
        "judge"
    }

    fn input_types(&self) -> Vec<String> {
        vec![type_tag_of::<Guess>().to_string()]
    }

    async fn handle(&self, message: PortableValue, ctx: &WorkflowContext) -> Result<()> {
        let guess: Guess = message.extract()?;
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.tries += 1;
            state.guesses.push(guess.value);
        }

        let verdict = if guess.value == self.target {
            Verdict::Matched { value: guess.value }
        } else if guess.value > self.target {
            Verdict::Above
        } else {
            Verdict::Below
        };
        ctx.send_message(&verdict)
    }

    fn snapshot_state(&self) -> Result<Option<serde_json::Value>> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(Some(serde_json::to_value(&*state)?))
    }

    fn restore_state(&self, state: serde_json::Value) -> Result<()> {
        let restored: JudgeState = serde_json::from_value(state)?;
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = restored;
        Ok(())
    }
}

/// The cyclic guesser ↔ judge workflow, starting with `NumberSignal::Init`.
pub fn guess_workflow(guesser: Arc<GuessExecutor>, judge: Arc<JudgeExecutor>) -> Workflow {
    let mut builder = WorkflowBuilder::new("guesser");
    builder.bind_executor(guesser).unwrap();
    builder.bind_executor(judge).unwrap();
    builder.add_edge("guesser", "judge").unwrap();
    builder.add_edge("judge", "guesser").unwrap();
    builder.build::<NumberSignal>().unwrap()
}
