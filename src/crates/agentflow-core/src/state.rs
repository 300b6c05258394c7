//! Shared scoped state outside the message graph
//!
//! Executors occasionally need state that is not naturally a message: a
//! counter visible to every node, or a private scratch value that should
//! survive across supersteps. [`SharedState`] provides that as a key-value
//! store keyed by scope. Reads observe the state as of the start of the
//! current superstep; writes are queued through the workflow context and
//! applied at the superstep barrier, so concurrent executors in the same
//! step never race on it. The whole store participates in checkpoints.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::executor::ExecutorId;

/// Visibility scope of a shared state entry
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StateScope {
    /// Visible to every executor in the run
    Run,
    /// Private to one executor
    Executor(ExecutorId),
}

/// A queued state write, applied at the superstep barrier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateUpdate {
    /// Scope the entry lives in
    pub scope: StateScope,
    /// Entry key
    pub key: String,
    /// New value
    pub value: Value,
}

/// Scoped key-value store shared across a run.
///
/// Cloning yields another handle to the same store.
#[derive(Clone, Default)]
pub struct SharedState {
    entries: Arc<RwLock<BTreeMap<(StateScope, String), Value>>>,
}

impl SharedState {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read an entry as of the last superstep barrier.
    pub fn read(&self, scope: &StateScope, key: &str) -> Option<Value> {
        let entries = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        entries.get(&(scope.clone(), key.to_string())).cloned()
    }

    /// Apply queued updates in order. Called by the scheduler at the barrier.
    pub(crate) fn apply(&self, updates: Vec<StateUpdate>) {
        if updates.is_empty() {
            return;
        }
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        for update in updates {
            entries.insert((update.scope, update.key), update.value);
        }
    }

    /// Export every entry in deterministic (scope, key) order.
    pub(crate) fn export(&self) -> Vec<StateUpdate> {
        let entries = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        entries
            .iter()
            .map(|((scope, key), value)| StateUpdate {
                scope: scope.clone(),
                key: key.clone(),
                value: value.clone(),
            })
            .collect()
    }

    /// Replace the store contents with a checkpointed export.
    pub(crate) fn import(&self, updates: Vec<StateUpdate>) {
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        entries.clear();
        for update in updates {
            entries.insert((update.scope, update.key), update.value);
        }
    }
}

impl std::fmt::Debug for SharedState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entries = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("SharedState")
            .field("entries", &entries.len())
            .finish()
    }
}
