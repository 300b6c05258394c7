//! Immutable workflow definition
//!
//! A [`Workflow`] is the validated output of
//! [`WorkflowBuilder::build`](crate::builder::WorkflowBuilder::build): the
//! start executor, the bound executor instances, the outgoing-edge
//! adjacency keyed by source ID, and the registered input ports. The edge
//! map carries no acyclicity requirement — cycles are legal, and the
//! superstep model tolerates them because each step only processes the
//! messages queued when it began.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::edge::{Edge, EdgeInfo};
use crate::executor::{Executor, ExecutorId};
use crate::port::InputPort;

/// An immutable, executable workflow definition.
#[derive(Clone)]
pub struct Workflow {
    pub(crate) start_id: ExecutorId,
    pub(crate) executors: HashMap<ExecutorId, Arc<dyn Executor>>,
    pub(crate) edges: HashMap<ExecutorId, Vec<Edge>>,
    pub(crate) ports: HashMap<String, InputPort>,
    pub(crate) input_type: String,
}

impl Workflow {
    /// The executor that receives the run's input message.
    pub fn start_id(&self) -> &str {
        &self.start_id
    }

    /// Type tag of the input message the workflow was built for.
    pub fn input_type(&self) -> &str {
        &self.input_type
    }

    /// Look up a bound executor by ID.
    pub fn executor(&self, id: &str) -> Option<&Arc<dyn Executor>> {
        self.executors.get(id)
    }

    /// All bound executors.
    pub fn executors(&self) -> &HashMap<ExecutorId, Arc<dyn Executor>> {
        &self.executors
    }

    /// Outgoing edges of a source executor or port.
    pub fn outgoing(&self, source: &str) -> &[Edge] {
        self.edges.get(source).map_or(&[], Vec::as_slice)
    }

    /// Look up an input port by ID.
    pub fn port(&self, id: &str) -> Option<&InputPort> {
        self.ports.get(id)
    }

    /// Structural identities of every edge, deduplicated by edge ID.
    ///
    /// Fan-in edges appear once even though they are referenced from each
    /// source's outgoing set.
    pub fn edge_infos(&self) -> Vec<EdgeInfo> {
        let mut infos: BTreeMap<u64, EdgeInfo> = BTreeMap::new();
        for edges in self.edges.values() {
            for edge in edges {
                infos.entry(edge.id()).or_insert_with(|| edge.info());
            }
        }
        infos.into_values().collect()
    }
}

impl std::fmt::Debug for Workflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut executors: Vec<&ExecutorId> = self.executors.keys().collect();
        executors.sort();
        f.debug_struct("Workflow")
            .field("start_id", &self.start_id)
            .field("input_type", &self.input_type)
            .field("executors", &executors)
            .field("edges", &self.edge_infos())
            .field("ports", &self.ports.keys().collect::<Vec<_>>())
            .finish()
    }
}
