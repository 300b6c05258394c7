//! Incremental workflow construction and validation
//!
//! [`WorkflowBuilder`] assembles a graph edge by edge and produces an
//! immutable [`Workflow`] on [`build`](WorkflowBuilder::build). Executors
//! may be referenced by ID before their concrete instance exists; such
//! references stay *unbound* until [`bind_executor`](WorkflowBuilder::bind_executor)
//! resolves them, and building with any reference still unbound fails.
//!
//! Validation performed here, not at runtime:
//!
//! - at most one **unconditional** direct edge per (source, target) pair —
//!   the second registration fails immediately (conditional edges coexist);
//! - fan-out target lists and fan-in source lists must be non-empty;
//! - every edge endpoint must resolve to a bound executor or a registered
//!   input port;
//! - the start executor must declare a handler for the workflow's input
//!   type.
//!
//! `build` snapshots the current builder state; the builder itself stays
//! usable afterwards.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::debug;

use crate::edge::{Edge, EdgeCondition, EdgeId, EdgePartitioner};
use crate::error::{Result, WorkflowError};
use crate::executor::{Executor, ExecutorId};
use crate::message::type_tag_of;
use crate::port::InputPort;
use crate::workflow::Workflow;

/// Builder producing validated, immutable [`Workflow`] values.
pub struct WorkflowBuilder {
    start_id: ExecutorId,
    executors: HashMap<ExecutorId, Arc<dyn Executor>>,
    referenced: BTreeSet<ExecutorId>,
    edges: HashMap<ExecutorId, Vec<Edge>>,
    ports: HashMap<String, InputPort>,
    next_edge_id: EdgeId,
}

impl WorkflowBuilder {
    /// Start a builder whose workflow begins at `start`.
    ///
    /// The start executor may be bound later; it counts as a referenced ID
    /// from the beginning.
    pub fn new(start: impl Into<ExecutorId>) -> Self {
        let start_id = start.into();
        let mut referenced = BTreeSet::new();
        referenced.insert(start_id.clone());
        Self {
            start_id,
            executors: HashMap::new(),
            referenced,
            edges: HashMap::new(),
            ports: HashMap::new(),
            next_edge_id: 0,
        }
    }

    /// Bind an executor instance to its ID.
    ///
    /// Binding the same instance to the same ID twice is idempotent;
    /// binding a *different* instance (or one with a different accepted
    /// type set) to an already-bound ID is an error.
    pub fn bind_executor(&mut self, executor: Arc<dyn Executor>) -> Result<&mut Self> {
        let id = executor.id().to_string();
        if let Some(existing) = self.executors.get(&id) {
            if Arc::ptr_eq(existing, &executor) {
                return Ok(self);
            }
            if existing.input_types() == executor.input_types() {
                // Same ID, same declared type set, different instance.
                return Err(WorkflowError::Validation(format!(
                    "executor '{}' is already bound to a different instance",
                    id
                )));
            }
            return Err(WorkflowError::Validation(format!(
                "executor '{}' is already bound with a different type set",
                id
            )));
        }
        debug!(executor = %id, "bound executor");
        self.referenced.insert(id.clone());
        self.executors.insert(id, executor);
        Ok(self)
    }

    /// Register an unconditional direct edge.
    ///
    /// Fails if an unconditional edge between the same pair already exists.
    pub fn add_edge(
        &mut self,
        source: impl Into<ExecutorId>,
        target: impl Into<ExecutorId>,
    ) -> Result<&mut Self> {
        self.add_direct_edge(source.into(), target.into(), None)
    }

    /// Register a direct edge guarded by a typed condition.
    ///
    /// Any number of conditional edges may connect the same pair, alongside
    /// at most one unconditional edge.
    pub fn add_conditional_edge<T, F>(
        &mut self,
        source: impl Into<ExecutorId>,
        target: impl Into<ExecutorId>,
        condition: F,
    ) -> Result<&mut Self>
    where
        T: DeserializeOwned + 'static,
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.add_direct_edge(
            source.into(),
            target.into(),
            Some(EdgeCondition::new::<T, F>(condition)),
        )
    }

    fn add_direct_edge(
        &mut self,
        source: ExecutorId,
        target: ExecutorId,
        condition: Option<EdgeCondition>,
    ) -> Result<&mut Self> {
        if condition.is_none() {
            let duplicate = self.edges.get(&source).map_or(false, |edges| {
                edges.iter().any(|edge| {
                    matches!(
                        edge,
                        Edge::Direct { target: t, condition: None, .. } if t == &target
                    )
                })
            });
            if duplicate {
                return Err(WorkflowError::DuplicateEdge { from: source, target });
            }
        }

        let id = self.allocate_edge_id();
        self.referenced.insert(source.clone());
        self.referenced.insert(target.clone());
        self.edges.entry(source.clone()).or_default().push(Edge::Direct {
            id,
            source,
            target,
            condition,
        });
        Ok(self)
    }

    /// Register a fan-out edge delivering to every target.
    pub fn add_fan_out_edge(
        &mut self,
        source: impl Into<ExecutorId>,
        targets: impl IntoIterator<Item = impl Into<ExecutorId>>,
    ) -> Result<&mut Self> {
        self.add_fan_out(source.into(), collect_ids(targets), None)
    }

    /// Register a fan-out edge with a typed partitioner.
    ///
    /// The partitioner receives each message and the target count and
    /// returns the indices of the targets to deliver to.
    pub fn add_fan_out_edge_with<T, F>(
        &mut self,
        source: impl Into<ExecutorId>,
        targets: impl IntoIterator<Item = impl Into<ExecutorId>>,
        partitioner: F,
    ) -> Result<&mut Self>
    where
        T: DeserializeOwned + 'static,
        F: Fn(&T, usize) -> Vec<usize> + Send + Sync + 'static,
    {
        self.add_fan_out(
            source.into(),
            collect_ids(targets),
            Some(EdgePartitioner::new::<T, F>(partitioner)),
        )
    }

    fn add_fan_out(
        &mut self,
        source: ExecutorId,
        targets: Vec<ExecutorId>,
        partitioner: Option<EdgePartitioner>,
    ) -> Result<&mut Self> {
        if targets.is_empty() {
            return Err(WorkflowError::Validation(format!(
                "fan-out edge from '{}' has no targets",
                source
            )));
        }

        let id = self.allocate_edge_id();
        self.referenced.insert(source.clone());
        self.referenced.extend(targets.iter().cloned());
        self.edges.entry(source.clone()).or_default().push(Edge::FanOut {
            id,
            source,
            targets,
            partitioner,
        });
        Ok(self)
    }

    /// Register a fan-in edge joining every source into one target.
    ///
    /// The single logical edge is referenced from each source's outgoing
    /// set; the target only receives messages once every source has
    /// contributed since the join last fired.
    pub fn add_fan_in_edge(
        &mut self,
        target: impl Into<ExecutorId>,
        sources: impl IntoIterator<Item = impl Into<ExecutorId>>,
    ) -> Result<&mut Self> {
        let target = target.into();
        let sources = collect_ids(sources);
        if sources.is_empty() {
            return Err(WorkflowError::Validation(format!(
                "fan-in edge into '{}' has no sources",
                target
            )));
        }

        let id = self.allocate_edge_id();
        self.referenced.insert(target.clone());
        self.referenced.extend(sources.iter().cloned());
        for source in &sources {
            self.edges
                .entry(source.clone())
                .or_default()
                .push(Edge::FanIn {
                    id,
                    sources: sources.clone(),
                    target: target.clone(),
                });
        }
        Ok(self)
    }

    /// Register a human-in-the-loop input port.
    ///
    /// Edges may target the port like an executor; its responses route
    /// along edges whose source is the port ID.
    pub fn add_input_port(&mut self, port: InputPort) -> &mut Self {
        self.referenced.insert(port.id().to_string());
        self.ports.insert(port.id().to_string(), port);
        self
    }

    /// IDs referenced by edges or the start marker that no executor or
    /// port currently satisfies.
    pub fn unbound_executors(&self) -> Vec<ExecutorId> {
        self.referenced
            .iter()
            .filter(|id| !self.executors.contains_key(*id) && !self.ports.contains_key(*id))
            .cloned()
            .collect()
    }

    /// Validate and snapshot the builder into an immutable [`Workflow`]
    /// accepting `T` as its input message.
    pub fn build<T>(&self) -> Result<Workflow> {
        let unbound = self.unbound_executors();
        if !unbound.is_empty() {
            return Err(WorkflowError::UnboundExecutor(unbound.join(", ")));
        }

        let input_type = type_tag_of::<T>().to_string();
        let start = self
            .executors
            .get(&self.start_id)
            .ok_or_else(|| {
                WorkflowError::Validation(format!(
                    "start executor '{}' must be a bound executor, not a port",
                    self.start_id
                ))
            })?;
        if !start.input_types().contains(&input_type) {
            return Err(WorkflowError::Validation(format!(
                "start executor '{}' accepts [{}], not input type '{}'",
                self.start_id,
                start.input_types().join(", "),
                input_type
            )));
        }

        debug!(
            start = %self.start_id,
            executors = self.executors.len(),
            ports = self.ports.len(),
            "built workflow"
        );
        Ok(Workflow {
            start_id: self.start_id.clone(),
            executors: self.executors.clone(),
            edges: self.edges.clone(),
            ports: self.ports.clone(),
            input_type,
        })
    }

    fn allocate_edge_id(&mut self) -> EdgeId {
        let id = self.next_edge_id;
        self.next_edge_id += 1;
        id
    }
}

impl std::fmt::Debug for WorkflowBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowBuilder")
            .field("start_id", &self.start_id)
            .field("executors", &self.executors.len())
            .field("edges", &self.next_edge_id)
            .field("unbound", &self.unbound_executors())
            .finish()
    }
}

fn collect_ids(ids: impl IntoIterator<Item = impl Into<ExecutorId>>) -> Vec<ExecutorId> {
    ids.into_iter().map(Into::into).collect()
}
