//! Edges: routing rules between executors
//!
//! An [`Edge`] describes how a message produced by a source executor reaches
//! its target(s):
//!
//! - **Direct** — one target, optionally guarded by a typed condition.
//! - **FanOut** — an ordered target list, optionally narrowed by a
//!   partitioner that selects target indices per message.
//! - **FanIn** — several sources funneling into one target; delivery is
//!   withheld until every source has contributed since the join last fired.
//!
//! Conditions and partitioners are stored type-erased behind
//! [`PortableValue`] coercion so heterogeneous edges share one runtime
//! representation. Each edge carries a monotonically increasing [`EdgeId`]
//! (builder-local counter) used to name edge state in checkpoints and to
//! disambiguate structurally identical edges; [`EdgeInfo`] is the
//! serializable structural identity used to match checkpointed edge state
//! back to a freshly built workflow.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::executor::ExecutorId;
use crate::message::{type_tag_of, PortableValue};

/// Process-local edge identifier, assigned by the builder in registration
/// order.
pub type EdgeId = u64;

/// Type-erased edge condition.
///
/// Wraps a typed predicate behind a checked coercion: the message is
/// extracted to the condition's declared type before evaluation, and a
/// message that cannot be coerced evaluates as *not delivered* — the
/// documented fallback, never an error.
#[derive(Clone)]
pub struct EdgeCondition {
    type_tag: String,
    predicate: Arc<dyn Fn(&PortableValue) -> bool + Send + Sync>,
}

impl EdgeCondition {
    /// Wrap a typed predicate.
    pub fn new<T, F>(predicate: F) -> Self
    where
        T: DeserializeOwned + 'static,
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let type_tag = type_tag_of::<T>().to_string();
        let expected = type_tag.clone();
        Self {
            type_tag,
            predicate: Arc::new(move |value: &PortableValue| match value.try_extract::<T>() {
                Some(typed) => predicate(&typed),
                None => {
                    warn!(
                        expected = %expected,
                        actual = %value.type_tag(),
                        "condition coercion failed; suppressing delivery"
                    );
                    false
                }
            }),
        }
    }

    /// Declared message type of the predicate.
    pub fn type_tag(&self) -> &str {
        &self.type_tag
    }

    /// Evaluate the condition against a message.
    pub fn evaluate(&self, value: &PortableValue) -> bool {
        (self.predicate)(value)
    }
}

/// Type-erased fan-out partitioner.
///
/// Receives the message and the target count, returns the indices of the
/// targets to deliver to. Index validation happens at routing time; a
/// message that cannot be coerced to the declared type selects no targets.
#[derive(Clone)]
pub struct EdgePartitioner {
    type_tag: String,
    selector: Arc<dyn Fn(&PortableValue, usize) -> Vec<usize> + Send + Sync>,
}

impl EdgePartitioner {
    /// Wrap a typed partitioner.
    pub fn new<T, F>(partitioner: F) -> Self
    where
        T: DeserializeOwned + 'static,
        F: Fn(&T, usize) -> Vec<usize> + Send + Sync + 'static,
    {
        let type_tag = type_tag_of::<T>().to_string();
        let expected = type_tag.clone();
        Self {
            type_tag,
            selector: Arc::new(move |value: &PortableValue, target_count: usize| {
                match value.try_extract::<T>() {
                    Some(typed) => partitioner(&typed, target_count),
                    None => {
                        warn!(
                            expected = %expected,
                            actual = %value.type_tag(),
                            "partitioner coercion failed; selecting no targets"
                        );
                        Vec::new()
                    }
                }
            }),
        }
    }

    /// Declared message type of the partitioner.
    pub fn type_tag(&self) -> &str {
        &self.type_tag
    }

    /// Select target indices for a message.
    pub fn select(&self, value: &PortableValue, target_count: usize) -> Vec<usize> {
        (self.selector)(value, target_count)
    }
}

/// A directed routing rule between executors.
#[derive(Clone)]
pub enum Edge {
    /// One source to one target, optionally conditional
    Direct {
        /// Edge identifier
        id: EdgeId,
        /// Producing executor
        source: ExecutorId,
        /// Receiving executor (or input port)
        target: ExecutorId,
        /// Delivery guard; `None` means unconditional
        condition: Option<EdgeCondition>,
    },

    /// One source to an ordered target list, optionally partitioned
    FanOut {
        /// Edge identifier
        id: EdgeId,
        /// Producing executor
        source: ExecutorId,
        /// Ordered, non-empty target list
        targets: Vec<ExecutorId>,
        /// Target selector; `None` delivers to all targets
        partitioner: Option<EdgePartitioner>,
    },

    /// Several sources joined into one target
    FanIn {
        /// Edge identifier
        id: EdgeId,
        /// Ordered, non-empty source list
        sources: Vec<ExecutorId>,
        /// Receiving executor
        target: ExecutorId,
    },
}

impl Edge {
    /// This edge's identifier.
    pub fn id(&self) -> EdgeId {
        match self {
            Edge::Direct { id, .. } | Edge::FanOut { id, .. } | Edge::FanIn { id, .. } => *id,
        }
    }

    /// Structural identity of this edge for checkpoint matching.
    pub fn info(&self) -> EdgeInfo {
        match self {
            Edge::Direct {
                id,
                source,
                target,
                condition,
            } => EdgeInfo {
                id: *id,
                kind: EdgeKind::Direct,
                sources: vec![source.clone()],
                targets: vec![target.clone()],
                has_condition: condition.is_some(),
                has_partitioner: false,
            },
            Edge::FanOut {
                id,
                source,
                targets,
                partitioner,
            } => EdgeInfo {
                id: *id,
                kind: EdgeKind::FanOut,
                sources: vec![source.clone()],
                targets: targets.clone(),
                has_condition: false,
                has_partitioner: partitioner.is_some(),
            },
            Edge::FanIn {
                id,
                sources,
                target,
            } => EdgeInfo {
                id: *id,
                kind: EdgeKind::FanIn,
                sources: sources.clone(),
                targets: vec![target.clone()],
                has_condition: false,
                has_partitioner: false,
            },
        }
    }
}

impl std::fmt::Debug for Edge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Edge::Direct {
                id,
                source,
                target,
                condition,
            } => f
                .debug_struct("Direct")
                .field("id", id)
                .field("source", source)
                .field("target", target)
                .field("condition", &condition.as_ref().map(|_| "<function>"))
                .finish(),
            Edge::FanOut {
                id,
                source,
                targets,
                partitioner,
            } => f
                .debug_struct("FanOut")
                .field("id", id)
                .field("source", source)
                .field("targets", targets)
                .field("partitioner", &partitioner.as_ref().map(|_| "<function>"))
                .finish(),
            Edge::FanIn {
                id,
                sources,
                target,
            } => f
                .debug_struct("FanIn")
                .field("id", id)
                .field("sources", sources)
                .field("target", target)
                .finish(),
        }
    }
}

/// Edge shape discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    Direct,
    FanOut,
    FanIn,
}

/// Serializable structural identity of an edge.
///
/// Checkpoint fragments reference edges by `EdgeInfo`, never by object
/// identity: the workflow graph is rebuilt fresh on restore, so matching is
/// structural — kind, connections, and the discriminating
/// has-condition/has-partitioner flags. The `id` disambiguates when two
/// edges are structurally identical.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeInfo {
    /// Edge identifier at the time of the snapshot
    pub id: EdgeId,
    /// Edge shape
    pub kind: EdgeKind,
    /// Source executors, in declaration order
    pub sources: Vec<ExecutorId>,
    /// Target executors, in declaration order
    pub targets: Vec<ExecutorId>,
    /// Whether a condition was attached
    pub has_condition: bool,
    /// Whether a partitioner was attached
    pub has_partitioner: bool,
}

impl EdgeInfo {
    /// Structural equality, ignoring the edge ID.
    pub fn is_match(&self, other: &EdgeInfo) -> bool {
        self.kind == other.kind
            && self.sources == other.sources
            && self.targets == other.targets
            && self.has_condition == other.has_condition
            && self.has_partitioner == other.has_partitioner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn condition_evaluates_typed_predicate() {
        let condition = EdgeCondition::new::<i64, _>(|x| *x > 10);

        let high = PortableValue::new(&42i64).unwrap();
        let low = PortableValue::new(&3i64).unwrap();
        assert!(condition.evaluate(&high));
        assert!(!condition.evaluate(&low));
    }

    #[test]
    fn condition_coercion_failure_suppresses_delivery() {
        let condition = EdgeCondition::new::<i64, _>(|_| true);
        let mismatched = PortableValue::new(&"not a number").unwrap();
        assert!(!condition.evaluate(&mismatched));
    }

    #[test]
    fn partitioner_selects_indices() {
        let partitioner =
            EdgePartitioner::new::<u32, _>(|n, count| vec![(*n as usize) % count]);
        let value = PortableValue::new(&5u32).unwrap();
        assert_eq!(partitioner.select(&value, 3), vec![2]);
    }

    #[test]
    fn partitioner_coercion_failure_selects_nothing() {
        let partitioner = EdgePartitioner::new::<u32, _>(|_, count| (0..count).collect());
        let mismatched = PortableValue::new(&"text").unwrap();
        assert!(partitioner.select(&mismatched, 4).is_empty());
    }

    #[test]
    fn edge_info_matching_is_structural() {
        let a = Edge::Direct {
            id: 1,
            source: "a".to_string(),
            target: "b".to_string(),
            condition: None,
        };
        let b = Edge::Direct {
            id: 9,
            source: "a".to_string(),
            target: "b".to_string(),
            condition: None,
        };
        assert!(a.info().is_match(&b.info()));

        let conditional = Edge::Direct {
            id: 1,
            source: "a".to_string(),
            target: "b".to_string(),
            condition: Some(EdgeCondition::new::<i64, _>(|_| true)),
        };
        assert!(!a.info().is_match(&conditional.info()));
    }

    #[test]
    fn edge_info_round_trips_through_json() {
        let edge = Edge::FanIn {
            id: 4,
            sources: vec!["a".to_string(), "b".to_string()],
            target: "join".to_string(),
        };
        let text = serde_json::to_string(&edge.info()).unwrap();
        let back: EdgeInfo = serde_json::from_str(&text).unwrap();
        assert_eq!(back, edge.info());
    }
}
