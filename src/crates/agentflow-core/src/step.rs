//! Per-superstep message queues and fan-in join buffers
//!
//! [`StepContext`] holds the messages pending for one superstep, keyed by
//! delivery target. Two ordering guarantees live here: messages for the
//! same target keep their arrival order (delivery order = insertion order),
//! and iteration over targets is stable (`BTreeMap`), which keeps replays
//! deterministic without promising any particular cross-target contract.
//!
//! [`FanInState`] buffers partial fan-in contributions across supersteps:
//! a join fires only once every configured source has contributed since
//! its last firing, at which point one buffered message per source is
//! released (in source-list order) and the consumed entries are removed.

use std::collections::{BTreeMap, VecDeque};

use tracing::debug;

use crate::edge::EdgeId;
use crate::executor::ExecutorId;
use crate::message::{MessageEnvelope, PortableMessageEnvelope, PortableValue};

/// Ordered pending messages for one superstep, keyed by target executor.
#[derive(Debug, Default)]
pub struct StepContext {
    queues: BTreeMap<ExecutorId, Vec<MessageEnvelope>>,
}

impl StepContext {
    /// Create an empty step context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether any messages are pending.
    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    /// Total pending messages across all targets.
    pub fn message_count(&self) -> usize {
        self.queues.values().map(Vec::len).sum()
    }

    /// Queue a message for `target`, preserving arrival order.
    pub fn push(&mut self, target: impl Into<ExecutorId>, mut envelope: MessageEnvelope) {
        let target = target.into();
        envelope.target = Some(target.clone());
        self.queues.entry(target).or_default().push(envelope);
    }

    /// Take all pending messages, leaving the context empty.
    pub fn drain(&mut self) -> BTreeMap<ExecutorId, Vec<MessageEnvelope>> {
        std::mem::take(&mut self.queues)
    }

    /// Export pending messages in delivery order as portable envelopes.
    pub fn export(&self) -> Vec<PortableMessageEnvelope> {
        self.queues
            .iter()
            .flat_map(|(target, envelopes)| {
                envelopes.iter().map(|envelope| PortableMessageEnvelope {
                    target: target.clone(),
                    source: envelope.source.clone(),
                    data: envelope.data.clone(),
                })
            })
            .collect()
    }

    /// Rebuild a step context from exported envelopes, preserving order.
    pub fn import(envelopes: Vec<PortableMessageEnvelope>) -> Self {
        let mut context = Self::new();
        for envelope in envelopes {
            let target = envelope.target.clone();
            context.push(
                target,
                MessageEnvelope::new(envelope.data, envelope.source),
            );
        }
        context
    }
}

/// Buffered contributions for fan-in joins, keyed by edge ID.
#[derive(Debug, Default)]
pub struct FanInState {
    joins: BTreeMap<EdgeId, JoinBuffer>,
}

#[derive(Debug, Default, Clone)]
struct JoinBuffer {
    pending: BTreeMap<ExecutorId, VecDeque<PortableValue>>,
}

impl FanInState {
    /// Record a contribution from `source` for the join `edge_id`.
    ///
    /// Returns the flushed `(source, message)` set, in `sources` order, when
    /// this contribution completes the join; `None` while the join is still
    /// waiting on other sources. Unconsumed surplus from a source stays
    /// buffered for the next firing.
    pub fn record(
        &mut self,
        edge_id: EdgeId,
        sources: &[ExecutorId],
        source: &ExecutorId,
        data: PortableValue,
    ) -> Option<Vec<(ExecutorId, PortableValue)>> {
        let buffer = self.joins.entry(edge_id).or_default();
        buffer
            .pending
            .entry(source.clone())
            .or_default()
            .push_back(data);

        let complete = sources
            .iter()
            .all(|s| buffer.pending.get(s).map_or(false, |q| !q.is_empty()));
        if !complete {
            debug!(edge = edge_id, source = %source, "fan-in contribution buffered");
            return None;
        }

        let mut flush = Vec::with_capacity(sources.len());
        for s in sources {
            if let Some(queue) = buffer.pending.get_mut(s) {
                if let Some(value) = queue.pop_front() {
                    flush.push((s.clone(), value));
                }
            }
        }
        debug_assert_eq!(flush.len(), sources.len());
        buffer.pending.retain(|_, queue| !queue.is_empty());
        Some(flush)
    }

    /// Discard the pending buffer of a join. Returns whether anything was
    /// buffered.
    pub fn abandon(&mut self, edge_id: EdgeId) -> bool {
        self.joins
            .remove(&edge_id)
            .map_or(false, |buffer| !buffer.pending.is_empty())
    }

    /// Pending contributions of one join, in (source, arrival) order.
    pub fn export_join(&self, edge_id: EdgeId) -> Vec<(ExecutorId, Vec<PortableValue>)> {
        self.joins
            .get(&edge_id)
            .map(|buffer| {
                buffer
                    .pending
                    .iter()
                    .map(|(source, queue)| (source.clone(), queue.iter().cloned().collect()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Replace the pending buffer of one join.
    pub fn import_join(&mut self, edge_id: EdgeId, pending: Vec<(ExecutorId, Vec<PortableValue>)>) {
        let mut buffer = JoinBuffer::default();
        for (source, values) in pending {
            if !values.is_empty() {
                buffer.pending.insert(source, values.into());
            }
        }
        self.joins.insert(edge_id, buffer);
    }

    /// Drop all join buffers.
    pub fn clear(&mut self) {
        self.joins.clear();
    }
}
