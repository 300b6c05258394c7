//! Message payloads and envelopes
//!
//! Messages travel the graph as [`PortableValue`]s: the JSON projection of
//! the original Rust value plus its type tag. The projection makes every
//! queued message serialization-safe — a checkpoint can export the full
//! pending-message set without capturing closures or live references, and
//! conditions/partitioners coerce the value back to their declared type
//! with an explicit, checked downcast.
//!
//! [`MessageEnvelope`] is the runtime wrapper (payload + source + optional
//! explicit target); [`PortableMessageEnvelope`] is its serializable
//! projection used for checkpoint export and import.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Result, WorkflowError};
use crate::executor::ExecutorId;

/// Source ID stamped on messages injected from outside the graph.
pub const INPUT_SOURCE: &str = "__input__";

/// The type tag recorded for values of type `T`.
///
/// Tags are process-stable Rust type names; a handler registered for `T`
/// matches exactly the messages produced from a `T`.
pub fn type_tag_of<T: ?Sized>() -> &'static str {
    std::any::type_name::<T>()
}

/// A serialization-safe, type-erased message payload.
///
/// Wraps the JSON form of a value together with the type tag it was created
/// from. Extraction is a checked coercion: [`extract`](Self::extract) fails
/// with [`WorkflowError::Coercion`] when the value does not deserialize as
/// the requested type, while [`try_extract`](Self::try_extract) returns
/// `None` — the fallback conditions use to treat a mismatched message as
/// "not delivered" rather than an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortableValue {
    type_tag: String,
    value: serde_json::Value,
}

impl PortableValue {
    /// Wrap a value, recording its type tag.
    pub fn new<T: Serialize>(value: &T) -> Result<Self> {
        Ok(Self {
            type_tag: type_tag_of::<T>().to_string(),
            value: serde_json::to_value(value)?,
        })
    }

    /// Reassemble a portable value from its stored parts.
    pub fn from_parts(type_tag: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            type_tag: type_tag.into(),
            value,
        }
    }

    /// The type tag recorded at construction.
    pub fn type_tag(&self) -> &str {
        &self.type_tag
    }

    /// The raw JSON projection of the payload.
    pub fn as_json(&self) -> &serde_json::Value {
        &self.value
    }

    /// Coerce the payload to `T`, failing on mismatch.
    pub fn extract<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.value.clone()).map_err(|_| WorkflowError::Coercion {
            expected: type_tag_of::<T>().to_string(),
            actual: self.type_tag.clone(),
        })
    }

    /// Coerce the payload to `T`, returning `None` on mismatch.
    pub fn try_extract<T: DeserializeOwned>(&self) -> Option<T> {
        serde_json::from_value(self.value.clone()).ok()
    }
}

/// A message in flight: payload, producing executor, and optional explicit
/// target (set for addressed sends, `None` for edge-routed sends).
#[derive(Debug, Clone, PartialEq)]
pub struct MessageEnvelope {
    /// Message payload
    pub data: PortableValue,
    /// Executor (or [`INPUT_SOURCE`] / port) that produced the message
    pub source: ExecutorId,
    /// Explicit delivery target, bypassing edge routing when set
    pub target: Option<ExecutorId>,
}

impl MessageEnvelope {
    /// An edge-routed message from `source`.
    pub fn new(data: PortableValue, source: impl Into<ExecutorId>) -> Self {
        Self {
            data,
            source: source.into(),
            target: None,
        }
    }

    /// A message explicitly addressed to `target`.
    pub fn addressed(
        data: PortableValue,
        source: impl Into<ExecutorId>,
        target: impl Into<ExecutorId>,
    ) -> Self {
        Self {
            data,
            source: source.into(),
            target: Some(target.into()),
        }
    }
}

/// Serializable projection of a queued message.
///
/// The target here is always the resolved delivery target: by the time a
/// message sits in a step context it is addressed to a concrete executor,
/// whatever routing produced it. No delegate state is carried — conditions
/// and partitioners are re-derived from the workflow definition on import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortableMessageEnvelope {
    /// Resolved delivery target
    pub target: ExecutorId,
    /// Producing executor
    pub source: ExecutorId,
    /// Message payload
    pub data: PortableValue,
}
