//! Input ports: human-in-the-loop request boundaries
//!
//! An [`InputPort`] is an executor-like entry point representing an
//! external system or human. Routing a message into a port does not invoke
//! a handler; it raises a [`RequestInfo`](crate::event::WorkflowEvent::RequestInfo)
//! event and suspends that branch until a matching [`ExternalResponse`] is
//! supplied. A valid response re-enters the graph as a new inbound message
//! on the next superstep, routed along the port's outgoing edges (or back
//! to the requesting executor when the port has none). The engine never
//! times requests out; liveness is the caller's concern.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::executor::ExecutorId;
use crate::message::{type_tag_of, PortableValue};

/// A typed request/response boundary registered on the workflow.
#[derive(Debug, Clone)]
pub struct InputPort {
    id: String,
    request_type: String,
    response_type: String,
}

impl InputPort {
    /// Declare a port accepting `Req` requests and `Resp` responses.
    pub fn new<Req, Resp>(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            request_type: type_tag_of::<Req>().to_string(),
            response_type: type_tag_of::<Resp>().to_string(),
        }
    }

    /// Port identifier; edges may target it like an executor ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Type tag of messages this port accepts as requests.
    pub fn request_type(&self) -> &str {
        &self.request_type
    }

    /// Type tag a response payload must carry.
    pub fn response_type(&self) -> &str {
        &self.response_type
    }
}

/// An answer to a pending external request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalResponse {
    /// Request being answered (echoed from the `RequestInfo` event)
    pub request_id: String,
    /// Response payload; must match the port's declared response type
    pub payload: PortableValue,
}

impl ExternalResponse {
    /// Build a response with a typed payload.
    pub fn new<T: Serialize>(request_id: impl Into<String>, payload: &T) -> Result<Self> {
        Ok(Self {
            request_id: request_id.into(),
            payload: PortableValue::new(payload)?,
        })
    }
}

/// A request parked at a port, awaiting its response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingRequest {
    /// Request identifier
    pub request_id: String,
    /// Port the request is parked at
    pub port_id: String,
    /// Executor whose message raised the request
    pub source: ExecutorId,
}
