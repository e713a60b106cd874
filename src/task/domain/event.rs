//! Immutable task event envelope carried by the broker.

use super::{OwnerId, SourceUri, Task, TaskId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// W3C trace-context header carrying the parent span.
pub const TRACEPARENT_HEADER: &str = "traceparent";
/// W3C trace-context header carrying vendor state.
pub const TRACESTATE_HEADER: &str = "tracestate";

/// Distributed tracing context propagated beside an event payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraceContext {
    traceparent: Option<String>,
    tracestate: Option<String>,
}

impl TraceContext {
    /// Creates an empty trace context.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            traceparent: None,
            tracestate: None,
        }
    }

    /// Sets the `traceparent` value.
    #[must_use]
    pub fn with_traceparent(mut self, value: impl Into<String>) -> Self {
        self.traceparent = Some(value.into());
        self
    }

    /// Sets the `tracestate` value.
    #[must_use]
    pub fn with_tracestate(mut self, value: impl Into<String>) -> Self {
        self.tracestate = Some(value.into());
        self
    }

    /// Returns the `traceparent` value, if any.
    #[must_use]
    pub fn traceparent(&self) -> Option<&str> {
        self.traceparent.as_deref()
    }

    /// Returns the `tracestate` value, if any.
    #[must_use]
    pub fn tracestate(&self) -> Option<&str> {
        self.tracestate.as_deref()
    }

    /// Returns `true` when no trace headers are present.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.traceparent.is_none() && self.tracestate.is_none()
    }

    /// Renders the context as out-of-band message headers.
    #[must_use]
    pub fn to_headers(&self) -> BTreeMap<String, String> {
        let mut headers = BTreeMap::new();
        if let Some(value) = &self.traceparent {
            headers.insert(TRACEPARENT_HEADER.to_owned(), value.clone());
        }
        if let Some(value) = &self.tracestate {
            headers.insert(TRACESTATE_HEADER.to_owned(), value.clone());
        }
        headers
    }

    /// Rebuilds a context from message headers, ignoring unrelated keys.
    #[must_use]
    pub fn from_headers(headers: &BTreeMap<String, String>) -> Self {
        Self {
            traceparent: headers.get(TRACEPARENT_HEADER).cloned(),
            tracestate: headers.get(TRACESTATE_HEADER).cloned(),
        }
    }
}

/// Event published once per task at creation time.
///
/// The serialized payload is `{task_id, owner_id, source_uri}`; the trace
/// context travels as headers and is skipped by serde.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskEvent {
    task_id: TaskId,
    owner_id: OwnerId,
    source_uri: SourceUri,
    #[serde(skip)]
    trace: TraceContext,
}

impl TaskEvent {
    /// Builds the creation event for a task.
    #[must_use]
    pub fn for_task(task: &Task, trace: TraceContext) -> Self {
        Self {
            task_id: task.id(),
            owner_id: task.owner_id().clone(),
            source_uri: task.source_uri().clone(),
            trace,
        }
    }

    /// Returns the referenced task identifier, also used as the broker key.
    #[must_use]
    pub const fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Returns the submitting principal.
    #[must_use]
    pub const fn owner_id(&self) -> &OwnerId {
        &self.owner_id
    }

    /// Returns the input reference.
    #[must_use]
    pub const fn source_uri(&self) -> &SourceUri {
        &self.source_uri
    }

    /// Returns the propagated trace context.
    #[must_use]
    pub const fn trace(&self) -> &TraceContext {
        &self.trace
    }

    /// Attaches a trace context recovered from message headers.
    #[must_use]
    pub fn with_trace(mut self, trace: TraceContext) -> Self {
        self.trace = trace;
        self
    }
}
