//! JSON wire format for task events.
//!
//! The payload is `{task_id, owner_id, source_uri}`. Trace context travels
//! as message headers, outside the payload.

use crate::task::domain::{TaskEvent, TraceContext};
use std::collections::BTreeMap;
use thiserror::Error;

/// An event rendered for transport.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedMessage {
    /// Routing key: the task identifier.
    pub key: String,
    /// JSON payload.
    pub payload: serde_json::Value,
    /// Out-of-band headers.
    pub headers: BTreeMap<String, String>,
}

/// Errors raised while encoding or decoding events.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    /// The event could not be serialized.
    #[error("failed to encode task event: {0}")]
    Encode(String),
    /// The payload is not a valid task event.
    #[error("malformed task event payload: {0}")]
    Decode(String),
}

/// Renders an event as key, JSON payload and trace headers.
///
/// # Errors
///
/// Returns [`CodecError::Encode`] if serialization fails.
pub fn encode_event(event: &TaskEvent) -> Result<EncodedMessage, CodecError> {
    let payload =
        serde_json::to_value(event).map_err(|err| CodecError::Encode(err.to_string()))?;
    Ok(EncodedMessage {
        key: event.task_id().to_string(),
        payload,
        headers: event.trace().to_headers(),
    })
}

/// Rebuilds an event from a JSON payload and its headers.
///
/// # Errors
///
/// Returns [`CodecError::Decode`] when the payload is missing fields or
/// carries invalid values.
pub fn decode_event(
    payload: serde_json::Value,
    headers: &BTreeMap<String, String>,
) -> Result<TaskEvent, CodecError> {
    let event: TaskEvent =
        serde_json::from_value(payload).map_err(|err| CodecError::Decode(err.to_string()))?;
    Ok(event.with_trace(TraceContext::from_headers(headers)))
}
