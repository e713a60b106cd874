//! Diesel row models for the broker log.

use super::schema::broker_messages;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde_json::Value;

/// Query result row for log messages.
#[derive(Debug, Clone, Queryable, QueryableByName, Selectable)]
#[diesel(table_name = broker_messages)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct MessageRow {
    /// Position of the message.
    pub message_offset: i64,
    /// Partition index.
    pub partition_id: i32,
    /// JSON event payload.
    pub payload: Value,
    /// Out-of-band headers.
    pub headers: Value,
}

/// Insert model for log messages.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = broker_messages)]
pub struct NewMessageRow {
    /// Topic name.
    pub topic: String,
    /// Partition index.
    pub partition_id: i32,
    /// Routing key.
    pub message_key: String,
    /// JSON event payload.
    pub payload: Value,
    /// Out-of-band headers.
    pub headers: Value,
    /// Append timestamp.
    pub published_at: DateTime<Utc>,
}
