//! `PostgreSQL` log producer.

use super::{models::NewMessageRow, schema::broker_messages};
use crate::broker::{
    domain::{PublishReceipt, encode_event, fnv1a, partition_for},
    ports::{BrokerError, BrokerResult, EventPublisher},
};
use crate::pg::{PgPool, get_conn_with, run_blocking_with};
use crate::task::domain::TaskEvent;
use async_trait::async_trait;
use diesel::prelude::*;
use mockable::Clock;
use std::sync::Arc;
use std::time::Duration;

/// Appends events to `broker_messages`, bounded by a publish timeout.
///
/// `published_at` is stamped from the injected clock.
#[derive(Debug)]
pub struct PostgresEventPublisher<C: Clock + Send + Sync> {
    pool: PgPool,
    topic: String,
    partitions: u32,
    timeout: Duration,
    clock: Arc<C>,
}

impl<C: Clock + Send + Sync> PostgresEventPublisher<C> {
    /// Creates a producer for `topic` spread over `partitions` partitions.
    #[must_use]
    pub fn new(
        pool: PgPool,
        topic: impl Into<String>,
        partitions: u32,
        timeout: Duration,
        clock: Arc<C>,
    ) -> Self {
        Self {
            pool,
            topic: topic.into(),
            partitions: partitions.max(1),
            timeout,
            clock,
        }
    }
}

impl<C: Clock + Send + Sync> Clone for PostgresEventPublisher<C> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            topic: self.topic.clone(),
            partitions: self.partitions,
            timeout: self.timeout,
            clock: Arc::clone(&self.clock),
        }
    }
}

/// Advisory lock key serialising appends to one partition, so offsets
/// become visible in commit order.
fn partition_lock_key(topic: &str, partition: i32) -> i64 {
    i64::from(fnv1a(topic.as_bytes())) * 65_536 + i64::from(partition)
}

#[async_trait]
impl<C: Clock + Send + Sync> EventPublisher for PostgresEventPublisher<C> {
    async fn publish(&self, event: &TaskEvent) -> BrokerResult<PublishReceipt> {
        let encoded = encode_event(event)?;
        let partition = partition_for(event.task_id(), self.partitions);
        let partition_id = i32::try_from(partition).map_err(BrokerError::unavailable)?;
        let headers = serde_json::to_value(&encoded.headers).map_err(BrokerError::unavailable)?;
        let row = NewMessageRow {
            topic: self.topic.clone(),
            partition_id,
            message_key: encoded.key,
            payload: encoded.payload,
            headers,
            published_at: self.clock.utc(),
        };
        let lock_key = partition_lock_key(&self.topic, partition_id);
        let pool = self.pool.clone();

        let append = run_blocking_with(
            move || {
                let mut connection = get_conn_with(&pool, BrokerError::unavailable)?;
                connection
                    .transaction::<i64, diesel::result::Error, _>(|tx| {
                        diesel::sql_query("SELECT pg_advisory_xact_lock($1)")
                            .bind::<diesel::sql_types::BigInt, _>(lock_key)
                            .execute(tx)?;
                        diesel::insert_into(broker_messages::table)
                            .values(&row)
                            .returning(broker_messages::message_offset)
                            .get_result::<i64>(tx)
                    })
                    .map_err(BrokerError::unavailable)
            },
            BrokerError::unavailable,
        );

        let offset = tokio::time::timeout(self.timeout, append)
            .await
            .map_err(|_| BrokerError::Timeout(self.timeout))??;
        Ok(PublishReceipt {
            partition,
            offset: u64::try_from(offset).map_err(BrokerError::unavailable)?,
        })
    }
}
