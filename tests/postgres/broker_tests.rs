//! `PostgreSQL` broker log against a live database.

use super::helpers::{FixedClock, test_pool, unique};
use chrono::{DateTime, TimeZone, Utc};
use diesel::prelude::*;
use diesel::sql_types::{Text, Timestamptz};
use eyre::{OptionExt, Result};
use mockable::DefaultClock;
use pixelflow::broker::adapters::postgres::{
    ConsumerSettings, PostgresEventConsumer, PostgresEventPublisher,
};
use pixelflow::broker::domain::{Delivery, partition_for};
use pixelflow::broker::ports::{BrokerError, EventConsumer, EventPublisher};
use pixelflow::task::domain::{OwnerId, SourceUri, Task, TaskEvent, TraceContext};
use rstest::rstest;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

const PARTITIONS: u32 = 4;
const WAIT: Duration = Duration::from_secs(2);

fn settings() -> ConsumerSettings {
    ConsumerSettings {
        lease_ttl: Duration::from_secs(5),
        poll_interval: Duration::from_millis(20),
    }
}

fn producer(
    pool: &pixelflow::pg::PgPool,
    topic: &str,
    partitions: u32,
) -> PostgresEventPublisher<DefaultClock> {
    PostgresEventPublisher::new(pool.clone(), topic, partitions, WAIT, Arc::new(DefaultClock))
}

fn event() -> Result<TaskEvent> {
    let task = Task::new(
        OwnerId::new("u1")?,
        SourceUri::new("http://x/a.jpg")?,
        &DefaultClock,
    );
    Ok(TaskEvent::for_task(
        &task,
        TraceContext::empty().with_traceparent("00-abc-def-01"),
    ))
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn published_event_is_consumed_once_per_group() -> Result<()> {
    let Some(pool) = test_pool()? else {
        return Ok(());
    };
    let topic = unique("topic");
    let group = unique("group");
    let publisher = producer(&pool, &topic, PARTITIONS);
    let sent = event()?;

    let receipt = publisher.publish(&sent).await?;
    assert_eq!(receipt.partition, partition_for(sent.task_id(), PARTITIONS));

    let consumer =
        PostgresEventConsumer::new(pool.clone(), topic.clone(), group.clone(), PARTITIONS, settings());
    let delivery = consumer.receive(WAIT).await?.ok_or_eyre("no delivery")?;
    assert_eq!(delivery.event().ok(), Some(&sent));
    assert_eq!(
        delivery.event().ok().and_then(|event| event.trace().traceparent()),
        Some("00-abc-def-01")
    );

    consumer.ack(&delivery).await?;
    assert!(consumer.receive(Duration::from_millis(200)).await?.is_none());
    consumer.close().await?;

    // A second group reads the same log independently.
    let other = PostgresEventConsumer::new(pool, topic, unique("group"), PARTITIONS, settings());
    assert!(other.receive(WAIT).await?.is_some());
    other.close().await?;
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn unacknowledged_delivery_is_redelivered_after_close() -> Result<()> {
    let Some(pool) = test_pool()? else {
        return Ok(());
    };
    let topic = unique("topic");
    let group = unique("group");
    let publisher = producer(&pool, &topic, PARTITIONS);
    let sent = event()?;
    publisher.publish(&sent).await?;

    let first =
        PostgresEventConsumer::new(pool.clone(), topic.clone(), group.clone(), PARTITIONS, settings());
    let delivery = first.receive(WAIT).await?.ok_or_eyre("no delivery")?;
    first.close().await?;
    assert!(matches!(
        first.receive(WAIT).await,
        Err(BrokerError::Closed)
    ));

    let second = PostgresEventConsumer::new(pool, topic, group, PARTITIONS, settings());
    let again = second.receive(WAIT).await?.ok_or_eyre("no redelivery")?;
    assert_eq!(again.offset(), delivery.offset());
    second.ack(&again).await?;
    second.close().await?;
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn group_members_split_the_log() -> Result<()> {
    let Some(pool) = test_pool()? else {
        return Ok(());
    };
    let topic = unique("topic");
    let group = unique("group");
    let publisher = producer(&pool, &topic, PARTITIONS);
    let mut expected = HashSet::new();
    for _ in 0..12 {
        let sent = event()?;
        expected.insert(sent.task_id());
        publisher.publish(&sent).await?;
    }

    let members = [
        PostgresEventConsumer::new(pool.clone(), topic.clone(), group.clone(), PARTITIONS, settings()),
        PostgresEventConsumer::new(pool, topic, group, PARTITIONS, settings()),
    ];
    let mut seen = HashSet::new();
    for _ in 0..100 {
        for member in &members {
            if let Some(delivery) = member.receive(Duration::from_millis(50)).await? {
                let task_id = delivery.event().map_err(Clone::clone)?.task_id();
                assert!(seen.insert(task_id), "event {task_id} delivered twice");
                member.ack(&delivery).await?;
            }
        }
        if seen.len() == expected.len() {
            break;
        }
    }

    assert_eq!(seen, expected);
    for member in &members {
        member.close().await?;
    }
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn slow_handler_keeps_its_partition() -> Result<()> {
    let Some(pool) = test_pool()? else {
        return Ok(());
    };
    let topic = unique("topic");
    let group = unique("group");
    let short_lease = ConsumerSettings {
        lease_ttl: Duration::from_secs(1),
        poll_interval: Duration::from_millis(20),
    };
    producer(&pool, &topic, 1).publish(&event()?).await?;

    let holder =
        PostgresEventConsumer::new(pool.clone(), topic.clone(), group.clone(), 1, short_lease);
    let delivery = holder.receive(WAIT).await?.ok_or_eyre("no delivery")?;

    // Handling outlasts the lease lifetime several times over.
    tokio::time::sleep(Duration::from_millis(2_500)).await;
    let rival = PostgresEventConsumer::new(pool, topic, group, 1, short_lease);
    let stolen = rival.receive(Duration::from_millis(500)).await?;
    assert!(
        stolen.is_none(),
        "offset {:?} handed to a second member while still in flight",
        stolen.as_ref().map(Delivery::offset)
    );

    holder.ack(&delivery).await?;
    holder.close().await?;
    assert!(rival.receive(Duration::from_millis(500)).await?.is_none());
    rival.close().await?;
    Ok(())
}

#[derive(QueryableByName)]
struct PublishedAt {
    #[diesel(sql_type = Timestamptz)]
    published_at: DateTime<Utc>,
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn publish_time_comes_from_the_clock() -> Result<()> {
    let Some(pool) = test_pool()? else {
        return Ok(());
    };
    let topic = unique("topic");
    let stamped = Utc
        .timestamp_opt(1_767_225_600, 0)
        .single()
        .ok_or_eyre("valid timestamp")?;
    let clock = Arc::new(FixedClock(stamped));
    PostgresEventPublisher::new(pool.clone(), topic.clone(), PARTITIONS, WAIT, clock)
        .publish(&event()?)
        .await?;

    let mut conn = pool.get()?;
    let row = diesel::sql_query("SELECT published_at FROM broker_messages WHERE topic = $1")
        .bind::<Text, _>(&topic)
        .get_result::<PublishedAt>(&mut conn)?;
    assert_eq!(row.published_at, stamped);
    Ok(())
}
