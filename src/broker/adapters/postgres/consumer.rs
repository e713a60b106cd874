//! `PostgreSQL` log consumer with lease-based partition ownership.
//!
//! Members of a group announce themselves through heartbeats in
//! `broker_members`. Each member claims at most its fair share of
//! partitions through `broker_leases`; leases left by members that stop
//! heartbeating expire and are taken over by the survivors. Read positions
//! live in `broker_offsets` and only advance on acknowledgement, and only
//! while the acknowledging member still holds the partition lease.
//!
//! While a delivery is unacknowledged a background keeper renews the
//! member's heartbeat and leases every [`ConsumerSettings::renew_interval`],
//! so a slow handler never loses its partition to another member.

use super::models::MessageRow;
use crate::broker::{
    domain::{Delivery, PartitionId, decode_event},
    ports::{BrokerError, BrokerResult, EventConsumer},
};
use crate::pg::{PgPool, get_conn_with, run_blocking_with};
use async_trait::async_trait;
use diesel::prelude::*;
use diesel::sql_types::{BigInt, Double, Integer, Text, Uuid as SqlUuid};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const MIN_RENEW_INTERVAL: Duration = Duration::from_millis(10);

/// Timing knobs for group membership.
#[derive(Debug, Clone, Copy)]
pub struct ConsumerSettings {
    /// How long a lease or heartbeat stays valid without renewal.
    pub lease_ttl: Duration,
    /// Pause between polls when no message is ready.
    pub poll_interval: Duration,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            lease_ttl: Duration::from_secs(30),
            poll_interval: Duration::from_millis(250),
        }
    }
}

impl ConsumerSettings {
    /// Period at which leases holding unacknowledged deliveries are renewed:
    /// a third of the lease lifetime.
    #[must_use]
    pub fn renew_interval(&self) -> Duration {
        self.lease_ttl
            .checked_div(3)
            .unwrap_or(self.lease_ttl)
            .max(MIN_RENEW_INTERVAL)
    }
}

type InFlight = Arc<Mutex<HashSet<PartitionId>>>;

/// A member of a consumer group reading from the `PostgreSQL` log.
#[derive(Debug)]
pub struct PostgresEventConsumer {
    pool: PgPool,
    topic: String,
    group: String,
    member: Uuid,
    partitions: u32,
    settings: ConsumerSettings,
    in_flight: InFlight,
    keeper: CancellationToken,
    keeper_started: AtomicBool,
    closed: AtomicBool,
}

#[derive(QueryableByName)]
struct CountRow {
    #[diesel(sql_type = BigInt)]
    count: i64,
}

#[derive(QueryableByName)]
struct PartitionRow {
    #[diesel(sql_type = Integer)]
    partition_id: i32,
}

/// Identity of one membership, copied into blocking closures.
#[derive(Debug, Clone)]
struct Membership {
    topic: String,
    group: String,
    member: Uuid,
    partitions: u32,
    ttl_secs: f64,
}

impl PostgresEventConsumer {
    /// Joins `group` on `topic` as a fresh member.
    #[must_use]
    pub fn new(
        pool: PgPool,
        topic: impl Into<String>,
        group: impl Into<String>,
        partitions: u32,
        settings: ConsumerSettings,
    ) -> Self {
        Self {
            pool,
            topic: topic.into(),
            group: group.into(),
            member: Uuid::new_v4(),
            partitions: partitions.max(1),
            settings,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            keeper: CancellationToken::new(),
            keeper_started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    fn membership(&self) -> Membership {
        Membership {
            topic: self.topic.clone(),
            group: self.group.clone(),
            member: self.member,
            partitions: self.partitions,
            ttl_secs: self.settings.lease_ttl.as_secs_f64(),
        }
    }

    fn in_flight_snapshot(&self) -> HashSet<PartitionId> {
        snapshot(&self.in_flight)
    }

    /// Starts the lease keeper on the first delivery; it lives until the
    /// consumer is closed or dropped.
    fn ensure_keeper(&self) {
        if self.keeper_started.swap(true, Ordering::AcqRel) {
            return;
        }
        let keeper = LeaseKeeper {
            pool: self.pool.clone(),
            membership: self.membership(),
            in_flight: Arc::clone(&self.in_flight),
            interval: self.settings.renew_interval(),
            stop: self.keeper.clone(),
        };
        tokio::spawn(keeper.run());
    }

    fn mark_in_flight(&self, partition: PartitionId, busy: bool) {
        if let Ok(mut set) = self.in_flight.lock() {
            if busy {
                set.insert(partition);
            } else {
                set.remove(&partition);
            }
        }
    }

    async fn poll_once(&self) -> BrokerResult<Option<Delivery>> {
        let membership = self.membership();
        let busy = self.in_flight_snapshot();
        let pool = self.pool.clone();
        let next = run_blocking_with(
            move || {
                let mut conn = get_conn_with(&pool, BrokerError::unavailable)?;
                let owned = rebalance(&mut conn, &membership, &busy)?;
                fetch_next(&mut conn, &membership, &owned, &busy)
            },
            BrokerError::unavailable,
        )
        .await?;

        let Some(row) = next else {
            return Ok(None);
        };
        let partition = PartitionId::try_from(row.partition_id).map_err(BrokerError::unavailable)?;
        let offset = u64::try_from(row.message_offset).map_err(BrokerError::unavailable)?;
        let headers: BTreeMap<String, String> =
            serde_json::from_value(row.headers).unwrap_or_default();
        self.mark_in_flight(partition, true);
        self.ensure_keeper();
        Ok(Some(Delivery::new(
            partition,
            offset,
            decode_event(row.payload, &headers),
        )))
    }
}

fn snapshot(in_flight: &InFlight) -> HashSet<PartitionId> {
    in_flight
        .lock()
        .map(|set| set.clone())
        .unwrap_or_default()
}

/// Renews heartbeat and leases while this member holds unacknowledged
/// deliveries.
struct LeaseKeeper {
    pool: PgPool,
    membership: Membership,
    in_flight: InFlight,
    interval: Duration,
    stop: CancellationToken,
}

impl LeaseKeeper {
    async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                () = self.stop.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let held = snapshot(&self.in_flight);
            if held.is_empty() {
                continue;
            }
            let membership = self.membership.clone();
            let pool = self.pool.clone();
            let renewed = run_blocking_with(
                move || {
                    let mut conn = get_conn_with(&pool, BrokerError::unavailable)?;
                    heartbeat(&mut conn, &membership)?;
                    renew_leases(&mut conn, &membership)
                },
                BrokerError::unavailable,
            )
            .await;
            match renewed {
                Ok(owned) => {
                    let lost: Vec<PartitionId> =
                        held.into_iter().filter(|p| !owned.contains(p)).collect();
                    if !lost.is_empty() {
                        tracing::warn!(
                            member = %self.membership.member,
                            partitions = ?lost,
                            "lease lost while a delivery was in flight"
                        );
                    }
                }
                Err(err) => tracing::warn!(
                    member = %self.membership.member,
                    error = %err,
                    "lease renewal failed"
                ),
            }
        }
    }
}

fn query_err(err: diesel::result::Error) -> BrokerError {
    BrokerError::unavailable(err)
}

/// Heartbeats, prunes dead members and adjusts this member's leases to its
/// fair share. Returns the partitions held afterwards.
fn rebalance(
    conn: &mut PgConnection,
    m: &Membership,
    busy: &HashSet<PartitionId>,
) -> BrokerResult<Vec<PartitionId>> {
    heartbeat(conn, m)?;

    diesel::sql_query(
        "DELETE FROM broker_members \
         WHERE group_id = $1 AND topic = $2 \
           AND heartbeat_at < now() - make_interval(secs => $3)",
    )
    .bind::<Text, _>(&m.group)
    .bind::<Text, _>(&m.topic)
    .bind::<Double, _>(m.ttl_secs)
    .execute(conn)
    .map_err(query_err)?;

    let live_members = diesel::sql_query(
        "SELECT COUNT(*) AS count FROM broker_members WHERE group_id = $1 AND topic = $2",
    )
    .bind::<Text, _>(&m.group)
    .bind::<Text, _>(&m.topic)
    .get_result::<CountRow>(conn)
    .map_err(query_err)?
    .count;
    let live = u32::try_from(live_members.max(1)).unwrap_or(u32::MAX);
    let share = usize::try_from(m.partitions.div_ceil(live)).unwrap_or(usize::MAX);

    let mut owned = renew_leases(conn, m)?;
    owned.sort_unstable();

    while owned.len() > share {
        // Release from the top, skipping partitions with unacked work.
        let Some(position) = owned.iter().rposition(|p| !busy.contains(p)) else {
            break;
        };
        let partition = owned.remove(position);
        diesel::sql_query(
            "DELETE FROM broker_leases \
             WHERE group_id = $1 AND topic = $2 AND partition_id = $3 AND member_id = $4",
        )
        .bind::<Text, _>(&m.group)
        .bind::<Text, _>(&m.topic)
        .bind::<Integer, _>(partition_as_i32(partition)?)
        .bind::<SqlUuid, _>(m.member)
        .execute(conn)
        .map_err(query_err)?;
    }

    if owned.len() < share {
        let start = m
            .member
            .as_u128()
            .checked_rem(u128::from(m.partitions))
            .and_then(|offset| u32::try_from(offset).ok())
            .unwrap_or(0);
        for step in 0..m.partitions {
            if owned.len() >= share {
                break;
            }
            let partition = start
                .wrapping_add(step)
                .checked_rem(m.partitions)
                .unwrap_or(0);
            if owned.contains(&partition) {
                continue;
            }
            let claimed = diesel::sql_query(
                "INSERT INTO broker_leases (group_id, topic, partition_id, member_id, expires_at) \
                 VALUES ($1, $2, $3, $4, now() + make_interval(secs => $5)) \
                 ON CONFLICT (group_id, topic, partition_id) DO UPDATE \
                   SET member_id = EXCLUDED.member_id, expires_at = EXCLUDED.expires_at \
                   WHERE broker_leases.member_id = EXCLUDED.member_id \
                      OR broker_leases.expires_at < now()",
            )
            .bind::<Text, _>(&m.group)
            .bind::<Text, _>(&m.topic)
            .bind::<Integer, _>(partition_as_i32(partition)?)
            .bind::<SqlUuid, _>(m.member)
            .bind::<Double, _>(m.ttl_secs)
            .execute(conn)
            .map_err(query_err)?;
            if claimed == 1 {
                owned.push(partition);
            }
        }
    }

    Ok(owned)
}

fn heartbeat(conn: &mut PgConnection, m: &Membership) -> BrokerResult<()> {
    diesel::sql_query(
        "INSERT INTO broker_members (group_id, topic, member_id, heartbeat_at) \
         VALUES ($1, $2, $3, now()) \
         ON CONFLICT (group_id, topic, member_id) DO UPDATE SET heartbeat_at = now()",
    )
    .bind::<Text, _>(&m.group)
    .bind::<Text, _>(&m.topic)
    .bind::<SqlUuid, _>(m.member)
    .execute(conn)
    .map_err(query_err)?;
    Ok(())
}

/// Extends every lease this member holds. Returns the renewed partitions.
fn renew_leases(conn: &mut PgConnection, m: &Membership) -> BrokerResult<Vec<PartitionId>> {
    Ok(diesel::sql_query(
        "UPDATE broker_leases SET expires_at = now() + make_interval(secs => $4) \
         WHERE group_id = $1 AND topic = $2 AND member_id = $3 \
         RETURNING partition_id",
    )
    .bind::<Text, _>(&m.group)
    .bind::<Text, _>(&m.topic)
    .bind::<SqlUuid, _>(m.member)
    .bind::<Double, _>(m.ttl_secs)
    .load::<PartitionRow>(conn)
    .map_err(query_err)?
    .into_iter()
    .filter_map(|row| PartitionId::try_from(row.partition_id).ok())
    .collect())
}

/// Reads the oldest uncommitted message from an owned, idle partition.
fn fetch_next(
    conn: &mut PgConnection,
    m: &Membership,
    owned: &[PartitionId],
    busy: &HashSet<PartitionId>,
) -> BrokerResult<Option<MessageRow>> {
    for partition in owned.iter().filter(|p| !busy.contains(p)) {
        let row = diesel::sql_query(
            "SELECT message_offset, partition_id, payload, headers FROM broker_messages \
             WHERE topic = $1 AND partition_id = $2 \
               AND message_offset > COALESCE(( \
                 SELECT committed_offset FROM broker_offsets \
                 WHERE group_id = $3 AND topic = $1 AND partition_id = $2), 0) \
             ORDER BY message_offset \
             LIMIT 1",
        )
        .bind::<Text, _>(&m.topic)
        .bind::<Integer, _>(partition_as_i32(*partition)?)
        .bind::<Text, _>(&m.group)
        .get_result::<MessageRow>(conn)
        .optional()
        .map_err(query_err)?;
        if row.is_some() {
            return Ok(row);
        }
    }
    Ok(None)
}

fn partition_as_i32(partition: PartitionId) -> BrokerResult<i32> {
    i32::try_from(partition).map_err(BrokerError::unavailable)
}

#[async_trait]
impl EventConsumer for PostgresEventConsumer {
    async fn receive(&self, wait: Duration) -> BrokerResult<Option<Delivery>> {
        let deadline = Instant::now() + wait;
        loop {
            if self.closed.load(Ordering::Acquire) {
                return Err(BrokerError::Closed);
            }
            if let Some(delivery) = self.poll_once().await? {
                return Ok(Some(delivery));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(self.settings.poll_interval.min(deadline - now)).await;
        }
    }

    async fn ack(&self, delivery: &Delivery) -> BrokerResult<()> {
        let partition = delivery.partition();
        let membership = self.membership();
        let offset = i64::try_from(delivery.offset()).map_err(BrokerError::unavailable)?;
        let partition_id = partition_as_i32(partition)?;
        let pool = self.pool.clone();
        let committed = run_blocking_with(
            move || {
                let mut conn = get_conn_with(&pool, BrokerError::unavailable)?;
                diesel::sql_query(
                    "INSERT INTO broker_offsets (group_id, topic, partition_id, committed_offset) \
                     SELECT $1, $2, $3, $4 \
                     WHERE EXISTS ( \
                       SELECT 1 FROM broker_leases \
                       WHERE group_id = $1 AND topic = $2 AND partition_id = $3 AND member_id = $5) \
                     ON CONFLICT (group_id, topic, partition_id) DO UPDATE \
                       SET committed_offset = GREATEST(broker_offsets.committed_offset, EXCLUDED.committed_offset)",
                )
                .bind::<Text, _>(&membership.group)
                .bind::<Text, _>(&membership.topic)
                .bind::<Integer, _>(partition_id)
                .bind::<BigInt, _>(offset)
                .bind::<SqlUuid, _>(membership.member)
                .execute(&mut conn)
                .map_err(query_err)
            },
            BrokerError::unavailable,
        )
        .await;
        self.mark_in_flight(partition, false);
        match committed? {
            0 => Err(BrokerError::Revoked { partition }),
            _ => Ok(()),
        }
    }

    async fn close(&self) -> BrokerResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.keeper.cancel();
        let membership = self.membership();
        let pool = self.pool.clone();
        run_blocking_with(
            move || {
                let mut conn = get_conn_with(&pool, BrokerError::unavailable)?;
                diesel::sql_query(
                    "DELETE FROM broker_leases WHERE group_id = $1 AND topic = $2 AND member_id = $3",
                )
                .bind::<Text, _>(&membership.group)
                .bind::<Text, _>(&membership.topic)
                .bind::<SqlUuid, _>(membership.member)
                .execute(&mut conn)
                .map_err(query_err)?;
                diesel::sql_query(
                    "DELETE FROM broker_members WHERE group_id = $1 AND topic = $2 AND member_id = $3",
                )
                .bind::<Text, _>(&membership.group)
                .bind::<Text, _>(&membership.topic)
                .bind::<SqlUuid, _>(membership.member)
                .execute(&mut conn)
                .map_err(query_err)?;
                Ok(())
            },
            BrokerError::unavailable,
        )
        .await
    }
}

impl Drop for PostgresEventConsumer {
    fn drop(&mut self) {
        self.keeper.cancel();
    }
}
