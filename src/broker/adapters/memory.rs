//! In-process broker with partitions, consumer groups and redelivery.
//!
//! Mirrors the client-observable contract of a partitioned log: events are
//! appended to the partition chosen by their key, each consumer group keeps
//! its own committed offsets, and partitions are spread across the live
//! members of a group. A member that leaves (or is dropped) without
//! acknowledging loses its in-flight delivery to whoever inherits the
//! partition.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::broker::{
    domain::{Delivery, PartitionId, PublishReceipt, decode_event, encode_event, partition_for},
    ports::{BrokerError, BrokerResult, EventConsumer, EventPublisher},
};
use crate::task::domain::TaskEvent;

#[derive(Debug, Clone)]
struct StoredMessage {
    payload: serde_json::Value,
    headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct GroupKey {
    topic: String,
    group: String,
}

type MemberId = u64;

#[derive(Debug, Default)]
struct GroupState {
    members: Vec<MemberId>,
    committed: HashMap<PartitionId, u64>,
    in_flight: HashMap<PartitionId, MemberId>,
}

impl GroupState {
    fn assignee(&self, partition: PartitionId) -> Option<MemberId> {
        let count = self.members.len();
        if count == 0 {
            return None;
        }
        let index = usize::try_from(partition).ok()?.checked_rem(count)?;
        self.members.get(index).copied()
    }

    fn leave(&mut self, member: MemberId) {
        self.members.retain(|candidate| *candidate != member);
        self.in_flight.retain(|_, holder| *holder != member);
    }
}

#[derive(Debug)]
struct BrokerState {
    available: bool,
    topics: HashMap<String, Vec<Vec<StoredMessage>>>,
    groups: HashMap<GroupKey, GroupState>,
}

#[derive(Debug)]
struct BrokerInner {
    partitions: u32,
    state: Mutex<BrokerState>,
    notify: Notify,
    next_member: AtomicU64,
}

/// Shared in-memory broker. Cloning yields another handle to the same log.
#[derive(Debug, Clone)]
pub struct InMemoryBroker {
    inner: Arc<BrokerInner>,
}

impl InMemoryBroker {
    /// Creates a broker whose topics have `partitions` partitions.
    #[must_use]
    pub fn new(partitions: u32) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                partitions: partitions.max(1),
                state: Mutex::new(BrokerState {
                    available: true,
                    topics: HashMap::new(),
                    groups: HashMap::new(),
                }),
                notify: Notify::new(),
                next_member: AtomicU64::new(1),
            }),
        }
    }

    /// Returns the partition count per topic.
    #[must_use]
    pub fn partitions(&self) -> u32 {
        self.inner.partitions
    }

    /// Returns a producer for `topic`.
    #[must_use]
    pub fn publisher(&self, topic: impl Into<String>) -> InMemoryPublisher {
        InMemoryPublisher {
            broker: self.clone(),
            topic: topic.into(),
        }
    }

    /// Joins `group` on `topic` as a new member.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Unavailable`] if the broker state is poisoned.
    pub fn consumer(
        &self,
        topic: impl Into<String>,
        group: impl Into<String>,
    ) -> BrokerResult<InMemoryConsumer> {
        let key = GroupKey {
            topic: topic.into(),
            group: group.into(),
        };
        let member = self.inner.next_member.fetch_add(1, Ordering::Relaxed);
        {
            let mut state = self.lock()?;
            state.groups.entry(key.clone()).or_default().members.push(member);
        }
        self.inner.notify.notify_waiters();
        Ok(InMemoryConsumer {
            broker: self.clone(),
            key,
            member,
            closed: AtomicBool::new(false),
            scan_start: AtomicU32::new(0),
        })
    }

    /// Simulates a broker outage (`false`) or recovery (`true`).
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Unavailable`] if the broker state is poisoned.
    pub fn set_available(&self, available: bool) -> BrokerResult<()> {
        self.lock()?.available = available;
        self.inner.notify.notify_waiters();
        Ok(())
    }

    /// Appends an arbitrary payload to a partition, bypassing the codec.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Unavailable`] if the broker state is poisoned.
    pub fn publish_raw(
        &self,
        topic: &str,
        partition: PartitionId,
        payload: serde_json::Value,
    ) -> BrokerResult<PublishReceipt> {
        let receipt = self.append(
            topic,
            partition.checked_rem(self.inner.partitions).unwrap_or(0),
            StoredMessage {
                payload,
                headers: BTreeMap::new(),
            },
        )?;
        self.inner.notify.notify_waiters();
        Ok(receipt)
    }

    /// Decodes every well-formed event appended to `topic`, in partition
    /// order.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Unavailable`] if the broker state is poisoned.
    pub fn published_events(&self, topic: &str) -> BrokerResult<Vec<TaskEvent>> {
        let state = self.lock()?;
        Ok(state
            .topics
            .get(topic)
            .into_iter()
            .flatten()
            .flatten()
            .filter_map(|message| decode_event(message.payload.clone(), &message.headers).ok())
            .collect())
    }

    /// Returns the next offset `group` will read from `partition`.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Unavailable`] if the broker state is poisoned.
    pub fn committed_offset(
        &self,
        topic: &str,
        group: &str,
        partition: PartitionId,
    ) -> BrokerResult<u64> {
        let state = self.lock()?;
        let key = GroupKey {
            topic: topic.to_owned(),
            group: group.to_owned(),
        };
        Ok(state
            .groups
            .get(&key)
            .and_then(|group_state| group_state.committed.get(&partition).copied())
            .unwrap_or(0))
    }

    fn lock(&self) -> BrokerResult<MutexGuard<'_, BrokerState>> {
        self.inner
            .state
            .lock()
            .map_err(|err| BrokerError::unavailable(std::io::Error::other(err.to_string())))
    }

    fn append(
        &self,
        topic: &str,
        partition: PartitionId,
        message: StoredMessage,
    ) -> BrokerResult<PublishReceipt> {
        let partitions = self.inner.partitions;
        let mut state = self.lock()?;
        if !state.available {
            return Err(unavailable());
        }
        let log = state
            .topics
            .entry(topic.to_owned())
            .or_insert_with(|| (0..partitions).map(|_| Vec::new()).collect());
        let index = usize::try_from(partition).map_err(BrokerError::unavailable)?;
        let entries = log
            .get_mut(index)
            .ok_or_else(|| BrokerError::unavailable(std::io::Error::other("unknown partition")))?;
        let offset = u64::try_from(entries.len()).map_err(BrokerError::unavailable)?;
        entries.push(message);
        Ok(PublishReceipt { partition, offset })
    }
}

fn unavailable() -> BrokerError {
    BrokerError::unavailable(std::io::Error::other("in-memory broker marked unavailable"))
}

/// Producer handle bound to one topic.
#[derive(Debug, Clone)]
pub struct InMemoryPublisher {
    broker: InMemoryBroker,
    topic: String,
}

#[async_trait]
impl EventPublisher for InMemoryPublisher {
    async fn publish(&self, event: &TaskEvent) -> BrokerResult<PublishReceipt> {
        let encoded = encode_event(event)?;
        let partition = partition_for(event.task_id(), self.broker.inner.partitions);
        let receipt = self.broker.append(
            &self.topic,
            partition,
            StoredMessage {
                payload: encoded.payload,
                headers: encoded.headers,
            },
        )?;
        self.broker.inner.notify.notify_waiters();
        Ok(receipt)
    }
}

/// Consumer-group member bound to one topic.
///
/// Dropping the handle leaves the group, as a crashed process would.
#[derive(Debug)]
pub struct InMemoryConsumer {
    broker: InMemoryBroker,
    key: GroupKey,
    member: MemberId,
    closed: AtomicBool,
    scan_start: AtomicU32,
}

impl InMemoryConsumer {
    fn try_claim(&self) -> BrokerResult<Option<Delivery>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BrokerError::Closed);
        }
        let partitions = self.broker.inner.partitions;
        let mut guard = self.broker.lock()?;
        if !guard.available {
            return Err(unavailable());
        }
        let state = &mut *guard;
        let Some(group) = state.groups.get_mut(&self.key) else {
            return Err(BrokerError::Closed);
        };
        let Some(log) = state.topics.get(&self.key.topic) else {
            return Ok(None);
        };

        // Rotate the scan origin so one busy partition cannot starve others.
        let start = self.scan_start.fetch_add(1, Ordering::Relaxed);
        for step in 0..partitions {
            let partition = start
                .wrapping_add(step)
                .checked_rem(partitions)
                .unwrap_or(0);
            if group.assignee(partition) != Some(self.member)
                || group.in_flight.contains_key(&partition)
            {
                continue;
            }
            let next = group.committed.get(&partition).copied().unwrap_or(0);
            let message = usize::try_from(partition)
                .ok()
                .and_then(|index| log.get(index))
                .and_then(|entries| entries.get(usize::try_from(next).ok()?));
            if let Some(message) = message {
                group.in_flight.insert(partition, self.member);
                let payload = decode_event(message.payload.clone(), &message.headers);
                return Ok(Some(Delivery::new(partition, next, payload)));
            }
        }
        Ok(None)
    }

    fn leave(&self) {
        if let Ok(mut state) = self.broker.inner.state.lock() {
            if let Some(group) = state.groups.get_mut(&self.key) {
                group.leave(self.member);
            }
        }
        self.broker.inner.notify.notify_waiters();
    }
}

#[async_trait]
impl EventConsumer for InMemoryConsumer {
    async fn receive(&self, wait: Duration) -> BrokerResult<Option<Delivery>> {
        let deadline = Instant::now() + wait;
        loop {
            // Register interest before inspecting state so a publish between
            // the check and the await is not missed.
            let notified = self.broker.inner.notify.notified();
            if let Some(delivery) = self.try_claim()? {
                return Ok(Some(delivery));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> BrokerResult<()> {
        {
            let mut state = self.broker.lock()?;
            let group = state
                .groups
                .get_mut(&self.key)
                .ok_or(BrokerError::Closed)?;
            if group.in_flight.get(&delivery.partition()) != Some(&self.member) {
                return Err(BrokerError::Revoked {
                    partition: delivery.partition(),
                });
            }
            group.in_flight.remove(&delivery.partition());
            group
                .committed
                .insert(delivery.partition(), delivery.offset() + 1);
        }
        self.broker.inner.notify.notify_waiters();
        Ok(())
    }

    async fn close(&self) -> BrokerResult<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.leave();
        }
        Ok(())
    }
}

impl Drop for InMemoryConsumer {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.leave();
        }
    }
}
