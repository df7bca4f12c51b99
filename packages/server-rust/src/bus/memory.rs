//! In-memory [`MessageBus`] with partitioned logs and consumer-group offsets.
//!
//! Each topic is created lazily with a fixed number of partitions. A message
//! lands in the partition selected by a stable hash of its key, so ordering is
//! preserved per key but not across partitions. Committed offsets are tracked
//! per (group, topic, partition); a consumer starts reading at its group's
//! committed offset, which makes unacknowledged messages visible again after
//! the previous owner is dropped.
//!
//! Records below the lowest committed offset of every group known on a
//! partition are compacted away. A group holding a live claim without a
//! commit pins the partition at offset 0; a group that joins later starts at
//! the oldest retained record.

use std::collections::VecDeque;
use std::hash::BuildHasher;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::Notify;
use tracing::{debug, info};

use super::{BusError, BusMessage, Delivery, MessageBus, PartitionConsumer};

type GroupPartition = (String, String, u32);

struct StoredRecord {
    key: String,
    payload: Arc<[u8]>,
}

/// Retained records of one partition. `base` is the offset of the first one.
#[derive(Default)]
struct PartitionLog {
    base: u64,
    records: VecDeque<Arc<StoredRecord>>,
}

impl PartitionLog {
    fn end(&self) -> u64 {
        self.base + self.records.len() as u64
    }
}

#[derive(Default)]
struct Partition {
    log: RwLock<PartitionLog>,
    appended: Notify,
}

impl Partition {
    /// Record at `offset`, or at the oldest retained offset if `offset` was
    /// compacted away.
    fn read_at(&self, offset: u64) -> Option<(u64, Arc<StoredRecord>)> {
        let log = self.log.read();
        let offset = offset.max(log.base);
        let index = usize::try_from(offset - log.base).ok()?;
        log.records.get(index).map(|r| (offset, Arc::clone(r)))
    }

    /// Drops every record below `floor`. Returns how many were dropped.
    fn compact_below(&self, floor: u64) -> usize {
        let mut log = self.log.write();
        let mut dropped = 0;
        while log.base < floor && log.records.pop_front().is_some() {
            log.base += 1;
            dropped += 1;
        }
        dropped
    }
}

struct Topic {
    partitions: Vec<Partition>,
}

struct BusInner {
    partition_count: u32,
    topics: DashMap<String, Arc<Topic>>,
    committed: DashMap<GroupPartition, u64>,
    claims: DashMap<GroupPartition, ()>,
    closed: AtomicBool,
    closed_notify: Notify,
    hasher: ahash::RandomState,
}

impl BusInner {
    fn topic(&self, name: &str) -> Arc<Topic> {
        self.topics
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(Topic {
                    partitions: (0..self.partition_count).map(|_| Partition::default()).collect(),
                })
            })
            .value()
            .clone()
    }

    fn partition_for(&self, key: &str) -> u32 {
        let hash = self.hasher.hash_one(key);
        // Lossless: the remainder is below partition_count, which is a u32.
        #[allow(clippy::cast_possible_truncation)]
        let partition = (hash % u64::from(self.partition_count)) as u32;
        partition
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Lowest offset still needed on one partition: the minimum committed
    /// offset over every group that committed there or holds a claim on it.
    fn retention_floor(&self, topic: &str, partition: u32) -> u64 {
        let mut offsets: Vec<u64> = self
            .committed
            .iter()
            .filter(|e| e.key().1 == topic && e.key().2 == partition)
            .map(|e| *e.value())
            .collect();
        let claimed: Vec<GroupPartition> = self
            .claims
            .iter()
            .filter(|e| e.key().1 == topic && e.key().2 == partition)
            .map(|e| e.key().clone())
            .collect();
        offsets.extend(
            claimed
                .iter()
                .map(|claim| self.committed.get(claim).map_or(0, |v| *v)),
        );
        offsets.into_iter().min().unwrap_or(0)
    }
}

/// Process-local partitioned bus. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct InMemoryBus {
    inner: Arc<BusInner>,
}

impl InMemoryBus {
    /// Creates a bus whose topics each have `partition_count` partitions
    /// (at least one).
    #[must_use]
    pub fn new(partition_count: u32) -> Self {
        Self {
            inner: Arc::new(BusInner {
                partition_count: partition_count.max(1),
                topics: DashMap::new(),
                committed: DashMap::new(),
                claims: DashMap::new(),
                closed: AtomicBool::new(false),
                closed_notify: Notify::new(),
                // Fixed seeds keep key -> partition stable for the life of the process.
                hasher: ahash::RandomState::with_seeds(
                    0x5eed_0001,
                    0x5eed_0002,
                    0x5eed_0003,
                    0x5eed_0004,
                ),
            }),
        }
    }

    #[must_use]
    pub fn partition_count(&self) -> u32 {
        self.inner.partition_count
    }

    /// Partition a message with this key is routed to.
    #[must_use]
    pub fn partition_for(&self, key: &str) -> u32 {
        self.inner.partition_for(key)
    }

    /// Total number of messages ever published to `topic`.
    #[must_use]
    pub fn message_count(&self, topic: &str) -> u64 {
        self.inner
            .topics
            .get(topic)
            .map_or(0, |t| t.partitions.iter().map(|p| p.log.read().end()).sum())
    }

    /// Messages of `topic` still held in memory after compaction.
    #[must_use]
    pub fn retained_count(&self, topic: &str) -> usize {
        self.inner.topics.get(topic).map_or(0, |t| {
            t.partitions.iter().map(|p| p.log.read().records.len()).sum()
        })
    }

    /// Committed offset of `group` on one partition, if it ever acknowledged.
    #[must_use]
    pub fn committed_offset(&self, topic: &str, group: &str, partition: u32) -> Option<u64> {
        self.inner
            .committed
            .get(&(group.to_string(), topic.to_string(), partition))
            .map(|v| *v)
    }

    /// Stops the bus: later publishes fail with [`BusError::Unavailable`] and
    /// every consumer's `recv()` returns `None`.
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            info!("in-memory bus closed");
            self.inner.closed_notify.notify_waiters();
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<Delivery, BusError> {
        if self.inner.is_closed() {
            return Err(BusError::Unavailable("bus is closed".to_string()));
        }

        let partition = self.inner.partition_for(key);
        let topic_ref = self.inner.topic(topic);
        let slot = &topic_ref.partitions[partition as usize];

        let offset = {
            let mut log = slot.log.write();
            let offset = log.end();
            log.records.push_back(Arc::new(StoredRecord {
                key: key.to_string(),
                payload: payload.into(),
            }));
            offset
        };
        slot.appended.notify_waiters();

        debug!(topic, key, partition, offset, "published");
        Ok(Delivery { partition, offset })
    }

    async fn subscribe(
        &self,
        topic: &str,
        group: &str,
    ) -> Result<Vec<Box<dyn PartitionConsumer>>, BusError> {
        if self.inner.is_closed() {
            return Err(BusError::Unavailable("bus is closed".to_string()));
        }

        let topic_ref = self.inner.topic(topic);
        let mut consumers: Vec<Box<dyn PartitionConsumer>> = Vec::new();

        for partition in 0..self.inner.partition_count {
            let claim = (group.to_string(), topic.to_string(), partition);
            if let Entry::Vacant(vacant) = self.inner.claims.entry(claim.clone()) {
                vacant.insert(());
                let position = self.inner.committed.get(&claim).map_or(0, |v| *v);
                consumers.push(Box::new(InMemoryConsumer {
                    inner: Arc::clone(&self.inner),
                    topic: Arc::clone(&topic_ref),
                    claim,
                    position,
                }));
            }
        }

        if consumers.is_empty() {
            return Err(BusError::NoPartitionsAvailable {
                topic: topic.to_string(),
                group: group.to_string(),
            });
        }

        info!(topic, group, partitions = consumers.len(), "subscribed");
        Ok(consumers)
    }
}

/// Consumer over one claimed partition. Releases the claim on drop.
struct InMemoryConsumer {
    inner: Arc<BusInner>,
    topic: Arc<Topic>,
    claim: GroupPartition,
    position: u64,
}

#[async_trait]
impl PartitionConsumer for InMemoryConsumer {
    fn partition(&self) -> u32 {
        self.claim.2
    }

    async fn recv(&mut self) -> Option<BusMessage> {
        let inner = Arc::clone(&self.inner);
        let topic = Arc::clone(&self.topic);
        let slot = &topic.partitions[self.claim.2 as usize];

        loop {
            // Register for wakeups before checking, so an append or close
            // between the check and the await is not missed.
            let appended = slot.appended.notified();
            let closed = inner.closed_notify.notified();

            if inner.is_closed() {
                return None;
            }

            if let Some((offset, record)) = slot.read_at(self.position) {
                self.position = offset + 1;
                return Some(BusMessage {
                    topic: self.claim.1.clone(),
                    partition: self.claim.2,
                    offset,
                    key: record.key.clone(),
                    payload: Arc::clone(&record.payload),
                });
            }

            tokio::select! {
                () = appended => {}
                () = closed => {}
            }
        }
    }

    async fn ack(&mut self, message: &BusMessage) -> Result<(), BusError> {
        let next = message.offset + 1;
        self.inner
            .committed
            .entry(self.claim.clone())
            .and_modify(|committed| *committed = (*committed).max(next))
            .or_insert(next);

        let (_, topic, partition) = &self.claim;
        let floor = self.inner.retention_floor(topic, *partition);
        let dropped = self.topic.partitions[*partition as usize].compact_below(floor);
        if dropped > 0 {
            debug!(topic = %topic, partition, floor, dropped, "compacted partition log");
        }
        Ok(())
    }
}

impl Drop for InMemoryConsumer {
    fn drop(&mut self) {
        self.inner.claims.remove(&self.claim);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    async fn recv_within(consumer: &mut Box<dyn PartitionConsumer>) -> Option<BusMessage> {
        tokio::time::timeout(Duration::from_secs(1), consumer.recv())
            .await
            .expect("recv timed out")
    }

    #[tokio::test]
    async fn same_key_lands_in_same_partition_in_order() {
        let bus = InMemoryBus::new(4);
        let a = bus.publish("t", "key-1", b"one".to_vec()).await.unwrap();
        let b = bus.publish("t", "key-1", b"two".to_vec()).await.unwrap();
        assert_eq!(a.partition, b.partition);
        assert_eq!(b.offset, a.offset + 1);
        assert_eq!(bus.message_count("t"), 2);
    }

    #[tokio::test]
    async fn consumer_receives_published_messages() {
        let bus = InMemoryBus::new(1);
        let mut consumers = bus.subscribe("t", "g").await.unwrap();
        assert_eq!(consumers.len(), 1);

        bus.publish("t", "k", b"hello".to_vec()).await.unwrap();
        let msg = recv_within(&mut consumers[0]).await.unwrap();
        assert_eq!(&*msg.payload, b"hello");
        assert_eq!(msg.key, "k");
        assert_eq!(msg.offset, 0);
    }

    #[tokio::test]
    async fn recv_waits_for_later_publish() {
        let bus = InMemoryBus::new(1);
        let mut consumers = bus.subscribe("t", "g").await.unwrap();
        let mut consumer = consumers.pop().unwrap();

        let publisher = bus.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            publisher.publish("t", "k", b"late".to_vec()).await.unwrap();
        });

        let msg = tokio::time::timeout(Duration::from_secs(1), consumer.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&*msg.payload, b"late");
    }

    #[tokio::test]
    async fn group_claims_are_exclusive_until_dropped() {
        let bus = InMemoryBus::new(2);
        let first = bus.subscribe("t", "g").await.unwrap();
        assert_eq!(first.len(), 2);

        let err = bus.subscribe("t", "g").await.err().unwrap();
        assert!(matches!(err, BusError::NoPartitionsAvailable { .. }));

        // A different group sees every partition independently.
        assert_eq!(bus.subscribe("t", "other").await.unwrap().len(), 2);

        drop(first);
        assert_eq!(bus.subscribe("t", "g").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn unacked_message_is_redelivered_to_next_consumer() {
        let bus = InMemoryBus::new(1);
        bus.publish("t", "k", b"m0".to_vec()).await.unwrap();
        bus.publish("t", "k", b"m1".to_vec()).await.unwrap();

        {
            let mut consumers = bus.subscribe("t", "g").await.unwrap();
            let consumer = &mut consumers[0];
            let m0 = recv_within(consumer).await.unwrap();
            consumer.ack(&m0).await.unwrap();
            let m1 = recv_within(consumer).await.unwrap();
            assert_eq!(&*m1.payload, b"m1");
            // m1 is dropped without ack.
        }

        assert_eq!(bus.committed_offset("t", "g", 0), Some(1));

        let mut consumers = bus.subscribe("t", "g").await.unwrap();
        let again = recv_within(&mut consumers[0]).await.unwrap();
        assert_eq!(&*again.payload, b"m1");
        assert_eq!(again.offset, 1);
    }

    #[tokio::test]
    async fn acked_records_are_compacted() {
        let bus = InMemoryBus::new(1);
        for i in 0..3 {
            bus.publish("t", "k", vec![i]).await.unwrap();
        }

        let mut consumers = bus.subscribe("t", "g").await.unwrap();
        let consumer = &mut consumers[0];
        for _ in 0..2 {
            let msg = recv_within(consumer).await.unwrap();
            consumer.ack(&msg).await.unwrap();
        }

        assert_eq!(bus.retained_count("t"), 1);
        assert_eq!(bus.message_count("t"), 3);

        // Offsets keep counting from where the log left off.
        let next = bus.publish("t", "k", vec![3]).await.unwrap();
        assert_eq!(next.offset, 3);
        let msg = recv_within(consumer).await.unwrap();
        assert_eq!(msg.offset, 2);
    }

    #[tokio::test]
    async fn claimed_group_without_commit_pins_the_log() {
        let bus = InMemoryBus::new(1);
        let mut slow = bus.subscribe("t", "slow").await.unwrap();
        let mut fast = bus.subscribe("t", "fast").await.unwrap();
        bus.publish("t", "k", b"a".to_vec()).await.unwrap();
        bus.publish("t", "k", b"b".to_vec()).await.unwrap();

        for _ in 0..2 {
            let msg = recv_within(&mut fast[0]).await.unwrap();
            fast[0].ack(&msg).await.unwrap();
        }
        assert_eq!(bus.retained_count("t"), 2);

        let first = recv_within(&mut slow[0]).await.unwrap();
        assert_eq!(&*first.payload, b"a");
        slow[0].ack(&first).await.unwrap();
        assert_eq!(bus.retained_count("t"), 1);

        // A group joining after compaction starts at the oldest retained record.
        let mut late = bus.subscribe("t", "late").await.unwrap();
        let msg = recv_within(&mut late[0]).await.unwrap();
        assert_eq!(msg.offset, 1);
        assert_eq!(&*msg.payload, b"b");
    }

    #[tokio::test]
    async fn close_fails_publish_and_ends_consumers() {
        let bus = InMemoryBus::new(1);
        let mut consumers = bus.subscribe("t", "g").await.unwrap();
        let mut consumer = consumers.pop().unwrap();

        let waiter = tokio::spawn(async move { consumer.recv().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        bus.close();

        assert!(waiter.await.unwrap().is_none());
        let err = bus.publish("t", "k", vec![]).await.unwrap_err();
        assert!(matches!(err, BusError::Unavailable(_)));
        assert!(bus.is_closed());
    }

    #[test]
    fn partition_for_is_stable_and_in_range() {
        let bus = InMemoryBus::new(8);
        for i in 0..100 {
            let key = format!("key-{i}");
            let p = bus.partition_for(&key);
            assert!(p < 8);
            assert_eq!(p, bus.partition_for(&key));
        }
    }
}
