//! Publish-subscribe bus abstraction.
//!
//! The bridge only needs two capabilities from a broker:
//! - keyed publish to a topic (the key selects the partition and therefore
//!   the ordering domain)
//! - consumer-group subscription, yielding one [`PartitionConsumer`] per
//!   partition this group member owns, with explicit acknowledgement
//!
//! Delivery is at-least-once: a message that is never acknowledged is
//! redelivered to the next consumer of the same group and partition.

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;

pub use memory::InMemoryBus;

/// A message read from a topic partition.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
    /// Partition/ordering key. The bridge uses the correlation id.
    pub key: String,
    pub payload: Arc<[u8]>,
}

/// Broker confirmation of a successful publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub partition: u32,
    pub offset: u64,
}

/// Errors raised by a bus implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BusError {
    #[error("bus unavailable: {0}")]
    Unavailable(String),
    #[error("every partition of {topic} is already claimed by group {group}")]
    NoPartitionsAvailable { topic: String, group: String },
}

/// Publisher and subscription factory for a message broker.
#[async_trait]
pub trait MessageBus: Send + Sync + 'static {
    /// Appends `payload` to `topic`, routed by `key`.
    async fn publish(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<Delivery, BusError>;

    /// Joins consumer group `group` on `topic`, claiming every partition not
    /// already owned by another live member of the group.
    async fn subscribe(
        &self,
        topic: &str,
        group: &str,
    ) -> Result<Vec<Box<dyn PartitionConsumer>>, BusError>;
}

/// Ordered reader over a single partition, owned by one consumer-group member.
#[async_trait]
pub trait PartitionConsumer: Send {
    /// Partition index this consumer reads.
    fn partition(&self) -> u32;

    /// Waits for the next message. Returns `None` once the bus has closed.
    async fn recv(&mut self) -> Option<BusMessage>;

    /// Commits `message` (and everything before it in the partition) for
    /// this consumer's group.
    async fn ack(&mut self, message: &BusMessage) -> Result<(), BusError>;
}
