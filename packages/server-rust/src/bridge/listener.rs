//! Reply listener: consumes the reply topic and resolves pending calls.

use std::sync::Arc;

use relay_core::WireFormat;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use super::registry::CorrelationRegistry;
use crate::bus::{BusError, MessageBus, PartitionConsumer};
use crate::service::worker::PartitionWorkers;

pub struct ReplyListener {
    bus: Arc<dyn MessageBus>,
    registry: Arc<CorrelationRegistry>,
    topic: String,
    group: String,
    wire_format: WireFormat,
}

impl ReplyListener {
    #[must_use]
    pub fn new(
        bus: Arc<dyn MessageBus>,
        registry: Arc<CorrelationRegistry>,
        topic: &str,
        group: &str,
        wire_format: WireFormat,
    ) -> Self {
        Self {
            bus,
            registry,
            topic: topic.to_string(),
            group: group.to_string(),
            wire_format,
        }
    }

    /// Subscribes to the reply topic and spawns one loop per claimed
    /// partition. Loops run until `shutdown` flips or the bus closes.
    ///
    /// # Errors
    ///
    /// Returns the bus error if the subscription fails.
    pub async fn start(
        self,
        shutdown: watch::Receiver<bool>,
    ) -> Result<PartitionWorkers, BusError> {
        let consumers = self.bus.subscribe(&self.topic, &self.group).await?;
        let mut workers = PartitionWorkers::new("reply-listener");

        for consumer in consumers {
            let partition = consumer.partition();
            let handle = tokio::spawn(listen(
                consumer,
                Arc::clone(&self.registry),
                self.wire_format,
                shutdown.clone(),
            ));
            workers.push(partition, handle);
        }

        info!(topic = %self.topic, group = %self.group, partitions = workers.len(), "reply listener started");
        Ok(workers)
    }
}

async fn listen(
    mut consumer: Box<dyn PartitionConsumer>,
    registry: Arc<CorrelationRegistry>,
    wire_format: WireFormat,
    mut shutdown: watch::Receiver<bool>,
) {
    let partition = consumer.partition();

    loop {
        if *shutdown.borrow_and_update() {
            break;
        }

        let message = tokio::select! {
            message = consumer.recv() => match message {
                Some(m) => m,
                None => break,
            },
            _ = shutdown.changed() => break,
        };

        match wire_format.decode_reply(&message.payload) {
            Ok(reply) => {
                let id = reply.correlation_id.clone();
                if registry.resolve(&id, reply) {
                    trace!(correlation_id = %id, partition, offset = message.offset, "reply matched");
                }
            }
            Err(e) => warn!(
                partition,
                offset = message.offset,
                correlation_id = ?e.correlation_id,
                error = %e,
                "dropping malformed reply"
            ),
        }

        // Only after the registry saw the reply.
        if let Err(e) = consumer.ack(&message).await {
            warn!(partition, offset = message.offset, error = %e, "reply ack failed");
        }
    }

    debug!(partition, "reply listener loop exited");
}
