//! Responder: consumes the request topic, runs the domain operation, and
//! publishes the reply.
//!
//! Per request: Received -> Dispatched -> Replied -> Acknowledged. The ack
//! happens only after the reply publish is confirmed, so a crash leaves the
//! request to be redelivered. When every publish attempt fails the loop holds
//! the request unacknowledged and handles it again after a capped backoff,
//! until the reply goes out or the node shuts down. Replies
//! are remembered in a bounded cache keyed by correlation id; a redelivered
//! request is answered from the cache without running the domain operation
//! again.

use std::sync::Arc;

use quick_cache::sync::Cache;
use relay_core::{CorrelationId, ReplyEnvelope, ReplyStatus, WireFormat};
use tokio::sync::watch;
use tower::ServiceExt;
use tracing::{debug, error, info, warn};

use super::config::RelayConfig;
use super::middleware::DispatchPipeline;
use super::worker::PartitionWorkers;
use crate::bus::{BusError, BusMessage, MessageBus, PartitionConsumer};

/// What to do with the inbound message once handling finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Ack,
    /// Leave unacknowledged and handle the same message again.
    Hold,
}

/// State shared by every partition loop of one responder.
struct Shared {
    bus: Arc<dyn MessageBus>,
    replies: Cache<CorrelationId, Arc<[u8]>>,
    config: Arc<RelayConfig>,
}

pub struct Responder {
    shared: Arc<Shared>,
    pipeline: DispatchPipeline,
}

impl Responder {
    #[must_use]
    pub fn new(bus: Arc<dyn MessageBus>, pipeline: DispatchPipeline, config: Arc<RelayConfig>) -> Self {
        let capacity = config.reply_cache_capacity.max(1);
        Self {
            shared: Arc::new(Shared {
                bus,
                replies: Cache::new(capacity),
                config,
            }),
            pipeline,
        }
    }

    /// Subscribes to the request topic and spawns one loop per claimed
    /// partition.
    ///
    /// # Errors
    ///
    /// Returns the bus error if the subscription fails.
    pub async fn start(self, shutdown: watch::Receiver<bool>) -> Result<PartitionWorkers, BusError> {
        let shared = Arc::clone(&self.shared);
        let config = &shared.config;
        let consumers = shared
            .bus
            .subscribe(&config.request_topic, &config.responder_group)
            .await?;

        let mut workers = PartitionWorkers::new("responder");
        for consumer in consumers {
            let partition = consumer.partition();
            let worker = PartitionResponder {
                shared: Arc::clone(&shared),
                pipeline: self.pipeline.clone(),
            };
            workers.push(partition, tokio::spawn(worker.run(consumer, shutdown.clone())));
        }

        info!(
            topic = %config.request_topic,
            group = %config.responder_group,
            partitions = workers.len(),
            "responder started"
        );
        Ok(workers)
    }
}

struct PartitionResponder {
    shared: Arc<Shared>,
    pipeline: DispatchPipeline,
}

impl PartitionResponder {
    async fn run(mut self, mut consumer: Box<dyn PartitionConsumer>, mut shutdown: watch::Receiver<bool>) {
        let partition = consumer.partition();
        let mut held: Option<BusMessage> = None;
        let mut hold_rounds: u32 = 0;

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }

            let message = match held.take() {
                Some(m) => m,
                None => tokio::select! {
                    message = consumer.recv() => match message {
                        Some(m) => m,
                        None => break,
                    },
                    _ = shutdown.changed() => break,
                },
            };

            // A dispatch cut short by shutdown stays unacknowledged.
            let disposition = tokio::select! {
                disposition = self.handle(&message) => disposition,
                _ = shutdown.changed() => {
                    debug!(partition, offset = message.offset, "shutdown during dispatch; request left for redelivery");
                    break;
                }
            };

            match disposition {
                Disposition::Ack => {
                    if hold_rounds > 0 {
                        info!(partition, offset = message.offset, hold_rounds, "held reply published; partition resumed");
                        hold_rounds = 0;
                    }
                    if let Err(e) = consumer.ack(&message).await {
                        warn!(partition, offset = message.offset, error = %e, "request ack failed");
                    }
                }
                Disposition::Hold => {
                    hold_rounds = hold_rounds.saturating_add(1);
                    let pause = self.shared.config.reply_publish_backoff(hold_rounds);
                    error!(
                        partition,
                        offset = message.offset,
                        hold_rounds,
                        pause_ms = u64::try_from(pause.as_millis()).unwrap_or(u64::MAX),
                        "reply could not be published; holding request unacknowledged"
                    );
                    tokio::select! {
                        () = tokio::time::sleep(pause) => held = Some(message),
                        _ = shutdown.changed() => break,
                    }
                }
            }
        }

        debug!(partition, "responder loop exited");
    }

    async fn handle(&mut self, message: &BusMessage) -> Disposition {
        let format = self.shared.config.wire_format;

        let envelope = match format.decode_request(&message.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                return match (e.correlation_id.clone(), e.unknown_operation()) {
                    (Some(id), Some(operation)) => {
                        warn!(correlation_id = %id, operation, "unsupported operation");
                        let reply = ReplyEnvelope::failure(
                            id,
                            ReplyStatus::UnsupportedOperation,
                            format!("unsupported operation {operation:?}"),
                        );
                        self.shared.reply(reply).await
                    }
                    _ => {
                        warn!(
                            partition = message.partition,
                            offset = message.offset,
                            correlation_id = ?e.correlation_id,
                            error = %e,
                            "dropping malformed request"
                        );
                        Disposition::Ack
                    }
                };
            }
        };

        let id = envelope.correlation_id.clone();
        if let Some(cached) = self.shared.replies.get(&id) {
            debug!(correlation_id = %id, "redelivered request answered from reply cache");
            return self.shared.publish(&id, &cached).await;
        }

        let reply = match self.pipeline.clone().oneshot(envelope).await {
            Ok(result) => ReplyEnvelope::ok(id, result),
            Err(e) => ReplyEnvelope::failure(id, e.reply_status(), e.to_string()),
        };
        self.shared.reply(reply).await
    }
}

impl Shared {
    /// Encodes, caches, and publishes a freshly produced reply.
    async fn reply(&self, reply: ReplyEnvelope) -> Disposition {
        metrics::counter!("relay_dispatch_total", "status" => reply.status.as_str()).increment(1);

        let format = self.config.wire_format;
        let id = reply.correlation_id.clone();
        let bytes = match format.encode_reply(&reply) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(correlation_id = %id, error = %e, "reply encode failed");
                let fallback =
                    ReplyEnvelope::failure(id.clone(), ReplyStatus::DomainError, e.to_string());
                match format.encode_reply(&fallback) {
                    Ok(bytes) => bytes,
                    Err(_) => return Disposition::Ack,
                }
            }
        };

        let bytes: Arc<[u8]> = bytes.into();
        self.replies.insert(id.clone(), Arc::clone(&bytes));
        self.publish(&id, &bytes).await
    }

    async fn publish(&self, id: &CorrelationId, bytes: &Arc<[u8]>) -> Disposition {
        let config = &self.config;
        let attempts = config.reply_publish_retries.saturating_add(1);

        for attempt in 1..=attempts {
            match self
                .bus
                .publish(&config.reply_topic, id.as_str(), bytes.to_vec())
                .await
            {
                Ok(delivery) => {
                    debug!(
                        correlation_id = %id,
                        partition = delivery.partition,
                        offset = delivery.offset,
                        "reply published"
                    );
                    return Disposition::Ack;
                }
                Err(e) => {
                    warn!(correlation_id = %id, attempt, attempts, error = %e, "reply publish failed");
                    if attempt < attempts {
                        tokio::time::sleep(config.reply_publish_backoff(attempt)).await;
                    }
                }
            }
        }
        Disposition::Hold
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
