//! Caller-side bridge: turns publish + reply into an awaitable call.

use std::sync::Arc;
use std::time::Duration;

use relay_core::{Envelope, Fields, Operation, WireFormat};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::error::{BridgeError, FailureCause};
use super::registry::{CorrelationRegistry, Terminal};
use crate::bus::MessageBus;
use crate::shutdown::ShutdownController;

/// Entry point for transport layers (HTTP handlers, CLIs) that need a
/// synchronous-looking call over the bus. Cheap to clone.
#[derive(Clone)]
pub struct CallerBridge {
    bus: Arc<dyn MessageBus>,
    registry: Arc<CorrelationRegistry>,
    shutdown: Arc<ShutdownController>,
    request_topic: Arc<str>,
    wire_format: WireFormat,
    default_timeout: Duration,
}

impl CallerBridge {
    #[must_use]
    pub fn new(
        bus: Arc<dyn MessageBus>,
        registry: Arc<CorrelationRegistry>,
        shutdown: Arc<ShutdownController>,
        request_topic: &str,
        wire_format: WireFormat,
        default_timeout: Duration,
    ) -> Self {
        Self {
            bus,
            registry,
            shutdown,
            request_topic: Arc::from(request_topic),
            wire_format,
            default_timeout,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<CorrelationRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Publishes `operation` and waits up to `timeout` for its reply.
    ///
    /// Returns the domain result carried by an `OK` reply (`Null` when the
    /// reply has no payload).
    ///
    /// # Errors
    ///
    /// - [`BridgeError::InvalidRequest`] when `entity_id` does not fit the operation
    /// - [`BridgeError::PublishFailed`] when the request could not be encoded or published
    /// - [`BridgeError::Timeout`] when no reply arrived in time
    /// - [`BridgeError::RemoteError`] when the responder answered with a non-`OK` status
    /// - [`BridgeError::ShuttingDown`] when the node is draining
    /// - [`BridgeError::DuplicateCorrelationId`] on an id collision
    pub async fn call(
        &self,
        payload: Option<Fields>,
        operation: Operation,
        entity_id: Option<i64>,
        timeout: Duration,
    ) -> Result<Value, BridgeError> {
        let result = self.call_inner(payload, operation, entity_id, timeout).await;
        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.outcome(),
        };
        metrics::counter!("relay_calls_total", "outcome" => outcome).increment(1);
        result
    }

    /// [`call`](Self::call) with the configured default timeout.
    ///
    /// # Errors
    ///
    /// See [`call`](Self::call).
    pub async fn call_default(
        &self,
        payload: Option<Fields>,
        operation: Operation,
        entity_id: Option<i64>,
    ) -> Result<Value, BridgeError> {
        self.call(payload, operation, entity_id, self.default_timeout)
            .await
    }

    async fn call_inner(
        &self,
        payload: Option<Fields>,
        operation: Operation,
        entity_id: Option<i64>,
        timeout: Duration,
    ) -> Result<Value, BridgeError> {
        if !self.shutdown.health_state().accepts_calls() {
            return Err(BridgeError::ShuttingDown);
        }
        let _in_flight = self.shutdown.in_flight_guard();

        let envelope = Envelope::request(operation, entity_id, payload);
        envelope.validate()?;

        let id = envelope.correlation_id.clone();
        let deadline = Instant::now() + timeout;

        // The entry exists before the request can possibly be seen.
        let handle = self.registry.register(id.clone(), deadline)?;

        match self.wire_format.encode_request(&envelope) {
            Ok(bytes) => {
                let publish = self.bus.publish(&self.request_topic, id.as_str(), bytes);
                match tokio::time::timeout_at(deadline, publish).await {
                    Ok(Ok(delivery)) => debug!(
                        correlation_id = %id,
                        operation = %operation,
                        partition = delivery.partition,
                        offset = delivery.offset,
                        "request published"
                    ),
                    Ok(Err(e)) => {
                        warn!(correlation_id = %id, error = %e, "request publish failed");
                        self.registry.fail(&id, FailureCause::Publish(e.to_string()));
                    }
                    Err(_elapsed) => {
                        self.registry.expire(&id);
                    }
                }
            }
            Err(e) => {
                warn!(correlation_id = %id, error = %e, "request encode failed");
                self.registry.fail(&id, FailureCause::Publish(e.to_string()));
            }
        }

        match handle.wait().await {
            Terminal::Resolved(reply) if reply.is_ok() => Ok(reply.payload.unwrap_or(Value::Null)),
            Terminal::Resolved(reply) => Err(BridgeError::RemoteError {
                status: reply.status,
                message: reply.error.unwrap_or_default(),
            }),
            Terminal::Failed(FailureCause::Publish(detail)) => {
                Err(BridgeError::PublishFailed(detail))
            }
            // The slot only closes unanswered when the registry is torn down.
            Terminal::Failed(FailureCause::Shutdown | FailureCause::Abandoned) => {
                Err(BridgeError::ShuttingDown)
            }
            Terminal::TimedOut => Err(BridgeError::Timeout {
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
