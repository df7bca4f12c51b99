//! Request envelope sent on the `requests` channel.
//!
//! Field names serialize in camelCase. `entityId` and `payload` are written as
//! explicit `null` when absent; decoding (see [`crate::codec`]) also accepts
//! them missing.

use serde::Serialize;

use crate::correlation::CorrelationId;
use crate::operation::Operation;

/// Free-form operation fields: a shallow mapping of field name to value.
pub type Fields = serde_json::Map<String, serde_json::Value>;

/// The wire unit a caller publishes to ask the responder for work.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub correlation_id: CorrelationId,
    pub operation: Operation,
    pub entity_id: Option<i64>,
    pub payload: Option<Fields>,
}

/// Violation of the entity-id rule for an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum InvalidEnvelope {
    #[error("{operation} requires an entityId")]
    MissingEntityId { operation: Operation },
    #[error("{operation} must not carry an entityId")]
    UnexpectedEntityId { operation: Operation },
}

impl Envelope {
    /// Builds an envelope around an existing correlation id.
    #[must_use]
    pub fn new(
        correlation_id: CorrelationId,
        operation: Operation,
        entity_id: Option<i64>,
        payload: Option<Fields>,
    ) -> Self {
        Self {
            correlation_id,
            operation,
            entity_id,
            payload,
        }
    }

    /// Builds an envelope with a freshly generated correlation id.
    #[must_use]
    pub fn request(operation: Operation, entity_id: Option<i64>, payload: Option<Fields>) -> Self {
        Self::new(CorrelationId::generate(), operation, entity_id, payload)
    }

    /// Checks that `entity_id` is present exactly when the operation needs one.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidEnvelope`] naming the operation whose rule is broken.
    pub fn validate(&self) -> Result<(), InvalidEnvelope> {
        let operation = self.operation;
        match (operation.requires_entity_id(), self.entity_id) {
            (true, None) => Err(InvalidEnvelope::MissingEntityId { operation }),
            (false, Some(_)) => Err(InvalidEnvelope::UnexpectedEntityId { operation }),
            _ => Ok(()),
        }
    }
}
