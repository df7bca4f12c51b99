//! Reply envelope sent on the `replies` channel.

use serde::{Deserialize, Serialize};

use crate::correlation::CorrelationId;

/// Outcome kind carried by a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReplyStatus {
    /// The domain operation succeeded; `payload` holds its result.
    Ok,
    /// The addressed entity does not exist.
    NotFound,
    /// The request was decodable but its fields were rejected.
    InvalidRequest,
    /// The responder does not implement the requested operation.
    UnsupportedOperation,
    /// The domain operation failed or timed out.
    DomainError,
}

impl ReplyStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ReplyStatus::Ok => "OK",
            ReplyStatus::NotFound => "NOT_FOUND",
            ReplyStatus::InvalidRequest => "INVALID_REQUEST",
            ReplyStatus::UnsupportedOperation => "UNSUPPORTED_OPERATION",
            ReplyStatus::DomainError => "DOMAIN_ERROR",
        }
    }
}

impl std::fmt::Display for ReplyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The wire unit a responder publishes in answer to a request.
///
/// `payload` is the opaque domain result and is never inspected by the
/// bridge; `error` carries a human-readable cause for non-`OK` statuses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyEnvelope {
    pub correlation_id: CorrelationId,
    pub status: ReplyStatus,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ReplyEnvelope {
    /// Successful reply carrying the domain result.
    #[must_use]
    pub fn ok(correlation_id: CorrelationId, result: serde_json::Value) -> Self {
        Self {
            correlation_id,
            status: ReplyStatus::Ok,
            payload: Some(result),
            error: None,
        }
    }

    /// Failed reply with the given status and cause.
    #[must_use]
    pub fn failure(
        correlation_id: CorrelationId,
        status: ReplyStatus,
        error: impl Into<String>,
    ) -> Self {
        Self {
            correlation_id,
            status,
            payload: None,
            error: Some(error.into()),
        }
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status == ReplyStatus::Ok
    }
}
