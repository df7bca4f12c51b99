//! Error types surfaced by the caller-side bridge and the registry.

use relay_core::{CorrelationId, InvalidEnvelope, ReplyStatus};

/// Registration failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("correlation id {0} is already registered")]
    DuplicateCorrelationId(CorrelationId),
}

/// Why a pending call was failed rather than resolved or expired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureCause {
    /// Encoding or publishing the request failed.
    Publish(String),
    /// The node is shutting down.
    Shutdown,
    /// The waiting side went away before any outcome arrived.
    Abandoned,
}

impl std::fmt::Display for FailureCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureCause::Publish(detail) => write!(f, "publish failed: {detail}"),
            FailureCause::Shutdown => f.write_str("shutting down"),
            FailureCause::Abandoned => f.write_str("abandoned"),
        }
    }
}

/// Errors returned by [`CallerBridge::call`](super::CallerBridge::call).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BridgeError {
    #[error(transparent)]
    DuplicateCorrelationId(#[from] RegistryError),

    #[error("publish failed: {0}")]
    PublishFailed(String),

    /// No reply arrived within the deadline. Upstream layers may retry.
    #[error("no reply within {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The responder answered with a non-`OK` status.
    #[error("remote error {status}: {message}")]
    RemoteError { status: ReplyStatus, message: String },

    #[error("invalid request: {0}")]
    InvalidRequest(#[from] InvalidEnvelope),

    #[error("bridge is shutting down")]
    ShuttingDown,
}

impl BridgeError {
    /// Label used for the `outcome` dimension of `relay_calls_total`.
    #[must_use]
    pub fn outcome(&self) -> &'static str {
        match self {
            BridgeError::DuplicateCorrelationId(_) => "duplicate",
            BridgeError::PublishFailed(_) => "publish_failed",
            BridgeError::Timeout { .. } => "timeout",
            BridgeError::RemoteError { .. } => "remote_error",
            BridgeError::InvalidRequest(_) => "invalid",
            BridgeError::ShuttingDown => "shutting_down",
        }
    }

    /// Whether retrying the same call later could succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, BridgeError::Timeout { .. } | BridgeError::PublishFailed(_))
    }
}
