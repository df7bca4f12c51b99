//! Domain collaborator consumed by the responder.
//!
//! The responder never inspects entities; it only forwards [`Fields`] in and
//! JSON values out, and maps [`DomainError`] to a reply status.

pub mod reactions;

use async_trait::async_trait;
use relay_core::{Fields, ReplyStatus};
use serde_json::Value;

pub use reactions::{Reaction, ReactionService};

/// Errors a domain operation may report.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomainError {
    #[error("entity {0} not found")]
    NotFound(i64),
    #[error("invalid request: {0}")]
    Invalid(String),
    #[error("domain operation exceeded {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("internal error: {0}")]
    Internal(String),
}

impl DomainError {
    /// Reply status reported to the caller for this error.
    #[must_use]
    pub fn reply_status(&self) -> ReplyStatus {
        match self {
            DomainError::NotFound(_) => ReplyStatus::NotFound,
            DomainError::Invalid(_) => ReplyStatus::InvalidRequest,
            DomainError::Timeout { .. } | DomainError::Internal(_) => ReplyStatus::DomainError,
        }
    }
}

/// CRUD surface of the entity store behind the responder.
#[async_trait]
pub trait DomainService: Send + Sync + 'static {
    async fn lookup_all(&self) -> Result<Value, DomainError>;

    async fn lookup_one(&self, id: i64) -> Result<Value, DomainError>;

    async fn create(&self, fields: Fields) -> Result<Value, DomainError>;

    async fn update(&self, id: i64, fields: Fields) -> Result<Value, DomainError>;

    /// Removes the entity and returns it.
    async fn delete(&self, id: i64) -> Result<Value, DomainError>;
}
