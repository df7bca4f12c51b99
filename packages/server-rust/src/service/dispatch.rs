//! Innermost service of the responder pipeline: envelope -> domain call.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use relay_core::{Envelope, Operation};
use serde_json::Value;
use tower::Service;

use super::domain::{DomainError, DomainService};

/// Routes a validated envelope to the matching [`DomainService`] method.
#[derive(Clone)]
pub struct DispatchService {
    domain: Arc<dyn DomainService>,
}

impl DispatchService {
    #[must_use]
    pub fn new(domain: Arc<dyn DomainService>) -> Self {
        Self { domain }
    }
}

fn entity_id(envelope: &Envelope) -> Result<i64, DomainError> {
    envelope
        .entity_id
        .ok_or_else(|| DomainError::Invalid(format!("{} requires an entityId", envelope.operation)))
}

async fn dispatch(domain: Arc<dyn DomainService>, envelope: Envelope) -> Result<Value, DomainError> {
    envelope
        .validate()
        .map_err(|e| DomainError::Invalid(e.to_string()))?;

    match envelope.operation {
        Operation::ReadAll => domain.lookup_all().await,
        Operation::ReadOne => domain.lookup_one(entity_id(&envelope)?).await,
        Operation::Create => domain.create(envelope.payload.unwrap_or_default()).await,
        Operation::Update => {
            let id = entity_id(&envelope)?;
            domain.update(id, envelope.payload.unwrap_or_default()).await
        }
        Operation::Delete => domain.delete(entity_id(&envelope)?).await,
    }
}

impl Service<Envelope> for DispatchService {
    type Response = Value;
    type Error = DomainError;
    type Future = Pin<Box<dyn Future<Output = Result<Value, DomainError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, envelope: Envelope) -> Self::Future {
        Box::pin(dispatch(Arc::clone(&self.domain), envelope))
    }
}

#[cfg(test)]
mod tests {
    use relay_core::Fields;
    use serde_json::json;
    use tower::ServiceExt;

    use super::*;
    use crate::service::domain::ReactionService;

    fn payload(value: Value) -> Option<Fields> {
        value.as_object().cloned()
    }

    #[tokio::test]
    async fn routes_each_operation() {
        let svc = DispatchService::new(Arc::new(ReactionService::new()));

        let created = svc
            .clone()
            .oneshot(Envelope::request(
                Operation::Create,
                None,
                payload(json!({"articleId": 7, "content": "hi"})),
            ))
            .await
            .unwrap();
        assert_eq!(created, json!({"id": 1, "articleId": 7, "content": "hi"}));

        let one = svc
            .clone()
            .oneshot(Envelope::request(Operation::ReadOne, Some(1), None))
            .await
            .unwrap();
        assert_eq!(one, created);

        let updated = svc
            .clone()
            .oneshot(Envelope::request(
                Operation::Update,
                Some(1),
                payload(json!({"articleId": 7, "content": "edited"})),
            ))
            .await
            .unwrap();
        assert_eq!(updated["content"], json!("edited"));

        let all = svc
            .clone()
            .oneshot(Envelope::request(Operation::ReadAll, None, None))
            .await
            .unwrap();
        assert_eq!(all, json!([updated]));

        let deleted = svc
            .clone()
            .oneshot(Envelope::request(Operation::Delete, Some(1), None))
            .await
            .unwrap();
        assert_eq!(deleted, updated);
    }

    #[tokio::test]
    async fn entity_id_rule_is_enforced() {
        let svc = DispatchService::new(Arc::new(ReactionService::new()));

        let err = svc
            .clone()
            .oneshot(Envelope::request(Operation::Delete, None, None))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Invalid(_)));

        let err = svc
            .oneshot(Envelope::request(Operation::ReadAll, Some(3), None))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Invalid(_)));
    }

    #[tokio::test]
    async fn create_without_payload_is_invalid() {
        let svc = DispatchService::new(Arc::new(ReactionService::new()));
        let err = svc
            .oneshot(Envelope::request(Operation::Create, None, None))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Invalid(_)));
    }
}
