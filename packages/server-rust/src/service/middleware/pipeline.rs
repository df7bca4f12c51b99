//! Pipeline composition: wraps the dispatcher in the middleware layers.

use std::sync::Arc;

use relay_core::Envelope;
use serde_json::Value;
use tower::util::BoxCloneService;
use tower::ServiceBuilder;

use super::metrics::MetricsLayer;
use super::timeout::TimeoutLayer;
use crate::service::config::RelayConfig;
use crate::service::dispatch::DispatchService;
use crate::service::domain::{DomainError, DomainService};

/// Type-erased dispatch pipeline. Each responder partition owns a clone.
pub type DispatchPipeline = BoxCloneService<Envelope, Value, DomainError>;

/// Layer order (outermost to innermost):
/// 1. `TimeoutLayer`: bound each dispatch by `dispatch_timeout_ms`
/// 2. `MetricsLayer`: span with duration and outcome around the domain call
#[must_use]
pub fn build_dispatch_pipeline(
    domain: Arc<dyn DomainService>,
    config: &RelayConfig,
) -> DispatchPipeline {
    let service = ServiceBuilder::new()
        .layer(TimeoutLayer::new(config.dispatch_timeout()))
        .layer(MetricsLayer)
        .service(DispatchService::new(domain));
    BoxCloneService::new(service)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use relay_core::{Fields, Operation};
    use serde_json::json;
    use tower::ServiceExt;

    use super::*;
    use crate::service::domain::ReactionService;

    /// Domain whose every call outlives any reasonable dispatch timeout.
    struct StuckDomain;

    #[async_trait]
    impl DomainService for StuckDomain {
        async fn lookup_all(&self) -> Result<Value, DomainError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Value::Null)
        }
        async fn lookup_one(&self, _id: i64) -> Result<Value, DomainError> {
            self.lookup_all().await
        }
        async fn create(&self, _fields: Fields) -> Result<Value, DomainError> {
            self.lookup_all().await
        }
        async fn update(&self, _id: i64, _fields: Fields) -> Result<Value, DomainError> {
            self.lookup_all().await
        }
        async fn delete(&self, _id: i64) -> Result<Value, DomainError> {
            self.lookup_all().await
        }
    }

    #[tokio::test]
    async fn pipeline_reaches_domain() {
        let pipeline = build_dispatch_pipeline(Arc::new(ReactionService::new()), &RelayConfig::default());
        let all = pipeline
            .oneshot(Envelope::request(Operation::ReadAll, None, None))
            .await
            .unwrap();
        assert_eq!(all, json!([]));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_domain_times_out() {
        let config = RelayConfig {
            dispatch_timeout_ms: 20,
            ..RelayConfig::default()
        };
        let pipeline = build_dispatch_pipeline(Arc::new(StuckDomain), &config);
        let err = pipeline
            .oneshot(Envelope::request(Operation::ReadAll, None, None))
            .await
            .unwrap_err();
        assert_eq!(err, DomainError::Timeout { timeout_ms: 20 });
    }
}
