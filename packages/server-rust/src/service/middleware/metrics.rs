//! Metrics middleware for domain dispatch.
//!
//! Opens a `tracing` span per dispatch carrying the correlation id and
//! operation, then records duration and outcome on it.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use relay_core::Envelope;
use serde_json::Value;
use tower::{Layer, Service};
use tracing::{info_span, Instrument};

use crate::service::domain::DomainError;

// ---------------------------------------------------------------------------
// MetricsLayer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct MetricsLayer;

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService { inner }
    }
}

// ---------------------------------------------------------------------------
// MetricsService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
}

impl<S> Service<Envelope> for MetricsService<S>
where
    S: Service<Envelope, Response = Value, Error = DomainError> + Send,
    S::Future: Send + 'static,
{
    type Response = Value;
    type Error = DomainError;
    type Future = Pin<Box<dyn Future<Output = Result<Value, DomainError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, envelope: Envelope) -> Self::Future {
        let operation = envelope.operation.as_str();
        let span = info_span!(
            "dispatch",
            correlation_id = %envelope.correlation_id,
            operation,
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        let fut = self.inner.call(envelope);

        Box::pin(
            async move {
                let start = Instant::now();
                let result = fut.await;
                let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
                let outcome = match &result {
                    Ok(_) => "ok",
                    Err(e) => e.reply_status().as_str(),
                };

                let span = tracing::Span::current();
                span.record("duration_ms", duration_ms);
                span.record("outcome", outcome);
                tracing::debug!(operation, duration_ms, outcome, "dispatch complete");

                result
            }
            .instrument(span),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
