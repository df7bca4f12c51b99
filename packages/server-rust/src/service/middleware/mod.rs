//! Tower middleware around domain dispatch.
//!
//! - [`timeout`]: per-dispatch time bound
//! - [`metrics`]: dispatch span with timing and outcome
//! - [`pipeline`]: composes the layers over the dispatcher

pub mod metrics;
pub mod pipeline;
pub mod timeout;

pub use metrics::MetricsLayer;
pub use pipeline::{build_dispatch_pipeline, DispatchPipeline};
pub use timeout::TimeoutLayer;
