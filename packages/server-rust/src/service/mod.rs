//! Responder side of the bridge and the plumbing shared with the caller side.
//!
//! 1. **Responder** (`responder`): request-topic consumer, reply publisher
//! 2. **Middleware** (`middleware`): tower layers around domain dispatch
//! 3. **Dispatch** (`dispatch`): exhaustive operation -> domain method routing
//! 4. **Domain** (`domain`): collaborator trait and the reaction store
//! 5. **Workers** (`worker`): periodic and per-partition background tasks

pub mod config;
pub mod dispatch;
pub mod domain;
pub mod middleware;
pub mod responder;
pub mod worker;

pub use config::RelayConfig;
pub use dispatch::DispatchService;
pub use domain::{DomainError, DomainService, Reaction, ReactionService};
pub use middleware::{build_dispatch_pipeline, DispatchPipeline};
pub use responder::Responder;
pub use worker::{BackgroundRunnable, BackgroundWorker, PartitionWorkers};
