//! Relay Server — request/response correlation bridge over a pub/sub bus.
//!
//! The caller side ([`bridge::CallerBridge`]) publishes requests and awaits
//! replies matched by correlation id; the responder side
//! ([`service::Responder`]) consumes requests, runs them against a
//! [`service::DomainService`], and publishes replies. [`node::RelayNode`]
//! wires both to one [`bus::MessageBus`].

pub mod bridge;
pub mod bus;
pub mod logging;
pub mod node;
pub mod service;
pub mod shutdown;

pub use bridge::{BridgeError, CallerBridge, CorrelationRegistry};
pub use bus::{InMemoryBus, MessageBus};
pub use node::{RelayNode, ShutdownReport};
pub use service::{DomainService, ReactionService, RelayConfig};
pub use shutdown::{HealthState, ShutdownController};
