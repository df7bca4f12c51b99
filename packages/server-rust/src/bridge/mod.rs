//! Request/response correlation bridge.
//!
//! - [`registry`]: correlation id -> pending call, exactly-once terminal transitions
//! - [`caller`]: `call()` entry point (register, publish, await)
//! - [`listener`]: reply-topic consumer resolving pending calls
//! - [`sweeper`]: periodic expiry of overdue entries

pub mod caller;
pub mod error;
pub mod listener;
pub mod registry;
pub mod sweeper;

pub use caller::CallerBridge;
pub use error::{BridgeError, FailureCause, RegistryError};
pub use listener::ReplyListener;
pub use registry::{CallState, CorrelationRegistry, PendingCallHandle, Terminal};
pub use sweeper::{DeadlineSweeper, SweepTask};
