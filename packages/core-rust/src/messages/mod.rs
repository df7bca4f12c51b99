//! Wire schemas for the two bus channels.
//!
//! - [`envelope`]: request envelopes on the `requests` channel
//! - [`reply`]: reply envelopes on the `replies` channel
//!
//! Both channels are keyed by `correlationId` at the bus level.

pub mod envelope;
pub mod reply;

pub use envelope::{Envelope, Fields, InvalidEnvelope};
pub use reply::{ReplyEnvelope, ReplyStatus};
