//! Relay Core — request/reply envelopes, operations, correlation ids, and the wire codec.

pub mod codec;
pub mod correlation;
pub mod messages;
pub mod operation;

pub use codec::{EncodeError, MalformedEnvelope, MalformedReason, WireFormat};
pub use correlation::CorrelationId;
pub use messages::{Envelope, Fields, InvalidEnvelope, ReplyEnvelope, ReplyStatus};
pub use operation::{Operation, UnknownOperation};
