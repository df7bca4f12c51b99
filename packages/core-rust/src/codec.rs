//! Envelope codec: bytes on the bus to typed envelopes and back.
//!
//! Two encodings share one schema: JSON (the default) and named `MsgPack`
//! (`rmp_serde::to_vec_named()`), so field names are identical on the wire.
//!
//! Request decoding reads `operation` as a plain string first and then parses
//! it, so an unrecognised operation surfaces as
//! [`MalformedReason::UnknownOperation`] together with the correlation id
//! instead of a generic syntax error.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::correlation::CorrelationId;
use crate::messages::{Envelope, Fields, ReplyEnvelope};
use crate::operation::Operation;

/// Encoding used for envelopes on the bus.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WireFormat {
    #[default]
    Json,
    MsgPack,
}

/// Why a byte buffer could not be decoded into an envelope.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MalformedReason {
    #[error("unknown operation {0:?}")]
    UnknownOperation(String),
    #[error("{0}")]
    Syntax(String),
}

/// Decode failure. Carries the correlation id whenever it could be read.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed envelope: {reason}")]
pub struct MalformedEnvelope {
    pub correlation_id: Option<CorrelationId>,
    pub reason: MalformedReason,
}

impl MalformedEnvelope {
    fn syntax(correlation_id: Option<CorrelationId>, detail: String) -> Self {
        Self {
            correlation_id,
            reason: MalformedReason::Syntax(detail),
        }
    }

    /// The unrecognised operation name, if that is why decoding failed.
    #[must_use]
    pub fn unknown_operation(&self) -> Option<&str> {
        match &self.reason {
            MalformedReason::UnknownOperation(op) => Some(op),
            MalformedReason::Syntax(_) => None,
        }
    }
}

/// Encode failure (serializer rejected the value).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("failed to encode envelope: {0}")]
pub struct EncodeError(pub String);

/// Request shape as read off the wire, before `operation` is parsed.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEnvelope {
    correlation_id: CorrelationId,
    operation: String,
    #[serde(default)]
    entity_id: Option<i64>,
    #[serde(default)]
    payload: Option<Fields>,
}

/// Lenient view used only to recover the correlation id from a broken buffer.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CorrelationProbe {
    #[serde(default)]
    correlation_id: Option<CorrelationId>,
}

impl WireFormat {
    /// Encodes a request envelope.
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError`] if the serializer fails.
    pub fn encode_request(self, envelope: &Envelope) -> Result<Vec<u8>, EncodeError> {
        self.write_bytes(envelope)
    }

    /// Decodes a request envelope.
    ///
    /// # Errors
    ///
    /// Returns [`MalformedEnvelope`] for unreadable buffers, missing required
    /// fields, or an operation outside the known set.
    pub fn decode_request(self, bytes: &[u8]) -> Result<Envelope, MalformedEnvelope> {
        let raw: RawEnvelope = self
            .read_bytes(bytes)
            .map_err(|detail| MalformedEnvelope::syntax(self.probe_correlation_id(bytes), detail))?;

        let operation = raw.operation.parse::<Operation>().map_err(|e| MalformedEnvelope {
            correlation_id: Some(raw.correlation_id.clone()),
            reason: MalformedReason::UnknownOperation(e.0),
        })?;

        Ok(Envelope {
            correlation_id: raw.correlation_id,
            operation,
            entity_id: raw.entity_id,
            payload: raw.payload,
        })
    }

    /// Encodes a reply envelope.
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError`] if the serializer fails.
    pub fn encode_reply(self, reply: &ReplyEnvelope) -> Result<Vec<u8>, EncodeError> {
        self.write_bytes(reply)
    }

    /// Decodes a reply envelope.
    ///
    /// # Errors
    ///
    /// Returns [`MalformedEnvelope`] for unreadable buffers or unknown statuses.
    pub fn decode_reply(self, bytes: &[u8]) -> Result<ReplyEnvelope, MalformedEnvelope> {
        self.read_bytes(bytes)
            .map_err(|detail| MalformedEnvelope::syntax(self.probe_correlation_id(bytes), detail))
    }

    fn write_bytes<T: Serialize>(self, value: &T) -> Result<Vec<u8>, EncodeError> {
        match self {
            WireFormat::Json => serde_json::to_vec(value).map_err(|e| EncodeError(e.to_string())),
            WireFormat::MsgPack => {
                rmp_serde::to_vec_named(value).map_err(|e| EncodeError(e.to_string()))
            }
        }
    }

    fn read_bytes<T: DeserializeOwned>(self, bytes: &[u8]) -> Result<T, String> {
        match self {
            WireFormat::Json => serde_json::from_slice(bytes).map_err(|e| e.to_string()),
            WireFormat::MsgPack => rmp_serde::from_slice(bytes).map_err(|e| e.to_string()),
        }
    }

    fn probe_correlation_id(self, bytes: &[u8]) -> Option<CorrelationId> {
        self.read_bytes::<CorrelationProbe>(bytes)
            .ok()
            .and_then(|probe| probe.correlation_id)
    }
}

/// Encodes a request envelope as JSON.
///
/// # Errors
///
/// See [`WireFormat::encode_request`].
pub fn encode(envelope: &Envelope) -> Result<Vec<u8>, EncodeError> {
    WireFormat::Json.encode_request(envelope)
}

/// Decodes a JSON request envelope.
///
/// # Errors
///
/// See [`WireFormat::decode_request`].
pub fn decode(bytes: &[u8]) -> Result<Envelope, MalformedEnvelope> {
    WireFormat::Json.decode_request(bytes)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde_json::{json, Value};

    use super::*;
    use crate::messages::ReplyStatus;

    fn leaf_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::from),
            "[a-zA-Z0-9 ]{0,16}".prop_map(Value::String),
        ]
    }

    fn fields() -> impl Strategy<Value = Fields> {
        prop::collection::btree_map("[a-zA-Z]{1,10}", leaf_value(), 0..6)
            .prop_map(|m| m.into_iter().collect())
    }

    fn envelope() -> impl Strategy<Value = Envelope> {
        (
            "[a-f0-9-]{1,36}",
            prop::sample::select(Operation::ALL.to_vec()),
            prop::option::of(any::<i64>()),
            prop::option::of(fields()),
        )
            .prop_map(|(id, operation, entity_id, payload)| {
                Envelope::new(id.into(), operation, entity_id, payload)
            })
    }

    proptest! {
        #[test]
        fn json_round_trip(env in envelope()) {
            let bytes = WireFormat::Json.encode_request(&env).unwrap();
            prop_assert_eq!(WireFormat::Json.decode_request(&bytes).unwrap(), env);
        }

        #[test]
        fn msgpack_round_trip(env in envelope()) {
            let bytes = WireFormat::MsgPack.encode_request(&env).unwrap();
            prop_assert_eq!(WireFormat::MsgPack.decode_request(&bytes).unwrap(), env);
        }
    }

    #[test]
    fn decodes_schema_example() {
        let bytes = br#"{
            "correlationId": "abc",
            "operation": "UPDATE",
            "entityId": 4,
            "payload": {"articleId": 7, "content": "hello"}
        }"#;
        let env = decode(bytes).unwrap();
        assert_eq!(env.correlation_id.as_str(), "abc");
        assert_eq!(env.operation, Operation::Update);
        assert_eq!(env.entity_id, Some(4));
        assert_eq!(env.payload.unwrap()["content"], json!("hello"));
    }

    #[test]
    fn missing_optional_fields_decode_as_none() {
        let env = decode(br#"{"correlationId":"x","operation":"READ_ALL"}"#).unwrap();
        assert_eq!(env.entity_id, None);
        assert_eq!(env.payload, None);
    }

    #[test]
    fn unknown_operation_is_malformed_and_keeps_correlation_id() {
        let err = decode(br#"{"correlationId":"k-1","operation":"PATCH","entityId":null,"payload":null}"#)
            .unwrap_err();
        assert_eq!(err.correlation_id, Some(CorrelationId::from("k-1")));
        assert_eq!(err.unknown_operation(), Some("PATCH"));
    }

    #[test]
    fn syntax_error_probes_correlation_id() {
        let err = decode(br#"{"correlationId":"k-2","operation":17}"#).unwrap_err();
        assert_eq!(err.correlation_id, Some(CorrelationId::from("k-2")));
        assert!(matches!(err.reason, MalformedReason::Syntax(_)));
    }

    #[test]
    fn garbage_has_no_correlation_id() {
        let err = decode(b"\x00\x01not json").unwrap_err();
        assert_eq!(err.correlation_id, None);
        assert!(err.unknown_operation().is_none());

        let err = WireFormat::MsgPack.decode_request(b"\xc1").unwrap_err();
        assert_eq!(err.correlation_id, None);
    }

    #[test]
    fn missing_correlation_id_is_malformed() {
        let err = decode(br#"{"operation":"READ_ALL"}"#).unwrap_err();
        assert!(err.correlation_id.is_none());
    }

    #[test]
    fn reply_round_trip_both_formats() {
        let replies = [
            ReplyEnvelope::ok("r-1".into(), json!([{"id": 1}, {"id": 2}])),
            ReplyEnvelope::failure("r-2".into(), ReplyStatus::NotFound, "no entity 9"),
        ];
        for format in [WireFormat::Json, WireFormat::MsgPack] {
            for reply in &replies {
                let bytes = format.encode_reply(reply).unwrap();
                assert_eq!(&format.decode_reply(&bytes).unwrap(), reply);
            }
        }
    }

    #[test]
    fn reply_with_unknown_status_is_malformed() {
        let err = WireFormat::Json
            .decode_reply(br#"{"correlationId":"r-3","status":"MAYBE"}"#)
            .unwrap_err();
        assert_eq!(err.correlation_id, Some(CorrelationId::from("r-3")));
    }
}
