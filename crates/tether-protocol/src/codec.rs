//! # Wire Codec
//!
//! Envelope serialization for the text-frame transport. The standard
//! encoding is a flat JSON record:
//!
//! ```text
//! {"sequenceNumber":5,"storedHash":-1203574399,"timestamp":1714375643210,"type":0,"data":"hello"}
//! ```
//!
//! `type` is the envelope kind ordinal (0 = message, 1 = feedback). The codec
//! sits behind a trait so an engine can be composed with a different wire
//! encoding without touching buffering or feedback logic.

use serde::{Deserialize, Serialize};

use crate::envelope::{Envelope, EnvelopeKind};
use crate::error::ProtocolError;

// ─── Codec Trait ─────────────────────────────────────────────────────────────

/// Serialization boundary between the engine and the transport.
///
/// Encoding an in-memory envelope cannot fail; decoding untrusted text can.
pub trait Codec {
    /// Serialize an envelope to one text frame.
    fn encode(&self, envelope: &Envelope) -> String;

    /// Parse one text frame back into an envelope.
    fn decode(&self, raw: &str) -> Result<Envelope, ProtocolError>;
}

// ─── JSON Codec ──────────────────────────────────────────────────────────────

/// Wire representation. Field names are fixed by the protocol.
#[derive(Debug, Serialize, Deserialize)]
struct WireEnvelope {
    #[serde(rename = "sequenceNumber")]
    sequence_number: u64,
    #[serde(rename = "storedHash")]
    stored_hash: i32,
    timestamp: i64,
    #[serde(rename = "type")]
    kind: u8,
    data: String,
}

/// The standard JSON wire encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode(&self, envelope: &Envelope) -> String {
        let wire = WireEnvelope {
            sequence_number: envelope.sequence_number,
            stored_hash: envelope.stored_hash,
            timestamp: envelope.timestamp,
            kind: envelope.kind.ordinal(),
            data: envelope.data.clone(),
        };
        serde_json::to_string(&wire).expect("envelope serialization")
    }

    fn decode(&self, raw: &str) -> Result<Envelope, ProtocolError> {
        let wire: WireEnvelope =
            serde_json::from_str(raw).map_err(|e| ProtocolError::MalformedEnvelope {
                reason: e.to_string(),
            })?;
        let kind =
            EnvelopeKind::from_ordinal(wire.kind).ok_or_else(|| {
                ProtocolError::MalformedEnvelope {
                    reason: format!("unknown envelope type {}", wire.kind),
                }
            })?;
        Ok(Envelope {
            sequence_number: wire.sequence_number,
            stored_hash: wire.stored_hash,
            timestamp: wire.timestamp,
            kind,
            data: wire.data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::content_hash;
    use proptest::prelude::*;

    // ─── Wire Shape ─────────────────────────────────────────────────────

    #[test]
    fn encode_uses_wire_field_names() {
        let json = JsonCodec.encode(&Envelope::message(5, "hello"));
        assert!(json.contains("\"sequenceNumber\":5"));
        assert!(json.contains("\"storedHash\":"));
        assert!(json.contains("\"timestamp\":"));
        assert!(json.contains("\"type\":0"));
        assert!(json.contains("\"data\":\"hello\""));
    }

    #[test]
    fn feedback_encodes_type_one() {
        let json = JsonCodec.encode(&Envelope::feedback_ok(2));
        assert!(json.contains("\"type\":1"));
        assert!(json.contains("\"data\":\"OK\""));
    }

    #[test]
    fn decode_reads_wire_frame() {
        let hash = content_hash("ping");
        let raw = format!(
            "{{\"sequenceNumber\":3,\"storedHash\":{hash},\"timestamp\":1714375643210,\"type\":0,\"data\":\"ping\"}}"
        );
        let env = JsonCodec.decode(&raw).unwrap();
        assert_eq!(env.sequence_number, 3);
        assert_eq!(env.timestamp, 1_714_375_643_210);
        assert_eq!(env.kind, EnvelopeKind::Message);
        assert!(env.hash_matches());
    }

    // ─── Decode Failures ────────────────────────────────────────────────

    #[test]
    fn decode_rejects_unknown_type_ordinal() {
        let raw = r#"{"sequenceNumber":0,"storedHash":0,"timestamp":0,"type":2,"data":""}"#;
        assert!(matches!(
            JsonCodec.decode(raw),
            Err(ProtocolError::MalformedEnvelope { .. })
        ));
    }

    #[test]
    fn decode_rejects_missing_field() {
        let raw = r#"{"sequenceNumber":0,"timestamp":0,"type":0,"data":""}"#;
        assert!(JsonCodec.decode(raw).is_err());
    }

    #[test]
    fn decode_rejects_non_json() {
        assert!(JsonCodec.decode("not an envelope").is_err());
    }

    // ─── proptest: encode/decode roundtrip ──────────────────────────────

    proptest! {
        #[test]
        fn proptest_envelope_roundtrip(seq in 0u64..1_000_000, data in ".{0,64}") {
            let env = Envelope::message(seq, data);
            let decoded = JsonCodec.decode(&JsonCodec.encode(&env)).unwrap();
            prop_assert_eq!(decoded, env);
        }
    }
}
