//! # Envelope
//!
//! The protocol's single transport unit. Every text frame on the wire is one
//! envelope: either a sequenced application payload (`Message`) or a delivery
//! report (`Feedback`). An envelope carries the hash of its own payload,
//! stamped exactly once at construction; the receiving side recomputes it, and
//! a mismatch is handled like a lost frame.

use chrono::Utc;

// ─── Content Hash ────────────────────────────────────────────────────────────

/// FNV-1a offset basis (32-bit).
const FNV_OFFSET: u32 = 0x811c_9dc5;
/// FNV-1a prime (32-bit).
const FNV_PRIME: u32 = 0x0100_0193;

/// Hash a payload for tamper detection.
///
/// FNV-1a over the UTF-8 bytes, truncated to the wire's signed 32-bit field.
/// Deterministic across peers and platforms; not cryptographic.
pub fn content_hash(data: &str) -> i32 {
    let mut hash = FNV_OFFSET;
    for &byte in data.as_bytes() {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash as i32
}

// ─── Envelope Kind ───────────────────────────────────────────────────────────

/// Feedback payload acknowledging every message up to the reported sequence.
pub const FEEDBACK_OK: &str = "OK";
/// Feedback payload re-requesting transmission from the reported sequence.
pub const FEEDBACK_FAILED: &str = "FAILED";

/// The two envelope flavors on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeKind {
    /// Sequenced application payload. Buffered, acknowledged, retransmitted.
    Message,
    /// Delivery report. Never buffered, never acknowledged.
    Feedback,
}

impl EnvelopeKind {
    /// Wire ordinal carried in the `type` field.
    pub fn ordinal(self) -> u8 {
        match self {
            EnvelopeKind::Message => 0,
            EnvelopeKind::Feedback => 1,
        }
    }

    /// Map a wire ordinal back to a kind.
    pub fn from_ordinal(ordinal: u8) -> Option<Self> {
        match ordinal {
            0 => Some(EnvelopeKind::Message),
            1 => Some(EnvelopeKind::Feedback),
            _ => None,
        }
    }
}

// ─── Envelope ────────────────────────────────────────────────────────────────

/// One transport unit.
///
/// `stored_hash` is computed from `data` exactly once, at construction. The
/// sender never recomputes it, so any in-flight mutation of `data` surfaces
/// on the receiving side as a hash mismatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Position in the sender's message stream. Feedback envelopes echo the
    /// sequence number they report on.
    pub sequence_number: u64,
    /// `content_hash(data)` captured at construction.
    pub stored_hash: i32,
    /// Construction time, epoch milliseconds.
    pub timestamp: i64,
    /// Message or feedback.
    pub kind: EnvelopeKind,
    /// UTF-8 payload. For feedback: the literal `"OK"` or `"FAILED"`.
    pub data: String,
}

impl Envelope {
    /// Build a sequenced application message.
    pub fn message(sequence_number: u64, data: impl Into<String>) -> Self {
        let data = data.into();
        Envelope {
            sequence_number,
            stored_hash: content_hash(&data),
            timestamp: now_millis(),
            kind: EnvelopeKind::Message,
            data,
        }
    }

    /// Build a positive report: every message up to `sequence_number`
    /// (inclusive) was delivered.
    pub fn feedback_ok(sequence_number: u64) -> Self {
        Self::feedback(sequence_number, FEEDBACK_OK)
    }

    /// Build a negative report: transmission must restart from
    /// `sequence_number`.
    pub fn feedback_failed(sequence_number: u64) -> Self {
        Self::feedback(sequence_number, FEEDBACK_FAILED)
    }

    fn feedback(sequence_number: u64, token: &str) -> Self {
        Envelope {
            sequence_number,
            stored_hash: content_hash(token),
            timestamp: now_millis(),
            kind: EnvelopeKind::Feedback,
            data: token.to_string(),
        }
    }

    /// Recompute the payload hash and compare it to the stored one.
    pub fn hash_matches(&self) -> bool {
        content_hash(&self.data) == self.stored_hash
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
