//! # Buffer Entries
//!
//! Both directions of a connection keep a sequence-ordered window of entries.
//! Outbound entries wait for cumulative acknowledgement; inbound entries
//! reorder arrivals, with placeholders standing in for sequence numbers that
//! have not arrived intact yet.

use crate::envelope::Envelope;

// ─── Entry State ─────────────────────────────────────────────────────────────

/// Lifecycle of a buffered sequence number.
///
/// Outbound entries move from `New` to `Sent` and leave the buffer on a
/// positive report; a negative report moves them back to `New`. Inbound
/// entries are `Ok` once an intact envelope occupies the slot and `Missing`
/// while the slot is a gap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Outbound: queued, not yet handed to the transport.
    New,
    /// Outbound: handed to the transport, awaiting acknowledgement.
    Sent,
    /// Inbound: intact envelope present.
    Ok,
    /// Inbound: gap. Nothing has arrived intact for this sequence number.
    Missing,
}

// ─── Entry ───────────────────────────────────────────────────────────────────

/// One slot in an ordered buffer window.
#[derive(Debug, Clone)]
pub struct Entry {
    pub sequence_number: u64,
    pub state: EntryState,
    /// Present unless the slot is a `Missing` gap.
    pub envelope: Option<Envelope>,
}

impl Entry {
    /// Queue an envelope for transmission.
    pub fn outbound(envelope: Envelope) -> Self {
        Entry {
            sequence_number: envelope.sequence_number,
            state: EntryState::New,
            envelope: Some(envelope),
        }
    }

    /// Slot an arrived envelope into the inbound window. A hash mismatch
    /// leaves the slot a gap: a corrupted arrival counts as no arrival.
    pub fn received(envelope: Envelope) -> Self {
        if envelope.hash_matches() {
            Entry {
                sequence_number: envelope.sequence_number,
                state: EntryState::Ok,
                envelope: Some(envelope),
            }
        } else {
            Entry {
                sequence_number: envelope.sequence_number,
                state: EntryState::Missing,
                envelope: None,
            }
        }
    }

    /// Gap placeholder for a sequence number nothing has arrived for.
    pub fn missing(sequence_number: u64) -> Self {
        Entry {
            sequence_number,
            state: EntryState::Missing,
            envelope: None,
        }
    }

    /// Whether this slot holds an intact, deliverable envelope.
    pub fn is_ok(&self) -> bool {
        self.state == EntryState::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outbound_entry_starts_new() {
        let entry = Entry::outbound(Envelope::message(5, "x"));
        assert_eq!(entry.sequence_number, 5);
        assert_eq!(entry.state, EntryState::New);
        assert!(entry.envelope.is_some());
    }

    #[test]
    fn intact_arrival_is_ok() {
        let entry = Entry::received(Envelope::message(1, "payload"));
        assert!(entry.is_ok());
        assert!(entry.envelope.is_some());
    }

    #[test]
    fn corrupted_arrival_becomes_gap() {
        let mut env = Envelope::message(1, "payload");
        env.data = "tampered".to_string();
        let entry = Entry::received(env);
        assert_eq!(entry.state, EntryState::Missing);
        assert!(entry.envelope.is_none());
        assert_eq!(entry.sequence_number, 1);
    }

    #[test]
    fn placeholder_is_missing() {
        let entry = Entry::missing(9);
        assert_eq!(entry.state, EntryState::Missing);
        assert!(entry.envelope.is_none());
        assert!(!entry.is_ok());
    }
}
