//! # Protocol Engine
//!
//! The per-connection state machine: sequencing, buffering, ordered delivery,
//! and go-back-N retransmission. Pure logic, no I/O. The owning task feeds
//! inbound text frames in and drains events (frames to transmit, payloads to
//! deliver) out.
//!
//! ## Responsibilities
//!
//! 1. **Send path**: number outgoing payloads, buffer them until the peer
//!    acknowledges them, hand encoded frames to the transport
//! 2. **Receive path**: verify payload hashes, slot arrivals into the inbound
//!    window, deliver the contiguous intact prefix in order
//! 3. **Feedback**: answer every message arrival with one cumulative `OK` or
//!    one gap-reporting `FAILED`; apply the peer's feedback to the outbound
//!    buffer
//!
//! One engine per connection, owned by exactly one task. Frames, ticks and
//! sends are serialized by that ownership; the engine needs no locks.

use std::collections::VecDeque;

use tracing::{debug, warn};

use crate::buffer::{Entry, EntryState};
use crate::codec::{Codec, JsonCodec};
use crate::envelope::{Envelope, EnvelopeKind, FEEDBACK_FAILED, FEEDBACK_OK};
use crate::error::ProtocolError;
use crate::stats::EngineStats;

// ─── Engine Events ───────────────────────────────────────────────────────────

/// Events the engine generates for the owning task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// An encoded frame to write to the transport.
    Transmit(String),
    /// A payload ready for the application, in order.
    Deliver(String),
}

// ─── Window Position ─────────────────────────────────────────────────────────

/// Where an arriving sequence number lands relative to the inbound window.
enum SlotPosition {
    /// Before the window: already settled. Must not touch the buffer.
    BelowWindow,
    /// Inside the current window, at this offset.
    InWindow(usize),
    /// Past the end; this many gap placeholders are needed first.
    BeyondWindow(usize),
}

// ─── Engine ──────────────────────────────────────────────────────────────────

/// Protocol engine for one connection.
pub struct Engine<C: Codec = JsonCodec> {
    codec: C,
    /// Messages awaiting positive feedback, ordered by sequence number.
    outbound: VecDeque<Entry>,
    /// Arrival window, ordered by sequence number, gaps as placeholders.
    inbound: VecDeque<Entry>,
    /// Next sequence number to assign to an outgoing message.
    next_sequence: u64,
    /// Highest sequence number delivered to the application.
    last_delivered: Option<u64>,
    events: Vec<EngineEvent>,
    stats: EngineStats,
}

impl Engine<JsonCodec> {
    /// Engine with the standard JSON wire encoding.
    pub fn new() -> Self {
        Engine::with_codec(JsonCodec)
    }
}

impl Default for Engine<JsonCodec> {
    fn default() -> Self {
        Engine::new()
    }
}

impl<C: Codec> Engine<C> {
    /// Engine composed with a custom wire encoding.
    pub fn with_codec(codec: C) -> Self {
        Engine {
            codec,
            outbound: VecDeque::new(),
            inbound: VecDeque::new(),
            next_sequence: 0,
            last_delivered: None,
            events: Vec::new(),
            stats: EngineStats::new(),
        }
    }

    // ─── Send Path ──────────────────────────────────────────────────────

    /// Accept a payload from the application.
    ///
    /// Assigns the next sequence number, buffers the envelope until the peer
    /// acknowledges it, and queues the encoded frame for transmission.
    /// Returns the assigned sequence number.
    pub fn send(&mut self, payload: impl Into<String>) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        let envelope = Envelope::message(sequence, payload);
        self.outbound.push_back(Entry::outbound(envelope));
        self.stats.messages_sent += 1;

        self.flush();
        sequence
    }

    /// Encode and queue every `New` outbound entry, marking it `Sent`.
    /// Entries already `Sent` are untouched.
    fn flush(&mut self) {
        for entry in self.outbound.iter_mut() {
            if entry.state != EntryState::New {
                continue;
            }
            if let Some(envelope) = &entry.envelope {
                self.events
                    .push(EngineEvent::Transmit(self.codec.encode(envelope)));
                entry.state = EntryState::Sent;
            }
        }
    }

    // ─── Receive Path ───────────────────────────────────────────────────

    /// Process one inbound text frame.
    ///
    /// A frame that does not decode is dropped: the error is returned, no
    /// buffer state changes, and no feedback is sent for it. The gap it may
    /// leave is reported when a later message arrives.
    pub fn handle_frame(&mut self, raw: &str) -> Result<(), ProtocolError> {
        let envelope = self.codec.decode(raw)?;
        match envelope.kind {
            EnvelopeKind::Message => self.handle_message(envelope),
            EnvelopeKind::Feedback => self.handle_feedback(envelope),
        }
        Ok(())
    }

    /// Slot a message arrival, deliver what became contiguous, and answer
    /// with exactly one feedback envelope.
    fn handle_message(&mut self, envelope: Envelope) {
        self.stats.messages_received += 1;
        if !envelope.hash_matches() {
            self.stats.hash_failures += 1;
        }

        match self.slot_position(envelope.sequence_number) {
            SlotPosition::BelowWindow => {
                // Already settled. Nothing to re-buffer; still answer below
                // so the peer's view converges.
                self.stats.duplicates += 1;
            }
            SlotPosition::InWindow(index) => {
                if self.inbound[index].is_ok() {
                    self.stats.duplicates += 1;
                }
                self.inbound[index] = Entry::received(envelope);
            }
            SlotPosition::BeyondWindow(gap) => {
                let start = self.window_end();
                for offset in 0..gap {
                    self.inbound
                        .push_back(Entry::missing(start + offset as u64));
                }
                self.inbound.push_back(Entry::received(envelope));
            }
        }

        match self.deliver_ready() {
            Some(high) => {
                self.stats.acks_sent += 1;
                self.transmit_control(Envelope::feedback_ok(high));
            }
            None => {
                self.stats.nacks_sent += 1;
                self.transmit_control(Envelope::feedback_failed(self.next_expected()));
            }
        }
    }

    /// Pop and deliver the contiguous intact prefix of the inbound window.
    /// Returns the highest sequence number delivered, if any.
    fn deliver_ready(&mut self) -> Option<u64> {
        let mut delivered_up_to = None;
        while self.inbound.front().is_some_and(Entry::is_ok) {
            let Some(entry) = self.inbound.pop_front() else {
                break;
            };
            let payload = entry.envelope.map(|e| e.data).unwrap_or_default();
            self.last_delivered = Some(entry.sequence_number);
            delivered_up_to = Some(entry.sequence_number);
            self.stats.delivered += 1;
            self.events.push(EngineEvent::Deliver(payload));
        }
        delivered_up_to
    }

    /// Apply a feedback envelope to the outbound buffer. Feedback carrying a
    /// stale hash or an unknown token is dropped; a later report supersedes
    /// it.
    fn handle_feedback(&mut self, envelope: Envelope) {
        if !envelope.hash_matches() {
            self.stats.hash_failures += 1;
            return;
        }
        match envelope.data.as_str() {
            FEEDBACK_OK => self.apply_ack(envelope.sequence_number),
            FEEDBACK_FAILED => self.apply_nack(envelope.sequence_number),
            other => {
                warn!(token = %other, "dropping feedback with unknown token");
            }
        }
    }

    /// Positive report: every message up to `upto` (inclusive) arrived.
    fn apply_ack(&mut self, upto: u64) {
        while self
            .outbound
            .front()
            .is_some_and(|entry| entry.sequence_number <= upto)
        {
            self.outbound.pop_front();
            self.stats.acked += 1;
        }
    }

    /// Negative report: the peer is missing `from`. Requeue it and every
    /// later entry still in the buffer, then retransmit.
    fn apply_nack(&mut self, from: u64) {
        let mut requeued = 0u64;
        for entry in self.outbound.iter_mut() {
            if entry.sequence_number >= from && entry.state == EntryState::Sent {
                entry.state = EntryState::New;
                requeued += 1;
            }
        }
        if requeued > 0 {
            debug!(from, requeued, "rewinding outbound window");
            self.stats.retransmissions += requeued;
        }
        self.flush();
    }

    /// Encode and queue a feedback envelope. Feedback is never buffered and
    /// never acknowledged.
    fn transmit_control(&mut self, envelope: Envelope) {
        self.events
            .push(EngineEvent::Transmit(self.codec.encode(&envelope)));
    }

    // ─── Window Math ────────────────────────────────────────────────────

    /// Classify where `sequence` lands relative to the inbound window.
    fn slot_position(&self, sequence: u64) -> SlotPosition {
        let start = self.window_start();
        if sequence < start {
            return SlotPosition::BelowWindow;
        }
        let offset = (sequence - start) as usize;
        if offset < self.inbound.len() {
            SlotPosition::InWindow(offset)
        } else {
            SlotPosition::BeyondWindow(offset - self.inbound.len())
        }
    }

    /// First sequence number of the inbound window.
    fn window_start(&self) -> u64 {
        self.inbound
            .front()
            .map_or_else(|| self.next_expected(), |entry| entry.sequence_number)
    }

    /// One past the last buffered inbound sequence number.
    fn window_end(&self) -> u64 {
        self.window_start() + self.inbound.len() as u64
    }

    /// The sequence number the application is waiting for next.
    fn next_expected(&self) -> u64 {
        self.last_delivered.map_or(0, |d| d + 1)
    }

    // ─── Introspection ──────────────────────────────────────────────────

    /// Drain all pending events, order preserved.
    pub fn drain_events(&mut self) -> impl Iterator<Item = EngineEvent> + '_ {
        self.events.drain(..)
    }

    /// Peek at the number of pending events.
    pub fn pending_events(&self) -> usize {
        self.events.len()
    }

    /// Outbound entries awaiting acknowledgement.
    pub fn in_flight(&self) -> usize {
        self.outbound.len()
    }

    /// Inbound window size (intact entries plus gap placeholders).
    pub fn buffered(&self) -> usize {
        self.inbound.len()
    }

    /// Sequence number the next outgoing message will get.
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Highest sequence number delivered to the application.
    pub fn last_delivered(&self) -> Option<u64> {
        self.last_delivered
    }

    /// Current engine statistics.
    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Helper: encode a message frame as the peer would.
    fn message_frame(seq: u64, data: &str) -> String {
        JsonCodec.encode(&Envelope::message(seq, data))
    }

    /// Helper: encode an arbitrary envelope.
    fn frame(envelope: &Envelope) -> String {
        JsonCodec.encode(envelope)
    }

    fn transmits(engine: &mut Engine) -> Vec<Envelope> {
        engine
            .drain_events()
            .filter_map(|e| match e {
                EngineEvent::Transmit(raw) => Some(JsonCodec.decode(&raw).unwrap()),
                _ => None,
            })
            .collect()
    }

    fn deliveries(engine: &mut Engine) -> Vec<String> {
        engine
            .drain_events()
            .filter_map(|e| match e {
                EngineEvent::Deliver(payload) => Some(payload),
                _ => None,
            })
            .collect()
    }

    // ─── Send Path ──────────────────────────────────────────────────────

    #[test]
    fn send_assigns_sequence_and_transmits() {
        let mut engine = Engine::new();
        assert_eq!(engine.send("a"), 0);
        assert_eq!(engine.send("b"), 1);
        assert_eq!(engine.next_sequence(), 2);
        assert_eq!(engine.in_flight(), 2);

        let out = transmits(&mut engine);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].sequence_number, 0);
        assert_eq!(out[0].data, "a");
        assert_eq!(out[1].sequence_number, 1);
    }

    #[test]
    fn flush_transmits_each_entry_once() {
        let mut engine = Engine::new();
        engine.send("a");
        engine.drain_events().for_each(drop);

        // A later send must not re-encode the first entry.
        engine.send("b");
        let out = transmits(&mut engine);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].data, "b");
    }

    // ─── Receive Path ───────────────────────────────────────────────────

    #[test]
    fn in_order_arrival_delivers_and_acks() {
        let mut engine = Engine::new();
        engine.handle_frame(&message_frame(0, "hello")).unwrap();

        let events: Vec<_> = engine.drain_events().collect();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], EngineEvent::Deliver("hello".into()));
        match &events[1] {
            EngineEvent::Transmit(raw) => {
                let fb = JsonCodec.decode(raw).unwrap();
                assert_eq!(fb.kind, EnvelopeKind::Feedback);
                assert_eq!(fb.data, FEEDBACK_OK);
                assert_eq!(fb.sequence_number, 0);
            }
            other => panic!("expected feedback transmit, got {other:?}"),
        }
        assert_eq!(engine.last_delivered(), Some(0));
    }

    #[test]
    fn gap_holds_delivery_and_nacks_first_missing() {
        let mut engine = Engine::new();
        engine.handle_frame(&message_frame(0, "zero")).unwrap();
        engine.drain_events().for_each(drop);

        engine.handle_frame(&message_frame(2, "two")).unwrap();
        let out = transmits(&mut engine);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].data, FEEDBACK_FAILED);
        assert_eq!(out[0].sequence_number, 1);
        // Placeholder for 1 plus the held entry for 2.
        assert_eq!(engine.buffered(), 2);
        assert_eq!(engine.last_delivered(), Some(0));
    }

    #[test]
    fn filling_the_gap_delivers_held_entries() {
        let mut engine = Engine::new();
        engine.handle_frame(&message_frame(0, "zero")).unwrap();
        engine.handle_frame(&message_frame(2, "two")).unwrap();
        engine.drain_events().for_each(drop);

        engine.handle_frame(&message_frame(1, "one")).unwrap();
        let events: Vec<_> = engine.drain_events().collect();
        assert_eq!(events[0], EngineEvent::Deliver("one".into()));
        assert_eq!(events[1], EngineEvent::Deliver("two".into()));
        match &events[2] {
            EngineEvent::Transmit(raw) => {
                let fb = JsonCodec.decode(raw).unwrap();
                assert_eq!(fb.data, FEEDBACK_OK);
                assert_eq!(fb.sequence_number, 2);
            }
            other => panic!("expected feedback transmit, got {other:?}"),
        }
        assert_eq!(engine.buffered(), 0);
    }

    #[test]
    fn far_gap_numbers_placeholders_correctly() {
        let mut engine = Engine::new();
        engine.handle_frame(&message_frame(0, "zero")).unwrap();
        engine.drain_events().for_each(drop);

        // Placeholders for 1, 2, 3 plus the entry for 4.
        engine.handle_frame(&message_frame(4, "four")).unwrap();
        engine.drain_events().for_each(drop);
        assert_eq!(engine.buffered(), 4);

        // Fill 2: in place, still no delivery, gap at 1 re-reported.
        engine.handle_frame(&message_frame(2, "two")).unwrap();
        let out = transmits(&mut engine);
        assert_eq!(out[0].data, FEEDBACK_FAILED);
        assert_eq!(out[0].sequence_number, 1);

        // Fill 1: 1 and 2 deliver, 3 still missing.
        engine.handle_frame(&message_frame(1, "one")).unwrap();
        assert_eq!(deliveries(&mut engine), vec!["one", "two"]);
        assert_eq!(engine.buffered(), 2);

        // Fill 3: 3 and 4 deliver.
        engine.handle_frame(&message_frame(3, "three")).unwrap();
        assert_eq!(deliveries(&mut engine), vec!["three", "four"]);
        assert_eq!(engine.buffered(), 0);
        assert_eq!(engine.last_delivered(), Some(4));
    }

    #[test]
    fn stale_duplicate_does_not_mutate_buffers() {
        let mut engine = Engine::new();
        engine.handle_frame(&message_frame(0, "zero")).unwrap();
        engine.drain_events().for_each(drop);

        engine.handle_frame(&message_frame(0, "zero")).unwrap();
        assert_eq!(engine.stats().duplicates, 1);
        assert_eq!(engine.buffered(), 0);
        assert_eq!(engine.last_delivered(), Some(0));

        // Still answered, so the peer converges.
        let out = transmits(&mut engine);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].data, FEEDBACK_FAILED);
        assert_eq!(out[0].sequence_number, 1);
    }

    #[test]
    fn buffered_duplicate_counted() {
        let mut engine = Engine::new();
        engine.handle_frame(&message_frame(1, "one")).unwrap();
        engine.handle_frame(&message_frame(1, "one")).unwrap();
        assert_eq!(engine.stats().duplicates, 1);
        assert_eq!(engine.buffered(), 2);
    }

    #[test]
    fn corrupted_message_leaves_gap_and_nacks_it() {
        let mut engine = Engine::new();
        let mut env = Envelope::message(0, "zero");
        env.data = "evil".to_string();
        engine.handle_frame(&frame(&env)).unwrap();

        assert_eq!(engine.stats().hash_failures, 1);
        assert_eq!(engine.buffered(), 1);
        let out = transmits(&mut engine);
        assert_eq!(out[0].data, FEEDBACK_FAILED);
        assert_eq!(out[0].sequence_number, 0);
    }

    // ─── Feedback Handling ──────────────────────────────────────────────

    #[test]
    fn ok_feedback_releases_cumulatively() {
        let mut engine = Engine::new();
        engine.send("a");
        engine.send("b");
        engine.send("c");
        engine.drain_events().for_each(drop);

        engine
            .handle_frame(&frame(&Envelope::feedback_ok(1)))
            .unwrap();
        assert_eq!(engine.in_flight(), 1);
        assert_eq!(engine.stats().acked, 2);

        engine
            .handle_frame(&frame(&Envelope::feedback_ok(2)))
            .unwrap();
        assert_eq!(engine.in_flight(), 0);
        assert_eq!(engine.stats().acked, 3);
    }

    #[test]
    fn failed_feedback_requeues_and_retransmits() {
        let mut engine = Engine::new();
        engine.send("a");
        engine.send("b");
        engine.send("c");
        engine.drain_events().for_each(drop);

        engine
            .handle_frame(&frame(&Envelope::feedback_failed(1)))
            .unwrap();
        let out = transmits(&mut engine);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].sequence_number, 1);
        assert_eq!(out[1].sequence_number, 2);
        assert_eq!(engine.stats().retransmissions, 2);
        assert_eq!(engine.in_flight(), 3);
    }

    #[test]
    fn corrupted_feedback_dropped() {
        let mut engine = Engine::new();
        engine.send("a");
        engine.drain_events().for_each(drop);

        let mut fb = Envelope::feedback_ok(0);
        fb.stored_hash ^= 1;
        engine.handle_frame(&frame(&fb)).unwrap();
        assert_eq!(engine.in_flight(), 1);
        assert_eq!(engine.stats().hash_failures, 1);
    }

    #[test]
    fn unknown_feedback_token_dropped() {
        let mut engine = Engine::new();
        engine.send("a");
        engine.drain_events().for_each(drop);

        let fb = Envelope {
            stored_hash: crate::envelope::content_hash("MAYBE"),
            data: "MAYBE".to_string(),
            ..Envelope::feedback_ok(0)
        };
        engine.handle_frame(&frame(&fb)).unwrap();
        assert_eq!(engine.in_flight(), 1);
        assert_eq!(engine.pending_events(), 0);
    }

    // ─── Malformed Frames ───────────────────────────────────────────────

    #[test]
    fn malformed_frame_is_an_error_without_side_effects() {
        let mut engine = Engine::new();
        let err = engine.handle_frame("not an envelope").unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedEnvelope { .. }));
        assert_eq!(engine.buffered(), 0);
        assert_eq!(engine.pending_events(), 0);
        assert_eq!(engine.stats().messages_received, 0);
    }
}
