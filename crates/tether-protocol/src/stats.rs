//! # Engine Statistics
//!
//! Per-connection counters, serializable for logging and diagnostics.

use serde::Serialize;

// ─── Engine Stats ────────────────────────────────────────────────────────────

/// Aggregate counters for one protocol engine.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineStats {
    /// Messages accepted from the application.
    pub messages_sent: u64,
    /// Message envelopes received from the peer (including duplicates and
    /// corrupted ones).
    pub messages_received: u64,
    /// Payloads delivered to the application (unique, in order).
    pub delivered: u64,
    /// Arrivals for sequence numbers already settled or already intact.
    pub duplicates: u64,
    /// Envelopes whose recomputed hash differed from the stored one.
    pub hash_failures: u64,
    /// Outbound entries requeued by negative feedback.
    pub retransmissions: u64,
    /// Positive feedback envelopes emitted.
    pub acks_sent: u64,
    /// Negative feedback envelopes emitted.
    pub nacks_sent: u64,
    /// Outbound entries released by positive feedback.
    pub acked: u64,
}

impl EngineStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Retransmission overhead ratio.
    pub fn retransmit_ratio(&self) -> f64 {
        if self.messages_sent == 0 {
            0.0
        } else {
            self.retransmissions as f64 / self.messages_sent as f64
        }
    }

    /// Unique in-order deliveries vs everything that arrived.
    pub fn goodput_ratio(&self) -> f64 {
        if self.messages_received == 0 {
            0.0
        } else {
            self.delivered as f64 / self.messages_received as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retransmit_ratio_zero_div() {
        assert_eq!(EngineStats::new().retransmit_ratio(), 0.0);
    }

    #[test]
    fn retransmit_ratio_correct() {
        let mut stats = EngineStats::new();
        stats.messages_sent = 100;
        stats.retransmissions = 5;
        assert!((stats.retransmit_ratio() - 0.05).abs() < 0.001);
    }

    #[test]
    fn goodput_ratio_correct() {
        let mut stats = EngineStats::new();
        stats.messages_received = 110;
        stats.delivered = 100;
        assert!((stats.goodput_ratio() - 100.0 / 110.0).abs() < 0.001);
    }

    #[test]
    fn goodput_ratio_zero_div() {
        assert_eq!(EngineStats::new().goodput_ratio(), 0.0);
    }

    #[test]
    fn stats_serialize_to_json() {
        let mut stats = EngineStats::new();
        stats.messages_sent = 3;
        stats.delivered = 2;
        let json = serde_json::to_string(&stats).unwrap();
        assert!(json.contains("\"messages_sent\":3"));
        assert!(json.contains("\"delivered\":2"));
    }
}
