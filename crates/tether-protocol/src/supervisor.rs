//! # Liveness Supervisor
//!
//! Detects dead peers via native WebSocket ping/pong control frames. Pure
//! tick-driven state: the owning task runs a fixed-interval timer, asks the
//! supervisor what to do on each tick, and feeds observed pongs back in.
//!
//! The pong flag starts optimistic, so the first tick always pings. A tick
//! that finds no pong from the previous round reports breakup. One full
//! interval without a pong is therefore tolerated, and breakup fires at most
//! once.

use std::time::Duration;

// ─── Configuration ───────────────────────────────────────────────────────────

/// Marker bytes carried by supervisor pings.
pub const PING_PAYLOAD: &[u8] = &[0x08, 0x01, 0x08, 0x01];

/// Supervisor timing, fixed at construction.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Interval between liveness ticks.
    pub interval: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        SupervisorConfig {
            interval: Duration::from_millis(2000),
        }
    }
}

// ─── Supervisor Events ───────────────────────────────────────────────────────

/// What the owning task must do after a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorEvent {
    /// Send a ping control frame carrying [`PING_PAYLOAD`].
    SendPing,
    /// The peer missed a full round. Reported exactly once; the supervisor
    /// has already stopped itself.
    Breakup,
}

// ─── Supervisor ──────────────────────────────────────────────────────────────

/// Per-connection liveness state machine.
#[derive(Debug)]
pub struct Supervisor {
    interval: Duration,
    /// True if a pong arrived since the last tick. Starts true: the peer is
    /// presumed alive until it misses a round.
    pong_received: bool,
    stopped: bool,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        Supervisor {
            interval: config.interval,
            pong_received: true,
            stopped: false,
        }
    }

    /// The interval the owning task should run its tick timer at.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Advance one liveness round.
    ///
    /// Returns `SendPing` while the peer keeps answering, `Breakup` on the
    /// first missed round, and `None` forever once stopped.
    pub fn on_tick(&mut self) -> Option<SupervisorEvent> {
        if self.stopped {
            return None;
        }
        if self.pong_received {
            self.pong_received = false;
            Some(SupervisorEvent::SendPing)
        } else {
            self.stopped = true;
            Some(SupervisorEvent::Breakup)
        }
    }

    /// Record a pong control frame from the peer.
    pub fn record_pong(&mut self) {
        self.pong_received = true;
    }

    /// Stop supervision. Idempotent; ticks after this return `None`.
    pub fn stop(&mut self) {
        self.stopped = true;
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn supervisor() -> Supervisor {
        Supervisor::new(SupervisorConfig::default())
    }

    #[test]
    fn first_tick_pings() {
        let mut sup = supervisor();
        assert_eq!(sup.on_tick(), Some(SupervisorEvent::SendPing));
    }

    #[test]
    fn answered_rounds_keep_pinging() {
        let mut sup = supervisor();
        for _ in 0..5 {
            assert_eq!(sup.on_tick(), Some(SupervisorEvent::SendPing));
            sup.record_pong();
        }
        assert!(!sup.is_stopped());
    }

    #[test]
    fn missed_round_reports_breakup_once() {
        let mut sup = supervisor();
        assert_eq!(sup.on_tick(), Some(SupervisorEvent::SendPing));
        // No pong before the next tick.
        assert_eq!(sup.on_tick(), Some(SupervisorEvent::Breakup));
        assert!(sup.is_stopped());
        assert_eq!(sup.on_tick(), None);
        assert_eq!(sup.on_tick(), None);
    }

    #[test]
    fn late_pong_after_breakup_changes_nothing() {
        let mut sup = supervisor();
        sup.on_tick();
        sup.on_tick();
        sup.record_pong();
        assert_eq!(sup.on_tick(), None);
    }

    #[test]
    fn stop_is_idempotent() {
        let mut sup = supervisor();
        sup.stop();
        sup.stop();
        assert!(sup.is_stopped());
        assert_eq!(sup.on_tick(), None);
    }

    #[test]
    fn default_interval_is_two_seconds() {
        assert_eq!(
            SupervisorConfig::default().interval,
            Duration::from_millis(2000)
        );
    }

    #[test]
    fn ping_payload_marker_bytes() {
        assert_eq!(PING_PAYLOAD, &[0x08, 0x01, 0x08, 0x01]);
    }
}
