//! # Protocol Errors
//!
//! Failures are connection-scoped. A malformed text frame costs only that
//! frame; a frame kind outside the protocol costs the connection that
//! produced it. Nothing here is fatal to the process.

use thiserror::Error;

/// Errors raised while handling inbound traffic.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The frame did not decode to an envelope. The frame is dropped without
    /// touching buffer state, and no feedback is sent for it.
    #[error("malformed envelope: {reason}")]
    MalformedEnvelope { reason: String },

    /// The peer sent a frame kind the protocol does not use (e.g. binary).
    /// The connection that produced it must be closed.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
}
