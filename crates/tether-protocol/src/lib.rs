//! # tether-protocol
//!
//! The Tether messaging core: sequenced, hash-verified envelopes with
//! go-back-N retransmission driven by cumulative `OK` / gap-reporting
//! `FAILED` feedback, plus tick-driven ping/pong liveness supervision.
//!
//! Pure logic: no sockets, no timers, no async. A runtime (see
//! `tether-client` and `tether-server`) owns one [`engine::Engine`] and one
//! [`supervisor::Supervisor`] per connection and wires them to a WebSocket.
//!
//! ## Crate structure
//!
//! - [`envelope`]: Envelope, factory constructors, content hashing
//! - [`codec`]: Codec trait and the JSON wire encoding
//! - [`buffer`]: Buffer entries and their lifecycle states
//! - [`engine`]: Per-connection sequencing, delivery, feedback engine
//! - [`supervisor`]: Liveness supervision state
//! - [`stats`]: Per-engine counters
//! - [`error`]: Protocol error types

pub mod buffer;
pub mod codec;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod stats;
pub mod supervisor;
